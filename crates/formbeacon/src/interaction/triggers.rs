//! Remembers which call-to-action opened a form.
//!
//! ```html
//! <button class="form-trigger" data-click-source="hero" data-click-section="cta" data-intent="signup">
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::Serialize;

use crate::dom::{DomError, DomHost, has_class};

pub const FORM_TRIGGER_CLASS: &str = "form-trigger";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FormTriggerData {
    pub click_source: Option<String>,
    pub click_section: Option<String>,
    pub intent: Option<String>,
}

/// Shared, last-writer-wins store read by the form flows.
#[derive(Clone, Default)]
pub struct FormTriggerStore(Rc<RefCell<FormTriggerData>>);

impl FormTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> FormTriggerData {
        self.0.borrow().clone()
    }

    pub fn set(&self, data: FormTriggerData) {
        *self.0.borrow_mut() = data;
    }
}

/// Document-level click delegation for `.form-trigger` elements.
pub struct FormTriggers<D: DomHost + 'static> {
    dom: Rc<D>,
    listener: Option<D::Listener>,
}

impl<D: DomHost + 'static> FormTriggers<D> {
    pub fn attach(dom: Rc<D>, store: FormTriggerStore) -> Result<Self, DomError> {
        let weak_dom: Weak<D> = Rc::downgrade(&dom);
        let listener = dom.add_listener(
            &dom.document(),
            "click",
            Box::new(move |target| {
                let Some(dom) = weak_dom.upgrade() else {
                    return;
                };
                if !has_class(dom.as_ref(), target, FORM_TRIGGER_CLASS) {
                    return;
                }
                let data = FormTriggerData {
                    click_source: dom.get_attribute(target, "data-click-source"),
                    click_section: dom.get_attribute(target, "data-click-section"),
                    intent: dom.get_attribute(target, "data-intent"),
                };
                log::debug!("[FormTrigger] {data:?}");
                store.set(data);
            }),
        )?;
        Ok(Self {
            dom,
            listener: Some(listener),
        })
    }

    pub fn detach(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.dom.remove_listener(listener);
        }
    }
}

impl<D: DomHost + 'static> Drop for FormTriggers<D> {
    fn drop(&mut self) {
        self.detach();
    }
}

use std::collections::HashSet;
use std::rc::{Rc, Weak};

use crate::dom::{DomError, DomHost};

pub const FIELD_ID_ATTRIBUTE: &str = "data-field-id";

type BlurCallback = Rc<dyn Fn(&str, &str)>;

/// Reports `(field_id, trimmed value)` each time a tracked field loses focus.
pub struct FieldBlurTracking<D: DomHost + 'static> {
    dom: Rc<D>,
    on_blur: BlurCallback,
    tracked: HashSet<String>,
    listeners: Vec<D::Listener>,
}

impl<D: DomHost + 'static> FieldBlurTracking<D> {
    /// Listen on every element under `root` that carries `data-field-id`.
    pub fn attach(
        dom: Rc<D>,
        root: &D::Node,
        on_blur: impl Fn(&str, &str) + 'static,
    ) -> Result<Self, DomError> {
        let mut tracking = Self {
            dom: dom.clone(),
            on_blur: Rc::new(on_blur),
            tracked: HashSet::new(),
            listeners: Vec::new(),
        };
        let selector = format!("[{FIELD_ID_ATTRIBUTE}]");
        for field in dom.query_selector_all(root, &selector) {
            let Some(field_id) = dom.get_attribute(&field, FIELD_ID_ATTRIBUTE) else {
                continue;
            };
            tracking.listen(&field, field_id)?;
        }
        Ok(tracking)
    }

    /// Tag `field` with `field_id` and start listening to it.
    pub fn track_field(&mut self, field: &D::Node, field_id: &str) -> Result<(), DomError> {
        if self.tracked.contains(field_id) {
            return Ok(());
        }
        self.dom.set_attribute(field, FIELD_ID_ATTRIBUTE, field_id)?;
        self.listen(field, field_id.to_owned())
    }

    pub fn tracked_count(&self) -> usize {
        self.listeners.len()
    }

    /// Remove every listener. Safe to call more than once.
    pub fn detach(&mut self) {
        for listener in self.listeners.drain(..) {
            self.dom.remove_listener(listener);
        }
        self.tracked.clear();
    }

    fn listen(&mut self, field: &D::Node, field_id: String) -> Result<(), DomError> {
        if !self.tracked.insert(field_id) {
            return Ok(());
        }
        let dom: Weak<D> = Rc::downgrade(&self.dom);
        let on_blur = self.on_blur.clone();
        let listener = self.dom.add_listener(
            field,
            "blur",
            Box::new(move |target| {
                let Some(dom) = dom.upgrade() else {
                    return;
                };
                let Some(field_id) = dom.get_attribute(target, FIELD_ID_ATTRIBUTE) else {
                    return;
                };
                let value = dom.field_value(target).unwrap_or_default();
                on_blur(&field_id, value.trim());
            }),
        )?;
        self.listeners.push(listener);
        Ok(())
    }
}

impl<D: DomHost + 'static> Drop for FieldBlurTracking<D> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::MemoryDom;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<(String, String)>>>, impl Fn(&str, &str) + 'static) {
        let seen: Rc<RefCell<Vec<(String, String)>>> = Rc::default();
        let sink = seen.clone();
        (seen, move |id: &str, value: &str| {
            sink.borrow_mut().push((id.to_owned(), value.to_owned()))
        })
    }

    #[test]
    fn reports_trimmed_value_on_blur() {
        let dom = Rc::new(MemoryDom::new());
        let form = dom.element("form");
        let email = dom.child(&form, "input", &[(FIELD_ID_ATTRIBUTE, "email")]);
        dom.child(&form, "input", &[("name", "untracked")]);
        let (seen, on_blur) = recorder();

        let tracking = FieldBlurTracking::attach(dom.clone(), &dom.document(), on_blur).unwrap();
        assert_eq!(tracking.tracked_count(), 1);

        dom.set_value(&email, "  ana@example.com ");
        dom.dispatch(&email, "blur");
        assert_eq!(
            *seen.borrow(),
            vec![("email".to_owned(), "ana@example.com".to_owned())]
        );
    }

    #[test]
    fn detach_removes_every_listener() {
        let dom = Rc::new(MemoryDom::new());
        let name = dom.child(&dom.document(), "input", &[(FIELD_ID_ATTRIBUTE, "name")]);
        let phone = dom.element("input");
        let (seen, on_blur) = recorder();

        let mut tracking = FieldBlurTracking::attach(dom.clone(), &dom.document(), on_blur).unwrap();
        tracking.track_field(&phone, "phone").unwrap();
        tracking.track_field(&phone, "phone").unwrap();
        assert_eq!(dom.listener_count(), 2);

        tracking.detach();
        assert_eq!(dom.listener_count(), 0);
        dom.dispatch(&name, "blur");
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn drop_detaches() {
        let dom = Rc::new(MemoryDom::new());
        dom.child(&dom.document(), "textarea", &[(FIELD_ID_ATTRIBUTE, "message")]);
        let (_seen, on_blur) = recorder();
        let tracking = FieldBlurTracking::attach(dom.clone(), &dom.document(), on_blur).unwrap();
        assert_eq!(dom.listener_count(), 1);
        drop(tracking);
        assert_eq!(dom.listener_count(), 0);
    }
}

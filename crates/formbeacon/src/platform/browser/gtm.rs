use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::Closure;
use web_sys::{CustomEvent, CustomEventInit, Document, HtmlScriptElement, Window};

use crate::gtm::GtmHost;

use super::js_error;

/// Arms trigger listeners on `window` and injects the container script.
pub struct WindowGtmHost {
    window: Window,
    document: Document,
    armed: RefCell<Vec<(String, Closure<dyn FnMut()>)>>,
    // Disarming happens inside a trigger callback, so closures outlive their
    // listener until the host is dropped.
    retired: RefCell<Vec<Closure<dyn FnMut()>>>,
}

impl WindowGtmHost {
    pub fn new(window: Window, document: Document) -> Self {
        Self {
            window,
            document,
            armed: RefCell::new(Vec::new()),
            retired: RefCell::new(Vec::new()),
        }
    }

    fn insert_script(&self, script: &HtmlScriptElement) -> Result<(), String> {
        let first_script = self.document.query_selector("script").map_err(js_error)?;
        match first_script.and_then(|first| first.parent_node().map(|parent| (first, parent))) {
            Some((first, parent)) => parent
                .insert_before(script, Some(&first))
                .map(drop)
                .map_err(js_error),
            None => {
                let body = self.document.body().ok_or("document has no body")?;
                body.append_child(script).map(drop).map_err(js_error)
            }
        }
    }
}

impl GtmHost for WindowGtmHost {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn arm_triggers(&self, events: &[&str], on_trigger: Rc<dyn Fn()>) {
        let mut armed = self.armed.borrow_mut();
        for event in events {
            let on_trigger = on_trigger.clone();
            let closure = Closure::<dyn FnMut()>::new(move || on_trigger());
            if let Err(error) = self
                .window
                .add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
            {
                log::warn!("[GTM] could not listen to `{event}`: {}", js_error(error));
                continue;
            }
            armed.push(((*event).to_owned(), closure));
        }
    }

    fn disarm_triggers(&self) {
        let armed = std::mem::take(&mut *self.armed.borrow_mut());
        let mut retired = self.retired.borrow_mut();
        for (event, closure) in armed {
            if let Err(error) = self
                .window
                .remove_event_listener_with_callback(&event, closure.as_ref().unchecked_ref())
            {
                log::warn!("[GTM] could not stop listening to `{event}`: {}", js_error(error));
            }
            retired.push(closure);
        }
    }

    fn inject_script(&self, src: &str, on_load: Box<dyn FnOnce()>) {
        let script = match self.document.create_element("script") {
            Ok(element) => element.unchecked_into::<HtmlScriptElement>(),
            Err(error) => {
                log::error!("[GTM] could not create script element: {}", js_error(error));
                return;
            }
        };
        script.set_defer(true);
        script.set_src(src);
        let on_load = Closure::once_into_js(move || on_load());
        script.set_onload(Some(on_load.unchecked_ref()));
        if let Err(error) = self.insert_script(&script) {
            log::error!("[GTM] could not insert script: {error}");
        }
    }

    fn dispatch_event(&self, name: &str) {
        let init = CustomEventInit::new();
        init.set_bubbles(true);
        let event = match CustomEvent::new_with_event_init_dict(name, &init) {
            Ok(event) => event,
            Err(error) => {
                log::warn!("[GTM] could not create `{name}` event: {}", js_error(error));
                return;
            }
        };
        if let Err(error) = self.document.dispatch_event(&event) {
            log::warn!("[GTM] could not dispatch `{name}`: {}", js_error(error));
        }
    }
}

impl Drop for WindowGtmHost {
    fn drop(&mut self) {
        self.disarm_triggers();
    }
}

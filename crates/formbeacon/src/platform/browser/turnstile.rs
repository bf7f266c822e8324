//! `window.turnstile` bindings.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Function, Object, Reflect};
use wasm_bindgen::prelude::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Node, Window};
use zoon::Task;

use crate::challenge::{
    ChallengeApi, ChallengeError, ChallengeGlobal, RenderOptions, WidgetId,
};

use super::js_error;

const GLOBAL: &str = "turnstile";

// Owned per widget; the JS side only holds references.
struct WidgetCallbacks {
    on_token: Closure<dyn Fn(String)>,
    on_error: Closure<dyn Fn(JsValue)>,
    on_expired: Closure<dyn Fn()>,
}

pub struct TurnstileGlobal {
    window: Window,
}

impl TurnstileGlobal {
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

impl ChallengeGlobal<Node> for TurnstileGlobal {
    fn lookup(&self) -> Option<Rc<dyn ChallengeApi<Node>>> {
        let object = Reflect::get(&self.window, &JsValue::from_str(GLOBAL)).ok()?;
        if object.is_undefined() || object.is_null() {
            return None;
        }
        Some(Rc::new(TurnstileApi {
            object,
            callbacks: RefCell::new(HashMap::new()),
        }))
    }
}

pub struct TurnstileApi {
    object: JsValue,
    callbacks: RefCell<HashMap<WidgetId, WidgetCallbacks>>,
}

impl TurnstileApi {
    fn method(&self, name: &str) -> Result<Function, String> {
        Reflect::get(&self.object, &JsValue::from_str(name))
            .map_err(js_error)?
            .dyn_into::<Function>()
            .map_err(|_| format!("turnstile.{name} is not a function"))
    }

    fn call_with_widget(&self, name: &str, widget: &WidgetId) -> Result<(), String> {
        self.method(name)?
            .call1(&self.object, &JsValue::from_str(&widget.0))
            .map(drop)
            .map_err(js_error)
    }
}

impl ChallengeApi<Node> for TurnstileApi {
    fn render(&self, container: &Node, options: RenderOptions) -> Result<WidgetId, ChallengeError> {
        let RenderOptions {
            site_key,
            on_token,
            on_error,
            on_expired,
        } = options;
        let callbacks = WidgetCallbacks {
            on_token: Closure::wrap(on_token),
            on_error: Closure::<dyn Fn(JsValue)>::new(move |reason: JsValue| {
                on_error(js_error(reason))
            }),
            on_expired: Closure::wrap(on_expired),
        };

        let parameters = Object::new();
        let site_key = JsValue::from_str(&site_key);
        let entries: [(&str, &JsValue); 4] = [
            ("sitekey", &site_key),
            ("callback", callbacks.on_token.as_ref()),
            ("error-callback", callbacks.on_error.as_ref()),
            ("expired-callback", callbacks.on_expired.as_ref()),
        ];
        for (key, value) in entries {
            Reflect::set(&parameters, &JsValue::from_str(key), value)
                .map_err(|error| ChallengeError::Render(js_error(error)))?;
        }

        let widget = self
            .method("render")
            .map_err(ChallengeError::Render)?
            .call2(&self.object, container, &parameters)
            .map_err(|error| ChallengeError::Render(js_error(error)))?
            .as_string()
            .map(WidgetId)
            .ok_or_else(|| ChallengeError::Render("render returned no widget id".to_owned()))?;

        self.callbacks.borrow_mut().insert(widget.clone(), callbacks);
        Ok(widget)
    }

    fn remove(&self, widget: &WidgetId) -> Result<(), ChallengeError> {
        let result = self
            .call_with_widget("remove", widget)
            .map_err(ChallengeError::Remove);
        // Removal may run inside one of the widget's own callbacks.
        if let Some(callbacks) = self.callbacks.borrow_mut().remove(widget) {
            Task::start(async move { drop(callbacks) });
        }
        result
    }

    fn reset(&self, widget: &WidgetId) -> Result<(), ChallengeError> {
        self.call_with_widget("reset", widget)
            .map_err(ChallengeError::Reset)
    }
}

//! [`DomHost`] over `web_sys`.

use js_sys::Array;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::Closure;
use web_sys::{
    Document, Element, Event, EventTarget, HtmlInputElement, HtmlTextAreaElement,
    IntersectionObserver, IntersectionObserverEntry, IntersectionObserverInit, Node, ShadowRoot,
    ShadowRootInit, ShadowRootMode,
};

use crate::dom::{DomError, DomHost, NodeHandler, StyleSheetSource};

use super::js_error;

const VISIBILITY_THRESHOLD: f64 = 0.5;

/// Keeps the JS callback alive until the listener is removed.
pub enum WebListener {
    Event {
        target: EventTarget,
        event: String,
        closure: Closure<dyn FnMut(Event)>,
    },
    Visibility {
        observer: IntersectionObserver,
        closure: Closure<dyn FnMut(Array)>,
    },
}

pub struct WebDom {
    document: Document,
}

impl WebDom {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    fn element<'a>(node: &'a Node) -> Result<&'a Element, DomError> {
        node.dyn_ref::<Element>()
            .ok_or_else(|| DomError::Operation(format!("{} is not an element", node.node_name())))
    }
}

// `querySelector` lives on the ParentNode mixin, so each root kind is tried.
fn query(root: &Node, selector: &str) -> Option<Element> {
    let result = if let Some(element) = root.dyn_ref::<Element>() {
        element.query_selector(selector)
    } else if let Some(document) = root.dyn_ref::<Document>() {
        document.query_selector(selector)
    } else if let Some(shadow) = root.dyn_ref::<ShadowRoot>() {
        shadow.query_selector(selector)
    } else {
        return None;
    };
    result.ok().flatten()
}

fn query_all(root: &Node, selector: &str) -> Vec<Node> {
    let result = if let Some(element) = root.dyn_ref::<Element>() {
        element.query_selector_all(selector)
    } else if let Some(document) = root.dyn_ref::<Document>() {
        document.query_selector_all(selector)
    } else if let Some(shadow) = root.dyn_ref::<ShadowRoot>() {
        shadow.query_selector_all(selector)
    } else {
        return Vec::new();
    };
    let Ok(list) = result else {
        return Vec::new();
    };
    (0..list.length()).filter_map(|index| list.get(index)).collect()
}

impl DomHost for WebDom {
    type Node = Node;
    type Listener = WebListener;

    fn document(&self) -> Node {
        self.document.clone().into()
    }

    fn create_element(&self, tag: &str) -> Result<Node, DomError> {
        self.document
            .create_element(tag)
            .map(Into::into)
            .map_err(|error| DomError::CreateElement(js_error(error)))
    }

    fn append_child(&self, parent: &Node, child: &Node) -> Result<(), DomError> {
        parent
            .append_child(child)
            .map(drop)
            .map_err(|error| DomError::Operation(js_error(error)))
    }

    fn remove(&self, node: &Node) -> Result<(), DomError> {
        let Some(parent) = node.parent_node() else {
            return Ok(());
        };
        parent
            .remove_child(node)
            .map(drop)
            .map_err(|error| DomError::Operation(js_error(error)))
    }

    fn clone_node(&self, node: &Node) -> Result<Node, DomError> {
        node.clone_node_with_deep(true)
            .map_err(|error| DomError::Operation(js_error(error)))
    }

    fn set_attribute(&self, node: &Node, name: &str, value: &str) -> Result<(), DomError> {
        Self::element(node)?
            .set_attribute(name, value)
            .map_err(|error| DomError::Operation(js_error(error)))
    }

    fn get_attribute(&self, node: &Node, name: &str) -> Option<String> {
        node.dyn_ref::<Element>()?.get_attribute(name)
    }

    fn attributes(&self, node: &Node) -> Vec<(String, String)> {
        let Some(element) = node.dyn_ref::<Element>() else {
            return Vec::new();
        };
        element
            .get_attribute_names()
            .iter()
            .filter_map(|name| name.as_string())
            .filter_map(|name| {
                let value = element.get_attribute(&name)?;
                Some((name, value))
            })
            .collect()
    }

    fn text_content(&self, node: &Node) -> String {
        node.text_content().unwrap_or_default()
    }

    fn field_value(&self, node: &Node) -> Option<String> {
        if let Some(input) = node.dyn_ref::<HtmlInputElement>() {
            return Some(input.value());
        }
        node.dyn_ref::<HtmlTextAreaElement>().map(HtmlTextAreaElement::value)
    }

    fn query_selector(&self, root: &Node, selector: &str) -> Option<Node> {
        query(root, selector).map(Into::into)
    }

    fn query_selector_all(&self, root: &Node, selector: &str) -> Vec<Node> {
        query_all(root, selector)
    }

    fn shadow_root(&self, host: &Node) -> Option<Node> {
        host.dyn_ref::<Element>()?.shadow_root().map(Into::into)
    }

    fn attach_shadow(&self, host: &Node) -> Result<Node, DomError> {
        let init = ShadowRootInit::new(ShadowRootMode::Open);
        Self::element(host)?
            .attach_shadow(&init)
            .map(Into::into)
            .map_err(|error| DomError::AttachShadow(js_error(error)))
    }

    fn shadow_host_of(&self, node: &Node) -> Option<Node> {
        let root = node.get_root_node();
        root.dyn_ref::<ShadowRoot>().map(|shadow| shadow.host().into())
    }

    fn stylesheets(&self) -> Vec<Result<StyleSheetSource<Node>, DomError>> {
        let sheets = self.document.style_sheets();
        (0..sheets.length())
            .filter_map(|index| sheets.item(index))
            .map(|sheet| match sheet.href() {
                Ok(Some(href)) => Ok(StyleSheetSource::External { href }),
                Ok(None) => sheet
                    .owner_node()
                    .map(|owner| StyleSheetSource::Inline { owner })
                    .ok_or_else(|| DomError::StyleSheet("sheet has no owner node".to_owned())),
                Err(error) => Err(DomError::StyleSheet(js_error(error))),
            })
            .collect()
    }

    fn add_listener(
        &self,
        target: &Node,
        event: &str,
        mut handler: NodeHandler<Node>,
    ) -> Result<WebListener, DomError> {
        let closure = Closure::<dyn FnMut(Event)>::new(move |event: Event| {
            if let Some(node) = event.target().and_then(|target| target.dyn_into::<Node>().ok()) {
                handler(&node);
            }
        });
        let target: EventTarget = target.clone().into();
        target
            .add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
            .map_err(|error| DomError::Operation(js_error(error)))?;
        Ok(WebListener::Event {
            target,
            event: event.to_owned(),
            closure,
        })
    }

    fn observe_visibility(
        &self,
        node: &Node,
        mut handler: NodeHandler<Node>,
    ) -> Result<WebListener, DomError> {
        let element = Self::element(node)?;
        let closure = Closure::<dyn FnMut(Array)>::new(move |entries: Array| {
            for entry in entries.iter() {
                let entry: IntersectionObserverEntry = entry.unchecked_into();
                if entry.is_intersecting() {
                    handler(&entry.target().into());
                }
            }
        });
        let init = IntersectionObserverInit::new();
        init.set_threshold(&VISIBILITY_THRESHOLD.into());
        let observer =
            IntersectionObserver::new_with_options(closure.as_ref().unchecked_ref(), &init)
                .map_err(|error| DomError::Operation(js_error(error)))?;
        observer.observe(element);
        Ok(WebListener::Visibility { observer, closure })
    }

    fn remove_listener(&self, listener: WebListener) {
        match listener {
            WebListener::Event {
                target,
                event,
                closure,
            } => {
                if let Err(error) = target
                    .remove_event_listener_with_callback(&event, closure.as_ref().unchecked_ref())
                {
                    log::warn!("[Dom] could not remove `{event}` listener: {}", js_error(error));
                }
            }
            WebListener::Visibility { observer, .. } => observer.disconnect(),
        }
    }
}

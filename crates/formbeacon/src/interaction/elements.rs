//! Declarative click and section-view tracking.
//!
//! Page authors mark elements with class `gtm-track-element` and a
//! `data-gtm-category` of `button` or `section`. Any other `data-gtm-*`
//! attribute is forwarded, snake_cased without the prefix.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::attributes::Attributes;
use crate::dom::{DomError, DomHost, has_class};
use crate::tracker::EventTracker;

pub const TRACK_CLASS: &str = "gtm-track-element";
const CATEGORY_ATTRIBUTE: &str = "data-gtm-category";
const DATA_GTM_PREFIX: &str = "data-gtm-";
const MAX_TEXT_CHARS: usize = 100;

/// Attributes read off a tracked element.
pub fn extract_attributes<D: DomHost>(dom: &D, element: &D::Node) -> Attributes {
    let mut attributes = Attributes::new();
    let mut put = |key: String, value: String| {
        if !value.is_empty() {
            attributes.insert(key, Value::String(value));
        }
    };
    put("element_id".to_owned(), dom.get_attribute(element, "id").unwrap_or_default());
    put(
        "element_class".to_owned(),
        dom.get_attribute(element, "class").unwrap_or_default(),
    );
    put(
        "element_text".to_owned(),
        dom.text_content(element)
            .trim()
            .chars()
            .take(MAX_TEXT_CHARS)
            .collect(),
    );
    for (name, value) in dom.attributes(element) {
        if let Some(key) = name.strip_prefix(DATA_GTM_PREFIX) {
            attributes.insert(key.replace('-', "_"), Value::String(value));
        }
    }
    attributes
}

fn string_or(attributes: &Attributes, keys: &[&str], fallback: &str) -> Value {
    keys.iter()
        .filter_map(|key| attributes.get(*key).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map_or_else(|| Value::String(fallback.to_owned()), |value| Value::String(value.to_owned()))
}

pub struct ElementTracking<D: DomHost + 'static> {
    dom: Rc<D>,
    listeners: Vec<D::Listener>,
    viewed: Rc<RefCell<Vec<D::Node>>>,
}

impl<D: DomHost + 'static> ElementTracking<D> {
    /// Delegate button clicks from the document and observe every section
    /// present under `root` now.
    pub fn attach(dom: Rc<D>, root: &D::Node, tracker: Rc<EventTracker>) -> Result<Self, DomError> {
        let viewed = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Vec::new();

        let weak_dom: Weak<D> = Rc::downgrade(&dom);
        let click_tracker = tracker.clone();
        listeners.push(dom.add_listener(
            &dom.document(),
            "click",
            Box::new(move |target| {
                let Some(dom) = weak_dom.upgrade() else {
                    return;
                };
                if has_class(dom.as_ref(), target, TRACK_CLASS)
                    && dom.get_attribute(target, CATEGORY_ATTRIBUTE).as_deref() == Some("button")
                {
                    track_button_click(dom.as_ref(), target, &click_tracker);
                }
            }),
        )?);

        for element in dom.query_selector_all(root, &format!(".{TRACK_CLASS}")) {
            if dom.get_attribute(&element, CATEGORY_ATTRIBUTE).as_deref() != Some("section") {
                continue;
            }
            let weak_dom: Weak<D> = Rc::downgrade(&dom);
            let viewed = viewed.clone();
            let tracker = tracker.clone();
            listeners.push(dom.observe_visibility(
                &element,
                Box::new(move |target| {
                    let Some(dom) = weak_dom.upgrade() else {
                        return;
                    };
                    if viewed.borrow().contains(target) {
                        return;
                    }
                    viewed.borrow_mut().push(target.clone());
                    track_section_view(dom.as_ref(), target, &tracker);
                }),
            )?);
        }

        Ok(Self {
            dom,
            listeners,
            viewed,
        })
    }

    pub fn viewed_sections(&self) -> usize {
        self.viewed.borrow().len()
    }

    pub fn detach(&mut self) {
        for listener in self.listeners.drain(..) {
            self.dom.remove_listener(listener);
        }
        self.viewed.borrow_mut().clear();
    }
}

impl<D: DomHost + 'static> Drop for ElementTracking<D> {
    fn drop(&mut self) {
        self.detach();
    }
}

fn track_button_click<D: DomHost>(dom: &D, element: &D::Node, tracker: &EventTracker) {
    let attributes = extract_attributes(dom, element);
    let mut click = Attributes::new();
    click.insert(
        "click_type".to_owned(),
        string_or(&attributes, &["click_type"], "button_click"),
    );
    click.insert(
        "click_text".to_owned(),
        string_or(&attributes, &["element_text"], "button_click"),
    );
    click.insert(
        "click_source".to_owned(),
        string_or(&attributes, &["source"], "unknown"),
    );
    tracker.click(click);
}

fn track_section_view<D: DomHost>(dom: &D, element: &D::Node, tracker: &EventTracker) {
    let attributes = extract_attributes(dom, element);
    let mut view = Attributes::new();
    view.insert(
        "click_type".to_owned(),
        string_or(&attributes, &["label", "element_id"], "section_view"),
    );
    view.insert(
        "section_name".to_owned(),
        string_or(&attributes, &["section_name"], "section_view"),
    );
    tracker.section_view(view);
}

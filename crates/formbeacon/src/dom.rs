//! Document access used by the isolation host, the widget bridge and the
//! interaction trackers.
//!
//! The trait mirrors the handful of DOM calls those components make. The
//! browser implementation lives in `platform::browser::dom`; tests use
//! `test_harness::MemoryDom`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The host element refused a shadow root.
    AttachShadow(String),
    CreateElement(String),
    /// A stylesheet could not be read or cloned.
    StyleSheet(String),
    /// Any other DOM call that threw.
    Operation(String),
}

impl fmt::Display for DomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomError::AttachShadow(reason) => write!(f, "attachShadow failed: {reason}"),
            DomError::CreateElement(reason) => write!(f, "createElement failed: {reason}"),
            DomError::StyleSheet(reason) => write!(f, "stylesheet not clonable: {reason}"),
            DomError::Operation(reason) => write!(f, "DOM operation failed: {reason}"),
        }
    }
}

impl std::error::Error for DomError {}

/// One entry of `document.styleSheets`.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleSheetSource<N> {
    /// Loaded from a URL; re-linked inside the boundary.
    External { href: String },
    /// Inline `<style>` element; cloned into the boundary.
    Inline { owner: N },
}

/// Callback attached to a node. Receives the event target.
pub type NodeHandler<N> = Box<dyn FnMut(&N)>;

pub trait DomHost {
    type Node: Clone + PartialEq + 'static;
    /// Registered listener or observer, given back to
    /// [`remove_listener`](Self::remove_listener).
    type Listener;

    /// The document itself, used as delegation target.
    fn document(&self) -> Self::Node;

    fn create_element(&self, tag: &str) -> Result<Self::Node, DomError>;
    fn append_child(&self, parent: &Self::Node, child: &Self::Node) -> Result<(), DomError>;
    /// Detach `node` from its parent; detached nodes are left alone.
    fn remove(&self, node: &Self::Node) -> Result<(), DomError>;
    fn clone_node(&self, node: &Self::Node) -> Result<Self::Node, DomError>;

    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str) -> Result<(), DomError>;
    fn get_attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
    /// All attributes in document order.
    fn attributes(&self, node: &Self::Node) -> Vec<(String, String)>;
    fn text_content(&self, node: &Self::Node) -> String;
    /// Current value of a form field, `None` for other elements.
    fn field_value(&self, node: &Self::Node) -> Option<String>;

    /// First descendant of `root` matching `selector`. Does not pierce
    /// shadow boundaries.
    fn query_selector(&self, root: &Self::Node, selector: &str) -> Option<Self::Node>;
    fn query_selector_all(&self, root: &Self::Node, selector: &str) -> Vec<Self::Node>;

    fn shadow_root(&self, host: &Self::Node) -> Option<Self::Node>;
    fn attach_shadow(&self, host: &Self::Node) -> Result<Self::Node, DomError>;
    /// Host element of the shadow tree `node` lives in.
    fn shadow_host_of(&self, node: &Self::Node) -> Option<Self::Node>;

    /// `document.styleSheets`, one result per sheet.
    fn stylesheets(&self) -> Vec<Result<StyleSheetSource<Self::Node>, DomError>>;

    fn add_listener(
        &self,
        target: &Self::Node,
        event: &str,
        handler: NodeHandler<Self::Node>,
    ) -> Result<Self::Listener, DomError>;
    /// Call `handler` each time `node` becomes at least half visible.
    fn observe_visibility(
        &self,
        node: &Self::Node,
        handler: NodeHandler<Self::Node>,
    ) -> Result<Self::Listener, DomError>;
    fn remove_listener(&self, listener: Self::Listener);
}

/// `true` when the whitespace-separated `class` attribute contains `class`.
pub fn has_class<D: DomHost>(dom: &D, node: &D::Node, class: &str) -> bool {
    dom.get_attribute(node, "class")
        .is_some_and(|classes| classes.split_whitespace().any(|name| name == class))
}

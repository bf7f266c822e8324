//! In-memory stand-ins for the page, used by the unit tests and by the
//! integration scenarios under `tests/`.
//!
//! Every fake records what it was asked to do so tests can assert on calls
//! instead of on browser side effects.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use formbeacon_protocol::{DataLayerEntry, EventPayload};
use futures_util::future::{self, LocalBoxFuture};
use serde_json::Value;

use crate::challenge::{ChallengeApi, ChallengeError, ChallengeGlobal, RenderOptions, WidgetId};
use crate::challenge::wait::Sleeper;
use crate::cookie::{CookieJar, decode_component};
use crate::dom::{DomError, DomHost, NodeHandler, StyleSheetSource};
use crate::gtm::GtmHost;
use crate::tracker::{EventSink, SinkError};

// --- Cookies ---

/// `document.cookie` kept in a map. Assignments are interpreted the way a
/// browser does for the attributes this crate writes.
#[derive(Default)]
pub struct MemoryCookieJar {
    cookies: RefCell<BTreeMap<String, String>>,
    assignments: RefCell<Vec<String>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jar holding one cookie with an already-encoded value.
    pub fn with_cookie(name: &str, raw_value: &str) -> Self {
        let jar = Self::new();
        jar.insert_raw(name, raw_value);
        jar
    }

    pub fn insert_raw(&self, name: &str, raw_value: &str) {
        self.cookies
            .borrow_mut()
            .insert(name.to_owned(), raw_value.to_owned());
    }

    /// Every assignment written so far, oldest first.
    pub fn assignments(&self) -> Vec<String> {
        self.assignments.borrow().clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cookies.borrow().contains_key(name)
    }
}

impl CookieJar for MemoryCookieJar {
    fn read(&self) -> String {
        self.cookies
            .borrow()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn write(&self, assignment: &str) {
        self.assignments.borrow_mut().push(assignment.to_owned());
        let mut parts = assignment.split(';').map(str::trim);
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let name = decode_component(name).unwrap_or_else(|| name.to_owned());
        let expired = parts
            .filter_map(|attribute| attribute.strip_prefix("max-age="))
            .filter_map(|max_age| max_age.parse::<i64>().ok())
            .any(|max_age| max_age <= 0);
        let mut cookies = self.cookies.borrow_mut();
        if expired {
            cookies.remove(&name);
        } else {
            cookies.insert(name, value.to_owned());
        }
    }
}

// --- Event sink ---

/// Data layer kept in a vector.
pub struct RecordingSink {
    entries: RefCell<Vec<DataLayerEntry>>,
    available: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            available: true,
        }
    }

    /// Sink that behaves like a page without an execution context.
    pub fn unavailable() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            available: false,
        }
    }

    pub fn entries(&self) -> Vec<DataLayerEntry> {
        self.entries.borrow().clone()
    }

    /// The data layer as the tag manager would see it.
    pub fn values(&self) -> Vec<Value> {
        self.entries.borrow().iter().map(DataLayerEntry::to_value).collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|entry| entry.event_name().map(str::to_owned))
            .collect()
    }

    /// Shaped events only; raw entries are skipped.
    pub fn payloads(&self) -> Vec<EventPayload> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|entry| match entry {
                DataLayerEntry::Event(payload) => Some(payload.clone()),
                DataLayerEntry::Raw(_) => None,
            })
            .collect()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn push(&self, entry: DataLayerEntry) -> Result<(), SinkError> {
        if !self.available {
            return Err(SinkError::Unavailable);
        }
        self.entries.borrow_mut().push(entry);
        Ok(())
    }
}

// --- DOM ---

struct NodeData {
    tag: String,
    attributes: RefCell<Vec<(String, String)>>,
    children: RefCell<Vec<MemoryNode>>,
    parent: RefCell<Weak<NodeData>>,
    shadow_root: RefCell<Option<MemoryNode>>,
    /// Set on shadow roots only.
    shadow_host: RefCell<Weak<NodeData>>,
    text: RefCell<String>,
    value: RefCell<Option<String>>,
}

/// Node of a [`MemoryDom`]. Equality is identity.
#[derive(Clone)]
pub struct MemoryNode(Rc<NodeData>);

impl PartialEq for MemoryNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.0.tag)?;
        for (name, value) in self.0.attributes.borrow().iter() {
            write!(f, " {name}=\"{value}\"")?;
        }
        write!(f, ">")
    }
}

impl MemoryNode {
    fn new(tag: &str) -> Self {
        Self(Rc::new(NodeData {
            tag: tag.to_owned(),
            attributes: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
            shadow_root: RefCell::new(None),
            shadow_host: RefCell::new(Weak::new()),
            text: RefCell::new(String::new()),
            value: RefCell::new(None),
        }))
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn parent(&self) -> Option<MemoryNode> {
        self.0.parent.borrow().upgrade().map(MemoryNode)
    }

    pub fn children(&self) -> Vec<MemoryNode> {
        self.0.children.borrow().clone()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.0
            .attributes
            .borrow()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    fn set_attribute(&self, name: &str, value: &str) {
        let mut attributes = self.0.attributes.borrow_mut();
        match attributes.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value.to_owned(),
            None => attributes.push((name.to_owned(), value.to_owned())),
        }
    }

    fn detach(&self) {
        if let Some(parent) = self.parent() {
            parent.0.children.borrow_mut().retain(|child| child != self);
        }
        *self.0.parent.borrow_mut() = Weak::new();
    }

    fn deep_clone(&self) -> MemoryNode {
        let copy = MemoryNode::new(&self.0.tag);
        *copy.0.attributes.borrow_mut() = self.0.attributes.borrow().clone();
        *copy.0.text.borrow_mut() = self.0.text.borrow().clone();
        *copy.0.value.borrow_mut() = self.0.value.borrow().clone();
        for child in self.children() {
            let child_copy = child.deep_clone();
            *child_copy.0.parent.borrow_mut() = Rc::downgrade(&copy.0);
            copy.0.children.borrow_mut().push(child_copy);
        }
        copy
    }

    fn text_content(&self) -> String {
        let mut text = self.0.text.borrow().clone();
        for child in self.children() {
            text.push_str(&child.text_content());
        }
        text
    }

    fn descendants(&self, out: &mut Vec<MemoryNode>) {
        for child in self.children() {
            out.push(child.clone());
            child.descendants(out);
        }
    }

    fn matches(&self, selector: &Selector) -> bool {
        if selector.tag.as_deref().is_some_and(|tag| tag != self.0.tag) {
            return false;
        }
        match &selector.filter {
            SelectorFilter::Any => true,
            SelectorFilter::Class(class) => self
                .attribute("class")
                .is_some_and(|classes| classes.split_whitespace().any(|name| name == class)),
            SelectorFilter::HasAttribute(name) => self.attribute(name).is_some(),
            SelectorFilter::AttributeEquals(name, value) => {
                self.attribute(name).as_deref() == Some(value.as_str())
            }
        }
    }
}

enum SelectorFilter {
    Any,
    Class(String),
    HasAttribute(String),
    AttributeEquals(String, String),
}

/// `tag`, `.class`, `[attr]` or `[attr="value"]`, optionally prefixed by a tag.
struct Selector {
    tag: Option<String>,
    filter: SelectorFilter,
}

impl Selector {
    fn parse(selector: &str) -> Self {
        let split = selector.find(['.', '[']).unwrap_or(selector.len());
        let (tag, rest) = selector.split_at(split);
        let tag = (!tag.is_empty()).then(|| tag.to_owned());
        let filter = if let Some(class) = rest.strip_prefix('.') {
            SelectorFilter::Class(class.to_owned())
        } else if let Some(inner) = rest.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            match inner.split_once('=') {
                Some((name, value)) => SelectorFilter::AttributeEquals(
                    name.to_owned(),
                    value.trim_matches('"').to_owned(),
                ),
                None => SelectorFilter::HasAttribute(inner.to_owned()),
            }
        } else {
            SelectorFilter::Any
        };
        Self { tag, filter }
    }
}

/// Entry of `document.styleSheets` in a [`MemoryDom`].
#[derive(Clone, Debug)]
pub enum MemorySheet {
    External(String),
    Inline(MemoryNode),
    /// A sheet whose access throws (cross-origin rules, detached owner).
    Broken(String),
}

/// Handle returned by [`MemoryDom`] listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryListener(u64);

const VISIBLE_EVENT: &str = "@visible";

struct ListenerEntry {
    id: u64,
    target: MemoryNode,
    event: String,
    handler: Rc<RefCell<NodeHandler<MemoryNode>>>,
}

/// Document tree without a browser. Shadow roots, slots and listeners behave
/// enough like the real thing for the components in this crate.
pub struct MemoryDom {
    document: MemoryNode,
    stylesheets: RefCell<Vec<MemorySheet>>,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_listener: Cell<u64>,
    attach_shadow_calls: Cell<u32>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        Self {
            document: MemoryNode::new("#document"),
            stylesheets: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            attach_shadow_calls: Cell::new(0),
        }
    }

    /// New element appended to the document.
    pub fn element(&self, tag: &str) -> MemoryNode {
        let node = MemoryNode::new(tag);
        self.adopt(&self.document, &node);
        node
    }

    /// New element appended to `parent`, with attributes.
    pub fn child(&self, parent: &MemoryNode, tag: &str, attributes: &[(&str, &str)]) -> MemoryNode {
        let node = MemoryNode::new(tag);
        for (name, value) in attributes {
            node.set_attribute(name, value);
        }
        self.adopt(parent, &node);
        node
    }

    pub fn set_text(&self, node: &MemoryNode, text: &str) {
        *node.0.text.borrow_mut() = text.to_owned();
    }

    pub fn set_value(&self, node: &MemoryNode, value: &str) {
        *node.0.value.borrow_mut() = Some(value.to_owned());
    }

    pub fn add_stylesheet(&self, sheet: MemorySheet) {
        self.stylesheets.borrow_mut().push(sheet);
    }

    pub fn attach_shadow_calls(&self) -> u32 {
        self.attach_shadow_calls.get()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Fire `event` on `target`, bubbling up to the document.
    pub fn dispatch(&self, target: &MemoryNode, event: &str) {
        let mut path = vec![target.clone()];
        let mut current = target.parent();
        while let Some(node) = current {
            current = node.parent();
            path.push(node);
        }
        for node in path {
            self.fire(&node, event, target);
        }
    }

    /// Report `node` as visible to its observers.
    pub fn reveal(&self, node: &MemoryNode) {
        self.fire(node, VISIBLE_EVENT, node);
    }

    fn fire(&self, node: &MemoryNode, event: &str, target: &MemoryNode) {
        let handlers: Vec<_> = self
            .listeners
            .borrow()
            .iter()
            .filter(|entry| &entry.target == node && entry.event == event)
            .map(|entry| entry.handler.clone())
            .collect();
        for handler in handlers {
            (handler.borrow_mut())(target);
        }
    }

    fn adopt(&self, parent: &MemoryNode, child: &MemoryNode) {
        child.detach();
        *child.0.parent.borrow_mut() = Rc::downgrade(&parent.0);
        parent.0.children.borrow_mut().push(child.clone());
    }

    fn register(&self, target: &MemoryNode, event: &str, handler: NodeHandler<MemoryNode>) -> MemoryListener {
        let id = self.next_listener.get();
        self.next_listener.set(id + 1);
        self.listeners.borrow_mut().push(ListenerEntry {
            id,
            target: target.clone(),
            event: event.to_owned(),
            handler: Rc::new(RefCell::new(handler)),
        });
        MemoryListener(id)
    }
}

impl DomHost for MemoryDom {
    type Node = MemoryNode;
    type Listener = MemoryListener;

    fn document(&self) -> MemoryNode {
        self.document.clone()
    }

    fn create_element(&self, tag: &str) -> Result<MemoryNode, DomError> {
        if tag.is_empty() {
            return Err(DomError::CreateElement("empty tag name".to_owned()));
        }
        Ok(MemoryNode::new(tag))
    }

    fn append_child(&self, parent: &MemoryNode, child: &MemoryNode) -> Result<(), DomError> {
        self.adopt(parent, child);
        Ok(())
    }

    fn remove(&self, node: &MemoryNode) -> Result<(), DomError> {
        node.detach();
        Ok(())
    }

    fn clone_node(&self, node: &MemoryNode) -> Result<MemoryNode, DomError> {
        Ok(node.deep_clone())
    }

    fn set_attribute(&self, node: &MemoryNode, name: &str, value: &str) -> Result<(), DomError> {
        node.set_attribute(name, value);
        Ok(())
    }

    fn get_attribute(&self, node: &MemoryNode, name: &str) -> Option<String> {
        node.attribute(name)
    }

    fn attributes(&self, node: &MemoryNode) -> Vec<(String, String)> {
        node.0.attributes.borrow().clone()
    }

    fn text_content(&self, node: &MemoryNode) -> String {
        node.text_content()
    }

    fn field_value(&self, node: &MemoryNode) -> Option<String> {
        node.0.value.borrow().clone()
    }

    fn query_selector(&self, root: &MemoryNode, selector: &str) -> Option<MemoryNode> {
        self.query_selector_all(root, selector).into_iter().next()
    }

    fn query_selector_all(&self, root: &MemoryNode, selector: &str) -> Vec<MemoryNode> {
        let selector = Selector::parse(selector);
        let mut nodes = Vec::new();
        root.descendants(&mut nodes);
        nodes.retain(|node| node.matches(&selector));
        nodes
    }

    fn shadow_root(&self, host: &MemoryNode) -> Option<MemoryNode> {
        host.0.shadow_root.borrow().clone()
    }

    fn attach_shadow(&self, host: &MemoryNode) -> Result<MemoryNode, DomError> {
        self.attach_shadow_calls.set(self.attach_shadow_calls.get() + 1);
        if host.0.shadow_root.borrow().is_some() {
            return Err(DomError::AttachShadow(
                "shadow root already attached".to_owned(),
            ));
        }
        let root = MemoryNode::new("#shadow-root");
        *root.0.shadow_host.borrow_mut() = Rc::downgrade(&host.0);
        *host.0.shadow_root.borrow_mut() = Some(root.clone());
        Ok(root)
    }

    fn shadow_host_of(&self, node: &MemoryNode) -> Option<MemoryNode> {
        let mut current = node.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.0.shadow_host.borrow().upgrade().map(MemoryNode)
    }

    fn stylesheets(&self) -> Vec<Result<StyleSheetSource<MemoryNode>, DomError>> {
        self.stylesheets
            .borrow()
            .iter()
            .map(|sheet| match sheet {
                MemorySheet::External(href) => Ok(StyleSheetSource::External { href: href.clone() }),
                MemorySheet::Inline(owner) => Ok(StyleSheetSource::Inline { owner: owner.clone() }),
                MemorySheet::Broken(reason) => Err(DomError::StyleSheet(reason.clone())),
            })
            .collect()
    }

    fn add_listener(
        &self,
        target: &MemoryNode,
        event: &str,
        handler: NodeHandler<MemoryNode>,
    ) -> Result<MemoryListener, DomError> {
        Ok(self.register(target, event, handler))
    }

    fn observe_visibility(
        &self,
        node: &MemoryNode,
        handler: NodeHandler<MemoryNode>,
    ) -> Result<MemoryListener, DomError> {
        Ok(self.register(node, VISIBLE_EVENT, handler))
    }

    fn remove_listener(&self, listener: MemoryListener) {
        self.listeners
            .borrow_mut()
            .retain(|entry| entry.id != listener.0);
    }
}

// --- Challenge widget ---

struct FakeWidget {
    id: WidgetId,
    container: MemoryNode,
    options: Rc<RenderOptions>,
    removed: bool,
}

/// Recording stand-in for the challenge script's API object.
#[derive(Default)]
pub struct FakeChallengeApi {
    widgets: RefCell<Vec<FakeWidget>>,
    resets: RefCell<Vec<WidgetId>>,
    removals: RefCell<Vec<WidgetId>>,
    fail_render: Cell<bool>,
    fail_remove: Cell<bool>,
}

impl FakeChallengeApi {
    pub fn fail_render(&self) {
        self.fail_render.set(true);
    }

    pub fn fail_remove(&self) {
        self.fail_remove.set(true);
    }

    pub fn render_count(&self) -> usize {
        self.widgets.borrow().len()
    }

    pub fn rendered_into(&self) -> Vec<MemoryNode> {
        self.widgets
            .borrow()
            .iter()
            .map(|widget| widget.container.clone())
            .collect()
    }

    pub fn site_keys(&self) -> Vec<String> {
        self.widgets
            .borrow()
            .iter()
            .map(|widget| widget.options.site_key.clone())
            .collect()
    }

    pub fn removals(&self) -> Vec<WidgetId> {
        self.removals.borrow().clone()
    }

    pub fn resets(&self) -> Vec<WidgetId> {
        self.resets.borrow().clone()
    }

    fn latest_options(&self) -> Option<Rc<RenderOptions>> {
        self.widgets
            .borrow()
            .iter()
            .rev()
            .find(|widget| !widget.removed)
            .map(|widget| widget.options.clone())
    }

    /// Finish the challenge on the latest live widget.
    pub fn complete(&self, token: &str) {
        if let Some(options) = self.latest_options() {
            (options.on_token)(token.to_owned());
        }
    }

    pub fn fail(&self, message: &str) {
        if let Some(options) = self.latest_options() {
            (options.on_error)(message.to_owned());
        }
    }

    pub fn expire(&self) {
        if let Some(options) = self.latest_options() {
            (options.on_expired)();
        }
    }
}

impl ChallengeApi<MemoryNode> for FakeChallengeApi {
    fn render(&self, container: &MemoryNode, options: RenderOptions) -> Result<WidgetId, ChallengeError> {
        if self.fail_render.get() {
            return Err(ChallengeError::Render("invalid sitekey".to_owned()));
        }
        let mut widgets = self.widgets.borrow_mut();
        let id = WidgetId(format!("cf-chl-widget-{}", widgets.len()));
        widgets.push(FakeWidget {
            id: id.clone(),
            container: container.clone(),
            options: Rc::new(options),
            removed: false,
        });
        Ok(id)
    }

    fn remove(&self, widget: &WidgetId) -> Result<(), ChallengeError> {
        self.removals.borrow_mut().push(widget.clone());
        if self.fail_remove.get() {
            return Err(ChallengeError::Remove("widget not found".to_owned()));
        }
        if let Some(entry) = self
            .widgets
            .borrow_mut()
            .iter_mut()
            .find(|entry| &entry.id == widget)
        {
            entry.removed = true;
        }
        Ok(())
    }

    fn reset(&self, widget: &WidgetId) -> Result<(), ChallengeError> {
        self.resets.borrow_mut().push(widget.clone());
        Ok(())
    }
}

/// Page-global slot for the challenge API; empty until [`install`] is called.
///
/// [`install`]: FakeChallengeGlobal::install
#[derive(Default)]
pub struct FakeChallengeGlobal {
    api: Rc<FakeChallengeApi>,
    installed: Cell<bool>,
    lookups: Cell<u32>,
}

impl FakeChallengeGlobal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed() -> Self {
        let global = Self::default();
        global.install();
        global
    }

    pub fn install(&self) {
        self.installed.set(true);
    }

    pub fn api(&self) -> Rc<FakeChallengeApi> {
        self.api.clone()
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.get()
    }
}

impl ChallengeGlobal<MemoryNode> for FakeChallengeGlobal {
    fn lookup(&self) -> Option<Rc<dyn ChallengeApi<MemoryNode>>> {
        self.lookups.set(self.lookups.get() + 1);
        let api: Rc<dyn ChallengeApi<MemoryNode>> = self.api.clone();
        self.installed.get().then_some(api)
    }
}

// --- Timers ---

/// Sleeper whose sleeps complete at once. `on_sleep` runs before each one
/// resolves with the 1-based sleep count.
#[derive(Default)]
pub struct InstantSleeper {
    slept: Cell<u32>,
    on_sleep: RefCell<Option<Box<dyn Fn(u32)>>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_sleep(&self, hook: impl Fn(u32) + 'static) {
        *self.on_sleep.borrow_mut() = Some(Box::new(hook));
    }

    pub fn slept(&self) -> u32 {
        self.slept.get()
    }
}

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration_ms: u32) -> LocalBoxFuture<'static, ()> {
        let count = self.slept.get() + 1;
        self.slept.set(count);
        if let Some(hook) = self.on_sleep.borrow().as_ref() {
            hook(count);
        }
        Box::pin(future::ready(()))
    }
}

/// Sleeper that never wakes up.
#[derive(Default)]
pub struct StalledSleeper;

impl Sleeper for StalledSleeper {
    fn sleep(&self, _duration_ms: u32) -> LocalBoxFuture<'static, ()> {
        Box::pin(future::pending())
    }
}

// --- Tag manager host ---

/// Window stand-in for the tag manager loader.
#[derive(Default)]
pub struct FakeGtmHost {
    now_ms: Cell<f64>,
    armed: RefCell<Vec<String>>,
    trigger: RefCell<Option<Rc<dyn Fn()>>>,
    scripts: RefCell<Vec<String>>,
    pending_load: RefCell<Option<Box<dyn FnOnce()>>>,
    dispatched: RefCell<Vec<String>>,
}

impl FakeGtmHost {
    pub fn new(now_ms: f64) -> Self {
        Self {
            now_ms: Cell::new(now_ms),
            ..Self::default()
        }
    }

    /// Events that currently have a listener.
    pub fn armed(&self) -> Vec<String> {
        self.armed.borrow().clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.borrow().clone()
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.borrow().clone()
    }

    /// Simulate one of the armed window events.
    pub fn fire(&self, event: &str) {
        if !self.armed.borrow().iter().any(|armed| armed == event) {
            return;
        }
        let trigger = self.trigger.borrow().clone();
        if let Some(trigger) = trigger {
            trigger();
        }
    }

    /// Simulate the injected script finishing to load.
    pub fn finish_loading(&self) {
        let on_load = self.pending_load.borrow_mut().take();
        if let Some(on_load) = on_load {
            on_load();
        }
    }
}

impl GtmHost for FakeGtmHost {
    fn now_ms(&self) -> f64 {
        self.now_ms.get()
    }

    fn arm_triggers(&self, events: &[&str], on_trigger: Rc<dyn Fn()>) {
        *self.armed.borrow_mut() = events.iter().map(|event| (*event).to_owned()).collect();
        *self.trigger.borrow_mut() = Some(on_trigger);
    }

    fn disarm_triggers(&self) {
        self.armed.borrow_mut().clear();
        self.trigger.borrow_mut().take();
    }

    fn inject_script(&self, src: &str, on_load: Box<dyn FnOnce()>) {
        self.scripts.borrow_mut().push(src.to_owned());
        *self.pending_load.borrow_mut() = Some(on_load);
    }

    fn dispatch_event(&self, name: &str) {
        self.dispatched.borrow_mut().push(name.to_owned());
    }
}

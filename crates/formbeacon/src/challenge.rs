//! Bot-verification widget rendered across the shadow boundary.
//!
//! The challenge script only sees the light DOM, so the widget cannot be
//! rendered inside the boundary. The bridge puts a named `<slot>` inside the
//! boundary and renders into a same-named container appended to the
//! boundary host, which the browser projects back through the slot.
//!
//! Lifecycle: `Uninitialized → WaitingForGlobal → Initialized → Destroyed`,
//! with `Error` reachable from the first three. Callbacks fired from inside
//! `render` are held until it returns and then replayed in order; callbacks
//! arriving in any other phase but `Initialized` are dropped.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use futures_util::future::{AbortHandle, LocalBoxFuture, abortable};

use crate::config::ChallengeConfig;
use crate::dom::{DomError, DomHost};
use crate::portal::{PortalError, PortalKey, PortalLease, PortalRegistry};

pub mod wait;

use wait::{PollSchedule, Sleeper, WaitOutcome, wait_for_global};

/// Class of the light-DOM container the widget renders into.
pub const CONTAINER_CLASS: &str = "turnstile-container";

// --- Widget API ---

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WidgetId(pub String);

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Second argument of `turnstile.render`.
pub struct RenderOptions {
    pub site_key: String,
    pub on_token: Box<dyn Fn(String)>,
    pub on_error: Box<dyn Fn(String)>,
    pub on_expired: Box<dyn Fn()>,
}

/// The API object the challenge script publishes on the page.
pub trait ChallengeApi<N> {
    fn render(&self, container: &N, options: RenderOptions) -> Result<WidgetId, ChallengeError>;
    fn remove(&self, widget: &WidgetId) -> Result<(), ChallengeError>;
    fn reset(&self, widget: &WidgetId) -> Result<(), ChallengeError>;
}

/// Lookup of the API object; `None` until the script has loaded.
pub trait ChallengeGlobal<N> {
    fn lookup(&self) -> Option<Rc<dyn ChallengeApi<N>>>;
}

// --- Errors ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    NotMounted,
    Destroyed,
    /// The slot is not inside a shadow tree.
    NoBoundary,
    Dom(DomError),
    Portal(PortalError),
    Render(String),
    /// Reported by the widget through its error callback.
    Widget(String),
    Remove(String),
    Reset(String),
    GlobalUnavailable { attempts: u32 },
}

impl fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeError::NotMounted => write!(f, "challenge bridge is not mounted"),
            ChallengeError::Destroyed => write!(f, "challenge bridge was torn down"),
            ChallengeError::NoBoundary => write!(f, "slot is not inside a shadow root"),
            ChallengeError::Dom(error) => write!(f, "{error}"),
            ChallengeError::Portal(error) => write!(f, "{error}"),
            ChallengeError::Render(reason) => write!(f, "widget render failed: {reason}"),
            ChallengeError::Widget(reason) => write!(f, "widget error: {reason}"),
            ChallengeError::Remove(reason) => write!(f, "widget removal failed: {reason}"),
            ChallengeError::Reset(reason) => write!(f, "widget reset failed: {reason}"),
            ChallengeError::GlobalUnavailable { attempts } => {
                write!(f, "challenge script not available after {attempts} attempt(s)")
            }
        }
    }
}

impl std::error::Error for ChallengeError {}

impl From<DomError> for ChallengeError {
    fn from(error: DomError) -> Self {
        ChallengeError::Dom(error)
    }
}

impl From<PortalError> for ChallengeError {
    fn from(error: PortalError) -> Self {
        ChallengeError::Portal(error)
    }
}

// --- Bridge ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePhase {
    Uninitialized,
    WaitingForGlobal,
    Initialized,
    Destroyed,
    Error,
}

/// Caller callbacks. Tokens are delivered once per completed challenge.
pub struct ChallengeHandlers {
    pub on_token: Box<dyn Fn(String)>,
    pub on_error: Box<dyn Fn(&ChallengeError)>,
    pub on_expired: Box<dyn Fn()>,
}

impl ChallengeHandlers {
    pub fn new(on_token: impl Fn(String) + 'static) -> Self {
        Self {
            on_token: Box::new(on_token),
            on_error: Box::new(|_| {}),
            on_expired: Box::new(|| {}),
        }
    }

    pub fn on_error(mut self, on_error: impl Fn(&ChallengeError) + 'static) -> Self {
        self.on_error = Box::new(on_error);
        self
    }

    pub fn on_expired(mut self, on_expired: impl Fn() + 'static) -> Self {
        self.on_expired = Box::new(on_expired);
        self
    }
}

/// A widget callback held while `render` is still running.
enum WidgetCallback {
    Token(String),
    Error(String),
    Expired,
}

struct BridgeState<N> {
    phase: ChallengePhase,
    rendering: bool,
    deferred: Vec<WidgetCallback>,
    lease: Option<PortalLease<N>>,
    slot: Option<N>,
    api: Option<Rc<dyn ChallengeApi<N>>>,
    widget: Option<WidgetId>,
    last_token: Option<String>,
    poll: Option<AbortHandle>,
}

struct BridgeInner<D: DomHost> {
    dom: Rc<D>,
    global: Rc<dyn ChallengeGlobal<D::Node>>,
    sleeper: Rc<dyn Sleeper>,
    config: ChallengeConfig,
    handlers: ChallengeHandlers,
    state: RefCell<BridgeState<D::Node>>,
}

/// Owns one widget instance. Dropping the bridge tears it down.
pub struct ChallengeBridge<D: DomHost + 'static> {
    inner: Rc<BridgeInner<D>>,
}

impl<D: DomHost + 'static> ChallengeBridge<D> {
    pub fn new(
        dom: Rc<D>,
        global: Rc<dyn ChallengeGlobal<D::Node>>,
        sleeper: Rc<dyn Sleeper>,
        config: ChallengeConfig,
        handlers: ChallengeHandlers,
    ) -> Self {
        Self {
            inner: Rc::new(BridgeInner {
                dom,
                global,
                sleeper,
                config,
                handlers,
                state: RefCell::new(BridgeState {
                    phase: ChallengePhase::Uninitialized,
                    rendering: false,
                    deferred: Vec::new(),
                    lease: None,
                    slot: None,
                    api: None,
                    widget: None,
                    last_token: None,
                    poll: None,
                }),
            }),
        }
    }

    pub fn phase(&self) -> ChallengePhase {
        self.inner.state.borrow().phase
    }

    pub fn slot_name(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .lease
            .as_ref()
            .map(PortalLease::slot_name)
    }

    /// Light-DOM container the widget renders into.
    pub fn container(&self) -> Option<D::Node> {
        self.inner
            .state
            .borrow()
            .lease
            .as_ref()
            .map(|lease| lease.container().clone())
    }

    pub fn slot(&self) -> Option<D::Node> {
        self.inner.state.borrow().slot.clone()
    }

    pub fn widget_id(&self) -> Option<WidgetId> {
        self.inner.state.borrow().widget.clone()
    }

    /// Append the named slot to `slot_parent` (a node inside the boundary)
    /// and claim the matching light-DOM container next to the boundary host.
    /// Mounting twice is a no-op.
    pub fn mount(
        &self,
        registry: &PortalRegistry<D::Node>,
        slot_parent: &D::Node,
    ) -> Result<(), ChallengeError> {
        {
            let state = self.inner.state.borrow();
            if state.phase == ChallengePhase::Destroyed {
                return Err(ChallengeError::Destroyed);
            }
            if state.lease.is_some() {
                return Ok(());
            }
        }
        let dom = &self.inner.dom;
        let host = dom
            .shadow_host_of(slot_parent)
            .ok_or(ChallengeError::NoBoundary)?;

        let key = PortalKey::generate();
        let slot_name = key.slot_name();

        let slot = dom.create_element("slot")?;
        dom.set_attribute(&slot, "name", &slot_name)?;
        dom.append_child(slot_parent, &slot)?;

        let selector = format!("[slot=\"{slot_name}\"]");
        let container = match dom.query_selector(&host, &selector) {
            Some(container) => container,
            None => {
                let container = dom.create_element("div")?;
                dom.set_attribute(&container, "slot", &slot_name)?;
                dom.set_attribute(&container, "class", CONTAINER_CLASS)?;
                dom.append_child(&host, &container)?;
                container
            }
        };

        let release_dom = self.inner.dom.clone();
        let lease = registry.acquire(key, container, move |container| {
            if let Err(error) = release_dom.remove(container) {
                log::warn!("[Turnstile] could not remove widget container: {error}");
            }
        })?;

        let mut state = self.inner.state.borrow_mut();
        state.lease = Some(lease);
        state.slot = Some(slot);
        Ok(())
    }

    /// Render now when the global is present. Otherwise switch to waiting and
    /// return the poll future; the caller spawns it. The wait is cancelled
    /// by [`teardown`](Self::teardown).
    pub fn start(&self) -> Result<Option<LocalBoxFuture<'static, ()>>, ChallengeError> {
        {
            let state = self.inner.state.borrow();
            match state.phase {
                ChallengePhase::Uninitialized => {}
                ChallengePhase::Destroyed => return Err(ChallengeError::Destroyed),
                _ => return Ok(None),
            }
            if state.lease.is_none() {
                return Err(ChallengeError::NotMounted);
            }
        }

        if let Some(api) = self.inner.global.lookup() {
            BridgeInner::initialize(&self.inner, api);
            return Ok(None);
        }

        log::debug!("[Turnstile] global not loaded yet, polling");
        let schedule = PollSchedule {
            interval_ms: self.inner.config.poll_interval_ms,
            max_attempts: self.inner.config.max_poll_attempts,
        };
        let (wait, abort_handle) = abortable(wait_for_global(
            self.inner.global.clone(),
            self.inner.sleeper.clone(),
            schedule,
        ));
        {
            let mut state = self.inner.state.borrow_mut();
            state.phase = ChallengePhase::WaitingForGlobal;
            state.poll = Some(abort_handle);
        }

        let weak = Rc::downgrade(&self.inner);
        Ok(Some(Box::pin(async move {
            let outcome = wait.await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match outcome {
                Ok(WaitOutcome::Ready(api)) => BridgeInner::initialize(&inner, api),
                Ok(WaitOutcome::GaveUp { attempts }) => {
                    inner.fail(ChallengeError::GlobalUnavailable { attempts })
                }
                Err(_aborted) => log::debug!("[Turnstile] poll cancelled"),
            }
        })))
    }

    /// Cancel the poll, remove the widget and release the slot. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl<D: DomHost + 'static> Drop for ChallengeBridge<D> {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl<D: DomHost + 'static> BridgeInner<D> {
    fn initialize(this: &Rc<Self>, api: Rc<dyn ChallengeApi<D::Node>>) {
        let container = {
            let mut state = this.state.borrow_mut();
            state.poll = None;
            let container = match (state.phase, &state.lease) {
                (ChallengePhase::Uninitialized | ChallengePhase::WaitingForGlobal, Some(lease)) => {
                    lease.container().clone()
                }
                _ => return,
            };
            state.rendering = true;
            container
        };

        let options = RenderOptions {
            site_key: this.config.site_key.clone(),
            on_token: Box::new({
                let weak = Rc::downgrade(this);
                move |token| {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(WidgetCallback::Token(token));
                    }
                }
            }),
            on_error: Box::new({
                let weak = Rc::downgrade(this);
                move |reason| {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(WidgetCallback::Error(reason));
                    }
                }
            }),
            on_expired: Box::new({
                let weak: Weak<Self> = Rc::downgrade(this);
                move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(WidgetCallback::Expired);
                    }
                }
            }),
        };

        let rendered = api.render(&container, options);
        let (deferred, destroyed) = {
            let mut state = this.state.borrow_mut();
            state.rendering = false;
            (
                std::mem::take(&mut state.deferred),
                state.phase == ChallengePhase::Destroyed,
            )
        };

        match rendered {
            Ok(widget) if destroyed => {
                if let Err(error) = api.remove(&widget) {
                    (this.handlers.on_error)(&error);
                }
            }
            Ok(widget) => {
                log::info!("[Turnstile] widget {widget} rendered");
                {
                    let mut state = this.state.borrow_mut();
                    state.phase = ChallengePhase::Initialized;
                    state.api = Some(api);
                    state.widget = Some(widget);
                }
                for callback in deferred {
                    this.dispatch(callback);
                }
            }
            Err(error) => {
                // No widget to reset; only the reported errors are kept.
                for callback in deferred {
                    if let WidgetCallback::Error(reason) = callback {
                        this.widget_error_without_widget(reason);
                    }
                }
                this.fail(error);
            }
        }
    }

    fn dispatch(&self, callback: WidgetCallback) {
        {
            let mut state = self.state.borrow_mut();
            if state.rendering {
                state.deferred.push(callback);
                return;
            }
        }
        match callback {
            WidgetCallback::Token(token) => self.token_received(token),
            WidgetCallback::Error(reason) => self.widget_failed(reason),
            WidgetCallback::Expired => self.widget_expired(),
        }
    }

    fn widget_error_without_widget(&self, reason: String) {
        if self.state.borrow().phase == ChallengePhase::Destroyed {
            return;
        }
        let error = ChallengeError::Widget(reason);
        log::error!("[Turnstile] {error}");
        (self.handlers.on_error)(&error);
    }

    fn fail(&self, error: ChallengeError) {
        {
            let mut state = self.state.borrow_mut();
            if state.phase == ChallengePhase::Destroyed {
                return;
            }
            state.phase = ChallengePhase::Error;
            state.poll = None;
        }
        log::error!("[Turnstile] {error}");
        (self.handlers.on_error)(&error);
    }

    fn token_received(&self, token: String) {
        {
            let mut state = self.state.borrow_mut();
            if state.phase != ChallengePhase::Initialized {
                return;
            }
            if state.last_token.as_deref() == Some(token.as_str()) {
                return;
            }
            state.last_token = Some(token.clone());
        }
        (self.handlers.on_token)(token);
    }

    fn widget_failed(&self, reason: String) {
        if !self.reset_widget() {
            return;
        }
        (self.handlers.on_error)(&ChallengeError::Widget(reason));
    }

    fn widget_expired(&self) {
        if !self.reset_widget() {
            return;
        }
        (self.handlers.on_expired)();
    }

    /// Reset the live widget so a fresh challenge starts. `false` when the
    /// bridge is not initialized.
    fn reset_widget(&self) -> bool {
        let (api, widget) = {
            let mut state = self.state.borrow_mut();
            if state.phase != ChallengePhase::Initialized {
                return false;
            }
            state.last_token = None;
            match (state.api.clone(), state.widget.clone()) {
                (Some(api), Some(widget)) => (api, widget),
                _ => return false,
            }
        };
        if let Err(error) = api.reset(&widget) {
            (self.handlers.on_error)(&error);
        }
        true
    }

    fn teardown(&self) {
        let (poll, api, widget, lease, slot) = {
            let mut state = self.state.borrow_mut();
            if state.phase == ChallengePhase::Destroyed {
                return;
            }
            state.phase = ChallengePhase::Destroyed;
            state.last_token = None;
            (
                state.poll.take(),
                state.api.take(),
                state.widget.take(),
                state.lease.take(),
                state.slot.take(),
            )
        };

        if let Some(poll) = poll {
            poll.abort();
        }
        if let (Some(api), Some(widget)) = (api, widget) {
            if let Err(error) = api.remove(&widget) {
                (self.handlers.on_error)(&error);
            }
        }
        drop(lease);
        if let Some(slot) = slot {
            if let Err(error) = self.dom.remove(&slot) {
                log::warn!("[Turnstile] could not remove slot: {error}");
            }
        }
    }
}

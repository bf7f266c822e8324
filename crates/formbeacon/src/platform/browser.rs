//! Browser bindings, wasm32 only.
//!
//! [`install`] builds the page context on top of `window` and `document`:
//! cookies, the `dataLayer` sink, lazy GTM, delegated click/section
//! tracking and the form-trigger store. Widgets then ask the returned
//! [`BrowserPage`] for an isolation host, a challenge widget or blur
//! tracking on their fields.

use std::rc::Rc;

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Element, HtmlMetaElement, Node, Window};
use zoon::{Task, TaskHandle};

use crate::bootstrap::{IdentityOutcome, PageBootstrap};
use crate::challenge::{ChallengeBridge, ChallengeError, ChallengeHandlers};
use crate::config::WidgetConfig;
use crate::cookie::Cookies;
use crate::dom::{DomError, DomHost};
use crate::gtm::GtmLoader;
use crate::interaction::{ElementTracking, FieldBlurTracking, FormTriggers};
use crate::isolation::ShadowIsolationHost;
use crate::page::PageSnapshot;
use crate::portal::PortalRegistry;
use crate::request::RequestDecorator;

#[cfg(feature = "console-log")]
pub mod console;
pub mod cookies;
pub mod data_layer;
pub mod dom;
mod exports;
pub mod gtm;
pub mod timer;
pub mod turnstile;

use cookies::DocumentCookies;
use data_layer::DataLayerSink;
use dom::WebDom;
use gtm::WindowGtmHost;
use timer::ZoonSleeper;
use turnstile::TurnstileGlobal;

const CSRF_META: &str = "csrf-token";

/// Message carried by a thrown JS value, for logs and error variants.
pub(crate) fn js_error(value: JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

#[derive(Debug)]
pub enum InstallError {
    NoWindow,
    NoDocument,
    /// `document` is not an HTML document, so it has no cookie jar.
    NotHtml,
}

impl std::fmt::Display for InstallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallError::NoWindow => f.write_str("no global `window`"),
            InstallError::NoDocument => f.write_str("window has no document"),
            InstallError::NotHtml => f.write_str("document is not an HTML document"),
        }
    }
}

impl std::error::Error for InstallError {}

pub fn page_snapshot(window: &Window, document: &Document) -> PageSnapshot {
    let href = window.location().href().unwrap_or_default();
    PageSnapshot::new(href)
        .with_title(document.title())
        .with_referrer(document.referrer())
        .with_user_agent(window.navigator().user_agent().unwrap_or_default())
}

/// Content of `<meta name="csrf-token">`.
pub fn csrf_token(document: &Document) -> Option<String> {
    document
        .query_selector(&format!("meta[name=\"{CSRF_META}\"]"))
        .ok()
        .flatten()
        .and_then(|element| element.dyn_into::<HtmlMetaElement>().ok())
        .map(|meta| meta.content())
        .filter(|content| !content.is_empty())
}

/// Append `<meta name=.. content=..>` to `<head>`, replacing an existing one.
pub fn add_meta(document: &Document, name: &str, content: &str) -> Result<(), DomError> {
    let selector = format!("meta[name=\"{name}\"]");
    if let Ok(Some(existing)) = document.query_selector(&selector) {
        existing.remove();
    }
    let meta = document
        .create_element("meta")
        .map_err(|error| DomError::CreateElement(js_error(error)))?;
    meta.set_attribute("name", name)
        .and_then(|()| meta.set_attribute("content", content))
        .map_err(|error| DomError::Operation(js_error(error)))?;
    let parent: Node = match document.head() {
        Some(head) => head.into(),
        None => document.clone().into(),
    };
    parent
        .append_child(&meta)
        .map(drop)
        .map_err(|error| DomError::Operation(js_error(error)))
}

/// A mounted challenge widget. Dropping it removes the widget and cancels
/// any outstanding wait for the script.
pub struct BrowserChallenge {
    bridge: ChallengeBridge<WebDom>,
    _poll: Option<TaskHandle>,
}

impl BrowserChallenge {
    pub fn bridge(&self) -> &ChallengeBridge<WebDom> {
        &self.bridge
    }
}

pub struct BrowserPage {
    window: Window,
    document: Document,
    bootstrap: PageBootstrap,
    dom: Rc<WebDom>,
    portals: PortalRegistry<Node>,
    _gtm: GtmLoader<WindowGtmHost>,
    _element_tracking: Option<ElementTracking<WebDom>>,
    _form_triggers: Option<FormTriggers<WebDom>>,
}

impl BrowserPage {
    pub fn bootstrap(&self) -> &PageBootstrap {
        &self.bootstrap
    }

    pub fn dom(&self) -> Rc<WebDom> {
        self.dom.clone()
    }

    pub fn identity_resolved(&self, outcome: IdentityOutcome) {
        self.bootstrap.identity_resolved(outcome);
    }

    pub fn request_decorator(&self) -> RequestDecorator {
        self.bootstrap.request_decorator(csrf_token(&self.document))
    }

    pub fn snapshot(&self) -> PageSnapshot {
        page_snapshot(&self.window, &self.document)
    }

    pub fn mount_isolation(&self, host: &Element) -> Result<ShadowIsolationHost<Node>, DomError> {
        ShadowIsolationHost::mount(self.dom.as_ref(), &host.clone().into())
    }

    /// Mount a challenge widget whose slot goes under `slot_parent`, a node
    /// inside an isolation boundary, and start it.
    pub fn challenge(
        &self,
        slot_parent: &Node,
        handlers: ChallengeHandlers,
    ) -> Result<BrowserChallenge, ChallengeError> {
        let bridge = ChallengeBridge::new(
            self.dom.clone(),
            Rc::new(TurnstileGlobal::new(self.window.clone())),
            Rc::new(ZoonSleeper),
            self.bootstrap.config().challenge.clone(),
            handlers,
        );
        bridge.mount(&self.portals, slot_parent)?;
        let poll = bridge.start()?.map(Task::start_droppable);
        Ok(BrowserChallenge {
            bridge,
            _poll: poll,
        })
    }

    pub fn field_tracking(
        &self,
        root: &Node,
        on_blur: impl Fn(&str, &str) + 'static,
    ) -> Result<FieldBlurTracking<WebDom>, DomError> {
        FieldBlurTracking::attach(self.dom.clone(), root, on_blur)
    }
}

/// Build the page context and run the attribution leg. The identity leg is
/// left to the caller through [`BrowserPage::identity_resolved`].
pub fn install(config: WidgetConfig) -> Result<BrowserPage, InstallError> {
    #[cfg(feature = "console-log")]
    console::init(if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });

    let window = web_sys::window().ok_or(InstallError::NoWindow)?;
    let document = window.document().ok_or(InstallError::NoDocument)?;
    let jar = DocumentCookies::new(document.clone()).ok_or(InstallError::NotHtml)?;
    let sink = Rc::new(DataLayerSink::new(window.clone()));

    let product = config.product.clone();
    let sub_product = config.sub_product.clone();
    let gtm_id = config.gtm_id.clone();
    let bootstrap = PageBootstrap::new(config, sink.clone(), Cookies::new(Rc::new(jar)));
    bootstrap.start(
        &page_snapshot(&window, &document),
        &product,
        sub_product.as_deref(),
    );

    let gtm_host = Rc::new(WindowGtmHost::new(window.clone(), document.clone()));
    let gtm = GtmLoader::new(gtm_host, sink, gtm_id);
    gtm.lazy_load();

    let dom = Rc::new(WebDom::new(document.clone()));
    let element_tracking =
        ElementTracking::attach(dom.clone(), &dom.document(), bootstrap.tracker())
            .inspect_err(|error| log::warn!("[Page] element tracking unavailable: {error}"))
            .ok();
    let form_triggers = FormTriggers::attach(dom.clone(), bootstrap.form_triggers())
        .inspect_err(|error| log::warn!("[Page] form triggers unavailable: {error}"))
        .ok();

    Ok(BrowserPage {
        window,
        document,
        bootstrap,
        dom,
        portals: PortalRegistry::new(),
        _gtm: gtm,
        _element_tracking: element_tracking,
        _form_triggers: form_triggers,
    })
}

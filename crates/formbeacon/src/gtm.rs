//! Tag manager lazy loading.
//!
//! The container script is not loaded with the page. It is injected on the
//! first user interaction, or when the page dispatches
//! `bypass_gtm_optimisation` to ask for it explicitly.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use formbeacon_protocol::{DataLayerEntry, gtm_start_entry};

use crate::cookie::Cookies;
use crate::inbox::ServerInbox;
use crate::tracker::{EventSink, EventTracker};

/// Window events that trigger loading.
pub const TRIGGER_EVENTS: [&str; 5] = [
    "mousemove",
    "click",
    "scroll",
    "touchstart",
    "bypass_gtm_optimisation",
];

/// Dispatched on the document once the script has loaded.
pub const LOADED_EVENT: &str = "initializedGTM";

pub const SCRIPT_BASE_URL: &str = "https://www.googletagmanager.com/gtm.js";

pub fn script_src(container_id: &str) -> String {
    format!("{SCRIPT_BASE_URL}?id={container_id}")
}

/// Replay the events the server queued in the `gtm_data` cookie, in order,
/// through [`EventTracker::push_raw`]. Returns how many were replayed.
pub fn push_server_events(cookies: &Cookies, tracker: &EventTracker) -> usize {
    ServerInbox::new(cookies.clone()).replay(tracker)
}

/// Window access needed by [`GtmLoader`].
pub trait GtmHost {
    fn now_ms(&self) -> f64;
    /// Listen for each of `events` on the window, calling `on_trigger`.
    fn arm_triggers(&self, events: &[&str], on_trigger: Rc<dyn Fn()>);
    /// Remove every listener added by [`arm_triggers`](Self::arm_triggers).
    fn disarm_triggers(&self);
    /// Insert a deferred `<script src>`; `on_load` runs once it loaded.
    fn inject_script(&self, src: &str, on_load: Box<dyn FnOnce()>);
    /// Dispatch a bubbling custom event on the document.
    fn dispatch_event(&self, name: &str);
}

pub struct GtmLoader<H: GtmHost + 'static> {
    host: Rc<H>,
    sink: Rc<dyn EventSink>,
    container_id: Option<String>,
    loaded: Rc<Cell<bool>>,
}

impl<H: GtmHost + 'static> GtmLoader<H> {
    pub fn new(host: Rc<H>, sink: Rc<dyn EventSink>, container_id: Option<String>) -> Self {
        Self {
            host,
            sink,
            container_id,
            loaded: Rc::new(Cell::new(false)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    /// Arm the trigger listeners. No-op without a container id.
    pub fn lazy_load(&self) {
        let Some(container_id) = self.container_id.clone() else {
            log::debug!("[GTM] no container id configured, skipping");
            return;
        };

        let host: Weak<H> = Rc::downgrade(&self.host);
        let sink = self.sink.clone();
        let loaded = self.loaded.clone();
        let on_trigger: Rc<dyn Fn()> = Rc::new(move || {
            if loaded.replace(true) {
                return;
            }
            let Some(host) = host.upgrade() else {
                return;
            };
            host.disarm_triggers();
            let entry = DataLayerEntry::Raw(gtm_start_entry(host.now_ms()));
            if let Err(error) = sink.push(entry) {
                log::warn!("[GTM] could not push bootstrap entry: {error}");
            }
            let weak_host = Rc::downgrade(&host);
            host.inject_script(
                &script_src(&container_id),
                Box::new(move || {
                    if let Some(host) = weak_host.upgrade() {
                        host.dispatch_event(LOADED_EVENT);
                    }
                }),
            );
            log::info!("[GTM] container {container_id} injected");
        });
        self.host.arm_triggers(&TRIGGER_EVENTS, on_trigger);
    }
}

//! Single funnel for analytics events.
//!
//! Lifecycle: `Disabled → Buffering → Live`. Events tracked while buffering
//! are queued with their raw call-site attributes and shaped only when the
//! queue drains, so they pick up the login state and super-attributes in
//! force at release time. The release happens once per page life.
//!
//! Nothing here returns an error to the caller: a tracking call must never
//! interrupt a form submission or a navigation.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use formbeacon_protocol::{DataLayerEntry, EventPayload};
use serde_json::Value;

use crate::attributes::{Attributes, SuperAttributes, split_custom, strip_empty};

mod shortcuts;

/// Key of the login flag in every event payload.
pub const IS_LOGGED_IN: &str = "is_logged_in";

// --- EventSink ---

/// Error returned by [`EventSink::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// No execution context (no window, no data layer).
    Unavailable,
    /// The sink refused the entry.
    Rejected(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Unavailable => write!(f, "event sink unavailable"),
            SinkError::Rejected(reason) => write!(f, "event sink rejected entry: {reason}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Append-only destination drained by the analytics script.
pub trait EventSink {
    fn push(&self, entry: DataLayerEntry) -> Result<(), SinkError>;
}

// --- EventTracker ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerPhase {
    /// Not configured yet, or configured with analytics off.
    Disabled,
    Buffering,
    Live,
}

/// Options applied by [`EventTracker::configure`].
#[derive(Clone, Debug, Default)]
pub struct TrackerConfig {
    pub is_enabled: bool,
    /// Log payloads instead of handing them to the sink.
    pub log_only: bool,
    pub super_attributes: SuperAttributes,
}

#[derive(Debug)]
struct PendingEvent {
    event: String,
    attributes: Attributes,
}

struct TrackerState {
    configured: bool,
    phase: TrackerPhase,
    log_only: bool,
    is_logged_in: bool,
    super_attributes: SuperAttributes,
    pending: VecDeque<PendingEvent>,
    /// Set while the queue drains; events tracked meanwhile join the queue.
    draining: bool,
}

pub struct EventTracker {
    state: RefCell<TrackerState>,
    sink: Rc<dyn EventSink>,
}

impl EventTracker {
    pub fn new(sink: Rc<dyn EventSink>) -> Self {
        Self {
            state: RefCell::new(TrackerState {
                configured: false,
                phase: TrackerPhase::Disabled,
                log_only: false,
                is_logged_in: false,
                super_attributes: SuperAttributes::default(),
                pending: VecDeque::new(),
                draining: false,
            }),
            sink,
        }
    }

    /// First call wins; later calls are ignored.
    ///
    /// An enabled tracker starts buffering and goes live on
    /// [`set_buffering(false)`](Self::set_buffering).
    pub fn configure(&self, config: TrackerConfig) {
        let mut state = self.state.borrow_mut();
        if state.configured {
            log::debug!("[Tracker] already configured, ignoring configure()");
            return;
        }
        state.configured = true;
        state.log_only = config.log_only;
        state.super_attributes = config.super_attributes;
        state.phase = if config.is_enabled {
            TrackerPhase::Buffering
        } else {
            TrackerPhase::Disabled
        };
    }

    pub fn phase(&self) -> TrackerPhase {
        self.state.borrow().phase
    }

    pub fn is_enabled(&self) -> bool {
        self.phase() != TrackerPhase::Disabled
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in
    }

    pub fn pending_len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn super_attributes(&self) -> SuperAttributes {
        self.state.borrow().super_attributes.clone()
    }

    /// Deep-merge into the current super-attributes.
    pub fn set_super_attributes(&self, partial: SuperAttributes) {
        self.state.borrow_mut().super_attributes.merge(partial);
    }

    pub fn set_logged_in(&self, is_logged_in: bool) {
        self.state.borrow_mut().is_logged_in = is_logged_in;
    }

    /// `false` releases the queue in FIFO order and switches to live
    /// delivery. Buffering cannot be turned back on after a release.
    pub fn set_buffering(&self, buffering: bool) {
        {
            let mut state = self.state.borrow_mut();
            match (state.phase, buffering) {
                (TrackerPhase::Disabled, _) => return,
                (TrackerPhase::Buffering, true) => return,
                (TrackerPhase::Live, true) => {
                    log::warn!("[Tracker] buffering was already released for this page, ignoring");
                    return;
                }
                (TrackerPhase::Live, false) => return,
                (TrackerPhase::Buffering, false) => {
                    state.phase = TrackerPhase::Live;
                    state.draining = true;
                }
            }
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            match next {
                Some(PendingEvent { event, attributes }) => self.emit(&event, attributes),
                None => break,
            }
        }
    }

    /// Queue or emit one event.
    pub fn track(&self, event: &str, attributes: Attributes) {
        {
            let mut state = self.state.borrow_mut();
            match state.phase {
                TrackerPhase::Disabled => return,
                TrackerPhase::Buffering => {
                    state.pending.push_back(PendingEvent {
                        event: event.to_owned(),
                        attributes,
                    });
                    return;
                }
                TrackerPhase::Live if state.draining => {
                    state.pending.push_back(PendingEvent {
                        event: event.to_owned(),
                        attributes,
                    });
                    return;
                }
                TrackerPhase::Live => {}
            }
        }
        self.emit(event, attributes);
    }

    /// Forward an already-shaped object to the sink. Skips buffering and
    /// payload shaping.
    pub fn push_raw(&self, raw: Attributes) {
        let log_only = {
            let state = self.state.borrow();
            if state.phase == TrackerPhase::Disabled {
                return;
            }
            state.log_only
        };
        self.deliver(DataLayerEntry::Raw(raw), log_only);
    }

    /// Build the payload exactly as [`track`](Self::track) would emit it now.
    pub fn build_payload(&self, event: &str, attributes: Attributes) -> EventPayload {
        let state = self.state.borrow();
        let (call_site, call_site_custom) = split_custom(attributes);

        let mut merged = Attributes::new();
        merged.insert(IS_LOGGED_IN.to_owned(), Value::Bool(state.is_logged_in));
        merged.extend(state.super_attributes.attributes.clone());
        merged.extend(call_site);

        let mut custom = state.super_attributes.custom.clone();
        custom.extend(call_site_custom);

        EventPayload {
            event: event.to_owned(),
            attributes: strip_empty(merged),
            custom_attributes: strip_empty(custom),
        }
    }

    fn emit(&self, event: &str, attributes: Attributes) {
        let payload = self.build_payload(event, attributes);
        let log_only = self.state.borrow().log_only;
        self.deliver(DataLayerEntry::Event(payload), log_only);
    }

    fn deliver(&self, entry: DataLayerEntry, log_only: bool) {
        if log_only {
            log::info!(
                "[Tracker] \"{}\" event has been received with below payload: {}",
                entry.event_name().unwrap_or("<raw>"),
                entry.to_value()
            );
            return;
        }
        if let Err(error) = self.sink.push(entry) {
            log::warn!("[Tracker] event dropped: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::into_attributes;
    use crate::test_harness::RecordingSink;
    use formbeacon_protocol::event_names;
    use serde_json::json;

    fn live_tracker() -> (Rc<RecordingSink>, EventTracker) {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        tracker.set_buffering(false);
        (sink, tracker)
    }

    #[test]
    fn unconfigured_tracker_drops_everything() {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.track("x", Attributes::new());
        tracker.push_raw(into_attributes(json!({ "event": "raw" })));
        assert!(sink.entries().is_empty());
        assert_eq!(tracker.phase(), TrackerPhase::Disabled);
    }

    #[test]
    fn disabled_tracker_is_a_silent_no_op() {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig::default());
        tracker.set_buffering(false);
        tracker.click(into_attributes(json!({ "click_type": "x" })));
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn configure_is_idempotent() {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        tracker.configure(TrackerConfig::default());
        assert_eq!(tracker.phase(), TrackerPhase::Buffering);
    }

    #[test]
    fn buffered_events_flush_in_order_once() {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        for index in 0..25 {
            tracker.track(&format!("event-{index}"), into_attributes(json!({ "n": index })));
        }
        assert!(sink.entries().is_empty());
        assert_eq!(tracker.pending_len(), 25);

        tracker.set_buffering(false);
        let names: Vec<String> = sink.event_names();
        let expected: Vec<String> = (0..25).map(|index| format!("event-{index}")).collect();
        assert_eq!(names, expected);
        assert_eq!(tracker.pending_len(), 0);

        tracker.set_buffering(false);
        assert_eq!(sink.entries().len(), 25);
    }

    #[test]
    fn buffering_cannot_resume_after_release() {
        let (sink, tracker) = live_tracker();
        tracker.set_buffering(true);
        assert_eq!(tracker.phase(), TrackerPhase::Live);
        tracker.track("after", Attributes::new());
        assert_eq!(sink.event_names(), vec!["after".to_owned()]);
    }

    #[test]
    fn flushed_events_carry_login_state_at_release() {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        tracker.track("early", Attributes::new());
        tracker.set_logged_in(true);
        tracker.set_buffering(false);
        assert_eq!(sink.payloads()[0].attributes[IS_LOGGED_IN], json!(true));
    }

    #[test]
    fn call_site_attributes_win_and_empties_are_stripped() {
        let (sink, tracker) = live_tracker();
        tracker.set_super_attributes(SuperAttributes::new(into_attributes(
            json!({ "product": "academy", "page": { "path": "/x" }, "blank": "" }),
        )));
        tracker.track(
            "signup",
            into_attributes(json!({
                "product": "override",
                "a": "",
                "b": null,
                "d": { "e": "" },
                "f": 1,
                "custom": { "message": "", "kept": "yes" },
            })),
        );
        let payload = &sink.payloads()[0];
        assert_eq!(
            Value::Object(payload.attributes.clone()),
            json!({ "is_logged_in": false, "product": "override", "page": { "path": "/x" }, "f": 1 })
        );
        assert_eq!(Value::Object(payload.custom_attributes.clone()), json!({ "kept": "yes" }));
    }

    #[test]
    fn stripping_leaves_only_non_empty_call_site_keys() {
        let (sink, tracker) = live_tracker();
        tracker.track(
            "strip",
            into_attributes(json!({ "a": "", "b": null, "d": { "e": "" }, "f": 1 })),
        );
        let mut attributes = sink.payloads()[0].attributes.clone();
        attributes.remove(IS_LOGGED_IN);
        assert_eq!(Value::Object(attributes), json!({ "f": 1 }));
    }

    #[test]
    fn custom_super_attributes_merge_with_call_site_custom() {
        let (sink, tracker) = live_tracker();
        tracker.set_super_attributes(
            SuperAttributes::default().with_custom(into_attributes(json!({ "a": 1, "b": 1 }))),
        );
        tracker.track("x", into_attributes(json!({ "custom": { "b": 2 } })));
        assert_eq!(
            Value::Object(sink.payloads()[0].custom_attributes.clone()),
            json!({ "a": 1, "b": 2 })
        );
    }

    #[test]
    fn unavailable_sink_does_not_panic() {
        let sink = Rc::new(RecordingSink::unavailable());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        tracker.set_buffering(false);
        tracker.track("lost", Attributes::new());
        tracker.push_raw(Attributes::new());
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn log_only_mode_never_touches_the_sink() {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            log_only: true,
            ..TrackerConfig::default()
        });
        tracker.set_buffering(false);
        tracker.click(Attributes::new());
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn raw_events_bypass_buffering() {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        tracker.track(event_names::CLICK, Attributes::new());
        tracker.push_raw(into_attributes(json!({ "event": "server" })));
        assert_eq!(sink.event_names(), vec!["server".to_owned()]);
    }

    struct ReentrantSink {
        tracker: RefCell<Option<Rc<EventTracker>>>,
        seen: RefCell<Vec<String>>,
    }

    impl EventSink for ReentrantSink {
        fn push(&self, entry: DataLayerEntry) -> Result<(), SinkError> {
            let name = entry.event_name().unwrap_or_default().to_owned();
            self.seen.borrow_mut().push(name.clone());
            if name == "first" {
                if let Some(tracker) = self.tracker.borrow().as_ref() {
                    tracker.track("nested", Attributes::new());
                }
            }
            Ok(())
        }
    }

    #[test]
    fn events_tracked_during_drain_keep_fifo_order() {
        let sink = Rc::new(ReentrantSink {
            tracker: RefCell::new(None),
            seen: RefCell::new(Vec::new()),
        });
        let tracker = Rc::new(EventTracker::new(sink.clone()));
        *sink.tracker.borrow_mut() = Some(tracker.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        tracker.track("first", Attributes::new());
        tracker.track("second", Attributes::new());
        tracker.set_buffering(false);
        assert_eq!(*sink.seen.borrow(), vec!["first", "second", "nested"]);
        // Break the Rc cycle.
        sink.tracker.borrow_mut().take();
    }
}

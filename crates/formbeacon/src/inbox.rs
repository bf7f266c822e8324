//! Events queued by the server during the server-rendered phase.
//!
//! The backend writes a `gtm_data` cookie holding a form-encoded JSON array.
//! Each element is a string with one serialized event object (inline objects
//! are accepted too). The client replays them in array order and deletes the
//! cookie.

use formbeacon_protocol::parse_inbox;

use crate::cookie::{Cookies, decode_component};
use crate::tracker::EventTracker;

pub const GTM_DATA: &str = "gtm_data";

pub struct ServerInbox {
    cookies: Cookies,
}

impl ServerInbox {
    pub fn new(cookies: Cookies) -> Self {
        Self { cookies }
    }

    /// Replay every queued event through [`EventTracker::push_raw`].
    ///
    /// Returns the number of events replayed. The cookie is consumed even
    /// when it cannot be read; unreadable elements are skipped.
    pub fn replay(&self, tracker: &EventTracker) -> usize {
        let Some(raw) = self.cookies.get_raw(GTM_DATA) else {
            return 0;
        };
        let Some(document) = decode_component(&raw.replace('+', "%20")) else {
            log::warn!("[Inbox] dropping {GTM_DATA} cookie: not valid percent-encoding");
            self.cookies.delete(GTM_DATA);
            return 0;
        };
        let entries = match parse_inbox(&document) {
            Ok(entries) => entries,
            Err(error) => {
                log::warn!("[Inbox] dropping {GTM_DATA} cookie: not a JSON array: {error}");
                self.cookies.delete(GTM_DATA);
                return 0;
            }
        };

        let mut replayed = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            match entry.into_event() {
                Ok(event) => {
                    tracker.push_raw(event);
                    replayed += 1;
                }
                Err(error) => log::warn!("[Inbox] skipping entry {index}: {error}"),
            }
        }
        self.cookies.delete(GTM_DATA);
        log::debug!("[Inbox] replayed {replayed} server event(s)");
        replayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::encode_component;
    use crate::test_harness::{MemoryCookieJar, RecordingSink};
    use crate::tracker::TrackerConfig;
    use serde_json::json;
    use std::rc::Rc;

    fn tracker() -> (Rc<RecordingSink>, EventTracker) {
        let sink = Rc::new(RecordingSink::new());
        let tracker = EventTracker::new(sink.clone());
        tracker.configure(TrackerConfig {
            is_enabled: true,
            ..TrackerConfig::default()
        });
        (sink, tracker)
    }

    fn inbox_with(raw: &str) -> (Rc<MemoryCookieJar>, ServerInbox) {
        let jar = Rc::new(MemoryCookieJar::with_cookie(GTM_DATA, raw));
        let inbox = ServerInbox::new(Cookies::new(jar.clone()));
        (jar, inbox)
    }

    #[test]
    fn replays_serialized_events_in_order_and_deletes_cookie() {
        let document = json!([
            r#"{"event":"signup_success","attributes":{"user_id":7}}"#,
            r#"{"event":"otp_sent"}"#,
        ])
        .to_string();
        // Form encoding: spaces as `+`.
        let raw = encode_component(&document).replace("%20", "+");
        let (jar, inbox) = inbox_with(&raw);
        let (sink, tracker) = tracker();

        // Raw events bypass buffering.
        assert_eq!(inbox.replay(&tracker), 2);
        assert_eq!(sink.event_names(), vec!["signup_success", "otp_sent"]);
        assert_eq!(
            sink.values()[0],
            json!({ "_clear": true, "event": "signup_success", "attributes": { "user_id": 7 } })
        );
        assert!(!jar.contains(GTM_DATA));
    }

    #[test]
    fn plus_signs_become_spaces() {
        let raw = encode_component(r#"["{\"event\":\"a\",\"label\":\"x y\"}"]"#).replace("%20", "+");
        let (_jar, inbox) = inbox_with(&raw);
        let (sink, tracker) = tracker();
        inbox.replay(&tracker);
        assert_eq!(sink.values()[0]["label"], json!("x y"));
    }

    #[test]
    fn inline_objects_are_accepted_and_bad_elements_skipped() {
        let raw = encode_component(r#"[{"event":"inline"},"not json",42,"{\"event\":\"b\"}"]"#);
        let (jar, inbox) = inbox_with(&raw);
        let (sink, tracker) = tracker();
        assert_eq!(inbox.replay(&tracker), 2);
        assert_eq!(sink.event_names(), vec!["inline", "b"]);
        assert!(!jar.contains(GTM_DATA));
    }

    #[test]
    fn malformed_document_is_dropped_without_replay() {
        let (jar, inbox) = inbox_with(&encode_component("{\"event\":\"x\"}"));
        let (sink, tracker) = tracker();
        assert_eq!(inbox.replay(&tracker), 0);
        assert!(sink.entries().is_empty());
        assert!(!jar.contains(GTM_DATA));

        // Nothing left to warn about on the next page load.
        let assignments = jar.assignments().len();
        assert_eq!(inbox.replay(&tracker), 0);
        assert_eq!(jar.assignments().len(), assignments);
    }

    #[test]
    fn undecodable_cookie_is_dropped() {
        let (jar, inbox) = inbox_with("%FF%FE");
        let (sink, tracker) = tracker();
        assert_eq!(inbox.replay(&tracker), 0);
        assert!(sink.entries().is_empty());
        assert!(!jar.contains(GTM_DATA));
    }

    #[test]
    fn absent_cookie_is_a_no_op() {
        let jar = Rc::new(MemoryCookieJar::new());
        let inbox = ServerInbox::new(Cookies::new(jar.clone()));
        let (sink, tracker) = tracker();
        assert_eq!(inbox.replay(&tracker), 0);
        assert!(sink.entries().is_empty());
        assert!(jar.assignments().is_empty());
    }
}

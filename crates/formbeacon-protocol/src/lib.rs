//! Wire types exchanged with the page analytics layer.
//!
//! The data layer is an append-only array on the page-global scope that the
//! tag manager drains. Every entry carries `_clear: true` so the tag manager
//! resets its recursive merge state between two events.
//!
//! The server inbox is a cookie holding a JSON array of events queued by the
//! backend during the server-rendered phase. Canonical entries are strings
//! containing one serialized event object each; inline objects are accepted
//! too.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat attribute map as it appears on the wire.
pub type Attributes = Map<String, Value>;

/// Event names understood by the tag manager container.
pub mod event_names {
    pub const PAGE_VIEW: &str = "we_page_load";
    pub const CLICK: &str = "gtm_custom_click";
    pub const HOVER: &str = "hover";
    pub const FORM_SUBMIT_STATUS: &str = "form_submit_status";
    pub const SECTION_VIEW: &str = "section_view";
    /// Bootstrap entry pushed right before the tag manager script is injected.
    pub const GTM_JS: &str = "gtm.js";
}

/// Key added to every data layer entry.
pub const CLEAR_KEY: &str = "_clear";

/// Shaped analytics event produced by the tracker.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: String,
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_attributes: Attributes,
}

/// One element pushed onto the data layer.
#[derive(Clone, Debug, PartialEq)]
pub enum DataLayerEntry {
    /// Event shaped by the tracker (super-attributes merged, empties stripped).
    Event(EventPayload),
    /// Passthrough object, forwarded as-is apart from the `_clear` marker.
    Raw(Attributes),
}

impl DataLayerEntry {
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event(payload) => Some(&payload.event),
            Self::Raw(raw) => raw.get("event").and_then(Value::as_str),
        }
    }

    /// JSON object as the tag manager sees it.
    ///
    /// `_clear` comes first; a raw entry may override it.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert(CLEAR_KEY.to_owned(), Value::Bool(true));
        match self {
            Self::Event(payload) => {
                object.insert("event".to_owned(), Value::String(payload.event.clone()));
                object.insert(
                    "attributes".to_owned(),
                    Value::Object(payload.attributes.clone()),
                );
                if !payload.custom_attributes.is_empty() {
                    object.insert(
                        "custom_attributes".to_owned(),
                        Value::Object(payload.custom_attributes.clone()),
                    );
                }
            }
            Self::Raw(raw) => {
                object.extend(raw.iter().map(|(key, value)| (key.clone(), value.clone())));
            }
        }
        Value::Object(object)
    }
}

/// Bootstrap entry the tag manager expects before its script runs.
pub fn gtm_start_entry(now_ms: f64) -> Attributes {
    let mut entry = Map::new();
    entry.insert("gtm.start".to_owned(), Value::from(now_ms.floor() as i64));
    entry.insert("event".to_owned(), Value::String(event_names::GTM_JS.to_owned()));
    entry
}

// --- Server inbox ---

/// One element of the server inbox array.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboxEntry {
    /// A string holding one serialized event object.
    Serialized(String),
    /// An event object embedded directly.
    Inline(Attributes),
    /// Anything else; kept so one bad element does not reject the array.
    Unsupported(Value),
}

impl InboxEntry {
    pub fn into_event(self) -> Result<Attributes, serde_json::Error> {
        match self {
            Self::Serialized(json) => serde_json::from_str(&json),
            Self::Inline(event) => Ok(event),
            Self::Unsupported(value) => Err(serde::de::Error::custom(format!(
                "expected an event object or a string, found `{value}`"
            ))),
        }
    }
}

/// Parse the inbox array. Fails when the document is not a JSON array.
pub fn parse_inbox(document: &str) -> Result<Vec<InboxEntry>, serde_json::Error> {
    serde_json::from_str(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attributes(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn event_entry_omits_empty_custom_attributes() {
        let entry = DataLayerEntry::Event(EventPayload {
            event: event_names::CLICK.to_owned(),
            attributes: attributes(json!({ "click_type": "cta" })),
            custom_attributes: Map::new(),
        });
        assert_eq!(
            entry.to_value(),
            json!({ "_clear": true, "event": "gtm_custom_click", "attributes": { "click_type": "cta" } })
        );
    }

    #[test]
    fn event_entry_keeps_custom_attributes() {
        let entry = DataLayerEntry::Event(EventPayload {
            event: event_names::HOVER.to_owned(),
            attributes: Map::new(),
            custom_attributes: attributes(json!({ "message": "hi" })),
        });
        assert_eq!(entry.to_value()["custom_attributes"], json!({ "message": "hi" }));
    }

    #[test]
    fn raw_entry_is_forwarded_with_clear_marker() {
        let entry = DataLayerEntry::Raw(attributes(json!({ "event": "signup", "value": 3 })));
        assert_eq!(entry.event_name(), Some("signup"));
        assert_eq!(
            entry.to_value(),
            json!({ "_clear": true, "event": "signup", "value": 3 })
        );
    }

    #[test]
    fn inbox_accepts_serialized_and_inline_entries() {
        let entries = parse_inbox(r#"["{\"event\":\"a\"}", {"event":"b"}]"#).unwrap();
        let events: Vec<_> = entries
            .into_iter()
            .map(|entry| entry.into_event().unwrap())
            .collect();
        assert_eq!(events[0]["event"], json!("a"));
        assert_eq!(events[1]["event"], json!("b"));
    }

    #[test]
    fn inbox_rejects_non_array_document() {
        assert!(parse_inbox(r#"{"event":"a"}"#).is_err());
        assert!(parse_inbox("not json").is_err());
    }

    #[test]
    fn inbox_keeps_unsupported_elements_apart() {
        let entries = parse_inbox(r#"[42, {"event":"b"}]"#).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], InboxEntry::Unsupported(_)));
        assert!(entries[0].clone().into_event().is_err());
    }

    #[test]
    fn serialized_entry_must_be_an_object() {
        let entry = InboxEntry::Serialized("[1,2]".to_owned());
        assert!(entry.into_event().is_err());
    }

    #[test]
    fn gtm_start_entry_shape() {
        let entry = gtm_start_entry(1_700_000_000_123.7);
        assert_eq!(entry["gtm.start"], json!(1_700_000_000_123_i64));
        assert_eq!(entry["event"], json!("gtm.js"));
    }
}

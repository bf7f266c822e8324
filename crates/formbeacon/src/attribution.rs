//! Marketing attribution attached to outbound form requests.
//!
//! `experiment`, `platform` and `product` belong to the page session and can
//! only change through their dedicated setters. Every other field is rebuilt
//! by [`AttributionState::set_attribution`] before each network call.

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attributes::Attributes;

/// Device class reported in attribution and the `App-Name` request header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    #[default]
    Mobile,
    Tablet,
}

impl DeviceType {
    /// User-agent heuristic: tablets first, then phones, desktop otherwise.
    pub fn classify(user_agent: &str) -> Self {
        let user_agent = user_agent.to_ascii_lowercase();
        let has_any = |needles: &[&str]| needles.iter().any(|needle| user_agent.contains(needle));
        if has_any(&["tablet", "ipad"]) {
            Self::Tablet
        } else if has_any(&["iphone", "ipad", "ipod", "android"]) {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot embedded as `attributions` in outbound payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    experiment: String,
    intent: String,
    platform: DeviceType,
    product: String,
    program: Option<String>,
    #[serde(flatten)]
    extra: Attributes,
}

impl AttributionRecord {
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn platform(&self) -> DeviceType {
        self.platform
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    /// Caller-supplied fields beyond the fixed ones.
    pub fn extra(&self) -> &Attributes {
        &self.extra
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Per-action input to [`AttributionState::set_attribution`].
#[derive(Clone, Debug, Default)]
pub struct AttributionExtra {
    pub program: Option<String>,
    pub fields: Attributes,
}

impl AttributionExtra {
    pub fn program(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug)]
struct SessionFields {
    experiment: String,
    platform: DeviceType,
    product: String,
}

struct Inner {
    session: SessionFields,
    record: AttributionRecord,
}

/// Page-lifetime attribution holder. All setters are total.
pub struct AttributionState {
    inner: RefCell<Inner>,
}

impl AttributionState {
    pub fn new() -> Self {
        let session = SessionFields {
            experiment: String::new(),
            platform: DeviceType::Mobile,
            product: "homepage".to_owned(),
        };
        let record = AttributionRecord {
            experiment: session.experiment.clone(),
            intent: String::new(),
            platform: session.platform,
            product: session.product.clone(),
            program: None,
            extra: Map::new(),
        };
        Self {
            inner: RefCell::new(Inner { session, record }),
        }
    }

    /// Classify the device from the user agent and store it.
    pub fn set_platform(&self, user_agent: &str) -> DeviceType {
        let platform = DeviceType::classify(user_agent);
        let mut inner = self.inner.borrow_mut();
        inner.session.platform = platform;
        inner.apply_session_fields();
        platform
    }

    pub fn set_product(&self, product: impl Into<String>) {
        let mut inner = self.inner.borrow_mut();
        inner.session.product = product.into();
        inner.apply_session_fields();
    }

    pub fn set_experiment(&self, experiment: impl Into<String>) {
        let mut inner = self.inner.borrow_mut();
        inner.session.experiment = experiment.into();
        inner.apply_session_fields();
    }

    /// Rebuild the record as `{ ..previous, intent, program, ..extra }`, then
    /// re-apply the session fields so `extra` cannot override them.
    pub fn set_attribution(&self, intent: impl Into<String>, extra: AttributionExtra) {
        let mut inner = self.inner.borrow_mut();
        let mut record = inner.record.clone();
        record.intent = intent.into();
        record.program = extra.program;
        for (key, value) in extra.fields {
            match key.as_str() {
                "intent" => {
                    if let Value::String(intent) = value {
                        record.intent = intent;
                    }
                }
                "program" => {
                    record.program = match value {
                        Value::String(program) => Some(program),
                        _ => None,
                    };
                }
                "experiment" | "platform" | "product" => {
                    log::debug!("[Attribution] ignoring session field `{key}` passed to set_attribution");
                }
                _ => {
                    record.extra.insert(key, value);
                }
            }
        }
        inner.record = record;
        inner.apply_session_fields();
    }

    pub fn attribution(&self) -> AttributionRecord {
        self.inner.borrow().record.clone()
    }

    pub fn platform(&self) -> DeviceType {
        self.inner.borrow().session.platform
    }

    pub fn product(&self) -> String {
        self.inner.borrow().session.product.clone()
    }
}

impl Default for AttributionState {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn apply_session_fields(&mut self) {
        self.record.experiment = self.session.experiment.clone();
        self.record.platform = self.session.platform;
        self.record.product = self.session.product.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X)";
    const DESKTOP: &str = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/128.0";

    #[test]
    fn classifies_devices() {
        assert_eq!(DeviceType::classify(IPHONE), DeviceType::Mobile);
        assert_eq!(DeviceType::classify(IPAD), DeviceType::Tablet);
        assert_eq!(DeviceType::classify("Android 14; Tablet"), DeviceType::Tablet);
        assert_eq!(DeviceType::classify("Linux; Android 14; Pixel 8"), DeviceType::Mobile);
        assert_eq!(DeviceType::classify(DESKTOP), DeviceType::Desktop);
    }

    #[test]
    fn defaults_before_any_setter() {
        let record = AttributionState::new().attribution();
        assert_eq!(record.platform(), DeviceType::Mobile);
        assert_eq!(record.product(), "homepage");
        assert_eq!(record.experiment(), "");
        assert_eq!(record.program(), None);
    }

    #[test]
    fn session_fields_survive_hostile_extra() {
        let state = AttributionState::new();
        state.set_platform(DESKTOP);
        state.set_product("academy");
        state.set_experiment("b");

        for round in 0..3 {
            state.set_attribution(
                format!("intent-{round}"),
                AttributionExtra::default()
                    .with_field("platform", "tablet")
                    .with_field("product", "other")
                    .with_field("experiment", "x")
                    .with_field("element", "hero"),
            );
            let record = state.attribution();
            assert_eq!(record.platform(), DeviceType::Desktop);
            assert_eq!(record.product(), "academy");
            assert_eq!(record.experiment(), "b");
            assert_eq!(record.intent(), format!("intent-{round}"));
            assert_eq!(record.extra()["element"], json!("hero"));
        }
    }

    #[test]
    fn program_resets_when_not_passed() {
        let state = AttributionState::new();
        state.set_attribution("book_live_class", AttributionExtra::program("ai-ml"));
        assert_eq!(state.attribution().program(), Some("ai-ml"));

        state.set_attribution("signup", AttributionExtra::default());
        assert_eq!(state.attribution().program(), None);
        assert_eq!(state.attribution().intent(), "signup");
    }

    #[test]
    fn extra_fields_accumulate_across_calls() {
        let state = AttributionState::new();
        state.set_attribution("a", AttributionExtra::default().with_field("element", "hero"));
        state.set_attribution("b", AttributionExtra::default().with_field("sub_product", "x"));
        let record = state.attribution();
        assert_eq!(record.extra()["element"], json!("hero"));
        assert_eq!(record.extra()["sub_product"], json!("x"));
    }

    #[test]
    fn record_serializes_flat() {
        let state = AttributionState::new();
        state.set_product("academy");
        state.set_attribution("otp", AttributionExtra::program("dsml").with_field("element", "form"));
        assert_eq!(
            state.attribution().to_value(),
            json!({
                "experiment": "",
                "intent": "otp",
                "platform": "mobile",
                "product": "academy",
                "program": "dsml",
                "element": "form",
            })
        );
    }
}

//! Page start sequence.
//!
//! [`PageBootstrap`] is built once per page and handed to every component
//! that tracks or decorates requests. Tracking starts buffered; the queue is
//! released once both legs are done:
//! - the attribution leg ([`PageBootstrap::start`]): UTM resolution, server
//!   inbox replay, super-attributes, page view;
//! - the identity leg ([`PageBootstrap::identity_resolved`]): login state
//!   known, or the lookup failed.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::attribution::AttributionState;
use crate::attributes::{Attributes, SuperAttributes};
use crate::config::WidgetConfig;
use crate::cookie::Cookies;
use crate::gtm::push_server_events;
use crate::interaction::FormTriggerStore;
use crate::page::PageSnapshot;
use crate::request::{RequestDecorator, TransportError};
use crate::tracker::{EventSink, EventTracker};
use crate::utm::{UtmPropagation, url_with_utm_params, utm_propagation_params};

/// Result of the identity lookup made at page start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    LoggedIn,
    LoggedOut,
    /// The lookup failed; the visitor is treated as logged out.
    Failed(TransportError),
}

#[derive(Debug, Default)]
struct ReleaseGate {
    attribution_done: bool,
    identity_done: bool,
    released: bool,
}

impl ReleaseGate {
    /// `true` exactly once, when the second leg completes.
    fn should_release(&mut self) -> bool {
        if self.released || !(self.attribution_done && self.identity_done) {
            return false;
        }
        self.released = true;
        true
    }
}

pub struct PageBootstrap {
    config: WidgetConfig,
    cookies: Cookies,
    tracker: Rc<EventTracker>,
    attribution: Rc<AttributionState>,
    utm: UtmPropagation,
    form_triggers: FormTriggerStore,
    gate: RefCell<ReleaseGate>,
}

impl PageBootstrap {
    pub fn new(config: WidgetConfig, sink: Rc<dyn EventSink>, cookies: Cookies) -> Self {
        let tracker = Rc::new(EventTracker::new(sink));
        tracker.configure(config.tracker_config());
        let utm = UtmPropagation::new(cookies.clone()).with_cookie_minutes(config.utm_cookie_minutes);
        Self {
            utm,
            config,
            cookies,
            tracker,
            attribution: Rc::new(AttributionState::new()),
            form_triggers: FormTriggerStore::new(),
            gate: RefCell::new(ReleaseGate::default()),
        }
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn tracker(&self) -> Rc<EventTracker> {
        self.tracker.clone()
    }

    pub fn attribution(&self) -> Rc<AttributionState> {
        self.attribution.clone()
    }

    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    pub fn form_triggers(&self) -> FormTriggerStore {
        self.form_triggers.clone()
    }

    pub fn request_decorator(&self, csrf_token: Option<String>) -> RequestDecorator {
        RequestDecorator::new(self.attribution.clone(), self.cookies.clone())
            .with_csrf_token(csrf_token)
    }

    pub fn is_released(&self) -> bool {
        self.gate.borrow().released
    }

    /// Attribution leg. Runs once; later calls are ignored.
    pub fn start(&self, page: &PageSnapshot, product: &str, sub_product: Option<&str>) {
        if self.gate.borrow().attribution_done {
            log::debug!("[Bootstrap] start() already ran");
            return;
        }

        self.utm.initialize(page);
        push_server_events(&self.cookies, &self.tracker);
        self.tracker.set_buffering(true);

        let utm_params: Attributes = utm_propagation_params(&self.cookies)
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        let mut attributes = Attributes::new();
        attributes.insert("product".to_owned(), Value::String(product.to_owned()));
        attributes.insert(
            "subproduct".to_owned(),
            sub_product.map_or(Value::Null, |sub_product| Value::String(sub_product.to_owned())),
        );
        attributes.insert("page_path".to_owned(), Value::String(page.path()));
        attributes.insert("page_url".to_owned(), Value::String(page.href.clone()));
        attributes.insert("query_params".to_owned(), Value::Object(page.query_params()));
        attributes.insert("utm_propagation_params".to_owned(), Value::Object(utm_params));
        self.tracker.set_super_attributes(SuperAttributes::new(attributes));

        self.attribution.set_platform(&page.user_agent);
        self.attribution.set_product(product);

        let mut pageview = Attributes::new();
        pageview.insert(
            "page_url".to_owned(),
            Value::String(url_with_utm_params(page, &self.cookies)),
        );
        self.tracker.pageview(page, pageview);

        self.gate.borrow_mut().attribution_done = true;
        self.release_if_ready();
    }

    /// Identity leg. A failed lookup counts as logged out.
    pub fn identity_resolved(&self, outcome: IdentityOutcome) {
        let is_logged_in = match &outcome {
            IdentityOutcome::LoggedIn => true,
            IdentityOutcome::LoggedOut => false,
            IdentityOutcome::Failed(error) => {
                log::warn!("[Bootstrap] identity lookup failed, continuing logged out: {error}");
                false
            }
        };
        self.tracker.set_logged_in(is_logged_in);
        self.gate.borrow_mut().identity_done = true;
        self.release_if_ready();
    }

    fn release_if_ready(&self) {
        let release = self.gate.borrow_mut().should_release();
        if release {
            log::debug!("[Bootstrap] releasing {} buffered event(s)", self.tracker.pending_len());
            self.tracker.set_buffering(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{MemoryCookieJar, RecordingSink};
    use crate::tracker::TrackerPhase;
    use crate::utm::BYPASS_UTM;
    use formbeacon_protocol::event_names;
    use serde_json::json;

    fn bootstrap(config: WidgetConfig) -> (Rc<RecordingSink>, Rc<MemoryCookieJar>, PageBootstrap) {
        let sink = Rc::new(RecordingSink::new());
        let jar = Rc::new(MemoryCookieJar::new());
        let bootstrap = PageBootstrap::new(config, sink.clone(), Cookies::new(jar.clone()));
        (sink, jar, bootstrap)
    }

    fn page() -> PageSnapshot {
        PageSnapshot::new("https://www.example.com/courses/ai?utm_source=google.com&utm_medium=cpc")
            .with_title("AI course")
            .with_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)")
    }

    #[test]
    fn nothing_is_emitted_until_both_legs_complete() {
        let (sink, _jar, bootstrap) = bootstrap(WidgetConfig::default());
        bootstrap.start(&page(), "academy", Some("dsml"));
        bootstrap.tracker().click(Attributes::new());
        assert!(sink.entries().is_empty());
        assert!(!bootstrap.is_released());

        bootstrap.identity_resolved(IdentityOutcome::LoggedIn);
        assert!(bootstrap.is_released());
        assert_eq!(
            sink.event_names(),
            vec![event_names::PAGE_VIEW.to_owned(), event_names::CLICK.to_owned()]
        );
        assert!(sink.payloads().iter().all(|payload| payload.attributes["is_logged_in"] == json!(true)));
    }

    #[test]
    fn identity_first_then_start_releases_too() {
        let (sink, _jar, bootstrap) = bootstrap(WidgetConfig::default());
        bootstrap.identity_resolved(IdentityOutcome::Failed(TransportError::Network(
            "offline".to_owned(),
        )));
        assert_eq!(bootstrap.tracker().phase(), TrackerPhase::Buffering);
        bootstrap.start(&page(), "academy", None);
        assert_eq!(bootstrap.tracker().phase(), TrackerPhase::Live);
        assert_eq!(sink.payloads()[0].attributes["is_logged_in"], json!(false));
    }

    #[test]
    fn page_view_carries_super_attributes_and_utm_url() {
        let (sink, jar, bootstrap) = bootstrap(WidgetConfig::default());
        bootstrap.start(&page(), "academy", Some("dsml"));
        bootstrap.identity_resolved(IdentityOutcome::LoggedOut);

        assert!(jar.contains(BYPASS_UTM));
        let payload = &sink.payloads()[0];
        assert_eq!(payload.attributes["product"], json!("academy"));
        assert_eq!(payload.attributes["subproduct"], json!("dsml"));
        assert_eq!(payload.attributes["page_path"], json!("/courses/ai"));
        assert_eq!(payload.attributes["page_title"], json!("AI course"));
        assert_eq!(
            payload.attributes["utm_propagation_params"],
            json!({ "utm_source": "google_search", "utm_medium": "cpc", "utm_content": "/courses/ai" })
        );
        // The page URL already carries UTM parameters, so it is used as is.
        assert_eq!(payload.attributes["page_url"], json!(page().href));

        let attribution = bootstrap.attribution().attribution();
        assert_eq!(attribution.product(), "academy");
        assert_eq!(attribution.platform().as_str(), "mobile");
    }

    #[test]
    fn server_events_replay_before_the_page_view() {
        let (sink, jar, bootstrap) = bootstrap(WidgetConfig::default());
        jar.insert_raw(
            "gtm_data",
            &crate::cookie::encode_component(r#"["{\"event\":\"signup_success\"}"]"#),
        );
        bootstrap.start(&page(), "academy", None);
        assert_eq!(sink.event_names(), vec!["signup_success".to_owned()]);
        bootstrap.identity_resolved(IdentityOutcome::LoggedOut);
        assert_eq!(
            sink.event_names(),
            vec!["signup_success".to_owned(), event_names::PAGE_VIEW.to_owned()]
        );
    }

    #[test]
    fn disabled_analytics_still_resolves_utm() {
        let (sink, jar, bootstrap) = bootstrap(WidgetConfig {
            analytics_enabled: false,
            ..WidgetConfig::default()
        });
        bootstrap.start(&page(), "academy", None);
        bootstrap.identity_resolved(IdentityOutcome::LoggedIn);
        assert!(sink.entries().is_empty());
        assert!(jar.contains(BYPASS_UTM));
    }

    #[test]
    fn release_happens_once() {
        let (sink, _jar, bootstrap) = bootstrap(WidgetConfig::default());
        bootstrap.start(&page(), "academy", None);
        bootstrap.identity_resolved(IdentityOutcome::LoggedOut);
        bootstrap.identity_resolved(IdentityOutcome::LoggedIn);
        bootstrap.start(&page(), "academy", None);
        assert_eq!(sink.event_names(), vec![event_names::PAGE_VIEW.to_owned()]);
        assert!(bootstrap.tracker().is_logged_in());
    }
}

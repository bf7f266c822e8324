use std::cell::RefCell;
use std::rc::Rc;

use formbeacon::challenge::{ChallengeBridge, ChallengeHandlers, ChallengePhase};
use formbeacon::config::ChallengeConfig;
use formbeacon::cookie::{Cookies, encode_component};
use formbeacon::isolation::ShadowIsolationHost;
use formbeacon::portal::PortalRegistry;
use formbeacon::protocol::event_names;
use formbeacon::request::{Method, RequestBody, RequestOptions};
use formbeacon::test_harness::{
    FakeChallengeGlobal, InstantSleeper, MemoryCookieJar, MemoryDom, RecordingSink,
};
use formbeacon::utm::BYPASS_UTM;
use formbeacon::{IdentityOutcome, PageBootstrap, PageSnapshot, WidgetConfig};
use serde_json::json;

const LANDING: &str = "https://www.example.com/courses/ai?utm_source=google.com&utm_medium=cpc";
const RESOLVED: &str = "utm_source=google_search&utm_medium=cpc&utm_content=/courses/ai";

fn navigate(jar: &Rc<MemoryCookieJar>, page: &PageSnapshot) -> (Rc<RecordingSink>, PageBootstrap) {
    let sink = Rc::new(RecordingSink::new());
    let bootstrap = PageBootstrap::new(
        WidgetConfig::default(),
        sink.clone(),
        Cookies::new(jar.clone()),
    );
    bootstrap.start(page, "academy", None);
    bootstrap.identity_resolved(IdentityOutcome::LoggedOut);
    (sink, bootstrap)
}

#[test]
fn search_engine_landing_is_carried_to_the_next_navigation() {
    let jar = Rc::new(MemoryCookieJar::new());

    let (_sink, landing) = navigate(&jar, &PageSnapshot::new(LANDING));
    assert_eq!(landing.cookies().get(BYPASS_UTM).as_deref(), Some(RESOLVED));

    let pricing = PageSnapshot::new("https://www.example.com/pricing")
        .with_referrer(LANDING);
    let (sink, next) = navigate(&jar, &pricing);

    let expected_url = format!("https://www.example.com/pricing?{RESOLVED}");
    let payload = &sink.payloads()[0];
    assert_eq!(payload.event, event_names::PAGE_VIEW);
    assert_eq!(payload.attributes["page_url"], json!(expected_url));
    assert_eq!(
        payload.attributes["utm_propagation_params"],
        json!({ "utm_source": "google_search", "utm_medium": "cpc", "utm_content": "/courses/ai" })
    );

    let request = next.request_decorator(None).build(
        &pricing,
        Method::Post,
        "/api/leads",
        RequestBody::Json(json!({ "email": "ana@example.com" })),
        RequestOptions::default(),
    );
    assert_eq!(request.referrer, expected_url);
}

#[test]
fn buffered_events_flush_after_server_events_in_order() {
    let jar = Rc::new(MemoryCookieJar::new());
    jar.insert_raw(
        "gtm_data",
        &encode_component(r#"["{\"event\":\"signup_success\",\"method\":\"email\"}"]"#),
    );
    let sink = Rc::new(RecordingSink::new());
    let bootstrap = PageBootstrap::new(
        WidgetConfig::default(),
        sink.clone(),
        Cookies::new(jar.clone()),
    );

    bootstrap.start(&PageSnapshot::new(LANDING), "academy", Some("dsml"));
    bootstrap.tracker().click(serde_json::Map::new());
    bootstrap.identity_resolved(IdentityOutcome::LoggedIn);
    bootstrap.tracker().hover(serde_json::Map::new());

    assert_eq!(
        sink.event_names(),
        vec![
            "signup_success".to_owned(),
            event_names::PAGE_VIEW.to_owned(),
            event_names::CLICK.to_owned(),
            event_names::HOVER.to_owned(),
        ]
    );
    assert!(!jar.contains("gtm_data"));
    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 3);
    for payload in &payloads {
        assert_eq!(payload.attributes["is_logged_in"], json!(true));
        assert_eq!(payload.attributes["subproduct"], json!("dsml"));
    }
}

#[test]
fn challenge_widget_renders_across_the_boundary_and_cleans_up() {
    let dom = Rc::new(MemoryDom::new());
    let host = dom.element("div");
    let boundary = ShadowIsolationHost::mount(dom.as_ref(), &host).unwrap();
    let registry = PortalRegistry::new();
    let global = Rc::new(FakeChallengeGlobal::installed());
    let tokens: Rc<RefCell<Vec<String>>> = Rc::default();

    let recorded = tokens.clone();
    let bridge = ChallengeBridge::new(
        dom.clone(),
        global.clone(),
        Rc::new(InstantSleeper::new()),
        ChallengeConfig {
            site_key: "0x4AAAAAAA".to_owned(),
            ..ChallengeConfig::default()
        },
        ChallengeHandlers::new(move |token| recorded.borrow_mut().push(token)),
    );
    bridge.mount(&registry, boundary.container()).unwrap();
    assert!(bridge.start().unwrap().is_none());
    assert_eq!(bridge.phase(), ChallengePhase::Initialized);

    let container = bridge.container().unwrap();
    assert_eq!(container.parent(), Some(host.clone()));
    assert_eq!(container.attribute("slot"), bridge.slot_name());

    let api = global.api();
    assert_eq!(api.rendered_into(), vec![container.clone()]);
    api.complete("token-1");
    assert_eq!(*tokens.borrow(), vec!["token-1".to_owned()]);

    drop(bridge);
    assert_eq!(api.removals().len(), 1);
    assert!(registry.is_empty());
    assert_eq!(container.parent(), None);
}

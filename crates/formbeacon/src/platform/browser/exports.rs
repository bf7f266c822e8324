//! JS entry points for pages that embed the wasm module directly.
//!
//! ```js
//! formbeaconInit(JSON.stringify({ gtm_id: "GTM-XXXX", product: "academy" }));
//! formbeaconIdentityResolved(true);
//! formbeaconTrack("cta_click", JSON.stringify({ click_source: "hero" }));
//! ```

use std::cell::RefCell;

use wasm_bindgen::prelude::*;

use crate::attributes::Attributes;
use crate::bootstrap::IdentityOutcome;
use crate::config::WidgetConfig;
use crate::request::TransportError;

use super::{BrowserPage, install};

thread_local! {
    static PAGE: RefCell<Option<BrowserPage>> = const { RefCell::new(None) };
}

fn to_js(error: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&error.to_string())
}

/// Install once per page; later calls are ignored.
#[wasm_bindgen(js_name = formbeaconInit)]
pub fn init(config_json: &str) -> Result<(), JsValue> {
    if PAGE.with(|page| page.borrow().is_some()) {
        log::debug!("[Page] already installed");
        return Ok(());
    }
    let config = WidgetConfig::from_json(config_json).map_err(to_js)?;
    let page = install(config).map_err(to_js)?;
    PAGE.with(|slot| *slot.borrow_mut() = Some(page));
    Ok(())
}

/// `undefined` reports a failed lookup.
#[wasm_bindgen(js_name = formbeaconIdentityResolved)]
pub fn identity_resolved(logged_in: Option<bool>) {
    let outcome = match logged_in {
        Some(true) => IdentityOutcome::LoggedIn,
        Some(false) => IdentityOutcome::LoggedOut,
        None => IdentityOutcome::Failed(TransportError::Network(
            "identity lookup failed".to_owned(),
        )),
    };
    PAGE.with(|page| match page.borrow().as_ref() {
        Some(page) => page.identity_resolved(outcome),
        None => log::warn!("[Page] identity resolved before formbeaconInit"),
    });
}

#[wasm_bindgen(js_name = formbeaconTrack)]
pub fn track(event: &str, attributes_json: Option<String>) -> Result<(), JsValue> {
    let attributes: Attributes = match attributes_json {
        Some(json) => serde_json::from_str(&json).map_err(to_js)?,
        None => Attributes::new(),
    };
    PAGE.with(|page| match page.borrow().as_ref() {
        Some(page) => {
            page.bootstrap().tracker().track(event, attributes);
            Ok(())
        }
        None => Err(JsValue::from_str("formbeaconInit has not run")),
    })
}

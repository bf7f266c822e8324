//! # formbeacon
//!
//! Client-side tracking, attribution and widget embedding for lead-form
//! widgets.
//!
//! The crate is split the same way on every target:
//! - host-agnostic modules (tracker, attribution, UTM propagation, inbox,
//!   isolation host, portal registry, challenge bridge) that talk to the page
//!   only through the traits in [`cookie`], [`dom`], [`tracker::EventSink`],
//!   [`gtm::GtmHost`] and [`challenge::ChallengeGlobal`];
//! - `platform::browser` (wasm32 only), the one place where `web_sys`,
//!   `js_sys` and `zoon` are touched.
//!
//! [`bootstrap::PageBootstrap`] is the context object a widget builds once at
//! page start and threads through its components.

pub mod attribution;
pub mod attributes;
pub mod bootstrap;
pub mod challenge;
pub mod config;
pub mod cookie;
pub mod dom;
pub mod gtm;
pub mod inbox;
pub mod interaction;
pub mod isolation;
pub mod page;
pub mod platform;
pub mod portal;
pub mod request;
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;
pub mod tracker;
pub mod utm;

pub use formbeacon_protocol as protocol;

pub use attribution::{AttributionExtra, AttributionRecord, AttributionState, DeviceType};
pub use bootstrap::{IdentityOutcome, PageBootstrap};
pub use config::WidgetConfig;
pub use page::PageSnapshot;
pub use tracker::{EventSink, EventTracker};

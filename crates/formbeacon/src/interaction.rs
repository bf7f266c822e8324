//! Page interaction trackers wired through [`DomHost`](crate::dom::DomHost)
//! listeners. Each tracker owns its listeners and removes them on drop.

mod elements;
mod fields;
mod triggers;

pub use elements::{ElementTracking, TRACK_CLASS, extract_attributes};
pub use fields::{FIELD_ID_ATTRIBUTE, FieldBlurTracking};
pub use triggers::{FORM_TRIGGER_CLASS, FormTriggerData, FormTriggerStore, FormTriggers};

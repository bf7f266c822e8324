//! Named wrappers over [`EventTracker::track`].

use formbeacon_protocol::event_names;
use serde_json::Value;

use super::EventTracker;
use crate::attributes::{Attributes, CUSTOM_KEY};
use crate::page::PageSnapshot;

impl EventTracker {
    /// Page view enriched with the page facts; `partial` wins on conflicts.
    pub fn pageview(&self, page: &PageSnapshot, partial: Attributes) {
        let mut attributes = Attributes::new();
        attributes.insert("page_title".to_owned(), Value::String(page.title.clone()));
        attributes.insert("page_path".to_owned(), Value::String(page.path()));
        attributes.insert("page_url".to_owned(), Value::String(page.href.clone()));
        attributes.insert(
            "query_params".to_owned(),
            Value::Object(page.query_params()),
        );
        attributes.extend(partial);
        self.track(event_names::PAGE_VIEW, attributes);
    }

    pub fn click(&self, attributes: Attributes) {
        self.track(event_names::CLICK, attributes);
    }

    pub fn hover(&self, attributes: Attributes) {
        self.track(event_names::HOVER, attributes);
    }

    pub fn section_view(&self, attributes: Attributes) {
        self.track(event_names::SECTION_VIEW, attributes);
    }

    pub fn form_submit_status(&self, attributes: Attributes) {
        self.track(event_names::FORM_SUBMIT_STATUS, attributes);
    }

    /// Click carrying `click_type = kind` and the message as a custom field.
    pub fn track_error(&self, kind: &str, message: &str) {
        let mut custom = Attributes::new();
        custom.insert("message".to_owned(), Value::String(message.to_owned()));
        let mut attributes = Attributes::new();
        attributes.insert("click_type".to_owned(), Value::String(kind.to_owned()));
        attributes.insert(CUSTOM_KEY.to_owned(), Value::Object(custom));
        self.click(attributes);
    }

    pub fn track_form_submit_status(&self, status: &str, extra: Attributes) {
        let mut attributes = Attributes::new();
        attributes.insert("form_status".to_owned(), Value::String(status.to_owned()));
        attributes.extend(extra);
        self.click(attributes);
    }

    pub fn track_gtm_form_submit_status(&self, form_id: &str, status: bool, extra: Attributes) {
        let mut attributes = Attributes::new();
        attributes.insert("form_id".to_owned(), Value::String(form_id.to_owned()));
        attributes.insert("status".to_owned(), Value::Bool(status));
        attributes.extend(extra);
        self.form_submit_status(attributes);
    }
}

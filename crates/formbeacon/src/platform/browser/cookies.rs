use wasm_bindgen::JsCast;
use web_sys::{Document, HtmlDocument};

use crate::cookie::CookieJar;

use super::js_error;

/// `document.cookie`.
pub struct DocumentCookies {
    document: HtmlDocument,
}

impl DocumentCookies {
    pub fn new(document: Document) -> Option<Self> {
        document
            .dyn_into::<HtmlDocument>()
            .ok()
            .map(|document| Self { document })
    }
}

impl CookieJar for DocumentCookies {
    fn read(&self) -> String {
        self.document.cookie().unwrap_or_default()
    }

    fn write(&self, assignment: &str) {
        if let Err(error) = self.document.set_cookie(assignment) {
            log::warn!("[Cookies] write rejected: {}", js_error(error));
        }
    }
}

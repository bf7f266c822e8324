//! Decoration of outbound form API requests.
//!
//! Every request carries the device type, the CSRF token, the attribution
//! record and the UTM-decorated page URL as referrer. Transport itself is
//! left to the caller; this module only shapes the request and reads the
//! flash header of the response.

use std::fmt;
use std::rc::Rc;

use serde::Deserialize;
use serde_json::Value;

use crate::attribution::AttributionState;
use crate::attributes::Attributes;
use crate::cookie::Cookies;
use crate::page::PageSnapshot;
use crate::tracker::EventTracker;
use crate::utm::url_with_utm_params;

pub const FLASH_HEADER: &str = "X-Flash-Messages";
pub const ATTRIBUTIONS_KEY: &str = "attributions";

// --- Errors ---

/// Failure of a request made on behalf of the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Network(String),
    Status { status: u16, message: String },
    Decode(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(reason) => write!(f, "network error: {reason}"),
            TransportError::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            TransportError::Decode(reason) => write!(f, "invalid response body: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

// --- Request ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Multipart body assembled by the browser; no `Content-Type` is set.
    FormData,
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Override the defaults, matched case-insensitively.
    pub headers: Vec<(String, String)>,
    pub params: Option<Attributes>,
    /// Add the attribution record to JSON object bodies.
    pub embed_attributions: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub referrer: String,
    pub body: Option<String>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// `key=value` pairs joined with `&`, values unencoded. Nulls are skipped;
/// with `transform_arrays` an array becomes one `key[]=v` pair per element.
pub fn search_params(params: &Attributes, transform_arrays: bool) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) if transform_arrays => {
                pairs.extend(items.iter().map(|item| format!("{key}[]={}", display_value(item))));
            }
            value => pairs.push(format!("{key}={}", display_value(value))),
        }
    }
    pairs.join("&")
}

/// String conversion the way a browser formats a value into a URL.
fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_owned(),
    }
}

pub struct RequestDecorator {
    attribution: Rc<AttributionState>,
    cookies: Cookies,
    csrf_token: Option<String>,
}

impl RequestDecorator {
    pub fn new(attribution: Rc<AttributionState>, cookies: Cookies) -> Self {
        Self {
            attribution,
            cookies,
            csrf_token: None,
        }
    }

    /// Value of `<meta name="csrf-token">`, when the page has one.
    pub fn with_csrf_token(mut self, csrf_token: Option<String>) -> Self {
        self.csrf_token = csrf_token.filter(|token| !token.is_empty());
        self
    }

    pub fn default_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Accept".to_owned(), "application/json".to_owned()),
            ("Content-Type".to_owned(), "application/json".to_owned()),
            ("X-Requested-With".to_owned(), "XMLHttpRequest".to_owned()),
            ("X-Accept-Flash".to_owned(), "true".to_owned()),
            (
                "App-Name".to_owned(),
                self.attribution.platform().as_str().to_owned(),
            ),
        ];
        if let Some(token) = &self.csrf_token {
            headers.push(("X-CSRF-Token".to_owned(), token.clone()));
        }
        headers
    }

    pub fn build(
        &self,
        page: &PageSnapshot,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> OutboundRequest {
        let mut headers = self.default_headers();
        if body == RequestBody::FormData {
            headers.retain(|(key, _)| !key.eq_ignore_ascii_case("Content-Type"));
        }
        for (key, value) in options.headers {
            match headers.iter_mut().find(|(existing, _)| existing.eq_ignore_ascii_case(&key)) {
                Some(entry) => entry.1 = value,
                None => headers.push((key, value)),
            }
        }

        let mut url = path.to_owned();
        if let Some(params) = &options.params {
            url = format!("{url}?{}", search_params(params, false));
        } else if let (Method::Get, RequestBody::Json(Value::Object(query))) = (method, &body) {
            url = format!("{url}?{}", search_params(query, true));
        }

        let body = match body {
            RequestBody::Json(json) if method != Method::Get => {
                Some(self.json_body(json, options.embed_attributions).to_string())
            }
            _ => None,
        };

        OutboundRequest {
            method,
            url,
            headers,
            referrer: url_with_utm_params(page, &self.cookies),
            body,
        }
    }

    fn json_body(&self, json: Value, embed_attributions: bool) -> Value {
        match json {
            Value::Object(mut object) if embed_attributions => {
                object
                    .entry(ATTRIBUTIONS_KEY)
                    .or_insert_with(|| self.attribution.attribution().to_value());
                Value::Object(object)
            }
            json => json,
        }
    }
}

// --- Response ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FlashMessages {
    pub error: Option<String>,
    pub notice: Option<String>,
}

impl FlashMessages {
    /// Unparsable headers read as no messages.
    pub fn parse(header: &str) -> Self {
        serde_json::from_str::<Option<Self>>(header)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Message shown to the user: the error, else the notice.
    pub fn flash_error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .filter(|error| !error.is_empty())
            .or_else(|| self.notice.as_deref().filter(|notice| !notice.is_empty()))
    }
}

/// Read the flash header of a response. An error message is tracked as a
/// click with `click_type = "Flash error"`. Returns the message to display.
pub fn handle_flash_header(header: &str, tracker: &EventTracker) -> Option<String> {
    let messages = FlashMessages::parse(header);
    if let Some(error) = messages.error.as_deref().filter(|error| !error.is_empty()) {
        let mut click = Attributes::new();
        click.insert("click_text".to_owned(), Value::String(error.to_owned()));
        click.insert("click_type".to_owned(), Value::String("Flash error".to_owned()));
        tracker.click(click);
    }
    messages.flash_error().map(str::to_owned)
}

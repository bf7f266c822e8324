//! `document.cookie` codec.
//!
//! Values are written with `encodeURIComponent` semantics and decoded exactly
//! once on read. Expiry is expressed as `max-age` so no wall clock is needed
//! on the client.

use std::fmt::{self, Write as _};
use std::rc::Rc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters `encodeURIComponent` escapes.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// `decodeURIComponent`; malformed UTF-8 yields `None`.
pub fn decode_component(value: &str) -> Option<String> {
    percent_decode_str(value)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Raw access to the page cookie string.
pub trait CookieJar {
    /// The `document.cookie` getter: `name=value` pairs separated by `;`.
    fn read(&self) -> String;
    /// One assignment to the `document.cookie` setter.
    fn write(&self, assignment: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    pub max_age_secs: Option<i64>,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_owned(),
            domain: None,
            max_age_secs: None,
            secure: false,
            same_site: None,
        }
    }
}

impl CookieOptions {
    pub fn expires_in_minutes(minutes: u32) -> Self {
        Self {
            max_age_secs: Some(i64::from(minutes) * 60),
            ..Self::default()
        }
    }

    fn expired() -> Self {
        Self {
            max_age_secs: Some(-1),
            ..Self::default()
        }
    }
}

/// Build one `document.cookie` assignment.
pub fn format_assignment(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut assignment = format!(
        "{}={}; path={}",
        encode_component(name),
        encode_component(value),
        options.path
    );
    // Writing to a String cannot fail.
    if let Some(domain) = &options.domain {
        let _ = write!(assignment, "; domain={domain}");
    }
    if let Some(max_age) = options.max_age_secs {
        let _ = write!(assignment, "; max-age={max_age}");
    }
    if options.secure {
        assignment.push_str("; secure");
    }
    if let Some(same_site) = options.same_site {
        let _ = write!(assignment, "; samesite={same_site}");
    }
    assignment
}

/// Find the still-encoded value of `name` in a cookie string.
pub fn find_raw(cookie_string: &str, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    cookie_string
        .split(';')
        .map(str::trim_start)
        .find_map(|row| row.strip_prefix(name)?.strip_prefix('='))
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Typed cookie access over a [`CookieJar`]. Every read hits the jar again.
#[derive(Clone)]
pub struct Cookies {
    jar: Rc<dyn CookieJar>,
}

impl Cookies {
    pub fn new(jar: Rc<dyn CookieJar>) -> Self {
        Self { jar }
    }

    /// Value as stored, without decoding.
    pub fn get_raw(&self, name: &str) -> Option<String> {
        find_raw(&self.jar.read(), name)
    }

    /// Value decoded once; absent or undecodable cookies read as `None`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.get_raw(name).and_then(|raw| decode_component(&raw))
    }

    pub fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        self.jar.write(&format_assignment(name, value, options));
    }

    pub fn delete(&self, name: &str) {
        self.set(name, "", &CookieOptions::expired());
    }
}

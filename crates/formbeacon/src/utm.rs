//! UTM propagation across same-session navigations.
//!
//! Resolution order, first non-empty wins:
//! 1. `utm_*` parameters of the current URL,
//! 2. the `bypass_utm` cookie written by an earlier navigation,
//! 3. a classification of `document.referrer`.
//!
//! The resolved query string is persisted with a sliding expiry and then
//! read back by [`utm_propagation_params`] and [`url_with_utm_params`] so the
//! outbound analytics and request referrers of a navigation all come from the
//! same computation.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::{Url, form_urlencoded};

use crate::cookie::{CookieOptions, Cookies};
use crate::page::PageSnapshot;

pub const BYPASS_UTM: &str = "bypass_utm";
pub const UTM_PREFIX: &str = "utm_";
pub const UTM_SOURCE: &str = "utm_source";
pub const UTM_MEDIUM: &str = "utm_medium";
pub const UTM_CONTENT: &str = "utm_content";

pub const DEFAULT_COOKIE_MINUTES: u32 = 30;

pub const ORGANIC_SEARCH: &str = "organic_search";
pub const ORGANIC_SOCIAL: &str = "organic_social";
pub const ORGANIC_VIDEO: &str = "organic_video";
pub const REFERRAL: &str = "referral";
pub const UTM_MEDIUM_DEFAULT: &str = "direct";
pub const UTM_SOURCE_DEFAULT: &str = "direct";

/// Domain markers normalized to a canonical search-engine source.
const SEARCH_ENGINE_SOURCES: &[(&str, &str)] = &[
    ("google.com", "google_search"),
    ("bing.com", "bing_search"),
    ("yahoo.com", "yahoo_search"),
    ("duckduckgo.com", "duckduckgo_search"),
];

/// Hostname labels per referrer medium.
const SEARCH_SITE_LIST: &[&str] = &[
    "google", "bing", "yahoo", "duckduckgo", "baidu", "yandex", "ecosia", "ask", "naver",
];
const ORGANIC_SITE_LIST: &[&str] = &[
    "facebook", "instagram", "linkedin", "twitter", "x", "t", "reddit", "quora", "pinterest",
    "whatsapp", "telegram", "lnkd",
];
const VIDEO_SITE_LIST: &[&str] = &["youtube", "youtu", "vimeo", "dailymotion", "twitch"];

/// Escaped inside a key or value of the persisted query. `/` and `:` stay
/// readable so paths and referrer URLs survive as they are.
const QUERY_COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>');

/// Where the persisted query string came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UtmOrigin {
    Search,
    Cookie,
    Referrer,
    Direct,
}

/// Result of [`UtmPropagation::initialize`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtmResolution {
    pub origin: UtmOrigin,
    /// Query string as persisted in the cookie, keys and values escaped.
    pub query: String,
}

fn normalize_source(source: &str) -> String {
    SEARCH_ENGINE_SOURCES
        .iter()
        .find(|(marker, _)| source.contains(marker))
        .map(|(_, canonical)| (*canonical).to_owned())
        .unwrap_or_else(|| source.to_owned())
}

/// `utm_*` pairs of the page URL in document order.
pub fn utm_params_from_search(page: &PageSnapshot) -> Vec<(String, String)> {
    page.query_pairs()
        .into_iter()
        .filter(|(key, _)| key.starts_with(UTM_PREFIX))
        .map(|(key, value)| {
            let value = if key == UTM_SOURCE { normalize_source(&value) } else { value };
            (key, value)
        })
        .collect()
}

fn push_pair(query: &mut String, key: &str, value: &str) {
    if !query.is_empty() {
        query.push('&');
    }
    query.extend(utf8_percent_encode(key, QUERY_COMPONENT));
    query.push('=');
    query.extend(utf8_percent_encode(value, QUERY_COMPONENT));
}

/// Join decoded pairs into a query string, escaping each key and value.
pub fn to_query_string(params: &[(String, String)]) -> String {
    let mut query = String::new();
    for (key, value) in params {
        push_pair(&mut query, key, value);
    }
    query
}

fn is_same_origin(referrer: &str, page: &PageSnapshot) -> bool {
    let Some(host) = page.host() else {
        return false;
    };
    match Url::parse(referrer) {
        Ok(url) => {
            let referrer_host = match (url.host_str(), url.port()) {
                (Some(name), Some(port)) => format!("{name}:{port}"),
                (Some(name), None) => name.to_owned(),
                (None, _) => return false,
            };
            referrer_host == host
        }
        Err(_) => referrer.contains(&host),
    }
}

fn hostname_has_label(labels: &[&str], referrer: &str) -> bool {
    let Ok(url) = Url::parse(referrer) else {
        return false;
    };
    let Some(hostname) = url.host_str() else {
        return false;
    };
    hostname.split('.').any(|label| labels.contains(&label))
}

/// Medium for a cross-origin referrer.
pub fn classify_referrer(referrer: &str) -> &'static str {
    if hostname_has_label(SEARCH_SITE_LIST, referrer) {
        ORGANIC_SEARCH
    } else if hostname_has_label(ORGANIC_SITE_LIST, referrer) {
        ORGANIC_SOCIAL
    } else if hostname_has_label(VIDEO_SITE_LIST, referrer) {
        ORGANIC_VIDEO
    } else {
        REFERRAL
    }
}

/// `utm_medium`/`utm_source` derived from the referrer.
pub fn utm_params_from_referrer(page: &PageSnapshot) -> (Vec<(String, String)>, UtmOrigin) {
    let referrer = page.referrer.trim();
    if referrer.is_empty() || is_same_origin(referrer, page) {
        return (
            vec![
                (UTM_MEDIUM.to_owned(), UTM_MEDIUM_DEFAULT.to_owned()),
                (UTM_SOURCE.to_owned(), UTM_SOURCE_DEFAULT.to_owned()),
            ],
            UtmOrigin::Direct,
        );
    }
    (
        vec![
            (UTM_MEDIUM.to_owned(), classify_referrer(referrer).to_owned()),
            (UTM_SOURCE.to_owned(), normalize_source(referrer)),
        ],
        UtmOrigin::Referrer,
    )
}

/// Split a persisted query string into decoded pairs. A pair without `=`
/// maps to an empty value; later duplicates win.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn has_key(query: &str, key: &str) -> bool {
    form_urlencoded::parse(query.as_bytes()).any(|(name, _)| name == key)
}

/// Resolves and persists the UTM query string of one navigation.
#[derive(Clone)]
pub struct UtmPropagation {
    cookies: Cookies,
    cookie_minutes: u32,
}

impl UtmPropagation {
    pub fn new(cookies: Cookies) -> Self {
        Self {
            cookies,
            cookie_minutes: DEFAULT_COOKIE_MINUTES,
        }
    }

    pub fn with_cookie_minutes(mut self, minutes: u32) -> Self {
        self.cookie_minutes = minutes;
        self
    }

    /// Resolve the query string for `page`, append `utm_content` when it is
    /// missing and refresh the cookie.
    pub fn initialize(&self, page: &PageSnapshot) -> UtmResolution {
        let (mut query, origin) = self.resolve(page);
        if !has_key(&query, UTM_CONTENT) {
            let path = page.path();
            push_pair(&mut query, UTM_CONTENT, &percent_decode_str(&path).decode_utf8_lossy());
        }
        self.cookies.set(
            BYPASS_UTM,
            &query,
            &CookieOptions::expires_in_minutes(self.cookie_minutes),
        );
        log::debug!("[UTM] resolved from {origin:?}: {query}");
        UtmResolution { origin, query }
    }

    fn resolve(&self, page: &PageSnapshot) -> (String, UtmOrigin) {
        let from_search = to_query_string(&utm_params_from_search(page));
        if !from_search.is_empty() {
            return (from_search, UtmOrigin::Search);
        }
        if let Some(persisted) = self.cookies.get(BYPASS_UTM).filter(|query| !query.is_empty()) {
            return (persisted, UtmOrigin::Cookie);
        }
        let (params, origin) = utm_params_from_referrer(page);
        (to_query_string(&params), origin)
    }

    /// The persisted query string, re-read from the cookie.
    pub fn persisted_query(&self) -> Option<String> {
        self.cookies.get(BYPASS_UTM).filter(|query| !query.is_empty())
    }
}

/// Persisted UTM pairs as a map, for outbound headers and super-attributes.
pub fn utm_propagation_params(cookies: &Cookies) -> BTreeMap<String, String> {
    cookies
        .get(BYPASS_UTM)
        .map(|query| parse_query(&query))
        .unwrap_or_default()
}

/// Page URL carrying the persisted UTM query when the URL has none of its own.
/// The query goes before any fragment.
pub fn url_with_utm_params(page: &PageSnapshot, cookies: &Cookies) -> String {
    let carries_utm = page
        .query_pairs()
        .iter()
        .any(|(key, _)| key == UTM_MEDIUM || key == UTM_SOURCE);
    if carries_utm {
        return page.href.clone();
    }
    let Some(persisted) = cookies.get(BYPASS_UTM).filter(|query| !query.is_empty()) else {
        return page.href.clone();
    };
    let Some(mut url) = page.url() else {
        let separator = if page.href.contains('?') { '&' } else { '?' };
        return format!("{}{separator}{persisted}", page.href);
    };
    let query = match url.query().filter(|query| !query.is_empty()) {
        Some(existing) => format!("{existing}&{persisted}"),
        None => persisted,
    };
    url.set_query(Some(&query));
    url.into()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::test_harness::MemoryCookieJar;

    fn cookies() -> (Rc<MemoryCookieJar>, Cookies) {
        let jar = Rc::new(MemoryCookieJar::new());
        let cookies = Cookies::new(jar.clone());
        (jar, cookies)
    }

    #[test]
    fn search_params_win_over_cookie_and_referrer() {
        let (_, cookies) = cookies();
        cookies.set(BYPASS_UTM, "utm_source=old", &CookieOptions::default());
        let page = PageSnapshot::new("https://www.example.com/a?utm_source=abc&x=1")
            .with_referrer("https://www.bing.com/search");
        let resolution = UtmPropagation::new(cookies).initialize(&page);
        assert_eq!(resolution.origin, UtmOrigin::Search);
        assert_eq!(resolution.query, "utm_source=abc&utm_content=/a");
    }

    #[test]
    fn cookie_wins_over_referrer() {
        let (_, cookies) = cookies();
        cookies.set(BYPASS_UTM, "utm_source=old&utm_content=/first", &CookieOptions::default());
        let page = PageSnapshot::new("https://www.example.com/b")
            .with_referrer("https://www.bing.com/search");
        let resolution = UtmPropagation::new(cookies).initialize(&page);
        assert_eq!(resolution.origin, UtmOrigin::Cookie);
        assert_eq!(resolution.query, "utm_source=old&utm_content=/first");
    }

    #[test]
    fn referrer_is_classified_when_nothing_else_exists() {
        let cases = [
            ("https://www.bing.com/search?q=x", ORGANIC_SEARCH, "bing_search"),
            ("https://www.google.com/", ORGANIC_SEARCH, "google_search"),
            ("https://m.facebook.com/", ORGANIC_SOCIAL, "https://m.facebook.com/"),
            ("https://www.youtube.com/watch", ORGANIC_VIDEO, "https://www.youtube.com/watch"),
            ("https://blog.partner.io/post", REFERRAL, "https://blog.partner.io/post"),
        ];
        for (referrer, medium, source) in cases {
            let (_, cookies) = cookies();
            let page = PageSnapshot::new("https://www.example.com/c").with_referrer(referrer);
            let resolution = UtmPropagation::new(cookies).initialize(&page);
            assert_eq!(resolution.origin, UtmOrigin::Referrer, "{referrer}");
            assert_eq!(
                resolution.query,
                format!("utm_medium={medium}&utm_source={source}&utm_content=/c")
            );
        }
    }

    #[test]
    fn same_origin_or_missing_referrer_falls_back_to_direct() {
        for referrer in ["", "https://www.example.com/previous"] {
            let (_, cookies) = cookies();
            let page = PageSnapshot::new("https://www.example.com/d").with_referrer(referrer);
            let resolution = UtmPropagation::new(cookies).initialize(&page);
            assert_eq!(resolution.origin, UtmOrigin::Direct);
            assert_eq!(resolution.query, "utm_medium=direct&utm_source=direct&utm_content=/d");
        }
    }

    #[test]
    fn malformed_referrer_is_a_referral() {
        let (_, cookies) = cookies();
        let page = PageSnapshot::new("https://www.example.com/e").with_referrer("::not a url::");
        let resolution = UtmPropagation::new(cookies).initialize(&page);
        assert_eq!(resolution.origin, UtmOrigin::Referrer);
        assert!(resolution.query.starts_with("utm_medium=referral&"));
    }

    #[test]
    fn existing_utm_content_is_kept() {
        let (_, cookies) = cookies();
        let page = PageSnapshot::new("https://www.example.com/f?utm_content=hero&utm_medium=cpc");
        let resolution = UtmPropagation::new(cookies).initialize(&page);
        assert_eq!(resolution.query, "utm_content=hero&utm_medium=cpc");
    }

    #[test]
    fn cookie_is_refreshed_with_sliding_expiry() {
        let (jar, cookies) = cookies();
        let page = PageSnapshot::new("https://www.example.com/g?utm_source=abc");
        UtmPropagation::new(cookies).with_cookie_minutes(45).initialize(&page);
        assert!(jar.assignments().last().is_some_and(|last| last.contains("max-age=2700")));
    }

    #[test]
    fn propagation_params_parse_the_cookie() {
        let (_, cookies) = cookies();
        cookies.set(
            BYPASS_UTM,
            "utm_source=google_search&utm_medium=cpc&utm_content=/x",
            &CookieOptions::default(),
        );
        let params = utm_propagation_params(&cookies);
        assert_eq!(params["utm_source"], "google_search");
        assert_eq!(params["utm_medium"], "cpc");
        assert_eq!(params["utm_content"], "/x");
    }

    #[test]
    fn url_with_utm_params_appends_persisted_query() {
        let (_, cookies) = cookies();
        cookies.set(BYPASS_UTM, "utm_source=abc&utm_content=/h", &CookieOptions::default());

        let plain = PageSnapshot::new("https://www.example.com/h");
        assert_eq!(
            url_with_utm_params(&plain, &cookies),
            "https://www.example.com/h?utm_source=abc&utm_content=/h"
        );

        let with_query = PageSnapshot::new("https://www.example.com/h?x=1");
        assert_eq!(
            url_with_utm_params(&with_query, &cookies),
            "https://www.example.com/h?x=1&utm_source=abc&utm_content=/h"
        );

        let tagged = PageSnapshot::new("https://www.example.com/h?utm_source=own");
        assert_eq!(url_with_utm_params(&tagged, &cookies), tagged.href);
    }

    #[test]
    fn escaped_values_survive_the_cookie() {
        let (_, cookies) = cookies();
        let page = PageSnapshot::new(
            "https://www.example.com/a?utm_source=google+ads&utm_campaign=summer%26sale%3D1",
        );
        let resolution = UtmPropagation::new(cookies.clone()).initialize(&page);
        assert_eq!(
            resolution.query,
            "utm_source=google%20ads&utm_campaign=summer%26sale%3D1&utm_content=/a"
        );

        let params = utm_propagation_params(&cookies);
        assert_eq!(params.len(), 3);
        assert_eq!(params["utm_source"], "google ads");
        assert_eq!(params["utm_campaign"], "summer&sale=1");
        assert_eq!(params["utm_content"], "/a");
    }

    #[test]
    fn persisted_query_is_reused_verbatim_on_the_next_page() {
        let (_, cookies) = cookies();
        let landing = PageSnapshot::new("https://www.example.com/a?utm_campaign=summer%26sale");
        UtmPropagation::new(cookies.clone()).initialize(&landing);

        let next = PageSnapshot::new("https://www.example.com/b");
        let resolution = UtmPropagation::new(cookies.clone()).initialize(&next);
        assert_eq!(resolution.origin, UtmOrigin::Cookie);
        assert_eq!(utm_propagation_params(&cookies)["utm_campaign"], "summer&sale");
        assert_eq!(
            url_with_utm_params(&next, &cookies),
            "https://www.example.com/b?utm_campaign=summer%26sale&utm_content=/a"
        );
    }

    #[test]
    fn utm_query_goes_before_the_fragment() {
        let (_, cookies) = cookies();
        cookies.set(BYPASS_UTM, "utm_source=google%20ads&utm_content=/e", &CookieOptions::default());
        let page = PageSnapshot::new("https://www.example.com/e#hero");
        assert_eq!(
            url_with_utm_params(&page, &cookies),
            "https://www.example.com/e?utm_source=google%20ads&utm_content=/e#hero"
        );
    }

    #[test]
    fn encoded_path_is_not_escaped_twice() {
        let (_, cookies) = cookies();
        let page = PageSnapshot::new("https://www.example.com/caf%C3%A9%20menu?utm_source=abc");
        let resolution = UtmPropagation::new(cookies.clone()).initialize(&page);
        assert_eq!(resolution.query, "utm_source=abc&utm_content=/caf%C3%A9%20menu");
        assert_eq!(utm_propagation_params(&cookies)["utm_content"], "/café menu");
    }

    #[test]
    fn has_key_matches_exact_names() {
        assert!(has_key("utm_source=a&utm_content=b", UTM_CONTENT));
        assert!(!has_key("utm_content_extra=b", UTM_CONTENT));
        assert!(has_key("utm_content", UTM_CONTENT));
    }
}

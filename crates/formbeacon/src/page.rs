//! Snapshot of the page-level facts the tracker and UTM propagation read.

use serde_json::{Map, Value};
use url::Url;

/// What the browser reports about the current document.
///
/// Taken once per synchronous block; callers re-snapshot after navigation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageSnapshot {
    pub href: String,
    pub title: String,
    pub referrer: String,
    pub user_agent: String,
}

impl PageSnapshot {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn url(&self) -> Option<Url> {
        Url::parse(&self.href).ok()
    }

    pub fn path(&self) -> String {
        self.url()
            .map(|url| url.path().to_owned())
            .unwrap_or_else(|| "/".to_owned())
    }

    pub fn host(&self) -> Option<String> {
        self.url().and_then(|url| {
            let host = url.host_str()?.to_owned();
            Some(match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            })
        })
    }

    /// Decoded query pairs in document order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url()
            .map(|url| url.query_pairs().into_owned().collect())
            .unwrap_or_default()
    }

    /// Raw `?…` part of the URL, empty when there is none.
    pub fn search(&self) -> String {
        self.url()
            .and_then(|url| url.query().map(|query| format!("?{query}")))
            .filter(|search| search.len() > 1)
            .unwrap_or_default()
    }

    /// Query parameters as an attribute map; later duplicates win.
    pub fn query_params(&self) -> Map<String, Value> {
        self.query_pairs()
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect()
    }
}

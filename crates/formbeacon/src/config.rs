//! Widget configuration, as passed in by the embedding page.
//!
//! The host page serializes the component props to JSON; every field is
//! optional and falls back to the defaults below.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::SuperAttributes;
use crate::tracker::TrackerConfig;
use crate::utm::DEFAULT_COOKIE_MINUTES;

/// Error returned by [`WidgetConfig::from_json`].
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(error) => write!(f, "widget config is not valid JSON: {error}"),
            ConfigError::Invalid(reason) => write!(f, "invalid widget config: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(error) => Some(error),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::Parse(error)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub analytics_enabled: bool,
    pub log_only: bool,
    /// Tag manager container id; lazy loading is skipped without one.
    pub gtm_id: Option<String>,
    pub product: String,
    pub sub_product: Option<String>,
    pub utm_cookie_minutes: u32,
    pub super_attributes: SuperAttributes,
    pub challenge: ChallengeConfig,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            analytics_enabled: true,
            log_only: false,
            gtm_id: None,
            product: "homepage".to_owned(),
            sub_product: None,
            utm_cookie_minutes: DEFAULT_COOKIE_MINUTES,
            super_attributes: SuperAttributes::default(),
            challenge: ChallengeConfig::default(),
        }
    }
}

impl WidgetConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.utm_cookie_minutes == 0 {
            return Err(ConfigError::Invalid(
                "utm_cookie_minutes must be at least 1".to_owned(),
            ));
        }
        if self.challenge.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "challenge.poll_interval_ms must be at least 1".to_owned(),
            ));
        }
        if self.gtm_id.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid("gtm_id must not be empty".to_owned()));
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            is_enabled: self.analytics_enabled,
            log_only: self.log_only,
            super_attributes: self.super_attributes.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    pub site_key: String,
    pub poll_interval_ms: u32,
    /// `None` waits for the global indefinitely.
    pub max_poll_attempts: Option<u32>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            site_key: String::new(),
            poll_interval_ms: 1000,
            max_poll_attempts: None,
        }
    }
}

//! Proxy configuration.
//!
//! Values are layered from an optional TOML file under environment
//! variables prefixed with `OWC_` (for example `OWC_SECRET`,
//! `OWC_CALENDAR_URLS`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::ConfigError;
use crate::token::Secret;

static DEFAULT_UPSTREAM: &str = "https://open-web-calendar.hosted.quelltext.eu";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_upstream() -> String {
    DEFAULT_UPSTREAM.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Accept either a comma-separated string or a list of strings.
fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        String(String),
    }

    let items = match Option::<ListOrString>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(ListOrString::List(items)) => items,
        Some(ListOrString::String(s)) => s.split(',').map(str::to_string).collect(),
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

/// Configuration as written by the operator.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RawConfig {
    /// URL-safe base64 of the 32-byte token secret.
    pub secret: Option<String>,

    /// Calendar sources: plain URLs and/or `fernet://` tokens.
    #[serde(default, deserialize_with = "comma_list")]
    pub calendar_urls: Vec<String>,

    /// Addresses whose declines hide an event.
    #[serde(default, deserialize_with = "comma_list")]
    pub user_emails: Vec<String>,

    /// Only ever use `calendar_urls`; ignore sources supplied by clients.
    #[serde(default)]
    pub fixed_sources: bool,

    #[serde(default = "default_upstream")]
    pub upstream: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Validated configuration used while serving requests.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub secret: Option<Secret>,
    pub calendar_urls: Vec<String>,
    /// Lowercased.
    pub user_emails: Vec<String>,
    pub fixed_sources: bool,
    pub upstream: Url,
    pub timeout: Duration,
}

impl ProxyConfig {
    /// Default location of the config file: ~/.config/owc-proxy/config.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("owc-proxy").join("config.toml"))
    }

    /// Load configuration from `path` (required to exist when given) or the
    /// default location (optional), then from `OWC_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => builder = builder.add_source(File::from(path).required(true)),
            None => {
                if let Some(default) = Self::default_path() {
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }

        let raw: RawConfig = builder
            .add_source(Environment::with_prefix("OWC").try_parsing(true))
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let secret = raw
            .secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Secret::from_base64)
            .transpose()
            .map_err(ConfigError::Secret)?;

        Ok(Self {
            secret,
            calendar_urls: raw.calendar_urls,
            user_emails: raw
                .user_emails
                .into_iter()
                .map(|email| email.to_lowercase())
                .collect(),
            fixed_sources: raw.fixed_sources,
            upstream: Url::parse(&raw.upstream)?,
            timeout: Duration::from_secs(raw.timeout_secs),
        })
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            secret: None,
            calendar_urls: Vec::new(),
            user_emails: Vec::new(),
            fixed_sources: false,
            upstream: Url::parse(DEFAULT_UPSTREAM).expect("default upstream is a valid URL"),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

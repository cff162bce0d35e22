//! Calendar source resolution.
//!
//! Works out which calendar sources apply to a request and turns them into
//! plaintext URLs for the upstream.

use std::fmt;

use tracing::debug;
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::token::{self, Secret};

/// Query parameter carrying calendar sources, inbound and upstream.
pub const SOURCE_PARAM: &str = "url";

/// Cookie holding the still-encrypted source list between requests.
pub const SOURCE_COOKIE: &str = "owc_urls";

/// Lifetime of [`SOURCE_COOKIE`] in seconds.
pub const SOURCE_COOKIE_MAX_AGE: u64 = 3600;

const COOKIE_SEPARATOR: char = '|';

/// A configured calendar source, either a plain URL or a token wrapping one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarSource {
    Plain(String),
    Token(String),
}

impl CalendarSource {
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if token::is_token(raw) {
            Self::Token(raw.to_string())
        } else {
            Self::Plain(raw.to_string())
        }
    }

    /// The source exactly as configured.
    pub fn raw(&self) -> &str {
        match self {
            Self::Plain(s) | Self::Token(s) => s,
        }
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Self::Token(_))
    }

    /// The URL to hand to the upstream, decrypting tokens.
    pub fn plaintext(&self, secret: Option<&Secret>) -> ProxyResult<String> {
        match self {
            Self::Plain(url) => Ok(url.clone()),
            Self::Token(raw) => {
                let secret = secret.ok_or(ProxyError::Configuration("secret"))?;
                Ok(token::decode(raw, secret)?)
            }
        }
    }
}

/// The parts of an inbound request that source resolution looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub cookie: Option<String>,
    pub referer: Option<String>,
}

impl RequestContext {
    pub fn new(
        path: &str,
        raw_query: Option<&str>,
        cookie: Option<&str>,
        referer: Option<&str>,
    ) -> Self {
        let query = raw_query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            path: path.to_string(),
            query,
            cookie: cookie.map(str::to_string),
            referer: referer.map(str::to_string),
        }
    }
}

/// Where a resolved source list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Query,
    Config,
    Cookie,
    Referer,
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Carrier::Query => "query",
            Carrier::Config => "config",
            Carrier::Cookie => "cookie",
            Carrier::Referer => "referer",
        };
        f.write_str(name)
    }
}

/// Resolve the ordered source list for a request.
///
/// With `fixed_sources` set only the configured list is used. Otherwise the
/// first non-empty carrier wins: query, config, cookie, referer.
pub fn resolve(ctx: &RequestContext, config: &ProxyConfig) -> ProxyResult<Vec<CalendarSource>> {
    if config.fixed_sources {
        if config.calendar_urls.is_empty() {
            return Err(ProxyError::Configuration("calendar_urls"));
        }
        return Ok(classify_all(&config.calendar_urls));
    }

    let found = non_empty(query_sources(&ctx.query))
        .map(|s| (Carrier::Query, s))
        .or_else(|| non_empty(config.calendar_urls.clone()).map(|s| (Carrier::Config, s)))
        .or_else(|| {
            ctx.cookie
                .as_deref()
                .and_then(|c| non_empty(cookie_sources(c)))
                .map(|s| (Carrier::Cookie, s))
        })
        .or_else(|| {
            ctx.referer
                .as_deref()
                .and_then(|r| non_empty(referer_sources(r)))
                .map(|s| (Carrier::Referer, s))
        });

    match found {
        Some((carrier, raw)) => {
            debug!(%carrier, count = raw.len(), "resolved calendar sources");
            Ok(classify_all(&raw))
        }
        None => Ok(Vec::new()),
    }
}

/// Decrypt every source in order.
pub fn decrypt_sources(
    sources: &[CalendarSource],
    secret: Option<&Secret>,
) -> ProxyResult<Vec<String>> {
    sources.iter().map(|s| s.plaintext(secret)).collect()
}

/// Percent-encoded, pipe-joined raw sources for the source cookie.
pub fn encode_cookie_value(sources: &[CalendarSource]) -> String {
    let joined = sources
        .iter()
        .map(CalendarSource::raw)
        .collect::<Vec<_>>()
        .join(&COOKIE_SEPARATOR.to_string());
    urlencoding::encode(&joined).into_owned()
}

fn classify_all(raw: &[String]) -> Vec<CalendarSource> {
    raw.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(CalendarSource::classify)
        .collect()
}

fn non_empty(items: Vec<String>) -> Option<Vec<String>> {
    let items: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn query_sources(query: &[(String, String)]) -> Vec<String> {
    query
        .iter()
        .filter(|(k, _)| k == SOURCE_PARAM)
        .map(|(_, v)| v.clone())
        .collect()
}

/// Sources from a `Cookie` header value.
fn cookie_sources(header: &str) -> Vec<String> {
    let Some(value) = header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name.trim() == SOURCE_COOKIE).then_some(value.trim())
    }) else {
        return Vec::new();
    };

    match urlencoding::decode(value) {
        Ok(decoded) => decoded
            .split(COOKIE_SEPARATOR)
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Sources from the query of the page that linked here.
fn referer_sources(referer: &str) -> Vec<String> {
    match Url::parse(referer) {
        Ok(url) => url
            .query_pairs()
            .filter(|(k, _)| k == SOURCE_PARAM)
            .map(|(_, v)| v.into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

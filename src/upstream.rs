//! Forwarding to the upstream and header rewriting.
//!
//! The header functions build new maps and never mutate their input.

use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderName, HeaderValue, Method, header},
};
use owc_core::{
    ProxyError, ProxyResult,
    source::{self, CalendarSource, SOURCE_COOKIE, SOURCE_COOKIE_MAX_AGE},
};
use tracing::error;
use url::Url;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "upgrade",
    "content-length",
    "proxy-connection",
];

/// Headers added by edge networks and load balancers.
const EDGE_HEADERS: &[&str] = &["x-real-ip", "forwarded", "via", "cdn-loop"];
const EDGE_PREFIXES: &[&str] = &["cf-", "x-forwarded-"];

/// Headers to send upstream for an inbound request.
///
/// Bodies are requested uncompressed so they can be rewritten.
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if !is_dropped_outbound(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    out
}

/// Headers to return to the client for an upstream response.
pub fn response_headers(upstream: &HeaderMap, cookie: Option<&HeaderValue>) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len() + 2);
    for (name, value) in upstream {
        let name_str = name.as_str();
        if HOP_BY_HOP.contains(&name_str) || *name == header::CONTENT_ENCODING {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    out.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    if let Some(cookie) = cookie {
        out.append(header::SET_COOKIE, cookie.clone());
    }
    out
}

/// `Set-Cookie` value carrying the still-encrypted sources.
pub fn source_cookie(sources: &[CalendarSource]) -> ProxyResult<HeaderValue> {
    let value = format!(
        "{SOURCE_COOKIE}={}; Path=/; SameSite=Lax; Max-Age={SOURCE_COOKIE_MAX_AGE}",
        source::encode_cookie_value(sources)
    );
    HeaderValue::from_str(&value)
        .map_err(|e| ProxyError::Internal(format!("invalid cookie value: {e}")))
}

pub async fn forward(
    client: &reqwest::Client,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
) -> ProxyResult<reqwest::Response> {
    client
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(upstream_error)
}

/// Map a client error to [`ProxyError::Upstream`].
///
/// The request URL carries decrypted sources, so it is stripped first.
pub fn upstream_error(err: reqwest::Error) -> ProxyError {
    let err = err.without_url();
    if err.is_timeout() {
        error!("upstream request timed out");
        return ProxyError::Upstream("request timed out".to_string());
    }
    error!("upstream request failed: {err}");
    ProxyError::Upstream(err.to_string())
}

fn is_dropped_outbound(name: &HeaderName) -> bool {
    let name = name.as_str();
    matches!(name, "host" | "cookie" | "accept-encoding")
        || HOP_BY_HOP.contains(&name)
        || EDGE_HEADERS.contains(&name)
        || EDGE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.append(name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_outbound_drops_edge_and_hop_headers() {
        let inbound = headers(&[
            ("host", "proxy.example"),
            ("cf-connecting-ip", "1.2.3.4"),
            ("cf-ray", "abc"),
            ("x-forwarded-for", "1.2.3.4"),
            ("x-real-ip", "1.2.3.4"),
            ("via", "1.1 edge"),
            ("connection", "keep-alive"),
            ("cookie", "owc_urls=secret"),
            ("accept-encoding", "gzip, br"),
            ("accept", "text/html"),
            ("user-agent", "test"),
        ]);

        let out = outbound_headers(&inbound);
        assert_eq!(out.len(), 3);
        assert_eq!(out["accept"], "text/html");
        assert_eq!(out["user-agent"], "test");
        assert_eq!(out["accept-encoding"], "identity");
        // input untouched
        assert_eq!(inbound.len(), 11);
    }

    #[test]
    fn test_response_headers_add_cors_and_cookie() {
        let upstream = headers(&[
            ("content-type", "text/html"),
            ("content-length", "10"),
            ("content-encoding", "gzip"),
            ("transfer-encoding", "chunked"),
            ("access-control-allow-origin", "https://upstream.example"),
            ("cache-control", "no-cache"),
        ]);
        let cookie = HeaderValue::from_static("owc_urls=x");

        let out = response_headers(&upstream, Some(&cookie));
        assert_eq!(out["content-type"], "text/html");
        assert_eq!(out["cache-control"], "no-cache");
        assert_eq!(out["access-control-allow-origin"], "*");
        assert_eq!(out.get_all("access-control-allow-origin").iter().count(), 1);
        assert_eq!(out["set-cookie"], "owc_urls=x");
        assert!(out.get("content-length").is_none());
        assert!(out.get("content-encoding").is_none());
        assert!(out.get("transfer-encoding").is_none());

        assert!(response_headers(&upstream, None).get("set-cookie").is_none());
    }

    #[test]
    fn test_source_cookie_format() {
        let sources = vec![
            CalendarSource::classify("fernet://gAAA"),
            CalendarSource::classify("https://a.example/c.ics"),
        ];
        let cookie = source_cookie(&sources).unwrap();
        assert_eq!(
            cookie,
            "owc_urls=fernet%3A%2F%2FgAAA%7Chttps%3A%2F%2Fa.example%2Fc.ics; \
             Path=/; SameSite=Lax; Max-Age=3600"
        );
    }
}

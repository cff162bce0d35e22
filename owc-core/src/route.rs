//! Request classification and upstream URL construction.

use url::Url;

use crate::source::SOURCE_PARAM;

/// How an inbound path is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The rendered calendar page.
    MainPage,
    /// `srcdoc` and JSON endpoints used by the page.
    ApiEndpoint,
    /// Scripts, styles, images and anything else.
    StaticPassthrough,
}

const MAIN_PAGE: &str = "/calendar.html";

/// Calendar file downloads are never proxied.
pub fn is_calendar_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".ics") || lower.ends_with(".ical")
}

pub fn classify(path: &str) -> Route {
    if path == "/" || path == MAIN_PAGE || path.ends_with(MAIN_PAGE) {
        Route::MainPage
    } else if path.starts_with("/srcdoc") || path.ends_with(".json") {
        Route::ApiEndpoint
    } else {
        Route::StaticPassthrough
    }
}

/// JSON endpoints that return event lists, e.g. `/calendar.events.json`.
pub fn is_event_listing(path: &str) -> bool {
    path.ends_with(".json") && path.to_ascii_lowercase().contains("events")
}

/// Path requested from the upstream. The page itself lives at `/calendar.html`.
pub fn upstream_path(route: Route, path: &str) -> &str {
    match route {
        Route::MainPage => MAIN_PAGE,
        Route::ApiEndpoint | Route::StaticPassthrough => path,
    }
}

/// Build the upstream URL for a request.
///
/// Every inbound query pair except the source parameter is copied in order,
/// then one source parameter per plaintext source is appended.
pub fn build_upstream_url(
    base: &Url,
    route: Route,
    path: &str,
    query: &[(String, String)],
    sources: &[String],
) -> Url {
    let mut url = base.clone();
    url.set_path(upstream_path(route, path));
    url.set_query(None);

    let passthrough: Vec<&(String, String)> =
        query.iter().filter(|(k, _)| k != SOURCE_PARAM).collect();

    if !passthrough.is_empty() || !sources.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in passthrough {
            pairs.append_pair(k, v);
        }
        for source in sources {
            pairs.append_pair(SOURCE_PARAM, source);
        }
    }

    url
}

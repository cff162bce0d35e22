//! Upstream response sanitizing.
//!
//! Calendar files are refused outright. HTML and JSON bodies have calendar
//! URLs and encoded email addresses replaced, HTML pages get a console
//! filter so the page's own logging cannot print them, and event listings
//! go through [`crate::process`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ProxyError, ProxyResult};
use crate::event::CalendarEvent;
use crate::process;
use crate::route;

/// Replacement for anything that could identify a calendar.
pub const PLACEHOLDER: &str = "[redacted]";

const CALENDAR_MIME_TYPES: &[&str] = &[
    "text/calendar",
    "application/ics",
    "application/ical",
    "application/x-ical",
];

const CALENDAR_NAME_KEYS: &[&str] = &[
    "calendar_name",
    "calendarName",
    "calendar-name",
    "x-wr-calname",
    "X-WR-CALNAME",
];

static LEAK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // .ics/.ical URLs, including JSON-escaped slashes. A backslash only
        // matches as part of `\/` so escaped quotes stay intact.
        r#"(?i)(?:https?|webcals?):(?:\\?/){2}(?:[^\s"'<>\\]|\\/)*?\.(?:ics|ical)\b(?:\?(?:[^\s"'<>\\]|\\/)*)?"#,
        // the same, percent-encoded inside another URL
        r#"(?i)(?:https?|webcals?)%3A%2F%2F[^\s"'<>&\\]*?\.(?:ics|ical)\b"#,
        // Google Calendar URLs carrying calendar ids
        r#"(?i)(?:https?:)?(?:\\?/){2}(?:calendar|www)\.google\.com(?:\\?/)calendar(?:\\?/)(?:[^\s"'<>\\]|\\/)*"#,
        // bare Google calendar ids
        r"(?i)[a-z0-9._%+-]+@group\.calendar\.google\.com",
        // percent-encoded email addresses
        r"(?i)[a-z0-9._%+-]+%40[a-z0-9.-]+\.[a-z]{2,}",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("leak pattern should compile"))
    .collect()
});

static HEAD_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("head pattern should compile"));

/// Drops console calls that mention calendar sources.
const CONSOLE_FILTER: &str = r#"<script>(function(){var M=[".ics","calendar/ical","@group.calendar.google.com","%40","fernet://"];var K=["url","urls","calendar_url","source_url","ical_url"];function leaks(a){if(typeof a==="string"){var s=a.toLowerCase();return M.some(function(m){return s.indexOf(m)!==-1;});}if(a&&typeof a==="object"){try{return Object.keys(a).some(function(k){return K.indexOf(k.toLowerCase())!==-1;});}catch(e){return false;}}return false;}["log","info","debug","warn","error"].forEach(function(n){var o=console[n];if(typeof o!=="function"){return;}console[n]=function(){for(var i=0;i<arguments.length;i++){if(leaks(arguments[i])){return;}}return o.apply(console,arguments);};});})();</script>"#;

/// Which bodies get rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Json,
    Other,
}

impl BodyKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let mime = essence(content_type);
        if mime == "text/html" {
            BodyKind::Html
        } else if mime == "application/json" || mime.ends_with("+json") {
            BodyKind::Json
        } else {
            BodyKind::Other
        }
    }
}

/// Refuse calendar files by content type or path.
pub fn check_allowed(content_type: Option<&str>, path: &str) -> ProxyResult<()> {
    let mime = essence(content_type);
    if route::is_calendar_file(path) || CALENDAR_MIME_TYPES.contains(&mime.as_str()) {
        return Err(ProxyError::AccessDenied);
    }
    Ok(())
}

/// Outcome of sanitizing an allowed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    /// Send the upstream body as is.
    Passthrough,
    Rewritten(String),
}

/// Rewrite a response body.
pub fn sanitize(
    content_type: Option<&str>,
    path: &str,
    body: &[u8],
    user_emails: &[String],
) -> ProxyResult<Sanitized> {
    check_allowed(content_type, path)?;

    let kind = BodyKind::from_content_type(content_type);
    if kind == BodyKind::Other {
        return Ok(Sanitized::Passthrough);
    }

    let text = String::from_utf8_lossy(body);
    let rewritten = match kind {
        BodyKind::Html => inject_console_filter(&redact_leaks(&text)),
        BodyKind::Json if route::is_event_listing(path) => {
            redact_leaks(&process_event_json(&text, user_emails))
        }
        _ => redact_leaks(&text),
    };

    Ok(Sanitized::Rewritten(rewritten))
}

/// Replace calendar URLs, calendar ids and encoded emails with [`PLACEHOLDER`].
pub fn redact_leaks(text: &str) -> String {
    LEAK_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, pattern| {
            pattern.replace_all(&acc, PLACEHOLDER).into_owned()
        })
}

/// Insert the console filter right after `<head>`, or at the very start.
pub fn inject_console_filter(html: &str) -> String {
    match HEAD_TAG.find(html) {
        Some(head) => {
            let mut out = String::with_capacity(html.len() + CONSOLE_FILTER.len());
            out.push_str(&html[..head.end()]);
            out.push_str(CONSOLE_FILTER);
            out.push_str(&html[head.end()..]);
            out
        }
        None => format!("{CONSOLE_FILTER}{html}"),
    }
}

/// Run event post-processing over a JSON body.
///
/// Bodies that do not parse are returned unchanged.
pub fn process_event_json(body: &str, user_emails: &[String]) -> String {
    let mut root: Value = match serde_json::from_str(body) {
        Ok(root) => root,
        Err(e) => {
            warn!("event listing is not valid JSON, skipping post-processing: {e}");
            return body.to_string();
        }
    };

    if !process_events_in(&mut root, user_emails) {
        return body.to_string();
    }

    match serde_json::to_string(&root) {
        Ok(out) => out,
        Err(e) => {
            warn!("could not re-serialize event listing: {e}");
            body.to_string()
        }
    }
}

/// Find the event array(s) in `root` and process them in place.
fn process_events_in(root: &mut Value, user_emails: &[String]) -> bool {
    match root {
        Value::Array(items) => {
            if items.iter().any(CalendarEvent::looks_like_event) {
                process_array(items, user_emails);
                return true;
            }
            false
        }
        Value::Object(map) => {
            strip_calendar_names(map, false);
            process_object(map, user_emails)
        }
        _ => false,
    }
}

fn process_object(map: &mut Map<String, Value>, user_emails: &[String]) -> bool {
    if let Some(Value::Array(events)) = map.get_mut("events") {
        process_array(events, user_emails);
        return true;
    }

    if let Some(Value::Array(calendars)) = map.get_mut("calendars") {
        let mut found = false;
        for calendar in calendars.iter_mut() {
            if let Value::Object(calendar) = calendar {
                strip_calendar_names(calendar, true);
                if let Some(Value::Array(events)) = calendar.get_mut("events") {
                    process_array(events, user_emails);
                    found = true;
                }
            }
        }
        if found {
            return true;
        }
    }

    for key in ["data", "items"] {
        if let Some(Value::Array(events)) = map.get_mut(key) {
            if events.iter().any(CalendarEvent::looks_like_event) {
                process_array(events, user_emails);
                return true;
            }
        }
    }

    let generic = map.values_mut().find_map(|value| match value {
        Value::Array(items) if items.iter().any(CalendarEvent::looks_like_event) => Some(items),
        _ => None,
    });
    match generic {
        Some(events) => {
            process_array(events, user_emails);
            true
        }
        None => false,
    }
}

fn process_array(items: &mut Vec<Value>, user_emails: &[String]) {
    let events = std::mem::take(items);
    *items = process::process(events, user_emails);
}

/// Remove calendar display names. Inside `calendars[]` entries `name` is the
/// calendar's name too.
fn strip_calendar_names(map: &mut Map<String, Value>, per_calendar: bool) {
    for key in CALENDAR_NAME_KEYS {
        map.remove(*key);
    }
    if per_calendar {
        map.remove("name");
    }
}

/// Lowercased mime type without parameters.
fn essence(content_type: Option<&str>) -> String {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

//! Canonical calendar event record.
//!
//! Upstream event JSON has picked up several spellings for the same field
//! over time (`start` / `start_date` / `dtstart`, `title` / `name` / `text`,
//! and so on). [`CalendarEvent::ingest`] reads whichever spelling is present
//! into one fixed schema, and [`CalendarEvent::into_value`] writes the
//! canonical values back into every spelling the record carried, so
//! consumers reading any alias see the same data.

pub mod fragment;
pub mod time;

use serde_json::{Map, Value};

/// Title shown for events whose details are hidden.
pub const BUSY: &str = "BUSY";

pub const START_KEYS: &[&str] = &["start", "start_date", "startDate", "dtstart", "start_time"];
pub const END_KEYS: &[&str] = &["end", "end_date", "endDate", "dtend", "end_time"];
pub const TITLE_KEYS: &[&str] = &["title", "name", "summary", "text"];
pub const DESCRIPTION_KEYS: &[&str] = &["description", "details", "desc"];
pub const CALENDAR_ID_KEYS: &[&str] = &[
    "calendar-index",
    "calendar_index",
    "calendarId",
    "calendar_id",
    "calendar",
];
pub const VISIBILITY_KEYS: &[&str] = &["class", "classification", "visibility", "access"];
pub const RAW_FRAGMENT_KEYS: &[&str] = &["ical", "ics", "raw"];
pub const CSS_CLASS_KEYS: &[&str] = &["css-classes", "css_classes", "className", "classes"];
pub const STATUS_KEYS: &[&str] = &["type", "status"];

/// Fields cleared when an event is hidden, besides title and description.
const IDENTIFYING_KEYS: &[&str] = &[
    "location",
    "organizer",
    "attendees",
    "attendee",
    "participants",
    "url",
    "uid",
    "categories",
    "color",
    "ical",
    "ics",
    "raw",
    "recurrence",
    "rrule",
    "sequence",
    "type",
];

/// A calendar event in canonical form, plus the JSON object it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    /// Normalized start, epoch milliseconds.
    pub start: Option<i64>,
    /// Normalized end, epoch milliseconds.
    pub end: Option<i64>,
    /// End value as found in the source, written back on merge.
    pub end_raw: Option<Value>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub calendar_id: Option<String>,
    /// `None` is treated as private.
    pub visibility: Option<String>,
    pub raw_fragment: Option<String>,
    /// Class tokens from every css-class alias.
    pub css_classes: Vec<String>,
    /// Values of every status alias.
    pub statuses: Vec<String>,
    pub redacted: bool,
    modified: bool,
    extended: bool,
    fields: Map<String, Value>,
}

impl CalendarEvent {
    /// Read an event from a JSON object.
    pub fn ingest(fields: Map<String, Value>) -> Self {
        let start = first(&fields, START_KEYS).and_then(time::normalize);
        let end_raw = first(&fields, END_KEYS).cloned();
        let end = end_raw.as_ref().and_then(time::normalize);

        CalendarEvent {
            start,
            end,
            end_raw,
            title: first_string(&fields, TITLE_KEYS),
            description: first_string(&fields, DESCRIPTION_KEYS),
            calendar_id: first(&fields, CALENDAR_ID_KEYS).and_then(scalar_string),
            visibility: first_string(&fields, VISIBILITY_KEYS),
            raw_fragment: first_string(&fields, RAW_FRAGMENT_KEYS),
            css_classes: all(&fields, CSS_CLASS_KEYS)
                .flat_map(class_tokens)
                .collect(),
            statuses: all(&fields, STATUS_KEYS)
                .filter_map(scalar_string)
                .collect(),
            redacted: fields.get("redacted").and_then(Value::as_bool).unwrap_or(false),
            modified: false,
            extended: false,
            fields,
        }
    }

    /// Read an event from any JSON value. Non-objects are handed back.
    pub fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(fields) => Ok(Self::ingest(fields)),
            other => Err(other),
        }
    }

    /// Whether event details may be shown.
    pub fn is_public(&self) -> bool {
        self.visibility
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("PUBLIC"))
    }

    /// Whether the record carries a start or end time under any alias.
    pub fn looks_like_event(value: &Value) -> bool {
        value.as_object().is_some_and(|fields| {
            first(fields, START_KEYS).is_some() || first(fields, END_KEYS).is_some()
        })
    }

    /// Hide everything identifying. Start and end are kept.
    pub fn redact(&mut self) {
        self.title = Some(BUSY.to_string());
        self.description = Some(String::new());
        self.raw_fragment = None;
        self.redacted = true;
        self.modified = true;

        for key in IDENTIFYING_KEYS {
            if let Some(value) = self.fields.get_mut(*key) {
                *value = emptied(value);
            }
        }
    }

    /// Extend this event with the one that directly follows it.
    pub fn absorb(&mut self, next: CalendarEvent) {
        self.end = next.end;
        self.end_raw = next.end_raw;
        self.modified = true;
        self.extended = true;

        if self.redacted || next.redacted {
            self.redact();
            return;
        }

        self.title = join_non_empty([self.title.take(), next.title], " + ");
        self.description = join_non_empty([self.description.take(), next.description], "\n\n");
    }

    /// Write canonical values back into the JSON object.
    ///
    /// Records that were neither redacted nor merged come back unchanged.
    pub fn into_value(mut self) -> Value {
        if !self.modified {
            return Value::Object(self.fields);
        }
        if self.extended {
            if let Some(end) = self.end_raw.take() {
                write_aliases(&mut self.fields, END_KEYS, &end, None);
            }
        }
        if let Some(title) = self.title.take() {
            let fallback = self.redacted.then_some("title");
            write_aliases(&mut self.fields, TITLE_KEYS, &Value::String(title), fallback);
        }
        if let Some(description) = self.description.take() {
            let fallback = self.redacted.then_some("description");
            write_aliases(
                &mut self.fields,
                DESCRIPTION_KEYS,
                &Value::String(description),
                fallback,
            );
        }
        if self.redacted {
            self.fields.insert("redacted".to_string(), Value::Bool(true));
        }
        Value::Object(self.fields)
    }
}

fn first<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

/// Every non-null value among `keys`, in key order.
fn all<'a>(
    fields: &'a Map<String, Value>,
    keys: &'a [&str],
) -> impl Iterator<Item = &'a Value> + 'a {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .filter(|value| !value.is_null())
}

fn first_string(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first(fields, keys).and_then(scalar_string)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// CSS classes given as a space-separated string or an array of strings.
fn class_tokens(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(str::split_whitespace)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn emptied(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(String::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(_) => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

/// Set every alias present; insert `fallback` when none is.
fn write_aliases(
    fields: &mut Map<String, Value>,
    keys: &[&str],
    value: &Value,
    fallback: Option<&str>,
) {
    let mut written = false;
    for key in keys {
        if let Some(slot) = fields.get_mut(*key) {
            *slot = value.clone();
            written = true;
        }
    }
    if !written {
        if let Some(key) = fallback {
            fields.insert(key.to_string(), value.clone());
        }
    }
}

fn join_non_empty<const N: usize>(parts: [Option<String>; N], separator: &str) -> Option<String> {
    let parts: Vec<String> = parts
        .into_iter()
        .flatten()
        .filter(|p| !p.trim().is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> CalendarEvent {
        CalendarEvent::from_value(value).unwrap()
    }

    #[test]
    fn test_ingest_reads_aliases() {
        let e = event(json!({
            "start_date": "2024-03-01 10:00",
            "dtend": "2024-03-01T11:00:00Z",
            "text": "Standup",
            "details": "Daily",
            "calendar-index": 2,
            "classification": "public",
            "ical": "BEGIN:VEVENT\nEND:VEVENT",
            "css-classes": ["event", "STATUS-DECLINED"],
            "type": "CONFIRMED",
        }));

        assert!(e.start.is_some());
        assert!(e.end.is_some());
        assert_eq!(e.title.as_deref(), Some("Standup"));
        assert_eq!(e.description.as_deref(), Some("Daily"));
        assert_eq!(e.calendar_id.as_deref(), Some("2"));
        assert!(e.is_public());
        assert!(e.raw_fragment.is_some());
        assert_eq!(e.css_classes, vec!["event", "STATUS-DECLINED"]);
        assert_eq!(e.statuses, vec!["CONFIRMED"]);
        assert!(!e.redacted);
    }

    #[test]
    fn test_visibility_defaults_to_private() {
        assert!(!event(json!({"start": "2024-03-01"})).is_public());
        assert!(!event(json!({"class": "CONFIDENTIAL"})).is_public());
        assert!(!event(json!({"class": "PUBLICISH"})).is_public());
        assert!(!event(json!({"class": " Public "})).is_public());
        assert!(event(json!({"class": "Public"})).is_public());
    }

    #[test]
    fn test_css_classes_from_string() {
        let e = event(json!({"className": "a  b c"}));
        assert_eq!(e.css_classes, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_every_status_and_class_alias_is_collected() {
        let e = event(json!({
            "type": "VEVENT",
            "status": "CANCELLED",
            "css-classes": "event",
            "className": ["status-declined"],
        }));
        assert_eq!(e.statuses, vec!["VEVENT", "CANCELLED"]);
        assert_eq!(e.css_classes, vec!["event", "status-declined"]);
    }

    #[test]
    fn test_redact_clears_details_and_keeps_times() {
        let mut e = event(json!({
            "start": "2024-03-01T10:00:00Z",
            "end": "2024-03-01T11:00:00Z",
            "title": "Doctor",
            "name": "Doctor",
            "description": "Bring papers",
            "location": "Clinic",
            "attendees": ["alice@example.com"],
            "organizer": {"email": "alice@example.com"},
            "sequence": 3,
            "ical": "BEGIN:VEVENT",
            "id": "evt-1",
        }));
        e.redact();
        let v = e.into_value();

        assert_eq!(v["title"], "BUSY");
        assert_eq!(v["name"], "BUSY");
        assert_eq!(v["description"], "");
        assert_eq!(v["location"], "");
        assert_eq!(v["attendees"], json!([]));
        assert_eq!(v["organizer"], json!({}));
        assert_eq!(v["sequence"], Value::Null);
        assert_eq!(v["ical"], "");
        assert_eq!(v["start"], "2024-03-01T10:00:00Z");
        assert_eq!(v["end"], "2024-03-01T11:00:00Z");
        assert_eq!(v["id"], "evt-1");
        assert_eq!(v["redacted"], true);
    }

    #[test]
    fn test_redact_adds_title_when_absent() {
        let mut e = event(json!({"start": "2024-03-01"}));
        e.redact();
        let v = e.into_value();
        assert_eq!(v["title"], "BUSY");
        assert_eq!(v["description"], "");
    }

    #[test]
    fn test_into_value_writes_end_into_every_alias() {
        let mut a = event(json!({
            "start": "2024-03-01 10:00",
            "end": "2024-03-01 11:00",
            "end_date": "2024-03-01 11:00",
            "title": "A",
        }));
        let b = event(json!({"start": "2024-03-01 11:00", "end": "2024-03-01 12:00", "title": "B"}));
        a.absorb(b);
        let v = a.into_value();
        assert_eq!(v["end"], "2024-03-01 12:00");
        assert_eq!(v["end_date"], "2024-03-01 12:00");
        assert_eq!(v["title"], "A + B");
        assert!(v.get("redacted").is_none());
    }

    #[test]
    fn test_untouched_event_roundtrips_verbatim() {
        let original = json!({"title": "A", "text": "<b>A</b>", "start": "x", "custom": [1, 2]});
        assert_eq!(event(original.clone()).into_value(), original);
    }

    #[test]
    fn test_non_object_is_handed_back() {
        assert_eq!(CalendarEvent::from_value(json!(5)).unwrap_err(), json!(5));
    }
}

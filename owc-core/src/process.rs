//! Event post-processing: declined filtering, redaction and merging.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::debug;

use crate::event::{CalendarEvent, fragment};

const DECLINED_CLASSES: &[&str] = &["status-declined", "partstat-declined"];
const DECLINED_STATUSES: &[&str] = &["CANCELLED", "DECLINED"];

/// Run the full pipeline over a list of event JSON values.
///
/// Declined events are dropped, non-public events are redacted, and
/// back-to-back events of the same calendar are merged. Output is grouped by
/// calendar in order of first appearance, each group sorted by start.
/// Non-object entries are kept, after the events.
pub fn process(events: Vec<Value>, user_emails: &[String]) -> Vec<Value> {
    let total = events.len();
    let mut kept = Vec::with_capacity(total);
    let mut others = Vec::new();

    for value in events {
        match CalendarEvent::from_value(value) {
            Ok(event) if is_declined(&event, user_emails) => {}
            Ok(mut event) => {
                if !event.is_public() {
                    event.redact();
                }
                kept.push(event);
            }
            Err(other) => others.push(other),
        }
    }

    let declined = total - kept.len() - others.len();
    let mut out: Vec<Value> = group_by_calendar(kept)
        .into_iter()
        .flat_map(merge_consecutive)
        .map(CalendarEvent::into_value)
        .collect();

    debug!(total, declined, returned = out.len(), "processed events");

    out.extend(others);
    out
}

/// Whether the event was cancelled, or declined by one of `user_emails`.
pub fn is_declined(event: &CalendarEvent, user_emails: &[String]) -> bool {
    let class_declined = event.css_classes.iter().any(|class| {
        DECLINED_CLASSES
            .iter()
            .any(|declined| class.eq_ignore_ascii_case(declined))
    });
    if class_declined {
        return true;
    }

    let status_declined = event.statuses.iter().any(|status| {
        DECLINED_STATUSES
            .iter()
            .any(|declined| status.trim().eq_ignore_ascii_case(declined))
    });
    if status_declined {
        return true;
    }

    event.raw_fragment.as_deref().is_some_and(|raw| {
        fragment::has_cancelled_status(raw) || fragment::declined_by(raw, user_emails)
    })
}

/// Partition by calendar id, keeping groups in order of first appearance.
/// Events without an id share one group.
pub fn group_by_calendar(events: Vec<CalendarEvent>) -> Vec<Vec<CalendarEvent>> {
    let mut groups: Vec<(Option<String>, Vec<CalendarEvent>)> = Vec::new();

    for event in events {
        match groups.iter_mut().find(|(id, _)| *id == event.calendar_id) {
            Some((_, group)) => group.push(event),
            None => groups.push((event.calendar_id.clone(), vec![event])),
        }
    }

    groups.into_iter().map(|(_, group)| group).collect()
}

/// Merge runs of events where each one ends exactly when the next starts.
///
/// Expects events from a single calendar.
pub fn merge_consecutive(mut events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
    events.sort_by(by_start);

    let mut merged = Vec::with_capacity(events.len());
    let mut iter = events.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for next in iter {
        if current.end.is_some() && current.end == next.start {
            current.absorb(next);
        } else {
            merged.push(std::mem::replace(&mut current, next));
        }
    }
    merged.push(current);

    merged
}

/// Unparseable starts sort last.
fn by_start(a: &CalendarEvent, b: &CalendarEvent) -> Ordering {
    match (a.start, b.start) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn emails(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn event(value: Value) -> CalendarEvent {
        CalendarEvent::from_value(value).unwrap()
    }

    #[test]
    fn test_back_to_back_events_merge() {
        let events = vec![
            json!({"calendar": 1, "start": "2024-03-01T09:00:00Z", "end": "2024-03-01T10:00:00Z",
                   "title": "A", "description": "first", "class": "PUBLIC"}),
            json!({"calendar": 1, "start": "2024-03-01T10:00:00Z", "end": "2024-03-01T11:30:00Z",
                   "title": "B", "description": "second", "class": "PUBLIC"}),
        ];

        let out = process(events, &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["start"], "2024-03-01T09:00:00Z");
        assert_eq!(out[0]["end"], "2024-03-01T11:30:00Z");
        assert_eq!(out[0]["title"], "A + B");
        assert_eq!(out[0]["description"], "first\n\nsecond");
    }

    #[test]
    fn test_different_calendars_do_not_merge() {
        let events = vec![
            json!({"calendar": 1, "start": "2024-03-01T09:00:00Z", "end": "2024-03-01T10:00:00Z", "class": "PUBLIC"}),
            json!({"calendar": 2, "start": "2024-03-01T10:00:00Z", "end": "2024-03-01T11:00:00Z", "class": "PUBLIC"}),
        ];
        assert_eq!(process(events, &[]).len(), 2);
    }

    #[test]
    fn test_gap_prevents_merge() {
        let events = vec![
            event(json!({"start": "2024-03-01 09:00", "end": "2024-03-01 10:00"})),
            event(json!({"start": "2024-03-01 10:01", "end": "2024-03-01 11:00"})),
        ];
        assert_eq!(merge_consecutive(events).len(), 2);
    }

    #[test]
    fn test_merge_sorts_and_chains_runs() {
        let events = vec![
            event(json!({"start": "2024-03-01 11:00", "end": "2024-03-01 12:00", "title": "C", "class": "public"})),
            event(json!({"start": "2024-03-01 09:00", "end": "2024-03-01 10:00", "title": "A", "class": "public"})),
            event(json!({"start": "2024-03-01 10:00", "end": "2024-03-01 11:00", "title": "B", "class": "public"})),
        ];
        let merged = merge_consecutive(events);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title.as_deref(), Some("A + B + C"));
    }

    #[test]
    fn test_merge_matches_across_time_formats() {
        let events = vec![
            event(json!({"start": "2024-03-01T09:00:00Z", "end": "2024-03-01T11:00:00+01:00"})),
            event(json!({"start": "2024-03-01 10:00", "end": "2024-03-01 10:30"})),
        ];
        assert_eq!(merge_consecutive(events).len(), 1);
    }

    #[test]
    fn test_merge_with_redacted_side_is_fully_redacted() {
        let events = vec![
            json!({"calendar": 0, "start": "2024-03-01 09:00", "end": "2024-03-01 10:00",
                   "title": "Visible", "class": "PUBLIC", "location": "Office"}),
            json!({"calendar": 0, "start": "2024-03-01 10:00", "end": "2024-03-01 11:00",
                   "title": "Secret"}),
        ];
        let out = process(events, &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["title"], "BUSY");
        assert_eq!(out[0]["location"], "");
        assert_eq!(out[0]["description"], "");
        assert_eq!(out[0]["end"], "2024-03-01 11:00");
        assert_eq!(out[0]["redacted"], true);
    }

    #[test]
    fn test_event_without_visibility_is_redacted() {
        let out = process(
            vec![json!({"start": "2024-03-01 09:00", "end": "2024-03-01 10:00",
                        "title": "Therapy", "description": "Room 4"})],
            &[],
        );
        assert_eq!(out[0]["title"], "BUSY");
        assert_eq!(out[0]["description"], "");
        assert_eq!(out[0]["start"], "2024-03-01 09:00");
        assert_eq!(out[0]["end"], "2024-03-01 10:00");
        assert_eq!(out[0]["redacted"], true);
    }

    #[test]
    fn test_public_event_passes_unchanged() {
        let original = json!({"start": "2024-03-01 09:00", "end": "2024-03-01 10:00",
                              "title": "Launch", "class": "PUBLIC", "url": "https://x.example"});
        assert_eq!(process(vec![original.clone()], &[]), vec![original]);
    }

    #[test]
    fn test_declined_by_css_class_and_status() {
        let by_class = event(json!({"css-classes": ["event", "PARTSTAT-DECLINED"]}));
        let by_status = event(json!({"type": "cancelled"}));
        let by_fragment = event(json!({"ical": "BEGIN:VEVENT\nSTATUS:DECLINED\nEND:VEVENT"}));
        let kept = event(json!({"css-classes": "event status-confirmed", "type": "CONFIRMED"}));

        assert!(is_declined(&by_class, &[]));
        assert!(is_declined(&by_status, &[]));
        assert!(is_declined(&by_fragment, &[]));
        assert!(!is_declined(&kept, &[]));
    }

    #[test]
    fn test_declined_status_behind_other_alias() {
        let e = event(json!({"type": "VEVENT", "status": "CANCELLED", "start": "2024-03-01"}));
        assert!(is_declined(&e, &[]));

        let kept = event(json!({"type": "VEVENT", "status": "CONFIRMED"}));
        assert!(!is_declined(&kept, &[]));
    }

    #[test]
    fn test_declined_class_behind_other_alias() {
        let e = event(json!({"css-classes": "event", "className": "status-declined"}));
        assert!(is_declined(&e, &[]));
        assert_eq!(process(vec![e.into_value()], &[]).len(), 0);
    }

    #[test]
    fn test_declined_attendee_only_counts_for_configured_user() {
        let e = event(json!({
            "ical": "BEGIN:VEVENT\nATTENDEE;PARTSTAT=DECLINED:mailto:alice@example.com\nEND:VEVENT"
        }));
        assert!(is_declined(&e, &emails(&["alice@example.com"])));
        assert!(!is_declined(&e, &emails(&["bob@example.com"])));
        assert!(!is_declined(&e, &[]));
    }

    #[test]
    fn test_declined_events_are_dropped_before_merging() {
        let events = vec![
            json!({"start": "2024-03-01 09:00", "end": "2024-03-01 10:00", "class": "PUBLIC", "title": "A"}),
            json!({"start": "2024-03-01 10:00", "end": "2024-03-01 11:00", "class": "PUBLIC", "title": "B",
                   "css-classes": "status-declined"}),
            json!({"start": "2024-03-01 11:00", "end": "2024-03-01 12:00", "class": "PUBLIC", "title": "C"}),
        ];
        let out = process(events, &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["title"], "A");
        assert_eq!(out[1]["title"], "C");
    }

    #[test]
    fn test_groups_keep_first_appearance_order() {
        let events = vec![
            event(json!({"calendar_id": "b", "start": "2024-03-01 09:00"})),
            event(json!({"calendar_id": "a", "start": "2024-03-01 08:00"})),
            event(json!({"start": "2024-03-01 07:00"})),
            event(json!({"calendar_id": "b", "start": "2024-03-01 06:00"})),
        ];
        let groups = group_by_calendar(events);
        let ids: Vec<Option<&str>> = groups
            .iter()
            .map(|g| g[0].calendar_id.as_deref())
            .collect();
        assert_eq!(ids, vec![Some("b"), Some("a"), None]);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_non_objects_are_kept() {
        let out = process(vec![json!("oops"), json!({"start": "2024-03-01", "class": "PUBLIC"})], &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], json!("oops"));
    }
}

//! Scanning of the raw iCalendar text embedded in an event.
//!
//! Only event-level lines count. Lines inside nested components such as
//! `VALARM` (which may carry its own `ATTENDEE`) or `VTIMEZONE` are skipped.

use icalendar::parser::unfold;

/// Components whose own properties are event-level.
const CONTAINERS: &[&str] = &["VCALENDAR", "VEVENT", "VTODO", "VJOURNAL"];

/// Unfolded event-level content lines of a fragment.
pub fn top_level_lines(fragment: &str) -> Vec<String> {
    let unfolded = unfold(fragment);
    let mut nested = 0usize;
    let mut lines = Vec::new();

    for line in unfolded.lines() {
        let line = line.trim_end_matches('\r');
        let (name, value) = split_property(line);

        if name.eq_ignore_ascii_case("BEGIN") {
            if nested > 0 || !is_container(value) {
                nested += 1;
            }
            continue;
        }
        if name.eq_ignore_ascii_case("END") {
            if nested > 0 {
                nested -= 1;
            }
            continue;
        }
        if nested == 0 && !line.trim().is_empty() {
            lines.push(line.to_string());
        }
    }

    lines
}

/// Whether the event itself is marked `STATUS:CANCELLED` or `STATUS:DECLINED`.
pub fn has_cancelled_status(fragment: &str) -> bool {
    top_level_lines(fragment).iter().any(|line| {
        let (name, value) = split_property(line);
        name.eq_ignore_ascii_case("STATUS")
            && (value.trim().eq_ignore_ascii_case("CANCELLED")
                || value.trim().eq_ignore_ascii_case("DECLINED"))
    })
}

/// Whether one of `user_emails` (lowercased) declined the event.
///
/// Another attendee declining does not count.
pub fn declined_by(fragment: &str, user_emails: &[String]) -> bool {
    if user_emails.is_empty() {
        return false;
    }

    top_level_lines(fragment).iter().any(|line| {
        let (name, _) = split_property(line);
        if !name.eq_ignore_ascii_case("ATTENDEE") {
            return false;
        }
        let lower = line.to_lowercase();
        lower.contains("partstat=declined")
            && user_emails.iter().any(|email| lower.contains(email.as_str()))
    })
}

/// Split a content line into its property name and value.
///
/// Parameters (`;KEY=VAL`) are dropped from the name. Quoted parameter values
/// may contain `:`, so the value starts at the first colon outside quotes.
fn split_property(line: &str) -> (&str, &str) {
    let mut in_quotes = false;
    let mut name_end = None;

    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes && name_end.is_none() => name_end = Some(i),
            ':' if !in_quotes => {
                let name = &line[..name_end.unwrap_or(i)];
                return (name.trim(), &line[i + 1..]);
            }
            _ => {}
        }
    }

    (&line[..name_end.unwrap_or(line.len())], "")
}

fn is_container(component: &str) -> bool {
    CONTAINERS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(component.trim()))
}

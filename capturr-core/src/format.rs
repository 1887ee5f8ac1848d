//! Text formatting: capture decoration, daily note keys, and display helpers.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::fmt::Display;

/// Append the optional time-of-day stamp and default tag to captured text.
///
/// The stamp is rendered as 24-hour `HH:MM` in its own timezone; the tag is
/// trimmed and skipped when blank. Parts are space-joined after one
/// separating space. With nothing to add the content is returned unchanged.
pub fn decorate_content<Tz>(
    content: &str,
    stamp: Option<&DateTime<Tz>>,
    default_tag: Option<&str>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut suffix: Vec<String> = Vec::new();

    if let Some(ts) = stamp {
        suffix.push(ts.format("%H:%M").to_string());
    }

    if let Some(tag) = default_tag.map(str::trim).filter(|t| !t.is_empty()) {
        suffix.push(tag.to_string());
    }

    if suffix.is_empty() {
        return content.to_string();
    }
    format!("{} {}", content, suffix.join(" "))
}

/// Page key of the daily note for a calendar date (`MM-DD-YYYY`).
pub fn daily_note_key(date: NaiveDate) -> String {
    date.format("%m-%d-%Y").to_string()
}

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        // Future timestamps are retry schedules
        let ahead = -duration.num_seconds();
        if ahead < 60 {
            format!("in {}s", ahead)
        } else {
            format!("in {}m", ahead / 60)
        }
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format an optional timestamp as relative time, or "-" if missing.
pub fn format_relative_time_opt(ts: Option<DateTime<Utc>>) -> String {
    ts.map(format_relative_time).unwrap_or_else(|| "-".to_string())
}

//! Event status derived from the date range.
//!
//! A receiving device never trusts a stored status: it recomputes it from
//! the start and end dates against the local calendar day.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::model::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    #[serde(rename = "actif")]
    Active,
    #[serde(rename = "planifié")]
    Planned,
    #[serde(rename = "passé")]
    Past,
}

impl EventStatus {
    /// Compare calendar days: today within [start, end] is active, before
    /// start is planned, after end is past. A missing or unparseable bound
    /// is treated as open.
    pub fn derive(start: Option<&str>, end: Option<&str>, today: NaiveDate) -> Self {
        if let Some(start) = start.and_then(parse_day) {
            if today < start {
                return EventStatus::Planned;
            }
        }
        if let Some(end) = end.and_then(parse_day) {
            if today > end {
                return EventStatus::Past;
            }
        }
        EventStatus::Active
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "actif",
            EventStatus::Planned => "planifié",
            EventStatus::Past => "passé",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            EventStatus::Active => 0,
            EventStatus::Planned => 1,
            EventStatus::Past => 2,
        }
    }
}

/// Parse the calendar day of a date or timestamp string.
///
/// Accepts `YYYY-MM-DD`, RFC 3339, and naive `YYYY-MM-DD[T ]HH:MM:SS`.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Sort events for listing: active first, then planned, then past.
///
/// Within active and planned, the nearest start comes first. Past events
/// are listed most recent first. Events without a parseable start sort last
/// within their group.
pub fn sort_events(events: &mut [Event], today: NaiveDate) {
    events.sort_by(|a, b| compare_for_listing(a, b, today));
}

fn compare_for_listing(a: &Event, b: &Event, today: NaiveDate) -> Ordering {
    let (sa, sb) = (a.status_on(today), b.status_on(today));
    sa.rank().cmp(&sb.rank()).then_with(|| {
        let da = a.start_date.as_deref().and_then(parse_day);
        let db = b.start_date.as_deref().and_then(parse_day);
        let by_date = match (da, db) {
            (Some(x), Some(y)) if sa == EventStatus::Past => y.cmp(&x),
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_date.then_with(|| a.id.cmp(&b.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn event(id: &str, start: &str, end: &str) -> Event {
        Event {
            id: id.into(),
            name: id.to_string(),
            description: String::new(),
            start_date: Some(start.to_string()),
            end_date: Some(end.to_string()),
        }
    }

    #[test]
    fn test_derive_by_calendar_day() {
        let today = day("2024-05-10");
        assert_eq!(
            EventStatus::derive(Some("2024-05-10"), Some("2024-05-10"), today),
            EventStatus::Active
        );
        assert_eq!(
            EventStatus::derive(Some("2024-05-11"), Some("2024-05-12"), today),
            EventStatus::Planned
        );
        assert_eq!(
            EventStatus::derive(Some("2024-05-01"), Some("2024-05-09"), today),
            EventStatus::Past
        );
    }

    #[test]
    fn test_time_of_day_is_ignored() {
        let today = day("2024-05-10");
        assert_eq!(
            EventStatus::derive(Some("2024-05-10T23:59:00Z"), Some("2024-05-10T00:00:00Z"), today),
            EventStatus::Active
        );
    }

    #[test]
    fn test_unparseable_bounds_are_open() {
        let today = day("2024-05-10");
        assert_eq!(EventStatus::derive(None, None, today), EventStatus::Active);
        assert_eq!(
            EventStatus::derive(Some("not a date"), Some("soon"), today),
            EventStatus::Active
        );
    }

    #[test]
    fn test_parse_day_formats() {
        assert_eq!(parse_day("2024-05-10"), Some(day("2024-05-10")));
        assert_eq!(parse_day("2024-05-10 08:30:00"), Some(day("2024-05-10")));
        assert_eq!(parse_day("2024-05-10T08:30:00.250"), Some(day("2024-05-10")));
        assert_eq!(parse_day("2024-05-10T08:30:00+02:00"), Some(day("2024-05-10")));
        assert_eq!(parse_day(""), None);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&EventStatus::Planned).unwrap(), "\"planifié\"");
        assert_eq!(EventStatus::Past.as_str(), "passé");
    }

    #[test]
    fn test_sort_events_for_listing() {
        let today = day("2024-05-10");
        let mut events = vec![
            event("old", "2024-01-01", "2024-01-02"),
            event("far", "2024-09-01", "2024-09-02"),
            event("now", "2024-05-09", "2024-05-11"),
            event("recent", "2024-04-01", "2024-04-02"),
            event("soon", "2024-06-01", "2024-06-02"),
        ];
        sort_events(&mut events, today);
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["now", "soon", "far", "recent", "old"]);
    }
}

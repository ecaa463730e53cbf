//! Calendar events that schedule adaptive overrides
//!
//! Recurrence rules are carried but not expanded.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use errors::DanthermResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::device::map::Operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub uid: Option<String>,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub rrule: Option<String>,
}

impl CalendarEvent {
    pub fn new(summary: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            uid: None,
            summary: summary.into(),
            start,
            end,
            rrule: None,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_rrule(mut self, rrule: impl Into<String>) -> Self {
        self.rrule = Some(rrule.into());
        self
    }

    /// Operation named by the summary, if any
    pub fn operation(&self) -> Option<Operation> {
        Operation::from_text(&self.summary)
    }
}

/// End time used for stack expiry
///
/// Recurring events spanning more than a year are treated as a single day
/// starting at the event start.
pub fn calculate_event_end_time(event: &CalendarEvent) -> DateTime<Utc> {
    if event.rrule.is_some() && event.end - event.start > Duration::days(365) {
        warn!(
            "Recurring event '{}' spans {} days, capping at 24 hours",
            event.summary,
            (event.end - event.start).num_days()
        );
        return event.start + Duration::hours(24);
    }
    event.end
}

/// Source of scheduled events
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Events in progress at `now`
    async fn active_events(&self, now: DateTime<Utc>) -> DanthermResult<Vec<CalendarEvent>>;

    /// Whether the event is still in the calendar (ended rather than deleted)
    async fn event_exists(&self, event: &CalendarEvent) -> bool;

    async fn known_event_ids(&self) -> DanthermResult<Vec<String>>;
}

/// In-memory calendar
#[derive(Debug, Default)]
pub struct LocalCalendar {
    events: RwLock<Vec<CalendarEvent>>,
    next_uid: AtomicU64,
}

impl LocalCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event, assigning a uid when it has none; returns the uid
    pub fn create_event(&self, mut event: CalendarEvent) -> String {
        let uid = match &event.uid {
            Some(uid) => uid.clone(),
            None => {
                let n = self.next_uid.fetch_add(1, Ordering::Relaxed);
                format!("{}-{}", event.start.timestamp(), n)
            },
        };
        event.uid = Some(uid.clone());
        debug!("Calendar event created: {} ({})", event.summary, uid);
        self.events.write().push(event);
        uid
    }

    pub fn delete_event(&self, uid: &str) -> bool {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.uid.as_deref() != Some(uid));
        before != events.len()
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.events.read().clone()
    }
}

#[async_trait]
impl CalendarProvider for LocalCalendar {
    async fn active_events(&self, now: DateTime<Utc>) -> DanthermResult<Vec<CalendarEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.start <= now && now < calculate_event_end_time(e))
            .cloned()
            .collect())
    }

    async fn event_exists(&self, event: &CalendarEvent) -> bool {
        let events = self.events.read();
        match &event.uid {
            Some(uid) => events.iter().any(|e| e.uid.as_deref() == Some(uid.as_str())),
            None => events.contains(event),
        }
    }

    async fn known_event_ids(&self) -> DanthermResult<Vec<String>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter_map(|e| e.uid.clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tracing_test::traced_test;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn test_summary_resolves_operation() {
        assert_eq!(
            CalendarEvent::new("Week program", at(0), at(1)).operation(),
            Some(Operation::WeekProgram)
        );
        assert_eq!(
            CalendarEvent::new("LEVEL-2", at(0), at(1)).operation(),
            Some(Operation::Level2)
        );
        assert_eq!(CalendarEvent::new("dentist", at(0), at(1)).operation(), None);
    }

    #[test]
    #[traced_test]
    fn test_long_recurring_event_is_capped() {
        let event = CalendarEvent::new("away", at(0), at(24 * 400)).with_rrule("FREQ=WEEKLY");
        assert_eq!(calculate_event_end_time(&event), at(24));
        assert!(logs_contain("capping at 24 hours"));

        let single = CalendarEvent::new("away", at(0), at(24 * 400));
        assert_eq!(calculate_event_end_time(&single), at(24 * 400));
    }

    #[tokio::test]
    async fn test_local_calendar() {
        let calendar = LocalCalendar::new();
        let uid = calendar.create_event(CalendarEvent::new("away", at(1), at(3)));
        calendar.create_event(CalendarEvent::new("night", at(5), at(6)).with_uid("n1"));

        assert!(calendar.active_events(at(0)).await.unwrap().is_empty());
        let active = calendar.active_events(at(2)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].uid.as_deref(), Some(uid.as_str()));
        assert!(calendar.active_events(at(3)).await.unwrap().is_empty());

        let mut ids = calendar.known_event_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"n1".to_string()));

        assert!(calendar.event_exists(&active[0]).await);
        assert!(calendar.delete_event(&uid));
        assert!(!calendar.event_exists(&active[0]).await);
    }
}

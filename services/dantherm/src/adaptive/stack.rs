//! Priority-ordered stack of mode overrides
//!
//! Index 0 is the winning override. Every entry records the operation to
//! fall back to once it leaves the stack, so the entries form a chain from
//! the top down to the operation that was active before any override.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::device::map::Operation;

/// One override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub event: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Operation to restore when this entry leaves the top
    pub previous: Option<Operation>,
    pub end_time: Option<DateTime<Utc>>,
}

impl StackEntry {
    fn matches(&self, event: Operation, event_id: Option<&str>) -> bool {
        self.event == event && self.event_id.as_deref() == event_id
    }

    fn to_value(&self) -> Value {
        let mut record = json!({
            "event": self.event.as_str(),
            "previous": self.previous.map(|op| op.as_str()),
            "end_time": self.end_time.map(|t| t.to_rfc3339()),
        });
        if let (Some(id), Some(map)) = (&self.event_id, record.as_object_mut()) {
            map.insert("event_id".to_string(), Value::from(id.clone()));
        }
        record
    }

    /// Parse a persisted record; unknown events are rejected, malformed
    /// optional fields are dropped
    fn from_value(record: &Value) -> Option<Self> {
        let event = record.get("event")?.as_str()?.parse().ok()?;
        let event_id = record
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let previous = record
            .get("previous")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        let end_time = record
            .get("end_time")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        Some(Self {
            event,
            event_id,
            previous,
            end_time,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptiveEventStack {
    entries: Vec<StackEntry>,
}

impl AdaptiveEventStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an override by priority
    ///
    /// An existing entry with the same name and id is taken out first. The
    /// new entry goes above the first entry of equal or lower priority, or
    /// above the first entry sharing its name under another id. Returns
    /// whether it became the top.
    pub fn push(
        &mut self,
        event: Operation,
        current_operation: Option<Operation>,
        new_operation: Option<Operation>,
        event_id: Option<&str>,
        end_time: Option<DateTime<Utc>>,
    ) -> bool {
        if let Some(index) = self.position(event, event_id) {
            self.remove_at(index);
        }

        let priority = event.priority();
        let insert_at = self
            .entries
            .iter()
            .position(|entry| {
                priority >= entry.event.priority()
                    || (entry.event == event && entry.event_id.as_deref() != event_id)
            })
            .unwrap_or(self.entries.len());

        let mut entry = StackEntry {
            event,
            event_id: event_id.map(str::to_string),
            previous: current_operation,
            end_time,
        };

        if insert_at == 0 {
            self.entries.insert(0, entry);
            return true;
        }

        let above = &mut self.entries[insert_at - 1];
        entry.previous = above.previous;
        above.previous = new_operation;
        self.entries.insert(insert_at, entry);
        false
    }

    /// Replace the end time of an entry; returns whether it was found
    pub fn update(
        &mut self,
        event: Operation,
        event_id: Option<&str>,
        end_time: Option<DateTime<Utc>>,
    ) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.matches(event, event_id))
        {
            Some(entry) => {
                entry.end_time = end_time;
                true
            },
            None => false,
        }
    }

    /// Remove an entry by name and id
    ///
    /// Returns the operation to restore when the entry was the top. A
    /// removed inner entry hands its fallback to the entry above it.
    pub fn pop(&mut self, event: Operation, event_id: Option<&str>) -> Option<Operation> {
        let index = self.position(event, event_id)?;
        self.remove_at(index)
    }

    /// Remove a specific entry, with the same fallback handling as `pop`
    pub fn remove(&mut self, entry: &StackEntry) -> Option<Operation> {
        let index = self.entries.iter().position(|e| e == entry)?;
        self.remove_at(index)
    }

    fn remove_at(&mut self, index: usize) -> Option<Operation> {
        let removed = self.entries.remove(index);
        if index == 0 {
            // A new top must not fall back to the override just removed
            if let Some(top) = self.entries.first_mut() {
                if top.previous == Some(removed.event) {
                    top.previous = removed.previous;
                }
            }
            return removed.previous;
        }
        self.entries[index - 1].previous = removed.previous;
        None
    }

    /// Remove every entry matching `predicate`; returns how many went
    pub fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&StackEntry) -> bool,
    {
        let mut removed = 0;
        while let Some(index) = self.entries.iter().position(&mut predicate) {
            self.remove_at(index);
            removed += 1;
        }
        removed
    }

    /// Entry with the earliest end time strictly before `now`
    pub fn expired(&self, now: DateTime<Utc>) -> Option<StackEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.end_time.is_some_and(|end| end < now))
            .min_by_key(|entry| entry.end_time)
            .cloned()
    }

    pub fn exists(&self, event: Operation, event_id: Option<&str>) -> bool {
        self.position(event, event_id).is_some()
    }

    /// Find an entry, scanning from the bottom
    pub fn lookup(&self, event: Operation, event_id: Option<&str>) -> Option<&StackEntry> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.matches(event, event_id))
    }

    pub fn top(&self) -> Option<&StackEntry> {
        self.entries.first()
    }

    pub fn is_top(&self, event: Operation, event_id: Option<&str>) -> bool {
        self.top().is_some_and(|entry| entry.matches(event, event_id))
    }

    pub fn clear_all_events(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackEntry> {
        self.entries.iter()
    }

    /// Top-first records with ISO-8601 end times
    pub fn to_list(&self) -> Vec<Value> {
        self.entries.iter().map(StackEntry::to_value).collect()
    }

    /// Rebuild from persisted records, keeping their order
    pub fn from_list(records: &[Value]) -> Self {
        let entries = records
            .iter()
            .filter_map(|record| {
                let entry = StackEntry::from_value(record);
                if entry.is_none() {
                    warn!("Dropping unreadable stack record: {}", record);
                }
                entry
            })
            .collect();
        Self { entries }
    }

    fn position(&self, event: Operation, event_id: Option<&str>) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.matches(event, event_id))
    }
}

impl fmt::Display for AdaptiveEventStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Array(self.to_list()))
    }
}

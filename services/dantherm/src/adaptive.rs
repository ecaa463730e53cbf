//! Adaptive mode overrides driven by triggers and calendar events

pub mod calendar;
pub mod manager;
pub mod stack;
pub mod trigger;

pub use calendar::{calculate_event_end_time, CalendarEvent, CalendarProvider, LocalCalendar};
pub use manager::{AdaptiveHost, AdaptiveManager, AdaptiveSettings};
pub use stack::{AdaptiveEventStack, StackEntry};
pub use trigger::{AdaptiveTrigger, TriggerKind};

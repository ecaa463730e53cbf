//! Adaptive triggers
//!
//! A trigger binds an external on/off entity to one of the boost, eco or
//! home overrides. State changes only record timestamps here; the manager
//! applies them on its next reconciliation pass.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::collaborators::{EntityState, StateChange};
use crate::device::map::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Boost,
    Eco,
    Home,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 3] = [TriggerKind::Boost, TriggerKind::Eco, TriggerKind::Home];

    pub const fn name(&self) -> &'static str {
        match self {
            TriggerKind::Boost => "boost",
            TriggerKind::Eco => "eco",
            TriggerKind::Home => "home",
        }
    }

    /// Stack event pushed by this trigger
    pub const fn operation(&self) -> Operation {
        match self {
            TriggerKind::Boost => Operation::Boost,
            TriggerKind::Eco => Operation::Eco,
            TriggerKind::Home => Operation::Home,
        }
    }

    /// Options key holding the bound entity id
    pub const fn option_key(&self) -> &'static str {
        match self {
            TriggerKind::Boost => "boost_mode_trigger",
            TriggerKind::Eco => "eco_mode_trigger",
            TriggerKind::Home => "home_mode_trigger",
        }
    }

    /// Switch that arms the trigger
    pub const fn mode_key(&self) -> &'static str {
        match self {
            TriggerKind::Boost => "boost_mode",
            TriggerKind::Eco => "eco_mode",
            TriggerKind::Home => "home_mode",
        }
    }

    pub const fn timeout_key(&self) -> &'static str {
        match self {
            TriggerKind::Boost => "boost_mode_timeout",
            TriggerKind::Eco => "eco_mode_timeout",
            TriggerKind::Home => "home_mode_timeout",
        }
    }

    pub const fn selection_key(&self) -> &'static str {
        match self {
            TriggerKind::Boost => "boost_operation_selection",
            TriggerKind::Eco => "eco_operation_selection",
            TriggerKind::Home => "home_operation_selection",
        }
    }

    /// Entities that only make sense with the trigger configured
    pub const fn associated_entities(&self) -> [&'static str; 3] {
        [self.mode_key(), self.timeout_key(), self.selection_key()]
    }
}

/// Runtime state of one trigger
#[derive(Debug)]
pub struct AdaptiveTrigger {
    pub kind: TriggerKind,
    pub entity_id: Option<String>,
    pub detected: Option<DateTime<Utc>>,
    pub undetected: Option<DateTime<Utc>>,
    pub timeout: Option<DateTime<Utc>>,
    pub(crate) subscription: Option<JoinHandle<()>>,
}

impl AdaptiveTrigger {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            entity_id: None,
            detected: None,
            undetected: None,
            timeout: None,
            subscription: None,
        }
    }

    /// Record an on/off transition of the bound entity
    ///
    /// Transitions out of an absent or unknown state are ignored, as is the
    /// entity disappearing.
    pub fn record_change(&mut self, change: &StateChange, now: DateTime<Utc>) {
        match &change.old_state {
            None | Some(EntityState::Unknown) => return,
            Some(_) => {},
        }
        match &change.new_state {
            Some(EntityState::On) => {
                self.detected = Some(now);
                debug!("{} detected", self.kind.option_key());
            },
            Some(EntityState::Off) => {
                self.undetected = Some(now);
                debug!("{} undetected", self.kind.option_key());
            },
            _ => {},
        }
    }

    /// Processing order key; triggers with nothing due sort last
    ///
    /// A stale undetection older than the latest detection is dropped.
    pub fn sort_key(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(detected) = self.detected {
            if self.undetected.is_some_and(|undetected| undetected < detected) {
                self.undetected = None;
            }
            return detected;
        }
        if let Some(undetected) = self.undetected {
            return undetected;
        }
        match self.timeout {
            Some(timeout) if timeout < now => timeout,
            _ => DateTime::<Utc>::MAX_UTC,
        }
    }

    pub(crate) fn unsubscribe(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.abort();
        }
    }
}

impl Drop for AdaptiveTrigger {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

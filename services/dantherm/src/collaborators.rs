//! Host-side collaborators
//!
//! The adaptive engine observes entities it does not own (occupancy sensors,
//! helpers) and toggles registry flags on entities it does. These traits are
//! the seams to the host platform; the in-memory implementations back the
//! standalone binary and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Entity states
// ============================================================================

/// Observed state of an external entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityState {
    On,
    Off,
    Unknown,
    Other(String),
}

impl EntityState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "on" => EntityState::On,
            "off" => EntityState::Off,
            "unknown" | "unavailable" => EntityState::Unknown,
            other => EntityState::Other(other.to_string()),
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, EntityState::On)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::On => f.write_str("on"),
            EntityState::Off => f.write_str("off"),
            EntityState::Unknown => f.write_str("unknown"),
            EntityState::Other(s) => f.write_str(s),
        }
    }
}

/// State transition of one entity; `None` means the entity is absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub entity_id: String,
    pub old_state: Option<EntityState>,
    pub new_state: Option<EntityState>,
}

/// Entity state lookup and change subscription
pub trait EntityStates: Send + Sync {
    fn state(&self, entity_id: &str) -> Option<EntityState>;

    /// Stream of every state change; receivers filter by entity id
    fn subscribe(&self) -> broadcast::Receiver<StateChange>;
}

#[derive(Debug, Clone)]
pub struct InMemoryEntityStates {
    states: Arc<RwLock<HashMap<String, EntityState>>>,
    changes: broadcast::Sender<StateChange>,
}

impl Default for InMemoryEntityStates {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }
}

impl InMemoryEntityStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a state and publish the transition
    pub fn set_state(&self, entity_id: &str, state: EntityState) {
        let old_state = self
            .states
            .write()
            .insert(entity_id.to_string(), state.clone());
        // No receivers is fine
        let _ = self.changes.send(StateChange {
            entity_id: entity_id.to_string(),
            old_state,
            new_state: Some(state),
        });
    }

    pub fn remove(&self, entity_id: &str) {
        let old_state = self.states.write().remove(entity_id);
        let _ = self.changes.send(StateChange {
            entity_id: entity_id.to_string(),
            old_state,
            new_state: None,
        });
    }
}

impl EntityStates for InMemoryEntityStates {
    fn state(&self, entity_id: &str) -> Option<EntityState> {
        self.states.read().get(entity_id).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}

// ============================================================================
// Entity registry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub entity_id: String,
    pub unique_id: String,
    pub disabled: bool,
}

/// Registry of this service's own entities
pub trait EntityRegistry: Send + Sync {
    fn entries(&self) -> Vec<RegistryEntry>;

    fn set_disabled(&self, entity_id: &str, disabled: bool);
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEntityRegistry {
    entries: Arc<RwLock<Vec<RegistryEntry>>>,
}

impl InMemoryEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entity_id: &str, unique_id: &str, disabled: bool) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.entity_id != entity_id);
        entries.push(RegistryEntry {
            entity_id: entity_id.to_string(),
            unique_id: unique_id.to_string(),
            disabled,
        });
    }

    pub fn is_disabled(&self, entity_id: &str) -> Option<bool> {
        self.entries
            .read()
            .iter()
            .find(|e| e.entity_id == entity_id)
            .map(|e| e.disabled)
    }
}

impl EntityRegistry for InMemoryEntityRegistry {
    fn entries(&self) -> Vec<RegistryEntry> {
        self.entries.read().clone()
    }

    fn set_disabled(&self, entity_id: &str, disabled: bool) {
        if let Some(entry) = self
            .entries
            .write()
            .iter_mut()
            .find(|e| e.entity_id == entity_id)
        {
            entry.disabled = disabled;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(3));
        assert_eq!(clock.now(), start + Duration::minutes(3));
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let states = InMemoryEntityStates::new();
        let mut rx = states.subscribe();

        states.set_state("binary_sensor.hall", EntityState::Off);
        states.set_state("binary_sensor.hall", EntityState::On);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.old_state, None);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.old_state, Some(EntityState::Off));
        assert_eq!(second.new_state, Some(EntityState::On));
        assert!(states.state("binary_sensor.hall").unwrap().is_on());
    }

    #[test]
    fn test_registry_toggle() {
        let registry = InMemoryEntityRegistry::new();
        registry.register("switch.boost_mode", "dantherm_boost_mode", true);
        registry.set_disabled("switch.boost_mode", false);
        assert_eq!(registry.is_disabled("switch.boost_mode"), Some(false));
    }
}

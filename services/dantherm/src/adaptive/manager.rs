//! Adaptive manager
//!
//! Reconciles triggers, calendar events and expiring overrides into the
//! target operation of the unit. It runs once per poll and owns no task of
//! its own apart from the trigger subscriptions.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use errors::DanthermResult;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::calendar::{calculate_event_end_time, CalendarEvent, CalendarProvider};
use super::stack::AdaptiveEventStack;
use super::trigger::{AdaptiveTrigger, TriggerKind};
use crate::collaborators::{Clock, EntityRegistry, EntityState, EntityStates, StateChange};
use crate::config::AdaptiveOptions;
use crate::device::map::Operation;
use crate::device::value_as_i64;

const OPERATION_CHANGE_COOLDOWN_SECS: i64 = 120;
const DEBUG_OPERATION_CHANGE_COOLDOWN_SECS: i64 = 30;
const DEFAULT_TRIGGER_TIMEOUT_MINUTES: i64 = 5;
const DEBUG_TRIGGER_TIMEOUT_MINUTES: i64 = 3;

/// Operations toggled through their mode switch instead of the stack
const SWITCH_BACKED: [Operation; 5] = [
    Operation::Boost,
    Operation::Eco,
    Operation::Fireplace,
    Operation::Home,
    Operation::Night,
];

/// What the manager needs from the coordinator
#[async_trait]
pub trait AdaptiveHost: Send + Sync {
    fn current_operation(&self) -> Option<Operation>;

    /// Last known state of one of our entities
    fn entity_state(&self, key: &str) -> Option<Value>;

    async fn set_operation_selection(&self, operation: Operation) -> DanthermResult<()>;

    /// Set a switch; `None` clears it
    async fn set_switch_state(&self, key: &str, state: Option<bool>) -> DanthermResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveSettings {
    /// Short timeouts for trying things out
    pub debug: bool,
}

impl AdaptiveSettings {
    fn cooldown(&self) -> Duration {
        Duration::seconds(if self.debug {
            DEBUG_OPERATION_CHANGE_COOLDOWN_SECS
        } else {
            OPERATION_CHANGE_COOLDOWN_SECS
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalendarAction {
    Start,
    End,
    Deleted,
}

/// Outcome of applying one trigger
enum TriggerAction {
    None,
    Push {
        current: Option<Operation>,
        target: Option<Operation>,
        timeout: DateTime<Utc>,
    },
}

struct ManagerState {
    triggers: Vec<AdaptiveTrigger>,
    /// No pushes or expiry before this instant
    operation_change_timeout: DateTime<Utc>,
    active_calendar_events: Vec<CalendarEvent>,
}

impl ManagerState {
    fn trigger_mut(&mut self, kind: TriggerKind) -> Option<&mut AdaptiveTrigger> {
        self.triggers.iter_mut().find(|t| t.kind == kind)
    }
}

pub struct AdaptiveManager {
    clock: Arc<dyn Clock>,
    states: Arc<dyn EntityStates>,
    registry: Option<Arc<dyn EntityRegistry>>,
    calendar: RwLock<Option<Arc<dyn CalendarProvider>>>,
    settings: AdaptiveSettings,
    events: Mutex<AdaptiveEventStack>,
    inner: Mutex<ManagerState>,
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "on",
        other => value_as_i64(other).is_some_and(|v| v != 0),
    }
}

impl AdaptiveManager {
    pub fn new(
        clock: Arc<dyn Clock>,
        states: Arc<dyn EntityStates>,
        settings: AdaptiveSettings,
    ) -> Self {
        Self {
            clock,
            states,
            registry: None,
            calendar: RwLock::new(None),
            settings,
            events: Mutex::new(AdaptiveEventStack::new()),
            inner: Mutex::new(ManagerState {
                triggers: TriggerKind::ALL.into_iter().map(AdaptiveTrigger::new).collect(),
                operation_change_timeout: DateTime::<Utc>::MIN_UTC,
                active_calendar_events: Vec::new(),
            }),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn EntityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn set_calendar(&self, calendar: Option<Arc<dyn CalendarProvider>>) {
        *self.calendar.write() = calendar;
    }

    // ========================================================================
    // Stack access
    // ========================================================================

    /// Snapshot of the stack
    pub fn events(&self) -> AdaptiveEventStack {
        self.events.lock().clone()
    }

    /// Name of the winning override, or "none"
    pub fn adaptive_state(&self) -> String {
        self.events
            .lock()
            .top()
            .map(|entry| entry.event.as_str().to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    pub fn adaptive_state_attrs(&self) -> Value {
        json!({ "events": self.events.lock().to_list() })
    }

    /// Rebuild the stack from persisted adaptive state attributes
    pub fn restore_events(&self, attrs: &Value) {
        let records = attrs
            .get("events")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let stack = AdaptiveEventStack::from_list(records);
        info!("Restored {} adaptive event(s)", stack.len());
        *self.events.lock() = stack;
    }

    pub fn clear_all_events(&self) -> usize {
        let count = self.events.lock().clear_all_events();
        info!("Cleared {} adaptive event(s)", count);
        count
    }

    /// Drop calendar-backed entries whose event is gone
    ///
    /// Entries without an event id are kept. If the calendar cannot be
    /// queried every calendar-backed entry is dropped.
    pub async fn cleanup_stale_events(&self) -> usize {
        let Some(calendar) = self.calendar.read().clone() else {
            return 0;
        };
        let removed = match calendar.known_event_ids().await {
            Ok(ids) => self.events.lock().remove_where(|entry| {
                entry
                    .event_id
                    .as_ref()
                    .is_some_and(|id| !ids.contains(id))
            }),
            Err(e) => {
                warn!("Calendar unavailable, dropping calendar events: {}", e);
                self.events.lock().remove_where(|entry| entry.event_id.is_some())
            },
        };
        if removed > 0 {
            info!("Removed {} stale adaptive event(s)", removed);
        }
        removed
    }

    // ========================================================================
    // Trigger setup
    // ========================================================================

    /// Enable the entities of configured triggers and disable the rest
    pub fn set_up_adaptive_triggers(&self, options: &AdaptiveOptions) {
        let mut any_trigger = false;
        for kind in TriggerKind::ALL {
            let enabled = options.trigger_entity(kind).is_some();
            any_trigger |= enabled;
            for suffix in kind.associated_entities() {
                self.set_entities_enabled_by_suffix(suffix, enabled);
            }
        }
        self.set_entities_enabled_by_suffix("adaptive_state", any_trigger);
    }

    /// Toggle registry entries whose unique id ends in `_{suffix}` or
    /// `_{suffix}_N`; returns how many matched
    pub fn set_entities_enabled_by_suffix(&self, suffix: &str, enabled: bool) -> usize {
        let Some(registry) = &self.registry else {
            return 0;
        };
        let pattern = match Regex::new(&format!(r"_{}(_\d+)?$", regex::escape(suffix))) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("Invalid suffix pattern {}: {}", suffix, e);
                return 0;
            },
        };
        let mut count = 0;
        for entry in registry.entries() {
            if pattern.is_match(&entry.unique_id) {
                registry.set_disabled(&entry.entity_id, !enabled);
                count += 1;
            }
        }
        debug!(
            "{} {} entit(ies) matching {}",
            if enabled { "Enabled" } else { "Disabled" },
            count,
            suffix
        );
        count
    }

    /// Subscribe to the bound trigger entities
    ///
    /// A trigger whose entity changed is re-subscribed; one whose entity was
    /// removed stops listening.
    pub fn set_up_tracking(
        self: &Arc<Self>,
        host: Weak<dyn AdaptiveHost>,
        options: &AdaptiveOptions,
    ) {
        let mut inner = self.inner.lock();
        for trigger in inner.triggers.iter_mut() {
            let wanted = options.trigger_entity(trigger.kind).map(str::to_string);
            if wanted == trigger.entity_id {
                continue;
            }
            trigger.unsubscribe();
            trigger.entity_id = wanted.clone();
            let Some(entity_id) = wanted else {
                debug!("{} unbound", trigger.kind.option_key());
                continue;
            };
            debug!("{} bound to {}", trigger.kind.option_key(), entity_id);
            trigger.subscription =
                Some(self.spawn_subscription(trigger.kind, entity_id, host.clone()));
        }
    }

    fn spawn_subscription(
        self: &Arc<Self>,
        kind: TriggerKind,
        entity_id: String,
        host: Weak<dyn AdaptiveHost>,
    ) -> tokio::task::JoinHandle<()> {
        // Subscribe before spawning so no change is missed
        let mut changes = self.states.subscribe();
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Trigger {} missed {} state change(s)", entity_id, skipped);
                        continue;
                    },
                    Err(RecvError::Closed) => break,
                };
                if change.entity_id != entity_id {
                    continue;
                }
                let (Some(manager), Some(host)) = (manager.upgrade(), host.upgrade()) else {
                    break;
                };
                manager.trigger_changed(kind, host.as_ref(), &change);
            }
        })
    }

    /// Record a trigger transition while its mode switch is on
    pub fn trigger_changed(
        &self,
        kind: TriggerKind,
        host: &dyn AdaptiveHost,
        change: &StateChange,
    ) {
        if !self.switch_on(host, kind.mode_key()) {
            return;
        }
        let now = self.clock.now();
        if let Some(trigger) = self.inner.lock().trigger_mut(kind) {
            trigger.record_change(change, now);
        }
    }

    /// Restore trigger timeouts from the stack after a restart
    pub fn initialize_after_restart(&self) {
        let mut inner = self.inner.lock();
        let events = self.events.lock();
        for trigger in inner.triggers.iter_mut() {
            let Some(entity_id) = &trigger.entity_id else {
                continue;
            };
            if self.states.state(entity_id).is_none() {
                continue;
            }
            if let Some(entry) = events.lookup(trigger.kind.operation(), None) {
                trigger.timeout = entry.end_time;
                debug!(
                    "{} timeout restored to {:?}",
                    trigger.kind.option_key(),
                    trigger.timeout
                );
            }
        }
    }

    pub fn trigger_timeout(&self, kind: TriggerKind) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .triggers
            .iter()
            .find(|t| t.kind == kind)
            .and_then(|t| t.timeout)
    }

    pub fn stop(&self) {
        for trigger in self.inner.lock().triggers.iter_mut() {
            trigger.unsubscribe();
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Full pass: triggers, then calendar, then expired overrides
    pub async fn update_adaptive_state(&self, host: &dyn AdaptiveHost) {
        self.update_adaptive_triggers(host).await;
        self.update_calendar_events(host).await;

        loop {
            let expired = self.events.lock().expired(self.clock.now());
            let Some(entry) = expired else {
                break;
            };
            if self.in_cooldown() {
                return;
            }
            let target = self.events.lock().remove(&entry);
            debug!("Expired {:?} -> {:?}", entry, target);
            if target.is_some() {
                let current = host.current_operation();
                self.set_adaptive_target_operation(host, target, current).await;
            }
        }
    }

    /// Apply pending trigger transitions, earliest first
    pub async fn update_adaptive_triggers(&self, host: &dyn AdaptiveHost) {
        let now = self.clock.now();
        let mut order: Vec<(DateTime<Utc>, TriggerKind)> = {
            let mut inner = self.inner.lock();
            inner
                .triggers
                .iter_mut()
                .filter(|t| t.entity_id.is_some())
                .map(|t| (t.sort_key(now), t.kind))
                .collect()
        };
        order.sort_by_key(|(key, _)| *key);

        for (_, kind) in order {
            self.update_adaptive_trigger_state(kind, host).await;
        }
    }

    async fn update_adaptive_trigger_state(&self, kind: TriggerKind, host: &dyn AdaptiveHost) {
        if !self.switch_on(host, kind.mode_key()) {
            return;
        }
        let timeout = self.next_trigger_timeout(host, kind);
        let operation = kind.operation();

        let action = {
            let mut inner = self.inner.lock();
            let cooling_down = self.clock.now() < inner.operation_change_timeout;
            let Some(trigger) = inner.trigger_mut(kind) else {
                return;
            };

            if trigger.detected.is_some() {
                trigger.timeout = Some(timeout);
                let exists = self.events.lock().exists(operation, None);
                if exists {
                    self.events.lock().update(operation, None, Some(timeout));
                    trigger.detected = None;
                    TriggerAction::None
                } else if cooling_down {
                    // Retried on the next pass
                    return;
                } else {
                    trigger.detected = None;
                    TriggerAction::Push {
                        current: host.current_operation(),
                        target: self.selected_operation(host, kind),
                        timeout,
                    }
                }
            } else if trigger.undetected.is_some() {
                trigger.timeout = Some(timeout);
                self.events.lock().update(operation, None, Some(timeout));
                trigger.undetected = None;
                TriggerAction::None
            } else {
                let still_on = trigger
                    .entity_id
                    .as_deref()
                    .and_then(|id| self.states.state(id))
                    .is_some_and(|state| state == EntityState::On);
                if still_on {
                    trigger.timeout = Some(timeout);
                    self.events.lock().update(operation, None, Some(timeout));
                } else {
                    trigger.timeout = None;
                }
                TriggerAction::None
            }
        };

        if let TriggerAction::Push {
            current,
            target,
            timeout,
        } = action
        {
            let is_top = self
                .events
                .lock()
                .push(operation, current, target, None, Some(timeout));
            debug!("Push {}: {}", operation, self.events.lock());
            if is_top {
                self.set_adaptive_target_operation(host, target, current).await;
            }
        }
    }

    /// Diff active calendar events against the previous pass
    pub async fn update_calendar_events(&self, host: &dyn AdaptiveHost) {
        let Some(calendar) = self.calendar.read().clone() else {
            debug!("No calendar bound");
            return;
        };
        let events = match calendar.active_events(self.clock.now()).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to read calendar events: {}", e);
                return;
            },
        };
        let previous = self.inner.lock().active_calendar_events.clone();

        for event in previous.iter().filter(|e| !events.contains(e)) {
            if calendar.event_exists(event).await {
                debug!("Ending calendar event: {}", event.summary);
                self.update_adaptive_calendar_state(host, CalendarAction::End, event).await;
            } else {
                debug!("Deleted calendar event: {}", event.summary);
                self.update_adaptive_calendar_state(host, CalendarAction::Deleted, event).await;
            }
        }
        for event in events.iter().filter(|e| !previous.contains(e)) {
            debug!("Starting calendar event: {}", event.summary);
            self.update_adaptive_calendar_state(host, CalendarAction::Start, event).await;
        }

        self.inner.lock().active_calendar_events = events;
    }

    async fn update_adaptive_calendar_state(
        &self,
        host: &dyn AdaptiveHost,
        action: CalendarAction,
        event: &CalendarEvent,
    ) {
        let Some(operation) = event.operation() else {
            debug!("No operation in calendar event '{}'", event.summary);
            return;
        };
        let current = host.current_operation();

        if SWITCH_BACKED.contains(&operation) {
            let state = match action {
                CalendarAction::Start => Some(true),
                CalendarAction::End => Some(false),
                CalendarAction::Deleted => None,
            };
            let key = format!("{}_mode", operation.as_str());
            if let Err(e) = host.set_switch_state(&key, state).await {
                debug!("Calendar could not set {}: {}", key, e);
            }
            return;
        }

        if self.in_cooldown() {
            return;
        }

        let event_id = event.uid.as_deref();
        let target = match action {
            CalendarAction::Start => {
                let end_time = calculate_event_end_time(event);
                let is_top = self.events.lock().push(
                    operation,
                    current,
                    Some(operation),
                    event_id,
                    Some(end_time),
                );
                is_top.then_some(operation)
            },
            // Expiry takes care of ended events
            CalendarAction::End => None,
            CalendarAction::Deleted => self.events.lock().pop(operation, event_id),
        };
        debug!("Calendar {:?} {}: {}", action, operation, self.events.lock());
        self.set_adaptive_target_operation(host, target, current).await;
    }

    async fn set_adaptive_target_operation(
        &self,
        host: &dyn AdaptiveHost,
        target: Option<Operation>,
        current: Option<Operation>,
    ) {
        let Some(target) = target else {
            return;
        };
        if Some(target) == current {
            return;
        }
        self.inner.lock().operation_change_timeout = self.clock.now() + self.settings.cooldown();
        info!("Target operation = {}", target);
        if let Err(e) = host.set_operation_selection(target).await {
            warn!("Failed to set target operation {}: {}", target, e);
        }
    }

    fn in_cooldown(&self) -> bool {
        self.clock.now() < self.inner.lock().operation_change_timeout
    }

    fn switch_on(&self, host: &dyn AdaptiveHost, key: &str) -> bool {
        host.entity_state(key).as_ref().is_some_and(truthy)
    }

    fn selected_operation(&self, host: &dyn AdaptiveHost, kind: TriggerKind) -> Option<Operation> {
        host.entity_state(kind.selection_key())
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    fn next_trigger_timeout(&self, host: &dyn AdaptiveHost, kind: TriggerKind) -> DateTime<Utc> {
        let minutes = if self.settings.debug {
            DEBUG_TRIGGER_TIMEOUT_MINUTES
        } else {
            host.entity_state(kind.timeout_key())
                .as_ref()
                .and_then(value_as_i64)
                .unwrap_or(DEFAULT_TRIGGER_TIMEOUT_MINUTES)
        };
        self.clock.now() + Duration::minutes(minutes)
    }
}

impl Drop for AdaptiveManager {
    fn drop(&mut self) {
        self.stop();
    }
}

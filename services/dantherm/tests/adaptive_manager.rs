//! Adaptive manager scenarios
//!
//! Drives the manager with a manual clock and a recording host:
//! - trigger detection, hold, release and expiry
//! - the change cooldown
//! - calendar start, end and deletion
//! - trigger setup against the registry and restart recovery

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::{Arc, Weak};

use chrono::Duration;
use dantherm::adaptive::{
    AdaptiveHost, AdaptiveManager, AdaptiveSettings, CalendarEvent, LocalCalendar, TriggerKind,
};
use dantherm::collaborators::{
    EntityState, InMemoryEntityRegistry, InMemoryEntityStates, ManualClock, StateChange,
};
use dantherm::config::AdaptiveOptions;
use dantherm::device::map::Operation;
use serde_json::{json, Value};

use common::{at, FakeHost, BOOST_SENSOR, ECO_SENSOR};

struct Fixture {
    manager: Arc<AdaptiveManager>,
    host: Arc<FakeHost>,
    clock: ManualClock,
    states: InMemoryEntityStates,
}

fn options() -> AdaptiveOptions {
    AdaptiveOptions {
        boost_mode_trigger: Some(BOOST_SENSOR.to_string()),
        eco_mode_trigger: Some(ECO_SENSOR.to_string()),
        home_mode_trigger: None,
    }
}

fn fixture(registry: Option<InMemoryEntityRegistry>) -> Fixture {
    let clock = ManualClock::new(at(0));
    let states = InMemoryEntityStates::new();
    let mut manager = AdaptiveManager::new(
        Arc::new(clock.clone()),
        Arc::new(states.clone()),
        AdaptiveSettings::default(),
    );
    if let Some(registry) = registry {
        manager = manager.with_registry(Arc::new(registry));
    }
    let manager = Arc::new(manager);
    let host = FakeHost::new();
    host.set("boost_mode", true);
    host.set("eco_mode", true);

    let weak: Weak<dyn AdaptiveHost> = Arc::downgrade(&host) as Weak<dyn AdaptiveHost>;
    manager.set_up_tracking(weak, &options());
    Fixture {
        manager,
        host,
        clock,
        states,
    }
}

fn turned_on(entity_id: &str) -> StateChange {
    StateChange {
        entity_id: entity_id.to_string(),
        old_state: Some(EntityState::Off),
        new_state: Some(EntityState::On),
    }
}

fn turned_off(entity_id: &str) -> StateChange {
    StateChange {
        entity_id: entity_id.to_string(),
        old_state: Some(EntityState::On),
        new_state: Some(EntityState::Off),
    }
}

#[tokio::test]
async fn test_boost_detection_release_and_expiry() {
    let f = fixture(None);

    f.manager
        .trigger_changed(TriggerKind::Boost, f.host.as_ref(), &turned_on(BOOST_SENSOR));
    f.manager.update_adaptive_state(f.host.as_ref()).await;

    assert_eq!(f.host.selections(), vec![Operation::Level3]);
    assert_eq!(f.manager.adaptive_state(), "boost");
    let events = f.manager.events();
    let top = events.top().unwrap();
    assert_eq!(top.previous, Some(Operation::Automatic));
    assert_eq!(top.end_time, Some(at(5)));

    // Release one minute later restarts the timeout
    f.clock.set(at(1));
    f.manager
        .trigger_changed(TriggerKind::Boost, f.host.as_ref(), &turned_off(BOOST_SENSOR));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.manager.trigger_timeout(TriggerKind::Boost), Some(at(6)));
    assert_eq!(f.manager.events().top().unwrap().end_time, Some(at(6)));
    assert_eq!(f.host.selections().len(), 1);

    f.clock.set(at(7));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(
        f.host.selections(),
        vec![Operation::Level3, Operation::Automatic]
    );
    assert_eq!(f.manager.adaptive_state(), "none");
    assert_eq!(f.manager.trigger_timeout(TriggerKind::Boost), None);
}

#[tokio::test]
async fn test_configured_timeout_and_selection() {
    let f = fixture(None);
    f.host.set("boost_mode_timeout", 12);
    f.host.set("boost_operation_selection", "level_4");

    f.manager
        .trigger_changed(TriggerKind::Boost, f.host.as_ref(), &turned_on(BOOST_SENSOR));
    f.manager.update_adaptive_state(f.host.as_ref()).await;

    assert_eq!(f.host.selections(), vec![Operation::Level4]);
    assert_eq!(f.manager.events().top().unwrap().end_time, Some(at(12)));
}

#[tokio::test]
async fn test_mode_switch_off_ignores_trigger() {
    let f = fixture(None);
    f.host.set("boost_mode", false);

    f.manager
        .trigger_changed(TriggerKind::Boost, f.host.as_ref(), &turned_on(BOOST_SENSOR));
    f.host.set("boost_mode", true);
    f.manager.update_adaptive_state(f.host.as_ref()).await;

    assert!(f.manager.events().is_empty());
    assert!(f.host.selections().is_empty());
}

#[tokio::test]
async fn test_cooldown_defers_lower_priority_push() {
    let f = fixture(None);

    f.manager
        .trigger_changed(TriggerKind::Boost, f.host.as_ref(), &turned_on(BOOST_SENSOR));
    f.manager.update_adaptive_state(f.host.as_ref()).await;

    f.clock.set(at(1));
    f.manager
        .trigger_changed(TriggerKind::Eco, f.host.as_ref(), &turned_on(ECO_SENSOR));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.manager.events().len(), 1);

    // Cooldown over: eco goes below boost and takes over its fallback
    f.clock.set(at(3));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    let events = f.manager.events();
    assert_eq!(events.len(), 2);
    let entries: Vec<_> = events.iter().cloned().collect();
    assert_eq!(entries[0].event, Operation::Boost);
    assert_eq!(entries[0].previous, Some(Operation::Level1));
    assert_eq!(entries[1].event, Operation::Eco);
    assert_eq!(entries[1].previous, Some(Operation::Automatic));
    assert_eq!(f.host.selections(), vec![Operation::Level3]);

    // Boost expires first and hands over to eco's selection
    f.clock.set(at(6));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.manager.adaptive_state(), "eco");
    assert_eq!(
        f.host.selections(),
        vec![Operation::Level3, Operation::Level1]
    );
}

#[tokio::test]
async fn test_triggers_processed_in_detection_order() {
    let f = fixture(None);

    f.manager
        .trigger_changed(TriggerKind::Eco, f.host.as_ref(), &turned_on(ECO_SENSOR));
    f.clock.set(at(0) + Duration::seconds(30));
    f.manager
        .trigger_changed(TriggerKind::Boost, f.host.as_ref(), &turned_on(BOOST_SENSOR));

    // Eco was detected first, so it is pushed first and boost hits the cooldown
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.host.selections(), vec![Operation::Level1]);
    assert_eq!(f.manager.adaptive_state(), "eco");
    assert_eq!(f.manager.events().len(), 1);

    // The deferred detection lands once the cooldown is over
    f.clock.set(at(3));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.manager.adaptive_state(), "boost");
    assert_eq!(
        f.host.selections(),
        vec![Operation::Level1, Operation::Level3]
    );
}

#[tokio::test]
async fn test_subscription_records_changes() {
    let f = fixture(None);

    f.states.set_state(BOOST_SENSOR, EntityState::Off);
    f.states.set_state(BOOST_SENSOR, EntityState::On);

    let mut pushed = false;
    for _ in 0..100 {
        tokio::task::yield_now().await;
        f.manager.update_adaptive_state(f.host.as_ref()).await;
        if !f.manager.events().is_empty() {
            pushed = true;
            break;
        }
    }
    assert!(pushed, "boost was never pushed");
    assert_eq!(f.manager.adaptive_state(), "boost");

    // Sensor still on after the timeout: the override is held
    f.clock.set(at(6));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.manager.adaptive_state(), "boost");
    assert_eq!(f.manager.events().top().unwrap().end_time, Some(at(11)));
    f.manager.stop();
}

#[tokio::test]
async fn test_calendar_event_start_and_delete() {
    let f = fixture(None);
    let calendar = Arc::new(LocalCalendar::new());
    let uid = calendar.create_event(CalendarEvent::new("Level 2", at(-60), at(120)));
    f.manager.set_calendar(Some(calendar.clone()));

    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.host.selections(), vec![Operation::Level2]);
    let events = f.manager.events();
    let top = events.top().unwrap();
    assert_eq!(top.event_id.as_deref(), Some(uid.as_str()));
    assert_eq!(top.end_time, Some(at(120)));

    f.clock.set(at(5));
    assert!(calendar.delete_event(&uid));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert!(f.manager.events().is_empty());
    assert_eq!(
        f.host.selections(),
        vec![Operation::Level2, Operation::Automatic]
    );
}

#[tokio::test]
async fn test_calendar_event_end_expires_entry() {
    let f = fixture(None);
    let calendar = Arc::new(LocalCalendar::new());
    calendar.create_event(CalendarEvent::new("away", at(0), at(30)));
    f.manager.set_calendar(Some(calendar.clone()));

    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.manager.adaptive_state(), "away");

    f.clock.set(at(31));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.manager.adaptive_state(), "none");
    assert_eq!(
        f.host.selections(),
        vec![Operation::Away, Operation::Automatic]
    );
}

#[tokio::test]
async fn test_calendar_switch_backed_operation() {
    let f = fixture(None);
    let calendar = Arc::new(LocalCalendar::new());
    calendar.create_event(CalendarEvent::new("Night", at(0), at(10)));
    let fireplace = calendar.create_event(CalendarEvent::new("fireplace", at(0), at(60)));
    f.manager.set_calendar(Some(calendar.clone()));

    f.manager.update_adaptive_state(f.host.as_ref()).await;
    f.clock.set(at(11));
    calendar.delete_event(&fireplace);
    f.manager.update_adaptive_state(f.host.as_ref()).await;

    let switches = f.host.switches();
    assert!(switches.contains(&("night_mode".to_string(), Some(true))));
    assert!(switches.contains(&("fireplace_mode".to_string(), Some(true))));
    assert!(switches.contains(&("night_mode".to_string(), Some(false))));
    assert!(switches.contains(&("fireplace_mode".to_string(), None)));
    assert!(f.manager.events().is_empty());
    assert!(f.host.selections().is_empty());
}

#[tokio::test]
async fn test_cleanup_stale_events() {
    let f = fixture(None);
    let calendar = Arc::new(LocalCalendar::new());
    calendar.create_event(CalendarEvent::new("away", at(600), at(700)).with_uid("kept"));
    f.manager.set_calendar(Some(calendar));

    f.manager.restore_events(&json!({
        "events": [
            {"event": "away", "event_id": "kept", "previous": "level_1", "end_time": null},
            {"event": "level_1", "event_id": "gone", "previous": "boost", "end_time": null},
            {"event": "boost", "previous": "automatic", "end_time": null},
        ]
    }));
    assert_eq!(f.manager.cleanup_stale_events().await, 1);

    let records = f.manager.adaptive_state_attrs()["events"].clone();
    let names: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["event"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["away", "boost"]);
    assert_eq!(records[0]["previous"], Value::from("boost"));

    assert_eq!(f.manager.clear_all_events(), 2);
    assert_eq!(f.manager.adaptive_state(), "none");
}

#[tokio::test]
async fn test_trigger_setup_toggles_registry() {
    let registry = InMemoryEntityRegistry::new();
    for key in [
        "boost_mode",
        "boost_mode_timeout",
        "boost_operation_selection",
        "home_mode",
        "home_mode_timeout",
        "adaptive_state",
    ] {
        registry.register(&format!("x.dantherm_{}", key), &format!("dantherm_{}", key), true);
    }
    registry.register("switch.dantherm_home_mode_2", "dantherm_home_mode_2", false);
    let f = fixture(Some(registry.clone()));

    f.manager.set_up_adaptive_triggers(&options());

    assert_eq!(registry.is_disabled("x.dantherm_boost_mode"), Some(false));
    assert_eq!(registry.is_disabled("x.dantherm_boost_mode_timeout"), Some(false));
    assert_eq!(registry.is_disabled("x.dantherm_adaptive_state"), Some(false));
    assert_eq!(registry.is_disabled("x.dantherm_home_mode"), Some(true));
    assert_eq!(registry.is_disabled("switch.dantherm_home_mode_2"), Some(true));
    f.manager.stop();
}

#[tokio::test]
async fn test_restart_restores_trigger_timeout() {
    let f = fixture(None);
    f.states.set_state(BOOST_SENSOR, EntityState::Off);
    f.host.set_current(Operation::Level3);
    f.manager.restore_events(&json!({
        "events": [
            {"event": "boost", "previous": "automatic", "end_time": (at(4)).to_rfc3339()},
        ]
    }));

    f.manager.initialize_after_restart();
    assert_eq!(f.manager.trigger_timeout(TriggerKind::Boost), Some(at(4)));
    assert_eq!(f.manager.trigger_timeout(TriggerKind::Eco), None);

    f.clock.advance(Duration::minutes(5));
    f.manager.update_adaptive_state(f.host.as_ref()).await;
    assert_eq!(f.host.selections(), vec![Operation::Automatic]);
}

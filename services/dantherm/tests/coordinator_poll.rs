//! Coordinator against a mocked HCV400 unit
//!
//! Covers setup and polling, writes through both queues, and an adaptive
//! override that reaches the unit and survives a restart.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::time::Duration;

use dantherm::adaptive::TriggerKind;
use dantherm::collaborators::{EntityState, StateChange};
use dantherm::config::AdaptiveOptions;
use dantherm::device::map::{registers, ActiveUnitMode};
use dantherm::store::{JsonFileStore, MemoryStore};
use errors::DanthermError;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use common::{at, coordinator, hcv400_unit, set_u32, writes_to, BOOST_SENSOR};

fn boost_options() -> AdaptiveOptions {
    AdaptiveOptions {
        boost_mode_trigger: Some(BOOST_SENSOR.to_string()),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_setup_and_poll() {
    let mock = hcv400_unit();
    let (coordinator, _clock, _states) =
        coordinator(&mock, Box::new(MemoryStore::new()), AdaptiveOptions::default());
    assert_ok!(coordinator.setup().await);

    let identity = coordinator.device().identity();
    assert_eq!(identity.firmware_version(), "(2.70)");
    assert_eq!(identity.serial_number, 12345);

    // Bypass and week program fitted, no humidity sensor or preheater
    assert!(coordinator.is_installed("bypass_damper"));
    assert!(coordinator.is_installed("bypass_maximum_temperature"));
    assert!(coordinator.is_installed("week_program_selection"));
    assert!(!coordinator.is_installed("humidity"));
    assert!(!coordinator.is_installed("internal_preheater_dutycycle"));

    assert_ok!(coordinator.async_update().await);
    assert!(coordinator.available());

    let selection = coordinator.entity_data("operation_selection").unwrap();
    assert_eq!(selection.state, Some(json!("automatic")));

    let fan = coordinator.entity_data("fan_level").unwrap();
    assert_eq!(fan.state, Some(json!(2)));
    assert_eq!(fan.icon.as_deref(), Some("mdi:fan-auto"));

    let alarm = coordinator.entity_data("alarm").unwrap();
    assert_eq!(alarm.state, Some(json!(0)));
    assert_eq!(alarm.icon.as_deref(), Some("mdi:alert-circle-check"));

    let away = coordinator.entity_data("away_mode").unwrap();
    assert_eq!(away.state, Some(Value::Bool(false)));
    assert_eq!(away.icon.as_deref(), Some("mdi:bag-suitcase-off"));

    assert_eq!(
        coordinator.entity_data("outdoor_temperature").unwrap().state,
        Some(json!(7.5))
    );
    assert_eq!(
        coordinator.entity_data("disable_bypass").unwrap().state,
        Some(Value::Bool(false))
    );
    assert_eq!(
        coordinator.entity_data("boost_mode_timeout").unwrap().state,
        Some(json!(5))
    );
    assert_eq!(
        coordinator.entity_data("filter_remain_level").unwrap().state,
        Some(json!(2))
    );

    let adaptive = coordinator.entity_data("adaptive_state").unwrap();
    assert_eq!(adaptive.state, Some(json!("none")));
    assert_eq!(adaptive.attrs, Some(json!({ "events": [] })));

    // The level attribute follows the level computed on the previous pass
    assert_ok!(coordinator.async_update().await);
    assert_eq!(
        coordinator.entity_data("filter_remain").unwrap().attrs,
        Some(json!({ "level": 2 }))
    );
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_current_mode_drives_selection() {
    let mock = hcv400_unit();
    let (coordinator, _clock, _states) =
        coordinator(&mock, Box::new(MemoryStore::new()), AdaptiveOptions::default());
    coordinator.setup().await.unwrap();

    // Away overrides the active mode flags
    set_u32(&mock, registers::CURRENT_MODE, 5);
    set_u32(
        &mock,
        registers::ACTIVE_MODE,
        ActiveUnitMode::AUTOMATIC | ActiveUnitMode::START_AWAY,
    );
    coordinator.async_update().await.unwrap();
    assert_eq!(
        coordinator.entity_data("operation_selection").unwrap().state,
        Some(json!("away"))
    );
    assert_eq!(
        coordinator.entity_data("away_mode").unwrap().state,
        Some(Value::Bool(true))
    );
    assert_eq!(
        coordinator.entity_data("fan_level").unwrap().icon.as_deref(),
        Some("mdi:bag-suitcase")
    );
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_entity_writes_reach_the_unit() {
    let mock = hcv400_unit();
    let (coordinator, _clock, _states) =
        coordinator(&mock, Box::new(MemoryStore::new()), AdaptiveOptions::default());
    coordinator.setup().await.unwrap();
    coordinator.async_update().await.unwrap();
    let cancel = CancellationToken::new();
    coordinator.start_workers(&cancel);
    mock.clear_writes();

    let handle = coordinator
        .set_entity_state("away_mode", Value::Bool(true))
        .await
        .unwrap();
    assert_ok!(handle.wait().await);
    assert_eq!(
        writes_to(&mock, registers::ACTIVE_MODE),
        vec![ActiveUnitMode::START_AWAY]
    );
    let away = coordinator.entity_data("away_mode").unwrap();
    assert_eq!(away.state, Some(Value::Bool(true)));
    assert_eq!(away.icon.as_deref(), Some("mdi:bag-suitcase"));

    // Manual mode, then the fan level
    mock.clear_writes();
    let handle = coordinator
        .set_entity_state("operation_selection", json!("manual"))
        .await
        .unwrap();
    handle.wait().await.unwrap();
    let handle = coordinator
        .set_entity_state("fan_level_selection", json!(3))
        .await
        .unwrap();
    handle.wait().await.unwrap();

    let writes: Vec<u16> = mock.writes().into_iter().map(|(address, _)| address).collect();
    assert_eq!(writes, vec![registers::ACTIVE_MODE, registers::FAN_LEVEL]);
    assert_eq!(writes_to(&mock, registers::ACTIVE_MODE), vec![ActiveUnitMode::MANUAL]);
    assert_eq!(writes_to(&mock, registers::FAN_LEVEL), vec![3]);

    cancel.cancel();
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_does_not_stall_queue() {
    let mock = hcv400_unit();
    let (coordinator, _clock, _states) =
        coordinator(&mock, Box::new(MemoryStore::new()), AdaptiveOptions::default());
    coordinator.setup().await.unwrap();
    let cancel = CancellationToken::new();
    coordinator.start_workers(&cancel);
    mock.clear_writes();

    mock.reject_address(registers::WEEK_PROGRAM_SELECTION);
    let rejected = coordinator
        .set_entity_state("week_program_selection", json!("4"))
        .await
        .unwrap();
    // Setters only queue; the backend logs the rejected write
    assert_ok!(rejected.wait().await);
    assert!(writes_to(&mock, registers::WEEK_PROGRAM_SELECTION).is_empty());

    let next = coordinator
        .set_entity_state("fan_level_selection", json!(1))
        .await
        .unwrap();
    assert_ok!(next.wait().await);
    assert_eq!(writes_to(&mock, registers::FAN_LEVEL), vec![1]);

    let invalid = coordinator
        .set_entity_state("night_mode_start_time", json!("25:00"))
        .await;
    assert!(matches!(invalid, Err(DanthermError::InvalidTimeFormat(_))));

    cancel.cancel();
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_boost_override_reaches_unit_and_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dantherm_store.json");

    let mock = hcv400_unit();
    let (coordinator, _clock, states) =
        coordinator(&mock, Box::new(JsonFileStore::new(&path)), boost_options());
    coordinator.setup().await.unwrap();
    let cancel = CancellationToken::new();
    coordinator.start_workers(&cancel);

    coordinator
        .set_entity_state("boost_mode", Value::Bool(true))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    coordinator.async_update().await.unwrap();
    mock.clear_writes();

    states.set_state(BOOST_SENSOR, EntityState::On);
    coordinator.manager().trigger_changed(
        TriggerKind::Boost,
        coordinator.as_ref(),
        &StateChange {
            entity_id: BOOST_SENSOR.to_string(),
            old_state: Some(EntityState::Off),
            new_state: Some(EntityState::On),
        },
    );
    coordinator.async_update().await.unwrap();

    // Writes are queued from inside the poll and land afterwards
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(writes_to(&mock, registers::ACTIVE_MODE), vec![ActiveUnitMode::MANUAL]);
    assert_eq!(writes_to(&mock, registers::FAN_LEVEL), vec![3]);

    let adaptive = coordinator.entity_data("adaptive_state").unwrap();
    assert_eq!(adaptive.state, Some(json!("boost")));

    let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let events = &raw["entities"]["adaptive_state"]["events"];
    assert_eq!(events.as_array().map(Vec::len), Some(1));
    assert_eq!(raw["entities"]["boost_mode"], Value::Bool(true));

    cancel.cancel();
    coordinator.shutdown().await;
    drop(coordinator);

    let (restarted, _clock, _states) =
        common::coordinator(&hcv400_unit(), Box::new(JsonFileStore::new(&path)), boost_options());
    restarted.setup().await.unwrap();
    assert_eq!(restarted.manager().adaptive_state(), "boost");
    let events = restarted.manager().events();
    let top = events.top().unwrap();
    assert_eq!(top.end_time, Some(at(5)));
    assert_eq!(
        restarted.store().get_stored_entity_state("boost_mode", None),
        Some(Value::Bool(true))
    );
    restarted.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_removing_last_entity_closes_connection() {
    let mock = hcv400_unit();
    let (coordinator, _clock, _states) =
        coordinator(&mock, Box::new(MemoryStore::new()), AdaptiveOptions::default());
    coordinator.setup().await.unwrap();
    assert!(coordinator.device().available());

    for key in coordinator.installed_keys() {
        coordinator.remove_entity(key).await;
    }
    assert!(coordinator.installed_keys().is_empty());
    assert!(!coordinator.device().available());
}

//! Full service over a real socket against the in-process simulator

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use dantherm::bootstrap::build_service;
use dantherm::device::map::{registers, ActiveUnitMode};
use dantherm::DanthermConfig;
use dantherm_comlink::ModbusSimulator;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn set_u32(sim: &ModbusSimulator, address: u16, value: u32) {
    sim.set_registers(address, &[(value & 0xFFFF) as u16, (value >> 16) as u16])
        .await;
}

async fn hcv400_simulator() -> ModbusSimulator {
    let sim = ModbusSimulator::new();
    set_u32(&sim, registers::SYSTEM_ID_COMPONENTS, 0x0006).await;
    set_u32(&sim, registers::SYSTEM_ID, 9 << 24).await;
    set_u32(&sim, registers::FIRMWARE_VERSION, (2 << 8) | 70).await;
    set_u32(&sim, registers::CURRENT_MODE, 1).await;
    set_u32(&sim, registers::ACTIVE_MODE, ActiveUnitMode::MANUAL).await;
    set_u32(&sim, registers::FAN_LEVEL, 3).await;
    set_u32(&sim, registers::FILTER_LIFETIME, 180).await;
    set_u32(&sim, registers::FILTER_REMAIN, 170).await;
    sim
}

#[tokio::test]
async fn test_poll_and_write_over_tcp() {
    let sim = hcv400_simulator().await;
    let addr = sim.start(0).await.unwrap();
    let dir = TempDir::new().unwrap();

    let config = DanthermConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        store_path: dir.path().join("store.json"),
        write_delay_ms: 20,
        ..Default::default()
    };
    config.validate().unwrap();
    let service = build_service(&config).unwrap();
    let coordinator = service.coordinator;

    coordinator.setup().await.unwrap();
    coordinator.async_update().await.unwrap();
    assert!(coordinator.available());
    assert_eq!(
        coordinator.entity_data("operation_selection").unwrap().state,
        Some(json!("manual"))
    );
    assert_eq!(
        coordinator.entity_data("fan_level").unwrap().state,
        Some(json!(3))
    );
    assert_eq!(
        coordinator.entity_data("filter_remain_level").unwrap().state,
        Some(json!(0))
    );

    let cancel = CancellationToken::new();
    coordinator.start_workers(&cancel);
    coordinator
        .set_entity_state("week_program_selection", json!("2"))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(
        sim.get_registers(registers::WEEK_PROGRAM_SELECTION, 2).await,
        vec![2, 0]
    );

    coordinator
        .set_entity_state("sensor_filtering", Value::Bool(true))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let raw: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("store.json")).unwrap()).unwrap();
    assert_eq!(raw["entities"]["sensor_filtering"], Value::Bool(true));

    cancel.cancel();
    coordinator.shutdown().await;
    assert!(!coordinator.device().available());
}

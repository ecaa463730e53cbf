//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dantherm::adaptive::{AdaptiveHost, AdaptiveManager, AdaptiveSettings};
use dantherm::collaborators::{InMemoryEntityStates, ManualClock};
use dantherm::config::AdaptiveOptions;
use dantherm::coordinator::backend::BackendQueue;
use dantherm::coordinator::{CoordinatorSettings, DanthermCoordinator};
use dantherm::device::map::{registers, Operation, ENTITIES};
use dantherm::modbus::DanthermModbus;
use dantherm::store::{EntityStore, KeyValueStore};
use dantherm::DanthermDevice;
use dantherm_comlink::{MockRegisterTransport, RegisterOrder};
use errors::DanthermResult;
use parking_lot::Mutex;
use serde_json::Value;

pub const BOOST_SENSOR: &str = "binary_sensor.bathroom_humidity";
pub const ECO_SENSOR: &str = "binary_sensor.nobody_home";
pub const HOME_SENSOR: &str = "binary_sensor.front_door";

/// Fixed reference instant plus `minutes`
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// Write a UInt32 in the unit's CDAB layout
pub fn set_u32(mock: &MockRegisterTransport, address: u16, value: u32) {
    mock.set_registers(address, &[(value & 0xFFFF) as u16, (value >> 16) as u16]);
}

pub fn set_f32(mock: &MockRegisterTransport, address: u16, value: f32) {
    let bits = value.to_bits();
    mock.set_registers(address, &[(bits & 0xFFFF) as u16, (bits >> 16) as u16]);
}

/// Decode a two word CDAB write back to its value
pub fn written_u32(words: &[u16]) -> u32 {
    u32::from(words[0]) | (u32::from(words[1]) << 16)
}

/// A HCV400 P2 unit in automatic mode, firmware 2.70, with bypass and
/// week program installed
pub fn hcv400_unit() -> MockRegisterTransport {
    let mock = MockRegisterTransport::new();
    set_u32(&mock, registers::SYSTEM_ID_COMPONENTS, 0x0006);
    set_u32(&mock, registers::SYSTEM_ID, 9 << 24);
    set_u32(&mock, registers::FIRMWARE_VERSION, (2 << 8) | 70);
    mock.set_registers(registers::SERIAL_NUMBER, &[0x3039, 0, 0, 0]);
    set_u32(&mock, registers::CURRENT_MODE, 2);
    set_u32(&mock, registers::ACTIVE_MODE, 0x0002);
    set_u32(&mock, registers::FAN_LEVEL, 2);
    set_u32(&mock, registers::HUMIDITY, 45);
    set_u32(&mock, registers::AIR_QUALITY, 600);
    set_u32(&mock, registers::FILTER_LIFETIME, 180);
    set_u32(&mock, registers::FILTER_REMAIN, 60);
    set_f32(&mock, registers::OUTDOOR_TEMP, 7.5);
    set_f32(&mock, registers::ROOM_TEMP, 21.5);
    set_f32(&mock, registers::BYPASS_MAX_TEMP, 24.0);
    mock
}

/// Coordinator over a mock unit with a manual clock at `at(0)`
pub fn coordinator(
    mock: &MockRegisterTransport,
    store: Box<dyn KeyValueStore>,
    options: AdaptiveOptions,
) -> (Arc<DanthermCoordinator>, ManualClock, InMemoryEntityStates) {
    let clock = ManualClock::new(at(0));
    let states = InMemoryEntityStates::new();
    let modbus = DanthermModbus::new(
        Box::new(mock.clone()),
        BackendQueue::new(),
        RegisterOrder::CDAB,
    );
    let manager = AdaptiveManager::new(
        Arc::new(clock.clone()),
        Arc::new(states.clone()),
        AdaptiveSettings::default(),
    );
    let coordinator = DanthermCoordinator::new(
        DanthermDevice::new("Dantherm", modbus),
        EntityStore::new(store),
        manager,
        CoordinatorSettings {
            scan_interval: StdDuration::from_secs(10),
            write_delay: StdDuration::from_millis(300),
            options,
        },
    );
    (coordinator, clock, states)
}

/// Writes to one register, decoded
pub fn writes_to(mock: &MockRegisterTransport, address: u16) -> Vec<u32> {
    mock.writes()
        .into_iter()
        .filter(|(a, _)| *a == address)
        .map(|(_, words)| written_u32(&words))
        .collect()
}

/// Host double recording what the adaptive manager asks for
pub struct FakeHost {
    current: Mutex<Option<Operation>>,
    states: Mutex<HashMap<String, Value>>,
    selections: Mutex<Vec<Operation>>,
    switches: Mutex<Vec<(String, Option<bool>)>>,
}

impl FakeHost {
    /// Unit in automatic mode with every entity at its default
    pub fn new() -> Arc<Self> {
        let states = ENTITIES
            .iter()
            .filter_map(|desc| desc.default_value().map(|v| (desc.key.to_string(), v)))
            .collect();
        Arc::new(Self {
            current: Mutex::new(Some(Operation::Automatic)),
            states: Mutex::new(states),
            selections: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.states.lock().insert(key.to_string(), value.into());
    }

    pub fn set_current(&self, operation: Operation) {
        *self.current.lock() = Some(operation);
    }

    pub fn selections(&self) -> Vec<Operation> {
        self.selections.lock().clone()
    }

    pub fn switches(&self) -> Vec<(String, Option<bool>)> {
        self.switches.lock().clone()
    }
}

#[async_trait]
impl AdaptiveHost for FakeHost {
    fn current_operation(&self) -> Option<Operation> {
        *self.current.lock()
    }

    fn entity_state(&self, key: &str) -> Option<Value> {
        self.states.lock().get(key).cloned()
    }

    async fn set_operation_selection(&self, operation: Operation) -> DanthermResult<()> {
        self.selections.lock().push(operation);
        *self.current.lock() = Some(operation);
        Ok(())
    }

    async fn set_switch_state(&self, key: &str, state: Option<bool>) -> DanthermResult<()> {
        self.switches.lock().push((key.to_string(), state));
        let value = state.map(Value::Bool).unwrap_or(Value::Null);
        self.states.lock().insert(key.to_string(), value);
        Ok(())
    }
}

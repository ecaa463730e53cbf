//! Dantherm unit model
//!
//! Caches the mode registers read at the start of every poll, derives the
//! user-facing operation from them and maps entity getters and setters to
//! register traffic.

pub mod filter;
pub mod map;

use std::collections::HashMap;

use dantherm_comlink::RegisterValue;
use errors::{DanthermError, DanthermResult};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::modbus::DanthermModbus;
use filter::{FilteredSensor, SensorFilter};
use map::{
    device_type_name, registers, ABSwitchPosition, ActiveUnitMode, BypassDamperState,
    ComponentClass, CurrentUnitMode, Getter, Operation, Setter,
};

/// Firmware needed for the bypass temperature and duration registers
const BYPASS_SETTINGS_FIRMWARE: u32 = 270;
const DEFAULT_BYPASS_MAXIMUM_TEMPERATURE: f64 = 24.0;

/// Convert a decoded register value to JSON
pub fn json_value(value: RegisterValue) -> Value {
    match value {
        RegisterValue::Int(v) => Value::from(v),
        RegisterValue::UInt(v) => Value::from(v),
        RegisterValue::Float(v) => Value::from(v),
    }
}

/// Integer view of a JSON value; numeric strings are accepted
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_u32(value: &Value) -> DanthermResult<u32> {
    value_as_i64(value)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            DanthermError::Configuration(format!("expected an unsigned integer, got {}", value))
        })
}

fn value_as_bool(value: &Value) -> DanthermResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "on" => Ok(true),
        Value::String(s) if s == "off" => Ok(false),
        other => value_as_i64(other)
            .map(|v| v != 0)
            .ok_or_else(|| {
                DanthermError::Configuration(format!("expected a boolean, got {}", other))
            }),
    }
}

/// Parse "HH:MM" into hour and minute
pub fn parse_time_of_day(text: &str) -> DanthermResult<(u32, u32)> {
    let invalid = || DanthermError::InvalidTimeFormat(text.to_string());
    let (hours, minutes) = text.split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.trim().parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.trim().parse().map_err(|_| invalid())?;
    if hours >= 24 || minutes >= 60 {
        return Err(invalid());
    }
    Ok((hours, minutes))
}

/// Remaining filter life in thirds: 0 is fresh, 3 is due for replacement
pub fn filter_remain_level(lifetime: u32, remain: u32) -> u32 {
    if remain > lifetime || lifetime == 0 {
        return 0;
    }
    ((lifetime - remain) as f64 / (lifetime as f64 / 3.0)).floor() as u32
}

/// Static facts read once at connect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceIdentity {
    pub installed_components: u32,
    pub device_type: u32,
    pub firmware: u32,
    pub serial_number: u64,
    pub ab_switch_position: ABSwitchPosition,
}

impl DeviceIdentity {
    fn firmware_parts(&self) -> (u32, u32) {
        ((self.firmware >> 8) & 0xFF, self.firmware & 0xFF)
    }

    /// Firmware as rendered to users, e.g. "(2.70)"
    pub fn firmware_version(&self) -> String {
        let (major, minor) = self.firmware_parts();
        format!("({}.{:02})", major, minor)
    }

    /// Firmware in hundredths, e.g. 270
    pub fn firmware_hundredths(&self) -> u32 {
        let (major, minor) = self.firmware_parts();
        major * 100 + minor
    }

    pub fn device_type_label(&self) -> String {
        let name = device_type_name(self.device_type);
        match self.ab_switch_position {
            ABSwitchPosition::A => format!("{} (Mode A)", name),
            ABSwitchPosition::B => format!("{} (Mode B)", name),
            ABSwitchPosition::Unknown => name,
        }
    }

    pub fn has_component(&self, component: ComponentClass) -> bool {
        component.is_installed(self.installed_components)
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    current_unit_mode: Option<u32>,
    active_unit_mode: Option<u32>,
    fan_level: Option<u32>,
    alarm: Option<u32>,
    bypass_damper: Option<u32>,
    bypass_maximum_temperature: Option<f64>,
    filter_lifetime: Option<u32>,
    filter_remain: Option<u32>,
    filter_remain_level: Option<u32>,
    last_current_operation: Option<Operation>,
    sensor_filtering: bool,
}

/// One ventilation unit
pub struct DanthermDevice {
    name: String,
    modbus: DanthermModbus,
    identity: RwLock<DeviceIdentity>,
    state: Mutex<DeviceState>,
    filters: Mutex<HashMap<FilteredSensor, SensorFilter>>,
}

impl DanthermDevice {
    pub fn new(name: impl Into<String>, modbus: DanthermModbus) -> Self {
        let filters = FilteredSensor::ALL
            .into_iter()
            .map(|sensor| (sensor, SensorFilter::new(sensor.max_change())))
            .collect();
        Self {
            name: name.into(),
            modbus,
            identity: RwLock::new(DeviceIdentity::default()),
            state: Mutex::new(DeviceState::default()),
            filters: Mutex::new(filters),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modbus(&self) -> &DanthermModbus {
        &self.modbus
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity.read().clone()
    }

    pub fn available(&self) -> bool {
        self.modbus.available()
    }

    /// Connect, verify and read the identity registers
    pub async fn init_and_connect(&self) -> DanthermResult<()> {
        debug!("Setup of {} has started", self.name);
        let verified = self.modbus.connect_and_verify().await?;
        info!("Modbus setup completed for {}", self.modbus.endpoint());

        let installed_components = verified & 0xFFFF;
        debug!("Installed components (610) = {:#06x}", installed_components);

        let system_id = self.modbus.read_uint32(registers::SYSTEM_ID).await.unwrap_or(0);
        let firmware = self
            .modbus
            .read_uint32(registers::FIRMWARE_VERSION)
            .await
            .unwrap_or(0);
        let serial_number = self
            .modbus
            .read_uint64(registers::SERIAL_NUMBER)
            .await
            .unwrap_or(0);

        let identity = DeviceIdentity {
            installed_components,
            device_type: system_id >> 24,
            firmware,
            serial_number,
            // The A/B switch register is not documented for these units
            ab_switch_position: ABSwitchPosition::Unknown,
        };
        debug!("Device type = {}", identity.device_type_label());
        debug!("Firmware version = {}", identity.firmware_version());
        debug!("Serial number = {}", identity.serial_number);
        if identity.has_component(ComponentClass::HAC1) {
            debug!("HAC controller installed");
        } else {
            debug!("No HAC controller installed");
        }

        *self.identity.write() = identity;
        Ok(())
    }

    // ========================================================================
    // Mode registers, read at the start of every poll
    // ========================================================================

    pub async fn read_current_unit_mode(&self) -> Option<u32> {
        let value = self.modbus.read_uint32(registers::CURRENT_MODE).await;
        debug!("Current unit mode = {:?}", value);
        self.state.lock().current_unit_mode = value;
        value
    }

    pub async fn read_active_unit_mode(&self) -> Option<u32> {
        let value = self.modbus.read_uint32(registers::ACTIVE_MODE).await;
        debug!("Active unit mode = {:?}", value.map(|v| format!("{:#x}", v)));
        self.state.lock().active_unit_mode = value;
        value
    }

    pub async fn read_fan_level(&self) -> Option<u32> {
        let value = self.modbus.read_uint32(registers::FAN_LEVEL).await;
        debug!("Fan level = {:?}", value);
        self.state.lock().fan_level = value;
        value
    }

    pub async fn read_alarm(&self) -> Option<u32> {
        let value = self.modbus.read_uint32(registers::ALARM).await;
        debug!("Alarm = {:?}", value);
        self.state.lock().alarm = value;
        value
    }

    pub fn set_sensor_filtering(&self, enabled: bool) {
        self.state.lock().sensor_filtering = enabled;
    }

    pub fn current_unit_mode(&self) -> Option<u32> {
        self.state.lock().current_unit_mode
    }

    pub fn active_unit_mode(&self) -> Option<u32> {
        self.state.lock().active_unit_mode
    }

    pub fn fan_level(&self) -> Option<u32> {
        self.state.lock().fan_level
    }

    pub fn alarm(&self) -> Option<u32> {
        self.state.lock().alarm
    }

    // ========================================================================
    // Derived state
    // ========================================================================

    /// Operation as shown by the operation selector
    pub fn operation_selection(&self) -> Option<Operation> {
        let state = self.state.lock();
        let current = state.current_unit_mode?;
        let active = state.active_unit_mode?;

        match CurrentUnitMode::from_raw(current) {
            Some(CurrentUnitMode::Away) => return Some(Operation::Away),
            Some(CurrentUnitMode::Summer) => return Some(Operation::Summer),
            Some(CurrentUnitMode::Fireplace) => return Some(Operation::Fireplace),
            Some(CurrentUnitMode::Night) => return Some(Operation::Night),
            _ => {},
        }

        if active == 0 || state.fan_level == Some(0) {
            return Some(Operation::Standby);
        }
        if ActiveUnitMode::has(active, ActiveUnitMode::AUTOMATIC) {
            return Some(Operation::Automatic);
        }
        if ActiveUnitMode::has(active, ActiveUnitMode::MANUAL) {
            return Some(Operation::Manual);
        }
        if ActiveUnitMode::has(active, ActiveUnitMode::WEEK_PROGRAM) {
            return Some(Operation::WeekProgram);
        }
        debug!("Unknown mode of operation = {:#x}", active);
        Some(Operation::Manual)
    }

    /// Operation the adaptive engine compares against
    ///
    /// Manual mode resolves to standby or a fan level. An active mode with
    /// none of the known flags keeps the last derived operation.
    pub fn current_operation(&self) -> Option<Operation> {
        let mut state = self.state.lock();
        let active = state.active_unit_mode?;

        let operation = if ActiveUnitMode::has(active, ActiveUnitMode::AUTOMATIC) {
            Some(Operation::Automatic)
        } else if ActiveUnitMode::has(active, ActiveUnitMode::MANUAL) {
            match state.fan_level {
                Some(0) => Some(Operation::Standby),
                Some(1) => Some(Operation::Level1),
                Some(2) => Some(Operation::Level2),
                Some(3) => Some(Operation::Level3),
                Some(4) => Some(Operation::Level4),
                _ => None,
            }
        } else if ActiveUnitMode::has(active, ActiveUnitMode::WEEK_PROGRAM) {
            Some(Operation::WeekProgram)
        } else if ActiveUnitMode::has(active, ActiveUnitMode::START_AWAY) {
            Some(Operation::Away)
        } else {
            return state.last_current_operation;
        };

        state.last_current_operation = operation;
        operation
    }

    fn mode_flag(&self, mode: CurrentUnitMode, flag: u32) -> Option<bool> {
        let state = self.state.lock();
        let current = state.current_unit_mode?;
        let active = state.active_unit_mode?;
        Some(current == mode.raw() || ActiveUnitMode::has(active, flag))
    }

    pub fn away_mode(&self) -> Option<bool> {
        self.mode_flag(CurrentUnitMode::Away, ActiveUnitMode::START_AWAY)
    }

    pub fn fireplace_mode(&self) -> Option<bool> {
        self.mode_flag(CurrentUnitMode::Fireplace, ActiveUnitMode::START_FIREPLACE)
    }

    pub fn summer_mode(&self) -> Option<bool> {
        self.mode_flag(CurrentUnitMode::Summer, ActiveUnitMode::START_SUMMER)
    }

    /// Automatic bypass is enabled (maximum temperature not zero)
    pub fn bypass_available(&self) -> bool {
        self.state.lock().bypass_maximum_temperature != Some(0.0)
    }

    fn fan_icon(&self) -> &'static str {
        match self.fan_level() {
            None | Some(0) => "mdi:fan-off",
            Some(1) => "mdi:fan-speed-1",
            Some(2) => "mdi:fan-speed-2",
            Some(3) => "mdi:fan-speed-3",
            Some(_) => "mdi:fan-plus",
        }
    }

    fn fan_level_icon(&self) -> &'static str {
        if self.alarm().is_some_and(|alarm| alarm != 0) {
            return "mdi:fan-alert";
        }
        let current = self.current_unit_mode().and_then(CurrentUnitMode::from_raw);
        match current {
            Some(CurrentUnitMode::Standby) => return "mdi:fan-off",
            Some(CurrentUnitMode::Away) => return "mdi:bag-suitcase",
            Some(CurrentUnitMode::Summer) => return "mdi:weather-sunny",
            Some(CurrentUnitMode::Fireplace) => return "mdi:fire",
            Some(CurrentUnitMode::Night) => return "mdi:weather-night",
            Some(CurrentUnitMode::Automatic) => return "mdi:fan-auto",
            Some(CurrentUnitMode::WeekProgram) => return "mdi:fan-clock",
            _ => {},
        }
        match self.operation_selection() {
            Some(Operation::Standby) => "mdi:fan-off",
            Some(Operation::Automatic) => "mdi:fan-auto",
            Some(Operation::WeekProgram) => "mdi:fan-clock",
            _ => "mdi:fan",
        }
    }

    fn bypass_damper_icon(&self) -> &'static str {
        match self.state.lock().bypass_damper {
            Some(BypassDamperState::CLOSED) => "mdi:valve-closed",
            Some(BypassDamperState::OPENED) => "mdi:valve-open",
            _ => "mdi:valve",
        }
    }

    /// Entity-specific icon derived from device state
    pub fn icon_for(&self, key: &str) -> Option<String> {
        let icon = match key {
            "operation_mode" | "fan_level_selection" => self.fan_icon(),
            "fan_level" => self.fan_level_icon(),
            "bypass_damper" => self.bypass_damper_icon(),
            _ => return None,
        };
        Some(icon.to_string())
    }

    /// Entity-specific attributes derived from device state
    pub fn attrs_for(&self, key: &str) -> Option<Value> {
        match key {
            "filter_remain" => self
                .state
                .lock()
                .filter_remain_level
                .map(|level| json!({ "level": level })),
            _ => None,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    fn filtered(&self, sensor: FilteredSensor, value: Option<RegisterValue>) -> Option<Value> {
        let value = value?;
        if !self.state.lock().sensor_filtering {
            return Some(json_value(value));
        }
        let filtered = self
            .filters
            .lock()
            .get_mut(&sensor)
            .map(|filter| filter.filter(value.as_f64()))
            .unwrap_or_else(|| value.as_f64());
        Some(Value::from(filtered))
    }

    async fn read_temperature(&self, address: u16, sensor: FilteredSensor) -> Option<Value> {
        let value = self.modbus.read_float32(address, Some(1)).await;
        debug!("{:?} = {:?}", sensor, value);
        self.filtered(sensor, value)
    }

    async fn read_time_of_day(&self, hour_address: u16, minute_address: u16) -> Option<Value> {
        let hour = self.modbus.read_uint32(hour_address).await?;
        let minute = self.modbus.read_uint32(minute_address).await?;
        Some(Value::from(format!("{:02}:{:02}", hour, minute)))
    }

    async fn read_filter_lifetime(&self) -> Option<u32> {
        let value = self.modbus.read_uint32(registers::FILTER_LIFETIME).await;
        self.state.lock().filter_lifetime = value;
        value
    }

    async fn read_filter_remain(&self) -> Option<u32> {
        let value = self.modbus.read_uint32(registers::FILTER_REMAIN).await;
        self.state.lock().filter_remain = value;
        value
    }

    async fn read_bypass_maximum_temperature(&self) -> Option<RegisterValue> {
        let value = self
            .modbus
            .read_float32(registers::BYPASS_MAX_TEMP, Some(1))
            .await;
        self.state.lock().bypass_maximum_temperature = value.map(|v| v.as_f64());
        value
    }

    /// Filter level from the cached registers when their entities are polled
    async fn compute_filter_remain_level(
        &self,
        installed: &(dyn Fn(&str) -> bool + Sync),
    ) -> Option<u32> {
        let (cached_lifetime, cached_remain) = {
            let state = self.state.lock();
            (state.filter_lifetime, state.filter_remain)
        };
        let lifetime = if installed("filter_lifetime") {
            cached_lifetime
        } else {
            self.modbus.read_uint32(registers::FILTER_LIFETIME).await
        };
        let remain = if installed("filter_remain") {
            cached_remain
        } else {
            self.modbus.read_uint32(registers::FILTER_REMAIN).await
        };
        let level = filter_remain_level(lifetime?, remain?);
        debug!("Filter remain level = {}", level);
        self.state.lock().filter_remain_level = Some(level);
        Some(level)
    }

    /// Read the value behind a getter
    ///
    /// `installed` tells whether an entity key is polled this cycle; it
    /// decides between cached and fresh filter registers.
    pub async fn read_getter(
        &self,
        getter: Getter,
        installed: &(dyn Fn(&str) -> bool + Sync),
    ) -> Option<Value> {
        match getter {
            Getter::CurrentUnitMode => self.current_unit_mode().map(Value::from),
            Getter::ActiveUnitMode => self.active_unit_mode().map(Value::from),
            Getter::Alarm => self.alarm().map(Value::from),
            Getter::FanLevel => self.fan_level().map(Value::from),
            Getter::OperationSelection => self
                .operation_selection()
                .map(|op| Value::from(op.as_str())),
            Getter::WeekProgramSelection => self
                .modbus
                .read_uint32(registers::WEEK_PROGRAM_SELECTION)
                .await
                .map(Value::from),
            Getter::BypassDamper => {
                let value = self.modbus.read_uint32(registers::BYPASS_DAMPER).await;
                self.state.lock().bypass_damper = value;
                value.map(Value::from)
            },
            Getter::AwayMode => self.away_mode().map(Value::Bool),
            Getter::FireplaceMode => self.fireplace_mode().map(Value::Bool),
            Getter::SummerMode => self.summer_mode().map(Value::Bool),
            Getter::FilterLifetime => self.read_filter_lifetime().await.map(Value::from),
            Getter::FilterRemain => {
                let remain = self.read_filter_remain().await;
                if !installed("filter_remain_level") {
                    self.compute_filter_remain_level(installed).await;
                }
                remain.map(Value::from)
            },
            Getter::FilterRemainLevel => self
                .compute_filter_remain_level(installed)
                .await
                .map(Value::from),
            Getter::Humidity => {
                let value = self.modbus.read_uint32(registers::HUMIDITY).await;
                self.filtered(FilteredSensor::Humidity, value.map(RegisterValue::from))
            },
            Getter::AirQuality => {
                let value = self.modbus.read_uint32(registers::AIR_QUALITY).await;
                self.filtered(FilteredSensor::AirQuality, value.map(RegisterValue::from))
            },
            Getter::ExhaustTemperature => {
                self.read_temperature(registers::EXHAUST_TEMP, FilteredSensor::ExhaustTemperature)
                    .await
            },
            Getter::ExtractTemperature => {
                self.read_temperature(registers::EXTRACT_TEMP, FilteredSensor::ExtractTemperature)
                    .await
            },
            Getter::SupplyTemperature => {
                self.read_temperature(registers::SUPPLY_TEMP, FilteredSensor::SupplyTemperature)
                    .await
            },
            Getter::OutdoorTemperature => {
                self.read_temperature(registers::OUTDOOR_TEMP, FilteredSensor::OutdoorTemperature)
                    .await
            },
            Getter::RoomTemperature => {
                self.read_temperature(registers::ROOM_TEMP, FilteredSensor::RoomTemperature)
                    .await
            },
            Getter::NightModeStartTime => {
                self.read_time_of_day(
                    registers::NIGHT_MODE_START_HOUR,
                    registers::NIGHT_MODE_START_MINUTE,
                )
                .await
            },
            Getter::NightModeEndTime => {
                self.read_time_of_day(
                    registers::NIGHT_MODE_END_HOUR,
                    registers::NIGHT_MODE_END_MINUTE,
                )
                .await
            },
            Getter::BypassMinimumTemperature => self
                .modbus
                .read_float32(registers::BYPASS_MIN_TEMP, Some(1))
                .await
                .map(json_value),
            Getter::BypassMaximumTemperature => {
                self.read_bypass_maximum_temperature().await.map(json_value)
            },
            Getter::ManualBypassDuration => self
                .modbus
                .read_uint32(registers::MANUAL_BYPASS_DURATION)
                .await
                .map(Value::from),
            Getter::DisableBypass => self
                .read_bypass_maximum_temperature()
                .await
                .map(|v| Value::Bool(v.as_f64() == 0.0)),
            // Owned by the adaptive manager
            Getter::AdaptiveState => None,
        }
    }

    // ========================================================================
    // Setters
    // ========================================================================

    fn require_firmware(&self, key: &str) -> DanthermResult<()> {
        let identity = self.identity.read();
        if identity.firmware_hundredths() < BYPASS_SETTINGS_FIRMWARE {
            return Err(DanthermError::UnsupportedFirmware {
                firmware: identity.firmware_version(),
                fields: vec![key.to_string()],
            });
        }
        Ok(())
    }

    /// Checks that must fail the caller before anything is queued
    pub fn validate_setter(&self, key: &str, setter: Setter, value: &Value) -> DanthermResult<()> {
        match setter {
            Setter::NightModeStartTime | Setter::NightModeEndTime => {
                let text = value
                    .as_str()
                    .ok_or_else(|| DanthermError::InvalidTimeFormat(value.to_string()))?;
                parse_time_of_day(text).map(|_| ())
            },
            Setter::FilterLifetime => {
                let lifetime = value_as_i64(value).ok_or_else(|| {
                    DanthermError::Configuration(format!(
                        "filter lifetime must be an integer, got {}",
                        value
                    ))
                })?;
                if !(0..=360).contains(&lifetime) {
                    return Err(DanthermError::InvalidFilterLifetime(lifetime));
                }
                Ok(())
            },
            Setter::BypassMinimumTemperature
            | Setter::BypassMaximumTemperature
            | Setter::ManualBypassDuration => self.require_firmware(key),
            Setter::OperationSelection => {
                let text = value
                    .as_str()
                    .ok_or_else(|| DanthermError::InvalidOperation(value.to_string()))?;
                text.parse::<Operation>().map(|_| ())
            },
            Setter::FanLevel => match value_as_u32(value)? {
                0..=4 => Ok(()),
                other => Err(DanthermError::Configuration(format!(
                    "fan level {} outside 0..=4",
                    other
                ))),
            },
            _ => Ok(()),
        }
    }

    /// Run a setter with a validated value
    pub async fn apply_setter(&self, setter: Setter, value: &Value) -> DanthermResult<()> {
        match setter {
            Setter::FilterReset => self.set_filter_reset(value_as_i64(value).map(|v| v as u32)),
            Setter::AlarmReset => self.set_alarm_reset(value_as_i64(value).map(|v| v as u32)),
            Setter::BypassDamper => self.set_bypass_damper(),
            Setter::FilterLifetime => {
                let lifetime = value_as_i64(value).unwrap_or(-1);
                self.set_filter_lifetime(lifetime)
            },
            Setter::BypassMinimumTemperature => {
                self.set_bypass_minimum_temperature(value_as_f64(value).unwrap_or(f64::NAN))
            },
            Setter::BypassMaximumTemperature => {
                self.set_bypass_maximum_temperature(value_as_f64(value).unwrap_or(f64::NAN))
            },
            Setter::ManualBypassDuration => self.set_manual_bypass_duration(value_as_u32(value)?),
            Setter::OperationSelection => {
                let text = value
                    .as_str()
                    .ok_or_else(|| DanthermError::InvalidOperation(value.to_string()))?;
                self.set_operation_selection(text.parse()?)
            },
            Setter::FanLevel => self.set_fan_level(value_as_u32(value)?),
            Setter::WeekProgramSelection => self.set_week_program_selection(value_as_u32(value)?),
            Setter::ActiveUnitMode => self.set_active_unit_mode(value_as_u32(value)?),
            Setter::DisableBypass => self.set_disable_bypass(value_as_bool(value)?),
            Setter::NightModeStartTime => {
                self.set_night_mode_start_time(value.as_str().unwrap_or_default())
            },
            Setter::NightModeEndTime => {
                self.set_night_mode_end_time(value.as_str().unwrap_or_default())
            },
        }
    }

    pub fn set_active_unit_mode(&self, value: u32) -> DanthermResult<()> {
        self.modbus.write_uint32(registers::ACTIVE_MODE, value)?;
        Ok(())
    }

    /// Switch the unit to an operation
    ///
    /// The active mode is only written when the unit is not already in the
    /// matching current mode. The fan level is always written when the
    /// operation names one, since changing mode can reset it.
    pub fn set_operation_selection(&self, operation: Operation) -> DanthermResult<()> {
        let (mode, active, fan_level) = match operation {
            Operation::Automatic => (CurrentUnitMode::Automatic, ActiveUnitMode::AUTOMATIC, None),
            Operation::Away => (CurrentUnitMode::Away, ActiveUnitMode::START_AWAY, None),
            Operation::Level1 => (CurrentUnitMode::Manual, ActiveUnitMode::MANUAL, Some(1)),
            Operation::Level2 => (CurrentUnitMode::Manual, ActiveUnitMode::MANUAL, Some(2)),
            Operation::Level3 => (CurrentUnitMode::Manual, ActiveUnitMode::MANUAL, Some(3)),
            Operation::Level4 => (CurrentUnitMode::Manual, ActiveUnitMode::MANUAL, Some(4)),
            Operation::Manual => {
                let fan_level = (self.fan_level() == Some(0)).then_some(1);
                (CurrentUnitMode::Manual, ActiveUnitMode::MANUAL, fan_level)
            },
            Operation::Standby => (CurrentUnitMode::Manual, ActiveUnitMode::MANUAL, Some(0)),
            Operation::WeekProgram => (
                CurrentUnitMode::WeekProgram,
                ActiveUnitMode::WEEK_PROGRAM,
                None,
            ),
            other => {
                debug!("Operation {} has no unit mode, ignored", other);
                return Ok(());
            },
        };

        if self.current_unit_mode() != Some(mode.raw()) {
            self.set_active_unit_mode(active)?;
        }
        if let Some(level) = fan_level {
            self.set_fan_level(level)?;
        }
        Ok(())
    }

    pub fn set_fan_level(&self, level: u32) -> DanthermResult<()> {
        self.modbus.write_uint32(registers::FAN_LEVEL, level)?;
        Ok(())
    }

    pub fn set_week_program_selection(&self, program: u32) -> DanthermResult<()> {
        self.modbus
            .write_uint32(registers::WEEK_PROGRAM_SELECTION, program)?;
        Ok(())
    }

    pub fn set_filter_lifetime(&self, lifetime: i64) -> DanthermResult<()> {
        if !(0..=360).contains(&lifetime) {
            return Err(DanthermError::InvalidFilterLifetime(lifetime));
        }
        self.modbus
            .write_uint32(registers::FILTER_LIFETIME, lifetime as u32)?;
        Ok(())
    }

    pub fn set_filter_reset(&self, value: Option<u32>) -> DanthermResult<()> {
        self.modbus
            .write_uint32(registers::FILTER_RESET, value.unwrap_or(1))?;
        Ok(())
    }

    /// Acknowledge an alarm; defaults to the last alarm read
    pub fn set_alarm_reset(&self, value: Option<u32>) -> DanthermResult<()> {
        let value = value.or_else(|| self.alarm()).ok_or_else(|| {
            DanthermError::InvalidOperation("alarm has not been read yet".to_string())
        })?;
        self.modbus.write_uint32(registers::ALARM_RESET, value)?;
        Ok(())
    }

    /// Toggle the manual bypass
    pub fn set_bypass_damper(&self) -> DanthermResult<()> {
        let active = self.active_unit_mode().unwrap_or(0);
        if ActiveUnitMode::has(active, ActiveUnitMode::SELECT_MANUAL_BYPASS) {
            self.set_active_unit_mode(ActiveUnitMode::DESELECT_MANUAL_BYPASS)
        } else {
            self.set_active_unit_mode(ActiveUnitMode::SELECT_MANUAL_BYPASS)
        }
    }

    fn write_time_of_day(
        &self,
        text: &str,
        hour_address: u16,
        minute_address: u16,
    ) -> DanthermResult<()> {
        let (hours, minutes) = parse_time_of_day(text)?;
        self.modbus.write_uint32(hour_address, hours)?;
        self.modbus.write_uint32(minute_address, minutes)?;
        Ok(())
    }

    pub fn set_night_mode_start_time(&self, text: &str) -> DanthermResult<()> {
        self.write_time_of_day(
            text,
            registers::NIGHT_MODE_START_HOUR,
            registers::NIGHT_MODE_START_MINUTE,
        )
    }

    pub fn set_night_mode_end_time(&self, text: &str) -> DanthermResult<()> {
        self.write_time_of_day(
            text,
            registers::NIGHT_MODE_END_HOUR,
            registers::NIGHT_MODE_END_MINUTE,
        )
    }

    pub fn set_bypass_minimum_temperature(&self, value: f64) -> DanthermResult<()> {
        self.require_firmware("bypass_minimum_temperature")?;
        self.modbus.write_float32(registers::BYPASS_MIN_TEMP, value)?;
        Ok(())
    }

    pub fn set_bypass_maximum_temperature(&self, value: f64) -> DanthermResult<()> {
        self.require_firmware("bypass_maximum_temperature")?;
        self.write_bypass_maximum_temperature(value)
    }

    fn write_bypass_maximum_temperature(&self, value: f64) -> DanthermResult<()> {
        self.modbus.write_float32(registers::BYPASS_MAX_TEMP, value)?;
        self.state.lock().bypass_maximum_temperature = Some(value);
        Ok(())
    }

    pub fn set_manual_bypass_duration(&self, minutes: u32) -> DanthermResult<()> {
        self.require_firmware("manual_bypass_duration")?;
        self.modbus
            .write_uint32(registers::MANUAL_BYPASS_DURATION, minutes)?;
        Ok(())
    }

    /// Disable automatic bypass by zeroing the maximum temperature
    pub fn set_disable_bypass(&self, disable: bool) -> DanthermResult<()> {
        let value = if disable {
            0.0
        } else {
            DEFAULT_BYPASS_MAXIMUM_TEMPERATURE
        };
        self.write_bypass_maximum_temperature(value)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::coordinator::backend::BackendQueue;
    use dantherm_comlink::{encode, DataClass, MockRegisterTransport, RegisterOrder};

    fn uint32_words(value: u32) -> [u16; 2] {
        [(value & 0xFFFF) as u16, (value >> 16) as u16]
    }

    fn device(mock: &MockRegisterTransport) -> DanthermDevice {
        let modbus = DanthermModbus::new(
            Box::new(mock.clone()),
            BackendQueue::new(),
            RegisterOrder::CDAB,
        );
        DanthermDevice::new("Dantherm", modbus)
    }

    fn queued(device: &DanthermDevice) -> usize {
        device.modbus().backend().len()
    }

    async fn with_modes(
        mock: &MockRegisterTransport,
        current: u32,
        active: u32,
        fan: u32,
    ) -> DanthermDevice {
        mock.set_registers(472, &uint32_words(current));
        mock.set_registers(168, &uint32_words(active));
        mock.set_registers(324, &uint32_words(fan));
        let device = device(mock);
        device.init_and_connect().await.unwrap();
        device.read_current_unit_mode().await;
        device.read_active_unit_mode().await;
        device.read_fan_level().await;
        device
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity() {
        let mock = MockRegisterTransport::new();
        mock.set_registers(610, &uint32_words(0x0001_0246));
        mock.set_registers(2, &uint32_words(9 << 24));
        mock.set_registers(24, &uint32_words(0x0246));
        mock.set_registers(4, &[0x3039, 0, 0, 0]);

        let device = device(&mock);
        device.init_and_connect().await.unwrap();
        let identity = device.identity();
        assert_eq!(identity.installed_components, 0x0246);
        assert_eq!(identity.device_type_label(), "HCV400 P2");
        assert_eq!(identity.firmware_version(), "(2.70)");
        assert_eq!(identity.firmware_hundredths(), 270);
        assert_eq!(identity.serial_number, 12345);
        assert!(identity.has_component(ComponentClass::HAC1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_selection_and_current_operation() {
        let mock = MockRegisterTransport::new();
        let device = with_modes(&mock, 1, ActiveUnitMode::MANUAL, 3).await;
        assert_eq!(device.operation_selection(), Some(Operation::Manual));
        assert_eq!(device.current_operation(), Some(Operation::Level3));

        mock.set_registers(472, &uint32_words(5));
        mock.set_registers(168, &uint32_words(ActiveUnitMode::START_AWAY));
        device.read_current_unit_mode().await;
        device.read_active_unit_mode().await;
        assert_eq!(device.operation_selection(), Some(Operation::Away));
        assert_eq!(device.current_operation(), Some(Operation::Away));
        assert_eq!(device.away_mode(), Some(true));

        // Unknown flags keep the last derived operation
        mock.set_registers(168, &uint32_words(0x0100));
        device.read_active_unit_mode().await;
        assert_eq!(device.current_operation(), Some(Operation::Away));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_when_fan_off() {
        let mock = MockRegisterTransport::new();
        let device = with_modes(&mock, 1, ActiveUnitMode::MANUAL, 0).await;
        assert_eq!(device.operation_selection(), Some(Operation::Standby));
        assert_eq!(device.current_operation(), Some(Operation::Standby));
        assert_eq!(device.icon_for("operation_mode").as_deref(), Some("mdi:fan-off"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_operation_selection_skips_matching_mode() {
        let mock = MockRegisterTransport::new();
        let device = with_modes(&mock, 1, ActiveUnitMode::MANUAL, 2).await;

        // Already manual: only the fan level is written
        device.set_operation_selection(Operation::Level4).unwrap();
        assert_eq!(queued(&device), 1);

        device.set_operation_selection(Operation::WeekProgram).unwrap();
        assert_eq!(queued(&device), 2);

        // Manual with a running fan leaves the level alone
        device.set_operation_selection(Operation::Manual).unwrap();
        assert_eq!(queued(&device), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors() {
        let mock = MockRegisterTransport::new();
        mock.set_registers(24, &uint32_words(0x0232));
        let device = device(&mock);
        device.init_and_connect().await.unwrap();

        assert!(matches!(
            device.validate_setter(
                "night_mode_start_time",
                Setter::NightModeStartTime,
                &json!("24:00")
            ),
            Err(DanthermError::InvalidTimeFormat(_))
        ));
        assert!(device
            .validate_setter("night_mode_start_time", Setter::NightModeStartTime, &json!("22:30"))
            .is_ok());
        assert!(matches!(
            device.validate_setter("filter_lifetime", Setter::FilterLifetime, &json!(361)),
            Err(DanthermError::InvalidFilterLifetime(361))
        ));
        match device.validate_setter(
            "manual_bypass_duration",
            Setter::ManualBypassDuration,
            &json!(60),
        ) {
            Err(DanthermError::UnsupportedFirmware { firmware, fields }) => {
                assert_eq!(firmware, "(2.50)");
                assert_eq!(fields, vec!["manual_bypass_duration".to_string()]);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_bypass_tracks_availability() {
        let mock = MockRegisterTransport::new();
        let device = device(&mock);
        assert!(device.bypass_available());

        device.set_disable_bypass(true).unwrap();
        assert!(!device.bypass_available());
        device.set_disable_bypass(false).unwrap();
        assert!(device.bypass_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_remain_level() {
        assert_eq!(filter_remain_level(360, 360), 0);
        assert_eq!(filter_remain_level(360, 100), 2);
        assert_eq!(filter_remain_level(360, 0), 3);
        assert_eq!(filter_remain_level(360, 400), 0);

        let mock = MockRegisterTransport::new();
        mock.set_registers(556, &uint32_words(360));
        mock.set_registers(554, &uint32_words(200));
        let device = device(&mock);
        device.init_and_connect().await.unwrap();

        let none_installed = |_: &str| false;
        assert_eq!(
            device.read_getter(Getter::FilterRemain, &none_installed).await,
            Some(json!(200))
        );
        assert_eq!(device.attrs_for("filter_remain"), Some(json!({ "level": 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_filtering() {
        let mock = MockRegisterTransport::new();
        let words =
            encode(RegisterValue::Float(21.0), DataClass::Float32, RegisterOrder::CDAB).unwrap();
        mock.set_registers(140, &words);
        let device = device(&mock);
        device.init_and_connect().await.unwrap();
        device.set_sensor_filtering(true);

        let installed = |_: &str| true;
        for _ in 0..5 {
            device.read_getter(Getter::RoomTemperature, &installed).await;
        }
        let spike =
            encode(RegisterValue::Float(30.0), DataClass::Float32, RegisterOrder::CDAB).unwrap();
        mock.set_registers(140, &spike);
        assert_eq!(
            device.read_getter(Getter::RoomTemperature, &installed).await,
            Some(json!(21.0))
        );
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("07:05").unwrap(), (7, 5));
        assert!(parse_time_of_day("7").is_err());
        assert!(parse_time_of_day("12:60").is_err());
        assert!(parse_time_of_day("ab:cd").is_err());
    }
}

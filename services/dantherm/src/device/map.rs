//! Dantherm register map and entity table
//!
//! Register addresses, unit mode values and the static description of every
//! entity the service exposes. The addresses are the wire contract with the
//! unit and must not change.

use std::fmt;
use std::str::FromStr;

use dantherm_comlink::DataClass;
use errors::DanthermError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Registers
// ============================================================================

/// Holding register addresses
pub mod registers {
    pub const SYSTEM_ID: u16 = 2;
    pub const SERIAL_NUMBER: u16 = 4;
    pub const FIRMWARE_VERSION: u16 = 24;
    pub const FAN1_SPEED: u16 = 100;
    pub const FAN2_SPEED: u16 = 102;
    pub const OUTDOOR_TEMP: u16 = 132;
    pub const SUPPLY_TEMP: u16 = 134;
    pub const EXTRACT_TEMP: u16 = 136;
    pub const EXHAUST_TEMP: u16 = 138;
    pub const ROOM_TEMP: u16 = 140;
    pub const INTERNAL_PREHEATER_DUTYCYCLE: u16 = 160;
    pub const ACTIVE_MODE: u16 = 168;
    pub const HUMIDITY: u16 = 196;
    pub const BYPASS_DAMPER: u16 = 198;
    pub const MANUAL_BYPASS_DURATION: u16 = 264;
    pub const FAN_LEVEL: u16 = 324;
    pub const NIGHT_MODE_START_HOUR: u16 = 332;
    pub const NIGHT_MODE_START_MINUTE: u16 = 334;
    pub const NIGHT_MODE_END_HOUR: u16 = 336;
    pub const NIGHT_MODE_END_MINUTE: u16 = 338;
    pub const AIR_QUALITY: u16 = 430;
    pub const BYPASS_MIN_TEMP: u16 = 444;
    pub const BYPASS_MAX_TEMP: u16 = 446;
    pub const WEEK_PROGRAM_SELECTION: u16 = 466;
    pub const CURRENT_MODE: u16 = 472;
    pub const ALARM_RESET: u16 = 514;
    pub const ALARM: u16 = 516;
    pub const FILTER_REMAIN: u16 = 554;
    pub const FILTER_LIFETIME: u16 = 556;
    pub const FILTER_RESET: u16 = 558;
    pub const SYSTEM_ID_COMPONENTS: u16 = 610;
    pub const WORK_TIME: u16 = 624;
}

// ============================================================================
// Device enums
// ============================================================================

/// Installed component bits (low word of register 610)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentClass(pub u32);

impl ComponentClass {
    pub const FP1: Self = Self(0x0001);
    pub const WEEK: Self = Self(0x0002);
    pub const BYPASS: Self = Self(0x0004);
    pub const LR_SWITCH: Self = Self(0x0008);
    pub const INTERNAL_PREHEATER: Self = Self(0x0010);
    pub const SERVO_FLOW: Self = Self(0x0020);
    pub const RH_SENSOR: Self = Self(0x0040);
    pub const VOC_SENSOR: Self = Self(0x0080);
    pub const EXT_OVERRIDE: Self = Self(0x0100);
    pub const HAC1: Self = Self(0x0200);
    pub const HRC2: Self = Self(0x0400);
    pub const PC_TOOL: Self = Self(0x0800);
    pub const APPS: Self = Self(0x1000);
    pub const ZIGBEE: Self = Self(0x2000);
    pub const DI1_OVERRIDE: Self = Self(0x4000);
    pub const DI2_OVERRIDE: Self = Self(0x8000);

    pub fn is_installed(self, installed_components: u32) -> bool {
        installed_components & self.0 != 0
    }
}

/// Current unit mode (register 472)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentUnitMode {
    Standby = 0,
    Manual = 1,
    Automatic = 2,
    WeekProgram = 3,
    Away = 5,
    Summer = 6,
    Fireplace = 9,
    Night = 16,
}

impl CurrentUnitMode {
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Standby),
            1 => Some(Self::Manual),
            2 => Some(Self::Automatic),
            3 => Some(Self::WeekProgram),
            5 => Some(Self::Away),
            6 => Some(Self::Summer),
            9 => Some(Self::Fireplace),
            16 => Some(Self::Night),
            _ => None,
        }
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// Active unit mode flags and commands (register 168)
///
/// Reads return a bit set; writes take a single command value. The `END_*`
/// values clear the matching flag.
pub struct ActiveUnitMode;

impl ActiveUnitMode {
    pub const AUTOMATIC: u32 = 0x0002;
    pub const MANUAL: u32 = 0x0004;
    pub const WEEK_PROGRAM: u32 = 0x0008;
    pub const START_AWAY: u32 = 0x0010;
    pub const END_AWAY: u32 = 0x8010;
    pub const NIGHT_ENABLE: u32 = 0x0020;
    pub const NIGHT_DISABLE: u32 = 0x8020;
    pub const START_FIREPLACE: u32 = 0x0040;
    pub const END_FIREPLACE: u32 = 0x8040;
    pub const SELECT_MANUAL_BYPASS: u32 = 0x0080;
    pub const DESELECT_MANUAL_BYPASS: u32 = 0x8080;
    pub const START_SUMMER: u32 = 0x0800;
    pub const END_SUMMER: u32 = 0x8800;

    pub fn has(active: u32, flag: u32) -> bool {
        active & flag == flag
    }
}

/// Bypass damper position (register 198)
pub struct BypassDamperState;

impl BypassDamperState {
    pub const CLOSED: u32 = 0;
    pub const IN_PROGRESS: u32 = 1;
    pub const CLOSING: u32 = 32;
    pub const OPENING: u32 = 64;
    pub const OPENED: u32 = 255;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ABSwitchPosition {
    #[default]
    Unknown,
    A,
    B,
}

/// Model name for the device type code (system id >> 24)
pub fn device_type_name(code: u32) -> String {
    let name = match code {
        1 => "WG200",
        2 => "WG300",
        3 => "WG500",
        4 => "HCC 2",
        5 => "HCC 2 ALU",
        6 => "HCV300 ALU",
        7 => "HCV500 ALU",
        8 => "HCV700 ALU",
        9 => "HCV400 P2",
        10 => "HCV400 E1",
        11 => "HCV400 P1",
        12 => "HCC 2 E1",
        15 => "HCV460 P2",
        19 => "HCV460 E1",
        21 => "RCV320 P2",
        26 => "RCV320 P1",
        27 => "RCC220 P2",
        other => return format!("UNKNOWN {}", other),
    };
    name.to_string()
}

// ============================================================================
// Operations
// ============================================================================

/// Operating mode, as selected by the user or requested by an override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "standby")]
    Standby,
    #[serde(rename = "automatic")]
    Automatic,
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "week_program")]
    WeekProgram,
    #[serde(rename = "away")]
    Away,
    #[serde(rename = "summer")]
    Summer,
    #[serde(rename = "fireplace")]
    Fireplace,
    #[serde(rename = "night")]
    Night,
    #[serde(rename = "boost")]
    Boost,
    #[serde(rename = "eco")]
    Eco,
    #[serde(rename = "home")]
    Home,
    #[serde(rename = "level_1")]
    Level1,
    #[serde(rename = "level_2")]
    Level2,
    #[serde(rename = "level_3")]
    Level3,
    #[serde(rename = "level_4")]
    Level4,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Standby,
        Operation::Automatic,
        Operation::Manual,
        Operation::WeekProgram,
        Operation::Away,
        Operation::Summer,
        Operation::Fireplace,
        Operation::Night,
        Operation::Boost,
        Operation::Eco,
        Operation::Home,
        Operation::Level1,
        Operation::Level2,
        Operation::Level3,
        Operation::Level4,
    ];

    /// States an adaptive override can name
    pub const ADAPTIVE: [Operation; 13] = [
        Operation::WeekProgram,
        Operation::Automatic,
        Operation::Standby,
        Operation::Level1,
        Operation::Level2,
        Operation::Level3,
        Operation::Level4,
        Operation::Eco,
        Operation::Home,
        Operation::Night,
        Operation::Boost,
        Operation::Away,
        Operation::Fireplace,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Standby => "standby",
            Operation::Automatic => "automatic",
            Operation::Manual => "manual",
            Operation::WeekProgram => "week_program",
            Operation::Away => "away",
            Operation::Summer => "summer",
            Operation::Fireplace => "fireplace",
            Operation::Night => "night",
            Operation::Boost => "boost",
            Operation::Eco => "eco",
            Operation::Home => "home",
            Operation::Level1 => "level_1",
            Operation::Level2 => "level_2",
            Operation::Level3 => "level_3",
            Operation::Level4 => "level_4",
        }
    }

    /// English display label
    pub const fn label(&self) -> &'static str {
        match self {
            Operation::Standby => "Standby",
            Operation::Automatic => "Automatic",
            Operation::Manual => "Manual",
            Operation::WeekProgram => "Week program",
            Operation::Away => "Away",
            Operation::Summer => "Summer",
            Operation::Fireplace => "Fireplace",
            Operation::Night => "Night",
            Operation::Boost => "Boost",
            Operation::Eco => "Eco",
            Operation::Home => "Home",
            Operation::Level1 => "Level 1",
            Operation::Level2 => "Level 2",
            Operation::Level3 => "Level 3",
            Operation::Level4 => "Level 4",
        }
    }

    /// Override priority; higher sits closer to the top of the event stack
    pub const fn priority(&self) -> u8 {
        match self {
            Operation::WeekProgram => 0,
            Operation::Automatic => 1,
            Operation::Standby => 2,
            Operation::Level1 => 3,
            Operation::Level2 => 4,
            Operation::Level3 => 5,
            Operation::Level4 => 6,
            Operation::Eco => 7,
            Operation::Home => 8,
            Operation::Night => 9,
            Operation::Boost => 10,
            Operation::Away => 11,
            Operation::Manual | Operation::Summer | Operation::Fireplace => 0,
        }
    }

    /// Resolve free text (a calendar summary) to an adaptive state
    ///
    /// Dashes, underscores and spaces are ignored, as is case, so
    /// "Week program", "week-program" and "WEEK_PROGRAM" all match.
    pub fn from_text(text: &str) -> Option<Operation> {
        let wanted = normalise(text);
        Operation::ADAPTIVE
            .into_iter()
            .find(|op| normalise(op.as_str()) == wanted || normalise(op.label()) == wanted)
    }
}

fn normalise(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DanthermError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| DanthermError::InvalidOperation(s.to_string()))
    }
}

// ============================================================================
// Selections
// ============================================================================

pub const OPERATION_SELECTIONS: &[&str] = &[
    "standby",
    "automatic",
    "manual",
    "week_program",
    "away",
    "summer",
    "fireplace",
    "night",
];

pub const FAN_LEVEL_SELECTIONS: &[&str] = &["0", "1", "2", "3", "4"];

pub const WEEK_PROGRAM_SELECTIONS: &[&str] =
    &["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10"];

pub const BOOST_OPERATION_SELECTIONS: &[&str] = &["level_2", "level_3", "level_4"];

pub const ECO_OPERATION_SELECTIONS: &[&str] = &["standby", "level_1", "level_2"];

pub const HOME_OPERATION_SELECTIONS: &[&str] =
    &["automatic", "level_1", "level_2", "level_3", "week_program"];

// ============================================================================
// Entity descriptions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Button,
    Calendar,
    Cover,
    Number,
    Select,
    Sensor,
    Switch,
    Text,
}

impl Platform {
    /// Entity id domain
    pub const fn as_str(&self) -> &'static str {
        match self {
            Platform::Button => "button",
            Platform::Calendar => "calendar",
            Platform::Cover => "cover",
            Platform::Number => "number",
            Platform::Select => "select",
            Platform::Sensor => "sensor",
            Platform::Switch => "switch",
            Platform::Text => "text",
        }
    }
}

/// Device-side value source for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Getter {
    CurrentUnitMode,
    ActiveUnitMode,
    Alarm,
    FanLevel,
    OperationSelection,
    WeekProgramSelection,
    BypassDamper,
    AwayMode,
    FireplaceMode,
    SummerMode,
    FilterLifetime,
    FilterRemain,
    FilterRemainLevel,
    Humidity,
    AirQuality,
    ExhaustTemperature,
    ExtractTemperature,
    SupplyTemperature,
    OutdoorTemperature,
    RoomTemperature,
    NightModeStartTime,
    NightModeEndTime,
    BypassMinimumTemperature,
    BypassMaximumTemperature,
    ManualBypassDuration,
    DisableBypass,
    AdaptiveState,
}

/// Device-side write path for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setter {
    FilterReset,
    AlarmReset,
    BypassDamper,
    FilterLifetime,
    BypassMinimumTemperature,
    BypassMaximumTemperature,
    ManualBypassDuration,
    OperationSelection,
    FanLevel,
    WeekProgramSelection,
    ActiveUnitMode,
    DisableBypass,
    NightModeStartTime,
    NightModeEndTime,
}

/// Condition gating whether an entity is read at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Text(&'static str),
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            DefaultValue::Bool(b) => Value::Bool(b),
            DefaultValue::Int(i) => Value::from(i),
            DefaultValue::Text(s) => Value::from(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// On/off semantics of a switch
///
/// `state_on`/`state_off` of `None` mean a plain boolean. `set_on`/`set_off`
/// override the value written when they differ from the read mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchSpec {
    pub state_on: Option<u32>,
    pub state_off: Option<u32>,
    pub set_on: Option<u32>,
    pub set_off: Option<u32>,
    pub icon_on: &'static str,
    pub icon_off: &'static str,
}

impl SwitchSpec {
    const fn boolean(icon_on: &'static str, icon_off: &'static str) -> Self {
        Self {
            state_on: None,
            state_off: None,
            set_on: None,
            set_off: None,
            icon_on,
            icon_off,
        }
    }

    const fn masked(on: u32, off: u32, icon_on: &'static str, icon_off: &'static str) -> Self {
        Self {
            state_on: Some(on),
            state_off: Some(off),
            set_on: None,
            set_off: None,
            icon_on,
            icon_off,
        }
    }

    const fn commanded(
        set_on: u32,
        set_off: u32,
        icon_on: &'static str,
        icon_off: &'static str,
    ) -> Self {
        Self {
            state_on: None,
            state_off: None,
            set_on: Some(set_on),
            set_off: Some(set_off),
            icon_on,
            icon_off,
        }
    }

    /// Interpret a raw state as on/off
    pub fn is_on(&self, state: &Value) -> Option<bool> {
        match state {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => {
                let raw = n.as_u64()?;
                Some(match self.state_on {
                    Some(mask) => raw & u64::from(mask) == u64::from(mask),
                    None => raw != 0,
                })
            },
            _ => None,
        }
    }

    /// Value to hand to the setter for a requested on/off state
    pub fn write_value(&self, on: bool) -> Value {
        let command = if on {
            self.set_on.or(self.state_on)
        } else {
            self.set_off.or(self.state_off)
        };
        match command {
            Some(raw) => Value::from(raw),
            None => Value::Bool(on),
        }
    }

    pub fn icon(&self, on: bool) -> &'static str {
        if on {
            self.icon_on
        } else {
            self.icon_off
        }
    }
}

/// Static description of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescription {
    pub key: &'static str,
    pub platform: Platform,
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
    /// Register read directly when there is no getter
    pub address: Option<u16>,
    /// Register written directly when there is no setter
    pub set_address: Option<u16>,
    pub data_class: DataClass,
    pub precision: Option<i32>,
    /// Stored value used before anything has been persisted
    pub default: Option<DefaultValue>,
    pub icon: Option<&'static str>,
    pub icon_zero: Option<&'static str>,
    pub exclude_if: Option<f64>,
    pub exclude_if_above: Option<f64>,
    pub exclude_if_below: Option<f64>,
    /// Minimum firmware in hundredths (270 = 2.70)
    pub firmware_min: Option<u32>,
    pub available_when: Option<Availability>,
    pub component: Option<ComponentClass>,
    pub switch: Option<SwitchSpec>,
    pub options: &'static [&'static str],
    pub range: Option<NumberRange>,
    pub enabled_default: bool,
}

impl EntityDescription {
    const fn base(key: &'static str, platform: Platform) -> Self {
        Self {
            key,
            platform,
            getter: None,
            setter: None,
            address: None,
            set_address: None,
            data_class: DataClass::UInt32,
            precision: None,
            default: None,
            icon: None,
            icon_zero: None,
            exclude_if: None,
            exclude_if_above: None,
            exclude_if_below: None,
            firmware_min: None,
            available_when: None,
            component: None,
            switch: None,
            options: &[],
            range: None,
            enabled_default: true,
        }
    }

    pub fn default_value(&self) -> Option<Value> {
        self.default.map(DefaultValue::to_value)
    }

    /// Validate a requested state against options and ranges
    pub fn validate(&self, value: &Value) -> Result<(), DanthermError> {
        if !self.options.is_empty() {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(DanthermError::InvalidOperation(format!(
                        "{}: {}",
                        self.key, other
                    )))
                },
            };
            if !self.options.contains(&text.as_str()) {
                return Err(DanthermError::InvalidOperation(format!(
                    "{}: {} not in {:?}",
                    self.key, text, self.options
                )));
            }
        }
        if let Some(range) = self.range {
            let number = value.as_f64().ok_or_else(|| {
                DanthermError::Configuration(format!("{}: expected a number", self.key))
            })?;
            if number < range.min || number > range.max {
                return Err(DanthermError::Configuration(format!(
                    "{}: {} outside {}..={}",
                    self.key, number, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

const fn number(key: &'static str, min: f64, max: f64, step: f64) -> EntityDescription {
    EntityDescription {
        range: Some(NumberRange { min, max, step }),
        ..EntityDescription::base(key, Platform::Number)
    }
}

/// Every entity, in poll order
pub static ENTITIES: &[EntityDescription] = &[
    // Buttons
    EntityDescription {
        setter: Some(Setter::FilterReset),
        ..EntityDescription::base("filter_reset", Platform::Button)
    },
    EntityDescription {
        setter: Some(Setter::AlarmReset),
        ..EntityDescription::base("alarm_reset", Platform::Button)
    },
    // Calendar
    EntityDescription::base("calendar", Platform::Calendar),
    // Cover
    EntityDescription {
        getter: Some(Getter::BypassDamper),
        setter: Some(Setter::BypassDamper),
        available_when: Some(Availability::Bypass),
        component: Some(ComponentClass::BYPASS),
        ..EntityDescription::base("bypass_damper", Platform::Cover)
    },
    // Numbers
    EntityDescription {
        getter: Some(Getter::FilterLifetime),
        setter: Some(Setter::FilterLifetime),
        enabled_default: false,
        ..number("filter_lifetime", 0.0, 360.0, 1.0)
    },
    EntityDescription {
        getter: Some(Getter::BypassMinimumTemperature),
        setter: Some(Setter::BypassMinimumTemperature),
        available_when: Some(Availability::Bypass),
        firmware_min: Some(270),
        component: Some(ComponentClass::BYPASS),
        enabled_default: false,
        ..number("bypass_minimum_temperature", 12.0, 15.0, 0.1)
    },
    EntityDescription {
        getter: Some(Getter::BypassMaximumTemperature),
        setter: Some(Setter::BypassMaximumTemperature),
        available_when: Some(Availability::Bypass),
        firmware_min: Some(270),
        component: Some(ComponentClass::BYPASS),
        enabled_default: false,
        ..number("bypass_maximum_temperature", 21.0, 27.0, 0.1)
    },
    EntityDescription {
        getter: Some(Getter::ManualBypassDuration),
        setter: Some(Setter::ManualBypassDuration),
        available_when: Some(Availability::Bypass),
        firmware_min: Some(270),
        component: Some(ComponentClass::BYPASS),
        enabled_default: false,
        ..number("manual_bypass_duration", 60.0, 480.0, 15.0)
    },
    EntityDescription {
        default: Some(DefaultValue::Int(5)),
        precision: Some(0),
        ..number("boost_mode_timeout", 3.0, 30.0, 1.0)
    },
    EntityDescription {
        default: Some(DefaultValue::Int(15)),
        precision: Some(0),
        ..number("eco_mode_timeout", 15.0, 600.0, 1.0)
    },
    EntityDescription {
        default: Some(DefaultValue::Int(60)),
        precision: Some(0),
        ..number("home_mode_timeout", 30.0, 600.0, 1.0)
    },
    // Selects
    EntityDescription {
        getter: Some(Getter::OperationSelection),
        setter: Some(Setter::OperationSelection),
        options: OPERATION_SELECTIONS,
        ..EntityDescription::base("operation_selection", Platform::Select)
    },
    EntityDescription {
        getter: Some(Getter::FanLevel),
        setter: Some(Setter::FanLevel),
        options: FAN_LEVEL_SELECTIONS,
        ..EntityDescription::base("fan_level_selection", Platform::Select)
    },
    EntityDescription {
        getter: Some(Getter::WeekProgramSelection),
        setter: Some(Setter::WeekProgramSelection),
        options: WEEK_PROGRAM_SELECTIONS,
        component: Some(ComponentClass::WEEK),
        enabled_default: false,
        ..EntityDescription::base("week_program_selection", Platform::Select)
    },
    EntityDescription {
        default: Some(DefaultValue::Text("level_3")),
        options: BOOST_OPERATION_SELECTIONS,
        ..EntityDescription::base("boost_operation_selection", Platform::Select)
    },
    EntityDescription {
        default: Some(DefaultValue::Text("level_1")),
        options: ECO_OPERATION_SELECTIONS,
        ..EntityDescription::base("eco_operation_selection", Platform::Select)
    },
    EntityDescription {
        default: Some(DefaultValue::Text("automatic")),
        options: HOME_OPERATION_SELECTIONS,
        ..EntityDescription::base("home_operation_selection", Platform::Select)
    },
    // Sensors
    EntityDescription {
        getter: Some(Getter::CurrentUnitMode),
        ..EntityDescription::base("operation_mode", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::Alarm),
        icon_zero: Some("mdi:alert-circle-check"),
        ..EntityDescription::base("alarm", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::FanLevel),
        icon_zero: Some("mdi:fan-off"),
        ..EntityDescription::base("fan_level", Platform::Sensor)
    },
    EntityDescription {
        address: Some(registers::FAN1_SPEED),
        data_class: DataClass::Float32,
        precision: Some(0),
        icon_zero: Some("mdi:fan-off"),
        enabled_default: false,
        ..EntityDescription::base("fan1_speed", Platform::Sensor)
    },
    EntityDescription {
        address: Some(registers::FAN2_SPEED),
        data_class: DataClass::Float32,
        precision: Some(0),
        icon_zero: Some("mdi:fan-off"),
        enabled_default: false,
        ..EntityDescription::base("fan2_speed", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::Humidity),
        exclude_if: Some(0.0),
        component: Some(ComponentClass::RH_SENSOR),
        ..EntityDescription::base("humidity", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::AirQuality),
        exclude_if: Some(0.0),
        component: Some(ComponentClass::VOC_SENSOR),
        ..EntityDescription::base("air_quality", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::ExhaustTemperature),
        ..EntityDescription::base("exhaust_temperature", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::ExtractTemperature),
        ..EntityDescription::base("extract_temperature", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::SupplyTemperature),
        ..EntityDescription::base("supply_temperature", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::OutdoorTemperature),
        ..EntityDescription::base("outdoor_temperature", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::RoomTemperature),
        exclude_if_above: Some(70.0),
        exclude_if_below: Some(-40.0),
        component: Some(ComponentClass::HRC2),
        enabled_default: false,
        ..EntityDescription::base("room_temperature", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::FilterRemain),
        ..EntityDescription::base("filter_remain", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::FilterRemainLevel),
        enabled_default: false,
        ..EntityDescription::base("filter_remain_level", Platform::Sensor)
    },
    EntityDescription {
        address: Some(registers::WORK_TIME),
        enabled_default: false,
        ..EntityDescription::base("work_time", Platform::Sensor)
    },
    EntityDescription {
        address: Some(registers::INTERNAL_PREHEATER_DUTYCYCLE),
        component: Some(ComponentClass::INTERNAL_PREHEATER),
        enabled_default: false,
        ..EntityDescription::base("internal_preheater_dutycycle", Platform::Sensor)
    },
    EntityDescription {
        getter: Some(Getter::AdaptiveState),
        enabled_default: false,
        ..EntityDescription::base("adaptive_state", Platform::Sensor)
    },
    // Switches
    EntityDescription {
        getter: Some(Getter::AwayMode),
        setter: Some(Setter::ActiveUnitMode),
        switch: Some(SwitchSpec::masked(
            ActiveUnitMode::START_AWAY,
            ActiveUnitMode::END_AWAY,
            "mdi:bag-suitcase",
            "mdi:bag-suitcase-off",
        )),
        ..EntityDescription::base("away_mode", Platform::Switch)
    },
    EntityDescription {
        getter: Some(Getter::ActiveUnitMode),
        setter: Some(Setter::ActiveUnitMode),
        switch: Some(SwitchSpec::masked(
            ActiveUnitMode::NIGHT_ENABLE,
            ActiveUnitMode::NIGHT_DISABLE,
            "mdi:sleep",
            "mdi:sleep-off",
        )),
        ..EntityDescription::base("night_mode", Platform::Switch)
    },
    EntityDescription {
        getter: Some(Getter::FireplaceMode),
        setter: Some(Setter::ActiveUnitMode),
        switch: Some(SwitchSpec::commanded(
            ActiveUnitMode::START_FIREPLACE,
            ActiveUnitMode::END_FIREPLACE,
            "mdi:fireplace",
            "mdi:fireplace-off",
        )),
        ..EntityDescription::base("fireplace_mode", Platform::Switch)
    },
    EntityDescription {
        getter: Some(Getter::ActiveUnitMode),
        setter: Some(Setter::ActiveUnitMode),
        available_when: Some(Availability::Bypass),
        component: Some(ComponentClass::BYPASS),
        switch: Some(SwitchSpec::masked(
            ActiveUnitMode::SELECT_MANUAL_BYPASS,
            ActiveUnitMode::DESELECT_MANUAL_BYPASS,
            "mdi:hand-back-right",
            "mdi:hand-back-right-off",
        )),
        ..EntityDescription::base("manual_bypass_mode", Platform::Switch)
    },
    EntityDescription {
        getter: Some(Getter::SummerMode),
        setter: Some(Setter::ActiveUnitMode),
        switch: Some(SwitchSpec::commanded(
            ActiveUnitMode::START_SUMMER,
            ActiveUnitMode::END_SUMMER,
            "mdi:weather-sunny",
            "mdi:weather-sunny-off",
        )),
        ..EntityDescription::base("summer_mode", Platform::Switch)
    },
    EntityDescription {
        default: Some(DefaultValue::Bool(false)),
        switch: Some(SwitchSpec::boolean("mdi:filter", "mdi:filter-off")),
        ..EntityDescription::base("sensor_filtering", Platform::Switch)
    },
    EntityDescription {
        default: Some(DefaultValue::Bool(false)),
        switch: Some(SwitchSpec::boolean("mdi:rocket-launch", "mdi:rocket")),
        ..EntityDescription::base("boost_mode", Platform::Switch)
    },
    EntityDescription {
        default: Some(DefaultValue::Bool(false)),
        switch: Some(SwitchSpec::boolean("mdi:leaf", "mdi:leaf-off")),
        ..EntityDescription::base("eco_mode", Platform::Switch)
    },
    EntityDescription {
        default: Some(DefaultValue::Bool(false)),
        switch: Some(SwitchSpec::boolean("mdi:home", "mdi:home-off")),
        ..EntityDescription::base("home_mode", Platform::Switch)
    },
    EntityDescription {
        getter: Some(Getter::DisableBypass),
        setter: Some(Setter::DisableBypass),
        component: Some(ComponentClass::BYPASS),
        switch: Some(SwitchSpec::boolean("mdi:repeat-off", "mdi:repeat")),
        enabled_default: false,
        ..EntityDescription::base("disable_bypass", Platform::Switch)
    },
    // Texts
    EntityDescription {
        getter: Some(Getter::NightModeStartTime),
        setter: Some(Setter::NightModeStartTime),
        enabled_default: false,
        ..EntityDescription::base("night_mode_start_time", Platform::Text)
    },
    EntityDescription {
        getter: Some(Getter::NightModeEndTime),
        setter: Some(Setter::NightModeEndTime),
        enabled_default: false,
        ..EntityDescription::base("night_mode_end_time", Platform::Text)
    },
];

/// Look up an entity description by key
pub fn description(key: &str) -> Option<&'static EntityDescription> {
    ENTITIES.iter().find(|d| d.key == key)
}

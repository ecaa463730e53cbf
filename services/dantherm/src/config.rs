//! Service configuration
//!
//! Layering (lowest to highest): defaults, optional file, `DANTHERM_*`
//! environment variables, command line overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use dantherm_comlink::RegisterOrder;
use errors::{DanthermError, DanthermResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adaptive::TriggerKind;

pub const DEFAULT_NAME: &str = "Dantherm";
pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_SCAN_INTERVAL: u64 = 10;
pub const MIN_SCAN_INTERVAL: u64 = 5;
pub const MAX_SCAN_INTERVAL: u64 = 300;
pub const DEFAULT_WRITE_DELAY_MS: u64 = 300;
pub const ENV_PREFIX: &str = "DANTHERM_";

/// Adaptive trigger bindings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveOptions {
    pub boost_mode_trigger: Option<String>,
    pub eco_mode_trigger: Option<String>,
    pub home_mode_trigger: Option<String>,
}

impl AdaptiveOptions {
    /// Bound entity id for a trigger; blank values count as unbound
    pub fn trigger_entity(&self, kind: TriggerKind) -> Option<&str> {
        let value = match kind {
            TriggerKind::Boost => &self.boost_mode_trigger,
            TriggerKind::Eco => &self.eco_mode_trigger,
            TriggerKind::Home => &self.home_mode_trigger,
        };
        value.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    pub fn any_configured(&self) -> bool {
        TriggerKind::ALL
            .iter()
            .any(|kind| self.trigger_entity(*kind).is_some())
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DanthermConfig {
    /// Device name, used as the entity prefix
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Poll interval in seconds
    pub scan_interval: u64,
    /// Pause between queued writes in milliseconds
    pub write_delay_ms: u64,
    pub register_order: String,
    pub store_path: PathBuf,
    pub debug: bool,
    pub log: LogSettings,
    pub options: AdaptiveOptions,
}

impl Default for DanthermConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: String::new(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            write_delay_ms: DEFAULT_WRITE_DELAY_MS,
            register_order: "CDAB".to_string(),
            store_path: PathBuf::from("dantherm_store.json"),
            debug: false,
            log: LogSettings::default(),
            options: AdaptiveOptions::default(),
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
    pub scan_interval: Option<u64>,
    pub log_level: Option<String>,
}

impl DanthermConfig {
    /// Load defaults, file and environment, then validate
    pub fn load(path: Option<&Path>) -> DanthermResult<Self> {
        Self::load_with_overrides(path, &ConfigOverrides::default())
    }

    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> DanthermResult<Self> {
        let mut config: DanthermConfig = common::load_layered(path, ENV_PREFIX)?;
        config.apply_overrides(overrides);
        if common::env_flag("DANTHERM_DEBUG") {
            config.debug = true;
        }
        config.validate()?;
        debug!(
            "Configuration loaded: {}:{} unit {} every {}s",
            config.host, config.port, config.unit_id, config.scan_interval
        );
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(unit_id) = overrides.unit_id {
            self.unit_id = unit_id;
        }
        if let Some(scan_interval) = overrides.scan_interval {
            self.scan_interval = scan_interval;
        }
        if let Some(level) = &overrides.log_level {
            self.log.level = level.clone();
        }
    }

    pub fn validate(&self) -> DanthermResult<()> {
        if self.host.trim().is_empty() {
            return Err(DanthermError::Configuration(
                "host must be set".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(DanthermError::Configuration(
                "name must not be empty".to_string(),
            ));
        }
        if !(MIN_SCAN_INTERVAL..=MAX_SCAN_INTERVAL).contains(&self.scan_interval) {
            return Err(DanthermError::Configuration(format!(
                "scan_interval {} outside {}..={} seconds",
                self.scan_interval, MIN_SCAN_INTERVAL, MAX_SCAN_INTERVAL
            )));
        }
        if self.port == 0 {
            return Err(DanthermError::Configuration("port must not be 0".to_string()));
        }
        self.register_order()?;
        Ok(())
    }

    pub fn register_order(&self) -> DanthermResult<RegisterOrder> {
        RegisterOrder::from_str(&self.register_order).map_err(|_| {
            DanthermError::Configuration(format!(
                "Unknown register order '{}'",
                self.register_order
            ))
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }

    /// Entity prefix derived from the device name
    pub fn entity_prefix(&self) -> String {
        self.name.trim().to_lowercase().replace(' ', "_")
    }
}

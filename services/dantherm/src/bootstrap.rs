//! Service bootstrap
//!
//! Command line parsing, logging setup and assembly of the coordinator from
//! the loaded configuration.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dantherm_comlink::{ModbusTcpClient, TcpTransportConfig};
use errors::{DanthermError, DanthermResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adaptive::{AdaptiveManager, AdaptiveSettings, LocalCalendar};
use crate::collaborators::{InMemoryEntityRegistry, InMemoryEntityStates, SystemClock};
use crate::config::{ConfigOverrides, DanthermConfig};
use crate::coordinator::backend::BackendQueue;
use crate::coordinator::{CoordinatorSettings, DanthermCoordinator};
use crate::device::map::ENTITIES;
use crate::device::DanthermDevice;
use crate::modbus::DanthermModbus;
use crate::store::{EntityStore, JsonFileStore};

pub const SERVICE_NAME: &str = "dantherm";

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dantherm",
    version = env!("CARGO_PKG_VERSION"),
    about = "Dantherm ventilation unit over Modbus/TCP",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, env = "DANTHERM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Unit host name or address
    #[arg(long, env = "DANTHERM_HOST")]
    pub host: Option<String>,

    #[arg(short = 'p', long, env = "DANTHERM_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "DANTHERM_UNIT_ID")]
    pub unit_id: Option<u8>,

    /// Poll interval in seconds (5-300)
    #[arg(short = 's', long, env = "DANTHERM_SCAN_INTERVAL")]
    pub scan_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "DANTHERM_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
            scan_interval: self.scan_interval,
            log_level: self.log_level.clone(),
        }
    }
}

pub fn load_configuration(args: &Args) -> DanthermResult<DanthermConfig> {
    DanthermConfig::load_with_overrides(args.config.as_deref(), &args.overrides())
}

/// Initialize logging from the loaded configuration
pub fn initialize_logging(config: &DanthermConfig) -> DanthermResult<()> {
    let log_config = common::LogConfig {
        service_name: SERVICE_NAME.to_string(),
        log_dir: config.log.dir.clone(),
        level: config.log.level.clone(),
        enable_json: config.log.json,
        ..Default::default()
    };
    common::init_with_config(log_config)
        .map_err(|e| DanthermError::Configuration(format!("Failed to init logging: {}", e)))
}

/// Registry entries for every entity of the unit
///
/// Unique ids are `{prefix}_{key}` so suffix matching finds them.
pub fn entity_registry(config: &DanthermConfig) -> InMemoryEntityRegistry {
    let registry = InMemoryEntityRegistry::new();
    let prefix = config.entity_prefix();
    for desc in ENTITIES {
        let entity_id = format!("{}.{}_{}", desc.platform.as_str(), prefix, desc.key);
        let unique_id = format!("{}_{}", prefix, desc.key);
        registry.register(&entity_id, &unique_id, !desc.enabled_default);
    }
    registry
}

/// Everything the running service needs
pub struct Service {
    pub coordinator: Arc<DanthermCoordinator>,
    pub states: Arc<InMemoryEntityStates>,
    pub calendar: Arc<LocalCalendar>,
}

/// Assemble the coordinator for a configuration
pub fn build_service(config: &DanthermConfig) -> DanthermResult<Service> {
    let transport = ModbusTcpClient::new(TcpTransportConfig {
        host: config.host.clone(),
        port: config.port,
        unit_id: config.unit_id,
        ..Default::default()
    })?;
    let modbus = DanthermModbus::new(
        Box::new(transport),
        BackendQueue::new(),
        config.register_order()?,
    );
    let device = DanthermDevice::new(config.name.clone(), modbus);

    let states = Arc::new(InMemoryEntityStates::new());
    let calendar = Arc::new(LocalCalendar::new());
    let manager = AdaptiveManager::new(
        Arc::new(SystemClock),
        states.clone(),
        AdaptiveSettings {
            debug: config.debug,
        },
    )
    .with_registry(Arc::new(entity_registry(config)));
    manager.set_calendar(Some(calendar.clone()));

    let store = EntityStore::new(Box::new(JsonFileStore::new(config.store_path.clone())));
    let coordinator = DanthermCoordinator::new(
        device,
        store,
        manager,
        CoordinatorSettings {
            scan_interval: config.scan_interval(),
            write_delay: config.write_delay(),
            options: config.options.clone(),
        },
    );
    Ok(Service {
        coordinator,
        states,
        calendar,
    })
}

/// Set up and poll until a shutdown signal arrives
pub async fn run_service(config: DanthermConfig) -> DanthermResult<()> {
    let service = build_service(&config)?;
    let coordinator = service.coordinator;
    coordinator.setup().await?;
    info!(
        "{} ({}) firmware {} ready",
        config.name,
        coordinator.device().identity().device_type_label(),
        coordinator.device().identity().firmware_version()
    );

    let cancel = CancellationToken::new();
    let poller = {
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.run(cancel).await })
    };

    common::wait_for_shutdown().await;
    info!("Shutdown signal received");
    cancel.cancel();
    if let Err(e) = poller.await {
        warn!("Poll task ended abnormally: {}", e);
    }
    Ok(())
}

//! Poll coordinator
//!
//! Owns the poll/write lock, both queues, the entity cache and the store.
//! A poll refreshes the mode registers, then every installed entity, then
//! runs a full adaptive pass.

pub mod backend;
pub mod frontend;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use errors::{DanthermError, DanthermResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adaptive::{AdaptiveHost, AdaptiveManager};
use crate::config::AdaptiveOptions;
use crate::device::map::{
    description, Availability, EntityDescription, Getter, Operation, Platform, ENTITIES,
};
use crate::device::{json_value, value_as_f64, DanthermDevice};
use crate::modbus::RegisterSpec;
use crate::store::EntityStore;
use frontend::{frontend_queue, CommandHandle, FrontendQueue, FrontendWorker};

/// Store key of the persisted adaptive stack
pub const ADAPTIVE_EVENTS_KEY: &str = "adaptive_state";

/// Cached data of one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityData {
    pub state: Option<Value>,
    pub icon: Option<String>,
    pub attrs: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub scan_interval: Duration,
    pub write_delay: Duration,
    pub options: AdaptiveOptions,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            write_delay: Duration::from_millis(300),
            options: AdaptiveOptions::default(),
        }
    }
}

fn falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "off",
        _ => false,
    }
}

/// Entities whose state lives in the store
fn store_backed(desc: &EntityDescription) -> bool {
    desc.getter.is_none()
        && desc.setter.is_none()
        && desc.address.is_none()
        && desc.set_address.is_none()
        && !matches!(desc.platform, Platform::Button | Platform::Calendar)
}

pub struct DanthermCoordinator {
    device: Arc<DanthermDevice>,
    manager: Arc<AdaptiveManager>,
    store: Arc<EntityStore>,
    rw_lock: Arc<tokio::sync::Mutex<()>>,
    frontend: FrontendQueue,
    frontend_worker: Mutex<Option<FrontendWorker>>,
    settings: CoordinatorSettings,
    cache: RwLock<HashMap<String, EntityData>>,
    installed: RwLock<Vec<&'static EntityDescription>>,
    last_update_success: AtomicBool,
    last_saved_events: Mutex<Option<Value>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DanthermCoordinator {
    pub fn new(
        device: DanthermDevice,
        store: EntityStore,
        manager: AdaptiveManager,
        settings: CoordinatorSettings,
    ) -> Arc<Self> {
        let (frontend, worker) =
            frontend_queue(device.modbus().backend().clone(), settings.write_delay);
        Arc::new(Self {
            device: Arc::new(device),
            manager: Arc::new(manager),
            store: Arc::new(store),
            rw_lock: Arc::new(tokio::sync::Mutex::new(())),
            frontend,
            frontend_worker: Mutex::new(Some(worker)),
            settings,
            cache: RwLock::new(HashMap::new()),
            installed: RwLock::new(Vec::new()),
            last_update_success: AtomicBool::new(false),
            last_saved_events: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn device(&self) -> &Arc<DanthermDevice> {
        &self.device
    }

    pub fn manager(&self) -> &Arc<AdaptiveManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Device reachable and the last poll succeeded
    pub fn available(&self) -> bool {
        self.device.available() && self.last_update_success.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect, restore persisted state and install every entity
    pub async fn setup(self: &Arc<Self>) -> DanthermResult<()> {
        self.store.load().await?;
        self.device.init_and_connect().await?;

        if let Some(attrs) = self.store.get_stored_entity_state(ADAPTIVE_EVENTS_KEY, None) {
            self.manager.restore_events(&attrs);
            *self.last_saved_events.lock() = Some(attrs);
        }
        self.apply_sensor_filtering();

        // Exclusion rules look at the mode registers
        {
            let _guard = self.rw_lock.lock().await;
            self.device.read_current_unit_mode().await;
            self.device.read_active_unit_mode().await;
        }

        let mut count = 0;
        for desc in ENTITIES {
            if self.install_entity(desc).await {
                count += 1;
            }
        }
        info!("{} of {} entities installed", count, ENTITIES.len());

        self.manager.set_up_adaptive_triggers(&self.settings.options);
        let weak = Arc::downgrade(self);
        let host: Weak<dyn AdaptiveHost> = weak;
        self.manager.set_up_tracking(host, &self.settings.options);
        self.manager.initialize_after_restart();
        Ok(())
    }

    /// Spawn the backend and frontend workers
    pub fn start_workers(&self, cancel: &CancellationToken) {
        let mut tasks = self.tasks.lock();
        tasks.push(self.device.modbus().backend().spawn(
            self.device.modbus().writer(),
            self.rw_lock.clone(),
            self.settings.write_delay,
            cancel.child_token(),
        ));
        match self.frontend_worker.lock().take() {
            Some(worker) => {
                let token = cancel.child_token();
                tasks.push(tokio::spawn(async move { worker.run(token).await }));
            },
            None => warn!("Frontend worker already started"),
        }
    }

    /// Poll until cancelled
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) {
        self.start_workers(&cancel);
        let mut ticker = tokio::time::interval(self.settings.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Polling {} every {:?}",
            self.device.name(),
            self.settings.scan_interval
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.async_update().await {
                        error!("Update of {} failed: {}", self.device.name(), e);
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }
        self.shutdown().await;
    }

    pub async fn shutdown(&self) {
        self.manager.stop();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.device.modbus().disconnect_and_close().await;
        info!("Coordinator for {} stopped", self.device.name());
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// One poll cycle under the poll/write lock
    pub async fn async_update(&self) -> DanthermResult<()> {
        let result = {
            let _guard = self.rw_lock.lock().await;
            self.update_locked().await
        };
        self.last_update_success
            .store(result.is_ok(), Ordering::SeqCst);
        result
    }

    async fn update_locked(&self) -> DanthermResult<()> {
        if !self.device.modbus().ensure_connected().await {
            return Err(DanthermError::UpdateFailed(format!(
                "{} is not reachable",
                self.device.modbus().endpoint()
            )));
        }
        if self.device.read_current_unit_mode().await.is_none() {
            return Err(DanthermError::UpdateFailed(
                "current unit mode could not be read".to_string(),
            ));
        }
        self.device.read_active_unit_mode().await;
        self.device.read_fan_level().await;
        self.device.read_alarm().await;
        self.apply_sensor_filtering();

        let installed: Vec<&'static EntityDescription> = self.installed.read().clone();
        for desc in installed {
            let data = self.get_entity_data(desc).await;
            self.cache.write().insert(desc.key.to_string(), data);
        }

        self.manager.update_adaptive_state(self).await;
        self.refresh_adaptive_state();
        self.persist_adaptive_events().await;
        Ok(())
    }

    fn apply_sensor_filtering(&self) {
        let enabled = self
            .store
            .get_stored_entity_state("sensor_filtering", Some(Value::Bool(false)))
            .is_some_and(|v| v.as_bool().unwrap_or(false));
        self.device.set_sensor_filtering(enabled);
    }

    /// Cache the adaptive state sensor after the manager ran
    fn refresh_adaptive_state(&self) {
        if !self.is_installed("adaptive_state") {
            return;
        }
        let data = EntityData {
            state: Some(Value::from(self.manager.adaptive_state())),
            icon: None,
            attrs: Some(self.manager.adaptive_state_attrs()),
        };
        self.cache.write().insert("adaptive_state".to_string(), data);
    }

    async fn persist_adaptive_events(&self) {
        let attrs = self.manager.adaptive_state_attrs();
        if self.last_saved_events.lock().as_ref() == Some(&attrs) {
            return;
        }
        match self
            .store
            .store_entity_state(ADAPTIVE_EVENTS_KEY, attrs.clone())
            .await
        {
            Ok(()) => *self.last_saved_events.lock() = Some(attrs),
            Err(e) => warn!("Persisting adaptive events failed: {}", e),
        }
    }

    // ========================================================================
    // Entity data
    // ========================================================================

    pub fn is_installed(&self, key: &str) -> bool {
        self.installed.read().iter().any(|desc| desc.key == key)
    }

    pub fn installed_keys(&self) -> Vec<&'static str> {
        self.installed.read().iter().map(|desc| desc.key).collect()
    }

    /// Cached data of an entity
    pub fn entity_data(&self, key: &str) -> Option<EntityData> {
        self.cache.read().get(key).cloned()
    }

    async fn read_entity_state(&self, desc: &EntityDescription) -> Option<Value> {
        if desc.available_when == Some(Availability::Bypass) && !self.device.bypass_available() {
            return None;
        }
        if let Some(getter) = desc.getter {
            if getter == Getter::AdaptiveState {
                return Some(Value::from(self.manager.adaptive_state()));
            }
            let installed = |key: &str| self.is_installed(key);
            return self.device.read_getter(getter, &installed).await;
        }
        if let Some(address) = desc.address {
            let spec = RegisterSpec {
                address,
                class: desc.data_class,
                precision: desc.precision,
                scale: 1.0,
            };
            return self.device.modbus().read_register(spec).await.map(json_value);
        }
        if store_backed(desc) {
            return self
                .store
                .get_stored_entity_state(desc.key, desc.default_value());
        }
        None
    }

    /// Read state, icon and attributes of one entity
    pub async fn get_entity_data(&self, desc: &EntityDescription) -> EntityData {
        let mut state = self.read_entity_state(desc).await;
        let mut icon = self.device.icon_for(desc.key);

        if let Some(switch) = desc.switch {
            let on = state.as_ref().and_then(|s| switch.is_on(s));
            state = on.map(Value::Bool);
            if icon.is_none() {
                icon = on.map(|on| switch.icon(on).to_string());
            }
        }
        if icon.is_none() {
            let zero = state.as_ref().map_or(true, falsy);
            icon = match (desc.icon_zero, desc.icon) {
                (Some(icon_zero), _) if zero => Some(icon_zero.to_string()),
                (_, Some(icon)) => Some(icon.to_string()),
                _ => None,
            };
        }

        let attrs = if desc.getter == Some(Getter::AdaptiveState) {
            Some(self.manager.adaptive_state_attrs())
        } else {
            self.device.attrs_for(desc.key)
        };

        EntityData { state, icon, attrs }
    }

    // ========================================================================
    // Entity lifecycle
    // ========================================================================

    /// Install an entity unless the unit cannot support it
    pub async fn install_entity(&self, desc: &'static EntityDescription) -> bool {
        let identity = self.device.identity();
        if let Some(component) = desc.component {
            if !identity.has_component(component) {
                debug!("Excluding {}: component {:#06x} not installed", desc.key, component.0);
                return false;
            }
        }
        if let Some(min) = desc.firmware_min {
            if identity.firmware_hundredths() < min {
                debug!(
                    "Excluding {}: firmware {} below {}",
                    desc.key,
                    identity.firmware_version(),
                    min
                );
                return false;
            }
        }
        if desc.exclude_if.is_some()
            || desc.exclude_if_above.is_some()
            || desc.exclude_if_below.is_some()
        {
            let current = self.read_entity_state(desc).await;
            let number = current.as_ref().and_then(value_as_f64);
            let excluded = match number {
                Some(n) => {
                    desc.exclude_if == Some(n)
                        || desc.exclude_if_above.is_some_and(|above| n >= above)
                        || desc.exclude_if_below.is_some_and(|below| n <= below)
                },
                None => false,
            };
            if excluded {
                debug!("Excluding {}: state {:?} matches its exclusion", desc.key, current);
                return false;
            }
        }

        let mut installed = self.installed.write();
        if !installed.iter().any(|d| d.key == desc.key) {
            installed.push(desc);
        }
        true
    }

    /// Drop an entity; the last one closes the connection
    pub async fn remove_entity(&self, key: &str) {
        self.cache.write().remove(key);
        let now_empty = {
            let mut installed = self.installed.write();
            let before = installed.len();
            installed.retain(|desc| desc.key != key);
            before != installed.len() && installed.is_empty()
        };
        if now_empty {
            info!("Last entity of {} removed, closing connection", self.device.name());
            self.device.modbus().disconnect_and_close().await;
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Apply a requested state
    ///
    /// Validation errors are returned at once. Device writes go through the
    /// frontend queue; the returned handle resolves once they reached the
    /// unit. Store-backed entities are persisted before returning.
    pub async fn set_entity_state(&self, key: &str, value: Value) -> DanthermResult<CommandHandle> {
        let desc =
            description(key).ok_or_else(|| DanthermError::InvalidEntity(key.to_string()))?;
        desc.validate(&value)?;

        // Switch entities take a boolean and cache a boolean
        let (write_value, cached) = match desc.switch {
            Some(switch) => {
                let on = switch.is_on(&value).ok_or_else(|| {
                    DanthermError::Configuration(format!("{}: expected on/off, got {}", key, value))
                })?;
                (switch.write_value(on), Value::Bool(on))
            },
            None => (value.clone(), value),
        };

        let handle = if let Some(setter) = desc.setter {
            self.device.validate_setter(key, setter, &write_value)?;
            let device = self.device.clone();
            let command_value = write_value.clone();
            self.frontend.enqueue(key, move || async move {
                device.apply_setter(setter, &command_value).await
            })
        } else if let Some(address) = desc.set_address {
            let number = value_as_f64(&write_value).ok_or_else(|| {
                DanthermError::Configuration(format!(
                    "{}: expected a number, got {}",
                    key, write_value
                ))
            })?;
            let device = self.device.clone();
            let class = desc.data_class;
            self.frontend.enqueue(key, move || async move {
                device
                    .modbus()
                    .write_register(address, number.into(), class)?
                    .wait()
                    .await
            })
        } else if store_backed(desc) {
            if key == "sensor_filtering" {
                self.device.set_sensor_filtering(cached.as_bool().unwrap_or(false));
            }
            CommandHandle::ready(self.store.store_entity_state(key, cached.clone()).await)
        } else {
            return Err(DanthermError::InvalidOperation(format!(
                "{} cannot be set",
                key
            )));
        };

        if desc.platform != Platform::Button {
            let icon = desc.switch.and_then(|switch| {
                cached.as_bool().map(|on| switch.icon(on).to_string())
            });
            let mut cache = self.cache.write();
            let entry = cache.entry(key.to_string()).or_default();
            entry.state = Some(cached);
            if icon.is_some() {
                entry.icon = icon;
            }
        }
        debug!("{} set to {}", key, write_value);
        Ok(handle)
    }

    /// Forget a stored state
    async fn clear_entity_state(&self, key: &str) -> DanthermResult<()> {
        if let Some(entry) = self.cache.write().get_mut(key) {
            entry.state = None;
        }
        let persisted = description(key).is_some_and(store_backed);
        if persisted {
            self.store.store_entity_state(key, Value::Null).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AdaptiveHost for DanthermCoordinator {
    fn current_operation(&self) -> Option<Operation> {
        self.device.current_operation()
    }

    fn entity_state(&self, key: &str) -> Option<Value> {
        if let Some(state) = self.cache.read().get(key).and_then(|data| data.state.clone()) {
            return Some(state);
        }
        let desc = description(key)?;
        if store_backed(desc) {
            return self.store.get_stored_entity_state(key, desc.default_value());
        }
        None
    }

    async fn set_operation_selection(&self, operation: Operation) -> DanthermResult<()> {
        // Fan levels are valid targets here but not user selections, so the
        // select's options are bypassed. Runs inside the poll; waiting for
        // the write here would deadlock.
        let device = self.device.clone();
        let _pending = self.frontend.enqueue("operation_selection", move || async move {
            device.set_operation_selection(operation)
        });
        Ok(())
    }

    async fn set_switch_state(&self, key: &str, state: Option<bool>) -> DanthermResult<()> {
        match state {
            Some(on) => self.set_entity_state(key, Value::Bool(on)).await.map(|_| ()),
            None => self.clear_entity_state(key).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::adaptive::AdaptiveSettings;
    use crate::collaborators::{InMemoryEntityStates, SystemClock};
    use crate::device::map::registers;
    use crate::modbus::DanthermModbus;
    use crate::store::MemoryStore;
    use backend::BackendQueue;
    use dantherm_comlink::{MockRegisterTransport, RegisterOrder};

    fn set_u32(mock: &MockRegisterTransport, address: u16, value: u32) {
        mock.set_registers(address, &[(value & 0xFFFF) as u16, (value >> 16) as u16]);
    }

    fn coordinator(mock: &MockRegisterTransport) -> Arc<DanthermCoordinator> {
        let modbus = DanthermModbus::new(
            Box::new(mock.clone()),
            BackendQueue::new(),
            RegisterOrder::CDAB,
        );
        let device = DanthermDevice::new("Dantherm", modbus);
        let manager = AdaptiveManager::new(
            Arc::new(SystemClock),
            Arc::new(InMemoryEntityStates::new()),
            AdaptiveSettings::default(),
        );
        DanthermCoordinator::new(
            device,
            EntityStore::new(Box::new(MemoryStore::new())),
            manager,
            CoordinatorSettings::default(),
        )
    }

    #[test]
    fn test_store_backed() {
        assert!(store_backed(description("boost_mode").unwrap()));
        assert!(store_backed(description("eco_mode_timeout").unwrap()));
        assert!(!store_backed(description("away_mode").unwrap()));
        assert!(!store_backed(description("filter_reset").unwrap()));
        assert!(!store_backed(description("calendar").unwrap()));
    }

    #[test]
    fn test_falsy() {
        assert!(falsy(&Value::from(0)));
        assert!(falsy(&Value::Bool(false)));
        assert!(falsy(&Value::Null));
        assert!(!falsy(&Value::from(3)));
        assert!(!falsy(&Value::from("level_2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_excludes_missing_components() {
        let mock = MockRegisterTransport::new();
        // Week program only, no bypass
        set_u32(&mock, registers::SYSTEM_ID_COMPONENTS, 0x0002);
        set_u32(&mock, registers::FIRMWARE_VERSION, 260);
        let coordinator = coordinator(&mock);
        coordinator.setup().await.unwrap();

        assert!(coordinator.is_installed("operation_selection"));
        assert!(coordinator.is_installed("week_program_selection"));
        assert!(!coordinator.is_installed("bypass_damper"));
        assert!(!coordinator.is_installed("manual_bypass_mode"));
        assert!(!coordinator.is_installed("bypass_minimum_temperature"));
        coordinator.manager().stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_poll_fails() {
        let mock = MockRegisterTransport::new();
        set_u32(&mock, registers::SYSTEM_ID_COMPONENTS, 0x0002);
        let coordinator = coordinator(&mock);
        coordinator.setup().await.unwrap();

        mock.simulate_disconnect();
        mock.fail_next_connects(1);
        let result = coordinator.async_update().await;
        assert!(matches!(result, Err(DanthermError::UpdateFailed(_))));
        assert!(!coordinator.available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_backed_switch_persists() {
        let mock = MockRegisterTransport::new();
        let coordinator = coordinator(&mock);

        let handle = coordinator
            .set_entity_state("eco_mode", Value::Bool(true))
            .await
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(
            coordinator.store().get_stored_entity_state("eco_mode", None),
            Some(Value::Bool(true))
        );
        assert_eq!(
            coordinator.entity_state("eco_mode"),
            Some(Value::Bool(true))
        );
        assert_eq!(
            coordinator.entity_data("eco_mode").unwrap().icon.as_deref(),
            Some("mdi:leaf")
        );

        coordinator.set_switch_state("eco_mode", None).await.unwrap();
        assert_eq!(coordinator.entity_data("eco_mode").unwrap().state, None);
        // A stored null shadows the default
        assert_eq!(coordinator.entity_state("eco_mode"), Some(Value::Null));
    }

    #[tokio::test]
    async fn test_unknown_entity_and_invalid_value() {
        let mock = MockRegisterTransport::new();
        let coordinator = coordinator(&mock);

        let unknown = coordinator.set_entity_state("turbo", Value::Bool(true)).await;
        assert!(matches!(unknown, Err(DanthermError::InvalidEntity(_))));

        let invalid = coordinator
            .set_entity_state("operation_selection", Value::from("boost"))
            .await;
        assert!(matches!(invalid, Err(DanthermError::InvalidOperation(_))));

        let sensor = coordinator
            .set_entity_state("humidity", Value::from(40))
            .await;
        assert!(matches!(sensor, Err(DanthermError::InvalidOperation(_))));
    }
}

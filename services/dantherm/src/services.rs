//! User-facing service calls
//!
//! Every request is validated in full before anything is queued, so a bad
//! field never leaves the unit half-configured.

use std::sync::Arc;

use errors::{DanthermError, DanthermResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::coordinator::frontend::CommandHandle;
use crate::coordinator::DanthermCoordinator;
use crate::device::map::{FAN_LEVEL_SELECTIONS, OPERATION_SELECTIONS};

/// Fields of the `set_state` service; absent fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetStateRequest {
    pub operation_selection: Option<String>,
    pub fan_level_selection: Option<u32>,
    pub away_mode: Option<bool>,
    pub summer_mode: Option<bool>,
    pub fireplace_mode: Option<bool>,
    pub manual_bypass_mode: Option<bool>,
}

impl SetStateRequest {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> DanthermResult<()> {
        if let Some(selection) = &self.operation_selection {
            if !OPERATION_SELECTIONS.contains(&selection.as_str()) {
                return Err(DanthermError::InvalidOperation(format!(
                    "operation_selection: {} not in {:?}",
                    selection, OPERATION_SELECTIONS
                )));
            }
        }
        if let Some(level) = self.fan_level_selection {
            if !FAN_LEVEL_SELECTIONS.contains(&level.to_string().as_str()) {
                return Err(DanthermError::InvalidOperation(format!(
                    "fan_level_selection: {} not in {:?}",
                    level, FAN_LEVEL_SELECTIONS
                )));
            }
        }
        Ok(())
    }

    /// Entity writes in application order
    fn writes(&self) -> Vec<(&'static str, Value)> {
        let mut writes = Vec::new();
        if let Some(selection) = &self.operation_selection {
            writes.push(("operation_selection", Value::from(selection.as_str())));
        }
        if let Some(level) = self.fan_level_selection {
            writes.push(("fan_level_selection", Value::from(level)));
        }
        let modes = [
            ("away_mode", self.away_mode),
            ("summer_mode", self.summer_mode),
            ("fireplace_mode", self.fireplace_mode),
            ("manual_bypass_mode", self.manual_bypass_mode),
        ];
        for (key, on) in modes {
            if let Some(on) = on {
                writes.push((key, Value::Bool(on)));
            }
        }
        writes
    }
}

/// Service calls bound to one coordinator
#[derive(Clone)]
pub struct DanthermServices {
    coordinator: Arc<DanthermCoordinator>,
}

impl DanthermServices {
    pub fn new(coordinator: Arc<DanthermCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Apply every field of the request; returns one handle per write
    pub async fn set_state(&self, request: &SetStateRequest) -> DanthermResult<Vec<CommandHandle>> {
        request.validate()?;
        let mut handles = Vec::new();
        for (key, value) in request.writes() {
            handles.push(self.coordinator.set_entity_state(key, value).await?);
        }
        info!("set_state queued {} write(s)", handles.len());
        Ok(handles)
    }

    /// Write 1 to the filter reset register
    pub async fn filter_reset(&self) -> DanthermResult<CommandHandle> {
        self.coordinator
            .set_entity_state("filter_reset", Value::Null)
            .await
    }

    /// Acknowledge the last alarm read
    pub async fn alarm_reset(&self) -> DanthermResult<CommandHandle> {
        if self.coordinator.device().alarm().is_none() {
            return Err(DanthermError::InvalidOperation(
                "alarm has not been read yet".to_string(),
            ));
        }
        self.coordinator
            .set_entity_state("alarm_reset", Value::Null)
            .await
    }

    pub fn clear_adaptive_events(&self) -> usize {
        self.coordinator.manager().clear_all_events()
    }

    pub async fn cleanup_stale_events(&self) -> usize {
        self.coordinator.manager().cleanup_stale_events().await
    }
}

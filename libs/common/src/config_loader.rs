//! Layered configuration loading
//!
//! Priority (lowest to highest): compiled defaults, configuration file,
//! environment variables with the service prefix.

use std::path::Path;

use errors::{DanthermError, DanthermResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Build the figment for a file, dispatching on its extension
fn file_provider(path: &Path) -> DanthermResult<Figment> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "toml" => Ok(Figment::new().merge(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file(path))),
        "json" => Ok(Figment::new().merge(Json::file(path))),
        other => Err(DanthermError::Configuration(format!(
            "Unsupported configuration format '{}': {}",
            other,
            path.display()
        ))),
    }
}

/// Load configuration from a single file
pub fn load_config_from_file<T>(path: impl AsRef<Path>) -> DanthermResult<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(DanthermError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    file_provider(path)?
        .extract()
        .map_err(|e| DanthermError::Configuration(format!("Failed to load configuration: {}", e)))
}

/// Load configuration from defaults, an optional file and the environment
///
/// Environment keys use `env_prefix` and `__` as the nesting separator,
/// e.g. `DANTHERM_LOG__LEVEL=debug`.
pub fn load_layered<T>(path: Option<&Path>, env_prefix: &str) -> DanthermResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(DanthermError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        debug!("Config file: {}", path.display());
        figment = figment.merge(file_provider(path)?);
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| DanthermError::Configuration(format!("Failed to load configuration: {}", e)))
}

/// Read a boolean flag from the environment ("1", "true", "yes", "on")
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

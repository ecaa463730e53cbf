//! Persisted settings for entities without a register backing
//!
//! The document shape is `{"entities": {key: value}}`. Where it lives is up
//! to the `KeyValueStore` implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use errors::{DanthermError, DanthermResult};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Load/save of one JSON document
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `None` when nothing has been saved yet
    async fn load(&self) -> DanthermResult<Option<Value>>;

    async fn save(&self, document: &Value) -> DanthermResult<()>;
}

/// JSON file written through a temp file and rename
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn load(&self) -> DanthermResult<Option<Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, document: &Value) -> DanthermResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved store to {}", self.path.display());
        Ok(())
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self) -> DanthermResult<Option<Value>> {
        Ok(self.document.lock().clone())
    }

    async fn save(&self, document: &Value) -> DanthermResult<()> {
        *self.document.lock() = Some(document.clone());
        Ok(())
    }
}

/// Entity values on top of a `KeyValueStore`
pub struct EntityStore {
    backend: Box<dyn KeyValueStore>,
    entities: Mutex<Map<String, Value>>,
}

impl EntityStore {
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            entities: Mutex::new(Map::new()),
        }
    }

    /// Read the document; a missing one starts empty
    pub async fn load(&self) -> DanthermResult<()> {
        let document = self
            .backend
            .load()
            .await?
            .unwrap_or_else(|| json!({ "entities": {} }));
        let entities = match document.get("entities") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(DanthermError::Store(
                    "`entities` is not an object".to_string(),
                ))
            },
            None => Map::new(),
        };
        *self.entities.lock() = entities;
        Ok(())
    }

    /// Update one value and save the whole document
    pub async fn store_entity_state(&self, key: &str, value: Value) -> DanthermResult<()> {
        let document = {
            let mut entities = self.entities.lock();
            entities.insert(key.to_string(), value);
            json!({ "entities": Value::Object(entities.clone()) })
        };
        self.backend.save(&document).await
    }

    pub fn get_stored_entity_state(&self, key: &str, default: Option<Value>) -> Option<Value> {
        self.entities.lock().get(key).cloned().or(default)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = EntityStore::new(Box::new(JsonFileStore::new(dir.path().join("store.json"))));
        store.load().await.unwrap();
        assert_eq!(store.get_stored_entity_state("boost_mode", None), None);
        assert_eq!(
            store.get_stored_entity_state("boost_mode", Some(Value::Bool(false))),
            Some(Value::Bool(false))
        );
    }

    #[tokio::test]
    async fn test_values_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = EntityStore::new(Box::new(JsonFileStore::new(&path)));
        store.load().await.unwrap();
        store
            .store_entity_state("boost_operation_selection", json!("level_4"))
            .await
            .unwrap();

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["entities"]["boost_operation_selection"], json!("level_4"));

        let reopened = EntityStore::new(Box::new(JsonFileStore::new(&path)));
        reopened.load().await.unwrap();
        assert_eq!(
            reopened.get_stored_entity_state("boost_operation_selection", None),
            Some(json!("level_4"))
        );
    }

    #[tokio::test]
    async fn test_rejects_malformed_document() {
        let memory = MemoryStore::new();
        memory.save(&json!({ "entities": [1, 2] })).await.unwrap();
        let store = EntityStore::new(Box::new(memory));
        assert!(matches!(store.load().await, Err(DanthermError::Store(_))));
    }
}

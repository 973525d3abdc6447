//! Persisted settings-store collaborator and the configuration provider.
//!
//! The surrounding application decides where overrides live (usually its
//! database); this crate only sees an opaque key-value style store. Store
//! failures are never fatal to the storage path: the provider keeps serving
//! whatever configuration it last had.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, StorageConfig, StorageConfigPatch};

/// Settings-store failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The backing store could not be reached.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("settings record malformed: {0}")]
    Serialization(String),
}

/// Durable store for administrative configuration overrides.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the most recent override record, if any.
    async fn load_overrides(&self) -> Result<Option<StorageConfigPatch>, SettingsError>;

    /// Persist a new override record.
    async fn save_overrides(
        &self,
        config: &StorageConfig,
        actor_id: Option<Uuid>,
        note: Option<&str>,
    ) -> Result<(), SettingsError>;
}

/// Supplies storage settings from environment defaults plus persisted
/// overrides.
#[derive(Clone)]
pub struct ConfigProvider {
    store: Option<Arc<dyn SettingsStore>>,
}

impl ConfigProvider {
    /// Provider backed by a settings store.
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Provider with environment defaults only.
    #[must_use]
    pub fn without_store() -> Self {
        Self { store: None }
    }

    /// Read environment-style defaults.
    ///
    /// Never fails: an unloadable environment falls back to built-in
    /// defaults with a warning.
    #[must_use]
    pub fn load(&self) -> StorageConfig {
        match AppConfig::load() {
            Ok(app) => app.storage,
            Err(e) => {
                warn!(error = %e, "failed to load storage config from environment, using defaults");
                StorageConfig::default()
            }
        }
    }

    /// Environment defaults merged with persisted overrides, best-effort.
    ///
    /// A failing settings store leaves the environment configuration in
    /// effect.
    pub async fn reload(&self) -> StorageConfig {
        let base = self.load();
        let Some(store) = &self.store else {
            return base;
        };

        match store.load_overrides().await {
            Ok(Some(patch)) => patch.apply(&base),
            Ok(None) => base,
            Err(e) => {
                warn!(error = %e, "failed to load storage overrides, keeping environment config");
                base
            }
        }
    }

    /// Persist an override record, best-effort.
    ///
    /// Failures are logged and swallowed so that storage remains usable even
    /// when override persistence is down.
    pub async fn save(
        &self,
        config: &StorageConfig,
        actor_id: Option<Uuid>,
        note: Option<&str>,
    ) {
        let Some(store) = &self.store else {
            return;
        };

        match store.save_overrides(config, actor_id, note).await {
            Ok(()) => info!(actor = ?actor_id, "storage configuration override persisted"),
            Err(e) => {
                warn!(error = %e, actor = ?actor_id, "failed to persist storage configuration override");
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OverrideRecord {
    patch: StorageConfigPatch,
    actor_id: Option<Uuid>,
    note: Option<String>,
    saved_at: DateTime<Utc>,
}

/// In-process settings store.
///
/// Holds the latest override record as an opaque JSON blob, the same shape a
/// database-backed implementation would persist.
#[derive(Default)]
pub struct MemorySettingsStore {
    record: Mutex<Option<String>>,
}

impl MemorySettingsStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load_overrides(&self) -> Result<Option<StorageConfigPatch>, SettingsError> {
        let guard = self
            .record
            .lock()
            .map_err(|_| SettingsError::Unavailable("settings lock poisoned".to_string()))?;

        guard
            .as_deref()
            .map(|raw| {
                serde_json::from_str::<OverrideRecord>(raw)
                    .map(|record| record.patch)
                    .map_err(|e| SettingsError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn save_overrides(
        &self,
        config: &StorageConfig,
        actor_id: Option<Uuid>,
        note: Option<&str>,
    ) -> Result<(), SettingsError> {
        let record = OverrideRecord {
            patch: StorageConfigPatch::from_config(config),
            actor_id,
            note: note.map(String::from),
            saved_at: Utc::now(),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| SettingsError::Serialization(e.to_string()))?;

        let mut guard = self
            .record
            .lock()
            .map_err(|_| SettingsError::Unavailable("settings lock poisoned".to_string()))?;
        *guard = Some(raw);
        Ok(())
    }
}

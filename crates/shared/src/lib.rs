//! Shared configuration types for Mediark.
//!
//! This crate provides the pieces both the storage core and the surrounding
//! application need to agree on:
//! - Storage configuration value objects and environment loading
//! - Partial-config patches for administrative overrides
//! - The settings-store collaborator interface for persisted overrides

pub mod config;
pub mod settings;

pub use config::{
    AppConfig, ConfigValidationError, EncryptionMode, RedactedConfig, StorageClass,
    StorageConfig, StorageConfigPatch,
};
pub use settings::{ConfigProvider, MemorySettingsStore, SettingsError, SettingsStore};

// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the crash reporter daemon
//!
//! These types are shared by the low-level system crate (`crash-sys`) and the
//! daemon itself (`crash-service`):
//!
//! - [`StorageLocation`] → a fixed or removable directory where crash dumps land
//! - [`CrashArtifact`] / [`CrashSignature`] → a discovered dump and its grouping key
//! - [`PrivacySettings`] / [`SettingChange`] → the observed user settings
//! - [`DaemonConfig`] → static daemon configuration loaded from TOML

pub mod artifact;
pub mod config;
pub mod error;
pub mod location;
pub mod settings;

pub use artifact::{
    CORE_FILE_SUFFIXES, CoreFileName, CrashArtifact, CrashSignature, LIFELOG_PACKAGE_PREFIX,
    is_core_file_name,
};
pub use config::{
    DaemonConfig, DbusConfig, LifelogConfig, LocationsConfig, RegistryConfig, RemovableLocation,
};
pub use error::TypesError;
pub use location::{LocationKind, StorageLocation};
pub use settings::{PrivacySettings, SettingChange, SettingKey, SettingValue};

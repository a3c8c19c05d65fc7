// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Static daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Privacy settings file observed for changes
    pub settings_file: PathBuf,
    pub locations: LocationsConfig,
    pub registry: RegistryConfig,
    pub lifelog: LifelogConfig,
    pub dbus: DbusConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            settings_file: PathBuf::from("/var/lib/crash-reporter/privacy.toml"),
            locations: LocationsConfig::default(),
            registry: RegistryConfig::default(),
            lifelog: LifelogConfig::default(),
            dbus: DbusConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, TypesError> {
        let config: DaemonConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.locations.canonical.as_os_str().is_empty() {
            return Err(TypesError::InvalidConfig(
                "locations.canonical must not be empty".to_string(),
            ));
        }
        if let Some(location) = self
            .locations
            .removable
            .iter()
            .find(|location| location.mount_point.as_os_str().is_empty())
        {
            return Err(TypesError::InvalidConfig(format!(
                "removable location {:?} has no mount point",
                location.directory
            )));
        }
        if self.lifelog.interval_secs == 0 {
            return Err(TypesError::InvalidConfig(
                "lifelog.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationsConfig {
    /// Canonical crash directory on fixed storage
    pub canonical: PathBuf,
    pub removable: Vec<RemovableLocation>,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            canonical: PathBuf::from("/var/lib/crash-reporter/core-dumps"),
            removable: vec![RemovableLocation {
                mount_point: PathBuf::from("/media/sdcard"),
                directory: PathBuf::from("core-dumps"),
            }],
        }
    }
}

/// Crash directory on removable media, relative to its mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovableLocation {
    pub mount_point: PathBuf,
    #[serde(default = "default_core_directory")]
    pub directory: PathBuf,
}

impl RemovableLocation {
    pub fn core_dir(&self) -> PathBuf {
        self.mount_point.join(&self.directory)
    }
}

fn default_core_directory() -> PathBuf {
    PathBuf::from("core-dumps")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Quiet period after the last mount-state change before recomputing
    pub debounce_ms: u64,
    /// How often the mount table is polled for removable media changes
    pub mount_poll_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            mount_poll_ms: 1_000,
        }
    }
}

impl RegistryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn mount_poll(&self) -> Duration {
        Duration::from_millis(self.mount_poll_ms.max(1))
    }
}

/// Lifelog sampling parameters
///
/// Commands are run through `sh -c` with their standard output appended to
/// the lifelog file. `archive_command` receives `{archive}` and `{log}`
/// placeholders and is expected to remove the log once packaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifelogConfig {
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    pub max_samples: u32,
    pub max_age_secs: u64,
    pub file_name: String,
    pub package_prefix: String,
    pub header_commands: Vec<String>,
    pub sample_commands: Vec<String>,
    pub archive_command: String,
}

impl Default for LifelogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            min_interval_secs: 10 * 60,
            max_samples: 24,
            max_age_secs: 12 * 60 * 60,
            file_name: "lifelog".to_string(),
            package_prefix: crate::artifact::LIFELOG_PACKAGE_PREFIX.to_string(),
            header_commands: vec![
                "echo LL_ID_GEN hostname=`hostname`,kernel=`uname -r`,machine=`uname -m`,"
                    .to_string(),
            ],
            sample_commands: vec![
                "echo LL_TICK date=`date +%s`,uptime=`cat /proc/uptime`,\
                 loadavg=`awk '{print $1,$2,$3}' /proc/loadavg`,\
                 memfree=`awk '/MemFree:/{print $2}' /proc/meminfo`,"
                    .to_string(),
            ],
            archive_command: "lzop -U -o\"{archive}\" \"{log}\"".to_string(),
        }
    }
}

impl LifelogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Bus names and object paths of the daemon and its collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbusConfig {
    pub service_name: String,
    pub object_path: String,
    pub ui_service: String,
    pub ui_path: String,
    pub uploader_service: String,
    pub uploader_path: String,
}

impl Default for DbusConfig {
    fn default() -> Self {
        Self {
            service_name: "org.crashreporter.Daemon".to_string(),
            object_path: "/org/crashreporter/Daemon".to_string(),
            ui_service: "org.crashreporter.UI".to_string(),
            ui_path: "/org/crashreporter/UI".to_string(),
            uploader_service: "org.crashreporter.AutoUploader".to_string(),
            uploader_path: "/org/crashreporter/AutoUploader".to_string(),
        }
    }
}

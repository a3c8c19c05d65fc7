// SPDX-License-Identifier: GPL-3.0-only

//! Privacy settings store
//!
//! Settings live in a small TOML file owned by the settings UI. The daemon
//! reads it at startup, follows later edits through an inotify watch on the
//! containing directory and writes back only the notifications flag.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crash_sys::{DirWatcher, WatchEventKind};
use crash_types::{PrivacySettings, SettingChange};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};

/// Source of the privacy settings snapshot and its changes
#[async_trait]
pub trait SettingsStore: Send {
    /// Read and validate the settings; failure is fatal at startup
    fn load(&mut self) -> Result<PrivacySettings>;

    /// Start observing changes made by other processes
    fn observe(&mut self) -> Result<()>;

    fn current(&self) -> PrivacySettings;

    fn persist_notifications(&mut self, enabled: bool) -> Result<()>;

    /// Wait for the next non-empty batch of changes
    ///
    /// Never resolves when the store is not observing. Must be cancel safe.
    async fn next_changes(&mut self) -> Vec<SettingChange>;
}

pub struct FileSettingsStore {
    path: PathBuf,
    current: PrivacySettings,
    watcher: Option<DirWatcher>,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: PrivacySettings::default(),
            watcher: None,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn write_atomically(&self, contents: &str) -> io::Result<()> {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "settings".to_string());
        let temp = self.directory().join(format!(".{name}.tmp"));

        fs::write(&temp, contents)?;
        fs::rename(&temp, &self.path)
    }

    fn reload(&mut self) -> Vec<SettingChange> {
        match read_settings(&self.path) {
            Ok(next) => {
                let changes = self.current.diff(&next);
                self.current = next;
                changes
            }
            Err(e) => {
                warn!("Ignoring settings update: {}", e);
                Vec::new()
            }
        }
    }
}

fn read_settings(path: &Path) -> Result<PrivacySettings> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No settings file at {}; using defaults", path.display());
            return Ok(PrivacySettings::default());
        }
        Err(e) => {
            return Err(ServiceError::InvalidSettings(format!(
                "{}: {}",
                path.display(),
                e
            )));
        }
    };

    PrivacySettings::from_toml_str(&contents)
        .map_err(|e| ServiceError::InvalidSettings(format!("{}: {}", path.display(), e)))
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    fn load(&mut self) -> Result<PrivacySettings> {
        self.current = read_settings(&self.path)?;
        info!("Loaded settings from {}: {:?}", self.path.display(), self.current);
        Ok(self.current)
    }

    fn observe(&mut self) -> Result<()> {
        let dir = self.directory();
        fs::create_dir_all(&dir)?;

        let mut watcher = DirWatcher::new()?;
        watcher.watch(&dir)?;
        self.watcher = Some(watcher);
        debug!("Observing settings in {}", dir.display());
        Ok(())
    }

    fn current(&self) -> PrivacySettings {
        self.current
    }

    fn persist_notifications(&mut self, enabled: bool) -> Result<()> {
        let mut next = self.current;
        next.notifications = enabled;
        self.write_atomically(&next.to_toml_string()?)?;
        self.current = next;
        info!("Persisted notifications = {}", enabled);
        Ok(())
    }

    async fn next_changes(&mut self) -> Vec<SettingChange> {
        loop {
            let Some(watcher) = self.watcher.as_mut() else {
                return std::future::pending().await;
            };

            let events = match watcher.next_events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Settings watch failed, no longer observing: {}", e);
                    self.watcher = None;
                    continue;
                }
            };

            let touched = events
                .iter()
                .any(|event| {
                    event.kind == WatchEventKind::Created
                        && event.path.file_name() == self.path.file_name()
                });
            if !touched {
                continue;
            }

            let changes = self.reload();
            if !changes.is_empty() {
                return changes;
            }
        }
    }
}

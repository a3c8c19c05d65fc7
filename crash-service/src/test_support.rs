// SPDX-License-Identifier: GPL-3.0-only

//! Shared fixtures for the daemon's unit tests

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crash_sys::{CommandRunner, ShellRunner};
use crash_types::{PrivacySettings, SettingChange};
use tokio::sync::mpsc;

use crate::contracts::{
    CrashReporterUi, DialogKind, FallbackNotifier, NotificationHandle, UploadQueue,
};
use crate::daemon::{DaemonHandle, ServiceRegistrar};
use crate::error::{Result, ServiceError};
use crate::registry::MountProbe;
use crate::settings::SettingsStore;

static COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct TempDir {
    pub path: PathBuf,
}

impl TempDir {
    pub fn new(label: &str) -> Self {
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "crash-service-{label}-{}-{unique}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[derive(Default)]
pub struct FakeProbe {
    mounted: Mutex<HashSet<PathBuf>>,
}

impl FakeProbe {
    pub fn set(&self, mount_point: &Path, mounted: bool) {
        let mut set = self.mounted.lock().expect("probe lock");
        if mounted {
            set.insert(mount_point.to_path_buf());
        } else {
            set.remove(mount_point);
        }
    }
}

impl MountProbe for FakeProbe {
    fn is_mounted(&self, mount_point: &Path) -> bool {
        self.mounted
            .lock()
            .expect("probe lock")
            .contains(mount_point)
    }
}

#[derive(Default)]
pub struct RecordingUploads {
    batches: Mutex<Vec<Vec<PathBuf>>>,
}

impl RecordingUploads {
    pub fn batches(&self) -> Vec<Vec<PathBuf>> {
        self.batches.lock().expect("uploads lock").clone()
    }

    pub fn uploaded(&self) -> Vec<PathBuf> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl UploadQueue for RecordingUploads {
    async fn enqueue(&self, files: &[PathBuf]) -> Result<()> {
        self.batches
            .lock()
            .expect("uploads lock")
            .push(files.to_vec());
        Ok(())
    }
}

pub type DialogRequest = (DialogKind, Vec<PathBuf>);

#[derive(Default)]
pub struct RecordingUi {
    requests: Mutex<Vec<DialogRequest>>,
    fail: AtomicBool,
}

impl RecordingUi {
    pub fn failing() -> Self {
        let ui = Self::default();
        ui.fail.store(true, Ordering::Relaxed);
        ui
    }

    pub fn requests(&self) -> Vec<DialogRequest> {
        self.requests.lock().expect("ui lock").clone()
    }
}

#[async_trait]
impl CrashReporterUi for RecordingUi {
    async fn request_dialog(&self, dialog: DialogKind, files: &[PathBuf]) -> Result<()> {
        self.requests
            .lock()
            .expect("ui lock")
            .push((dialog, files.to_vec()));
        if self.fail.load(Ordering::Relaxed) {
            return Err(ServiceError::Collaborator("UI not installed".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String, Duration)>>,
    closed: Mutex<Vec<NotificationHandle>>,
    next_id: AtomicU32,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::Relaxed);
        notifier
    }

    pub fn shown(&self) -> Vec<(String, String, Duration)> {
        self.shown.lock().expect("notifier lock").clone()
    }

    pub fn closed(&self) -> Vec<NotificationHandle> {
        self.closed.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl FallbackNotifier for RecordingNotifier {
    async fn show(&self, summary: &str, body: &str, timeout: Duration) -> Result<NotificationHandle> {
        self.shown
            .lock()
            .expect("notifier lock")
            .push((summary.to_string(), body.to_string(), timeout));
        if self.fail.load(Ordering::Relaxed) {
            return Err(ServiceError::Collaborator("no notification server".to_string()));
        }
        Ok(NotificationHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1))
    }

    async fn close(&self, handle: NotificationHandle) -> Result<()> {
        self.closed.lock().expect("notifier lock").push(handle);
        Ok(())
    }
}

/// Runs commands for real and remembers them
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("runner lock").clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &str) -> crash_sys::Result<i32> {
        self.commands
            .lock()
            .expect("runner lock")
            .push(command.to_string());
        ShellRunner.run(command)
    }
}

/// Settings held in memory; snapshots published through [`SettingsRemote`]
pub struct MemorySettingsStore {
    current: PrivacySettings,
    updates: mpsc::UnboundedReceiver<PrivacySettings>,
    shared: Arc<RemoteState>,
    observing: bool,
}

#[derive(Default)]
struct RemoteState {
    persisted: Mutex<Vec<bool>>,
    fail_load: AtomicBool,
}

pub struct SettingsRemote {
    updates: mpsc::UnboundedSender<PrivacySettings>,
    shared: Arc<RemoteState>,
}

impl MemorySettingsStore {
    pub fn new(initial: PrivacySettings) -> (Self, SettingsRemote) {
        let (tx, updates) = mpsc::unbounded_channel();
        let shared = Arc::new(RemoteState::default());
        let store = Self {
            current: initial,
            updates,
            shared: shared.clone(),
            observing: false,
        };
        (
            store,
            SettingsRemote {
                updates: tx,
                shared,
            },
        )
    }
}

impl SettingsRemote {
    pub fn publish(&self, next: PrivacySettings) {
        self.updates.send(next).expect("store alive");
    }

    pub fn fail_load(&self) {
        self.shared.fail_load.store(true, Ordering::Relaxed);
    }

    /// Values written through `persist_notifications`, in order
    pub fn persisted(&self) -> Vec<bool> {
        self.shared.persisted.lock().expect("persisted lock").clone()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    fn load(&mut self) -> Result<PrivacySettings> {
        if self.shared.fail_load.load(Ordering::Relaxed) {
            return Err(ServiceError::InvalidSettings("unreadable".to_string()));
        }
        Ok(self.current)
    }

    fn observe(&mut self) -> Result<()> {
        self.observing = true;
        Ok(())
    }

    fn current(&self) -> PrivacySettings {
        self.current
    }

    fn persist_notifications(&mut self, enabled: bool) -> Result<()> {
        self.current.notifications = enabled;
        self.shared
            .persisted
            .lock()
            .expect("persisted lock")
            .push(enabled);
        Ok(())
    }

    async fn next_changes(&mut self) -> Vec<SettingChange> {
        loop {
            if !self.observing {
                return std::future::pending().await;
            }
            let Some(next) = self.updates.recv().await else {
                return std::future::pending().await;
            };
            let changes = self.current.diff(&next);
            self.current = next;
            if !changes.is_empty() {
                return changes;
            }
        }
    }
}

/// Registrar that succeeds unless the name is already "taken"
///
/// Clones share the registration count.
#[derive(Default, Clone)]
pub struct FakeRegistrar {
    taken: bool,
    registrations: Arc<AtomicU32>,
}

impl FakeRegistrar {
    pub fn taken() -> Self {
        Self {
            taken: true,
            ..Self::default()
        }
    }

    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ServiceRegistrar for FakeRegistrar {
    async fn register(&mut self, _handle: DaemonHandle) -> Result<()> {
        if self.taken {
            return Err(ServiceError::AlreadyRunning("org.crashreporter.Daemon".to_string()));
        }
        self.registrations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

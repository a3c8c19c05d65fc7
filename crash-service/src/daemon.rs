// SPDX-License-Identifier: GPL-3.0-only

//! The daemon control loop
//!
//! [`DaemonController`] owns the registry, the monitor and the lifelog and
//! runs every reaction on a single task: IPC requests arrive as
//! [`DaemonCommand`]s, settings changes come from the [`SettingsStore`] and
//! filesystem, mount and timer events are polled in the same `select!`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crash_sys::{CommandRunner, WatchEvent};
use crash_types::{CrashArtifact, DaemonConfig, SettingChange, SettingKey};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::contracts::{
    CrashReporterUi, DialogKind, FallbackNotifier, NotificationHandle, UploadQueue,
};
use crate::error::{Result, ServiceError};
use crate::lifelog::Lifelog;
use crate::monitor::{CrashMonitor, MonitorPolicy};
use crate::registry::{MountProbe, MountStateIndicator, RegistryEvent, StorageLocationRegistry};
use crate::settings::SettingsStore;
use crate::timer::sleep_until_deadline;

const FALLBACK_SUMMARY: &str = "This system has stored crash reports.";
const FALLBACK_BODY: &str = "Unable to start Crash Reporter UI.";
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Claims the daemon's IPC identity; only one instance may hold it
#[async_trait]
pub trait ServiceRegistrar: Send {
    async fn register(&mut self, handle: DaemonHandle) -> Result<()>;
}

/// Requests forwarded from IPC handlers to the control loop
#[derive(Debug)]
pub enum DaemonCommand {
    StartMonitoring {
        from_request: bool,
        reply: oneshot::Sender<()>,
    },
    StopMonitoring {
        from_request: bool,
        reply: oneshot::Sender<()>,
    },
    RefreshRegistry {
        reply: oneshot::Sender<()>,
    },
    CollectAllCoreFiles {
        reply: oneshot::Sender<Vec<PathBuf>>,
    },
}

/// Cloneable sender side of the control loop
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    commands: mpsc::UnboundedSender<DaemonCommand>,
}

impl DaemonHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DaemonCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ServiceError::ControllerGone)?;
        response.await.map_err(|_| ServiceError::ControllerGone)
    }

    pub async fn start_core_monitoring(&self, from_request: bool) -> Result<()> {
        self.request(|reply| DaemonCommand::StartMonitoring {
            from_request,
            reply,
        })
        .await
    }

    pub async fn stop_core_monitoring(&self, from_request: bool) -> Result<()> {
        self.request(|reply| DaemonCommand::StopMonitoring {
            from_request,
            reply,
        })
        .await
    }

    pub async fn refresh_registry(&self) -> Result<()> {
        self.request(|reply| DaemonCommand::RefreshRegistry { reply })
            .await
    }

    pub async fn collect_all_core_files(&self) -> Result<Vec<PathBuf>> {
        self.request(|reply| DaemonCommand::CollectAllCoreFiles { reply })
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Starting,
    /// Running without a crash monitor
    Idle,
    Monitoring,
}

/// External services the controller talks to
#[derive(Clone)]
pub struct Collaborators {
    pub ui: Arc<dyn CrashReporterUi>,
    pub notifier: Arc<dyn FallbackNotifier>,
    pub uploads: Arc<dyn UploadQueue>,
    pub runner: Arc<dyn CommandRunner>,
}

pub struct DaemonController {
    config: DaemonConfig,
    settings: Box<dyn SettingsStore>,
    collaborators: Collaborators,
    registry: StorageLocationRegistry,
    registry_events: mpsc::UnboundedReceiver<RegistryEvent>,
    indicator: MountStateIndicator,
    monitor: Option<CrashMonitor>,
    lifelog: Lifelog,
    state: DaemonState,
    commands: mpsc::UnboundedReceiver<DaemonCommand>,
    handle: DaemonHandle,
    fallback_notification: Option<NotificationHandle>,
}

impl DaemonController {
    pub fn new(
        config: DaemonConfig,
        settings: Box<dyn SettingsStore>,
        collaborators: Collaborators,
        probe: Arc<dyn MountProbe>,
    ) -> Self {
        let (events_tx, registry_events) = mpsc::unbounded_channel();
        let registry = StorageLocationRegistry::initialize(
            &config.locations,
            &config.registry,
            probe.clone(),
            events_tx,
        );
        let indicator = MountStateIndicator::new(registry.removable_mount_points(), probe);
        let lifelog = Lifelog::new(config.lifelog.clone(), collaborators.runner.clone());
        let (commands_tx, commands) = mpsc::unbounded_channel();

        Self {
            config,
            settings,
            collaborators,
            registry,
            registry_events,
            indicator,
            monitor: None,
            lifelog,
            state: DaemonState::Stopped,
            commands,
            handle: DaemonHandle {
                commands: commands_tx,
            },
            fallback_notification: None,
        }
    }

    #[cfg(test)]
    pub fn handle(&self) -> DaemonHandle {
        self.handle.clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Run the startup sequence; any error here must end the process
    pub async fn initiate_daemon(&mut self, registrar: &mut dyn ServiceRegistrar) -> Result<()> {
        info!("Starting crash reporter daemon...");
        self.state = DaemonState::Starting;

        let settings = match self.settings.load() {
            Ok(settings) => settings,
            Err(e) => {
                self.state = DaemonState::Stopped;
                return Err(e);
            }
        };
        if let Err(e) = self.finish_startup(registrar).await {
            self.state = DaemonState::Stopped;
            return Err(e);
        }

        if settings.monitoring_wanted() {
            self.start_monitoring(false);
        }

        if settings.automatic_sending {
            let files = self.registry.collect_all_core_files();
            if !files.is_empty() {
                info!("Queueing {} stored crash reports for upload", files.len());
                if let Err(e) = self.collaborators.uploads.enqueue(&files).await {
                    warn!("Failed to queue stored crash reports: {}", e);
                }
            }
        } else if settings.notifications {
            let files = self.registry.collect_all_core_files();
            if !files.is_empty() {
                self.offer_stored_reports(&files).await;
            }
        }

        self.set_lifelog_enabled(settings.lifelog);
        self.drain_registry_events();

        info!("Crash reporter daemon started in state {:?}", self.state);
        Ok(())
    }

    async fn finish_startup(&mut self, registrar: &mut dyn ServiceRegistrar) -> Result<()> {
        registrar.register(self.handle.clone()).await?;
        self.settings.observe()?;
        self.state = DaemonState::Idle;
        Ok(())
    }

    /// Start after `delay`, then serve until SIGINT or SIGTERM
    pub async fn run(
        &mut self,
        registrar: &mut dyn ServiceRegistrar,
        delay: Option<Duration>,
    ) -> Result<()> {
        if let Some(delay) = delay.filter(|delay| !delay.is_zero()) {
            info!("Delaying daemon startup by {:?}", delay);
            tokio::time::sleep(delay).await;
        }
        self.initiate_daemon(registrar).await?;

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut mount_poll = interval(self.config.registry.mount_poll());
        mount_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let debounce_deadline = self.registry.debounce_deadline();

            tokio::select! {
                _ = interrupt.recv() => {
                    info!("Received interrupt signal");
                    break;
                }
                _ = terminate.recv() => {
                    info!("Received termination signal");
                    break;
                }
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                changes = self.settings.next_changes() => {
                    for change in changes {
                        self.setting_value_changed(change);
                    }
                }
                _ = mount_poll.tick() => self.poll_mount_state(),
                _ = sleep_until_deadline(debounce_deadline) => self.registry.on_debounce_expired(),
                events = next_monitor_events(&mut self.monitor) => {
                    self.handle_monitor_events(events).await;
                }
                _ = self.lifelog.tick() => {
                    let dir = self.registry.canonical_path().to_path_buf();
                    self.lifelog.update(&dir);
                }
            }

            self.drain_registry_events();
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_command(&mut self, command: DaemonCommand) {
        match command {
            DaemonCommand::StartMonitoring {
                from_request,
                reply,
            } => {
                self.start_monitoring(from_request);
                let _ = reply.send(());
            }
            DaemonCommand::StopMonitoring {
                from_request,
                reply,
            } => {
                self.stop_monitoring(from_request);
                let _ = reply.send(());
            }
            DaemonCommand::RefreshRegistry { reply } => {
                self.registry.refresh_registry();
                self.drain_registry_events();
                let _ = reply.send(());
            }
            DaemonCommand::CollectAllCoreFiles { reply } => {
                let _ = reply.send(self.registry.collect_all_core_files());
            }
        }
    }

    /// Start the crash monitor unless it is already running
    ///
    /// A started monitor requested over IPC turns notifications on in the
    /// persisted settings.
    pub fn start_monitoring(&mut self, from_request: bool) {
        debug!("Core monitoring requested; from request = {}", from_request);
        if self.monitor.is_some() {
            return;
        }

        let policy = MonitorPolicy::from_settings(&self.settings.current());
        match CrashMonitor::new(&self.registry, policy, self.collaborators.uploads.clone()) {
            Ok(monitor) => {
                self.monitor = Some(monitor);
                self.state = DaemonState::Monitoring;
                info!("Core monitoring started with {:?}", policy);
            }
            Err(e) => {
                error!("Failed to start core monitoring: {}", e);
                return;
            }
        }

        if from_request {
            self.persist_notifications(true);
        }
    }

    /// Stop the crash monitor if it is running
    pub fn stop_monitoring(&mut self, from_request: bool) {
        let Some(mut monitor) = self.monitor.take() else {
            return;
        };
        monitor.stop();
        if self.state == DaemonState::Monitoring {
            self.state = DaemonState::Idle;
        }
        info!("Core monitoring stopped");

        if from_request {
            self.persist_notifications(false);
        }
    }

    fn persist_notifications(&mut self, enabled: bool) {
        if let Err(e) = self.settings.persist_notifications(enabled) {
            warn!("Failed to persist notifications setting: {}", e);
        }
    }

    /// React to one changed setting
    ///
    /// The settings store already holds the new snapshot when this runs.
    pub fn setting_value_changed(&mut self, change: SettingChange) {
        debug!("Setting {} changed to {}", change.key, change.value);
        let settings = self.settings.current();

        match change.key {
            SettingKey::Notifications | SettingKey::AutomaticSending => {
                if change.value.as_bool() {
                    self.start_monitoring(false);
                } else if !settings.monitoring_wanted() {
                    self.stop_monitoring(false);
                }

                if change.key == SettingKey::AutomaticSending
                    && let Some(monitor) = self.monitor.as_mut()
                {
                    monitor.set_auto_upload(change.value.as_bool());
                }
            }
            SettingKey::AutoDeleteDuplicates => {
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.set_auto_delete(change.value.as_bool());
                }
            }
            SettingKey::AutoDeleteMaxSimilarCores => {
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.set_auto_delete_max_similar_cores(change.value.as_int());
                }
            }
            SettingKey::Lifelog => self.set_lifelog_enabled(change.value.as_bool()),
        }
    }

    fn set_lifelog_enabled(&mut self, enabled: bool) {
        let dir = self.registry.canonical_path().to_path_buf();
        self.lifelog.set_enabled(enabled, &dir);
    }

    fn poll_mount_state(&mut self) {
        for (mount_point, mounted) in self.indicator.poll() {
            self.registry.mount_state_changed(&mount_point, mounted);
        }
    }

    fn drain_registry_events(&mut self) {
        while let Ok(event) = self.registry_events.try_recv() {
            match event {
                RegistryEvent::LocationsUpdated(locations) => {
                    debug!("{} crash locations available", locations.len());
                    if let Some(monitor) = self.monitor.as_mut() {
                        monitor.rewatch(&self.registry);
                    }
                }
                RegistryEvent::RefreshNeeded => debug!("Registry refresh processed"),
            }
        }
    }

    async fn handle_monitor_events(&mut self, events: Result<Vec<WatchEvent>>) {
        let events = match events {
            Ok(events) => events,
            Err(e) => {
                error!("Crash directory watch failed: {}", e);
                self.stop_monitoring(false);
                return;
            }
        };

        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        for artifact in monitor.handle_events(events).await {
            self.new_core_detected(&artifact).await;
        }
    }

    /// Dispatch a crash the monitor has already retained (and uploaded if
    /// automatic sending is on)
    async fn new_core_detected(&mut self, artifact: &CrashArtifact) {
        let settings = self.settings.current();
        if settings.notifications && !settings.automatic_sending {
            let files = std::slice::from_ref(&artifact.path);
            if let Err(e) = self
                .collaborators
                .ui
                .request_dialog(DialogKind::NewCore, files)
                .await
            {
                warn!("Failed to notify about {}: {}", artifact.path.display(), e);
            }
        }

        let dir = self.registry.canonical_path().to_path_buf();
        self.lifelog.record_core(&dir, &artifact.path);
    }

    async fn offer_stored_reports(&mut self, files: &[PathBuf]) {
        info!("Offering {} stored crash reports", files.len());
        let requested = self
            .collaborators
            .ui
            .request_dialog(DialogKind::SendSelected, files)
            .await;
        let Err(e) = requested else {
            return;
        };

        warn!("Unable to start crash reporter UI: {}", e);
        match self
            .collaborators
            .notifier
            .show(FALLBACK_SUMMARY, FALLBACK_BODY, FALLBACK_TIMEOUT)
            .await
        {
            Ok(handle) => self.fallback_notification = Some(handle),
            Err(e) => warn!("Fallback notification failed: {}", e),
        }
    }

    /// Release watches, timers and the fallback notification
    pub async fn shutdown(&mut self) {
        info!("Crash reporter daemon shutting down");
        self.stop_monitoring(false);
        self.set_lifelog_enabled(false);
        self.registry.cancel_pending();

        if let Some(handle) = self.fallback_notification.take()
            && let Err(e) = self.collaborators.notifier.close(handle).await
        {
            debug!("Closing fallback notification failed: {}", e);
        }
        self.state = DaemonState::Stopped;
    }
}

async fn next_monitor_events(monitor: &mut Option<CrashMonitor>) -> Result<Vec<WatchEvent>> {
    match monitor {
        Some(monitor) => monitor.next_events().await,
        None => std::future::pending().await,
    }
}

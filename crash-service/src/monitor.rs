// SPDX-License-Identifier: GPL-3.0-only

//! Crash directory monitoring
//!
//! Keeps exactly one inotify watch per available storage location, turns
//! completed file appearances into [`CrashArtifact`]s and enforces the
//! duplicate retention policy before anything is dispatched.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crash_sys::{DirWatcher, WatchEvent, WatchEventKind};
use crash_types::{CrashArtifact, PrivacySettings, is_core_file_name};
use tracing::{debug, info, warn};

use crate::contracts::UploadQueue;
use crate::error::Result;
use crate::registry::StorageLocationRegistry;
use crate::retention::RetentionIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub auto_delete: bool,
    pub max_similar_cores: u32,
    pub auto_upload: bool,
}

impl MonitorPolicy {
    pub fn from_settings(settings: &PrivacySettings) -> Self {
        Self {
            auto_delete: settings.auto_delete_duplicates,
            max_similar_cores: settings.auto_delete_max_similar_cores,
            auto_upload: settings.automatic_sending,
        }
    }

    fn cap(&self) -> Option<usize> {
        self.auto_delete
            .then_some(self.max_similar_cores as usize)
    }
}

pub struct CrashMonitor {
    watcher: DirWatcher,
    retention: RetentionIndex,
    /// Paths already raised (or seeded) and not removed since
    reported: HashSet<PathBuf>,
    policy: MonitorPolicy,
    uploads: Arc<dyn UploadQueue>,
    stopped: bool,
}

impl CrashMonitor {
    /// Create the watcher and watch every available location of `registry`
    pub fn new(
        registry: &StorageLocationRegistry,
        policy: MonitorPolicy,
        uploads: Arc<dyn UploadQueue>,
    ) -> Result<Self> {
        let mut monitor = Self {
            watcher: DirWatcher::new()?,
            retention: RetentionIndex::new(),
            reported: HashSet::new(),
            policy,
            uploads,
            stopped: false,
        };
        monitor.rewatch(registry);
        Ok(monitor)
    }

    /// Tear down all watches and follow the registry's current locations
    pub fn rewatch(&mut self, registry: &StorageLocationRegistry) {
        if self.stopped {
            return;
        }

        self.watcher.unwatch_all();
        self.retention.clear();
        self.reported.clear();

        for location in registry.available_locations() {
            if self.watcher.is_watching(&location.path) {
                continue;
            }
            if let Err(e) = self.watcher.watch(&location.path) {
                warn!(
                    "Failed to watch crash location {}: {}",
                    location.path.display(),
                    e
                );
                continue;
            }
            self.seed(&location.path);
        }

        info!("Monitoring crash locations: {:?}", self.watcher.watched());
    }

    /// Track dumps already present in `dir` without reporting them
    fn seed(&mut self, dir: &Path) {
        let files = match crash_sys::list_core_files(dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to scan {}: {}", dir.display(), e);
                return;
            }
        };

        let mut existing: Vec<CrashArtifact> = files
            .into_iter()
            .filter_map(|path| {
                let metadata = fs::metadata(&path).ok()?;
                let modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                CrashArtifact::new(path, modified, metadata.len())
            })
            .collect();
        existing.sort_by_key(|artifact| artifact.discovered_at);

        for artifact in existing {
            self.reported.insert(artifact.path.clone());
            self.retention.insert(artifact, None);
        }
    }

    /// Wait for filesystem activity in the watched locations
    pub async fn next_events(&mut self) -> Result<Vec<WatchEvent>> {
        Ok(self.watcher.next_events().await?)
    }

    /// Apply a batch of filesystem events; returns the newly detected dumps
    pub async fn handle_events(&mut self, events: Vec<WatchEvent>) -> Vec<CrashArtifact> {
        let mut detected = Vec::new();
        if self.stopped {
            return detected;
        }

        for event in events {
            match event.kind {
                WatchEventKind::Created => {
                    if let Some(artifact) = self.classify(&event.path).await {
                        detected.push(artifact);
                    }
                }
                WatchEventKind::Removed => self.forget(&event.path),
            }
        }

        detected
    }

    async fn classify(&mut self, path: &Path) -> Option<CrashArtifact> {
        let name = path.file_name()?.to_str()?;
        if !is_core_file_name(name) {
            return None;
        }
        if self.reported.contains(path) {
            debug!("Already reported {}", path.display());
            return None;
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return None,
            Err(e) => {
                debug!("{} vanished before classification: {}", path.display(), e);
                return None;
            }
        };
        let artifact = CrashArtifact::new(path, Utc::now(), metadata.len())?;

        for evicted in self.retention.insert(artifact.clone(), self.policy.cap()) {
            self.evict(evicted);
        }
        self.reported.insert(artifact.path.clone());

        match &artifact.signature {
            Some(signature) => info!(
                path = %artifact.path.display(),
                %signature,
                size = artifact.size_bytes,
                "New crash dump detected"
            ),
            None => info!(
                path = %artifact.path.display(),
                size = artifact.size_bytes,
                "New crash report package detected"
            ),
        }

        if self.policy.auto_upload {
            let files = std::slice::from_ref(&artifact.path);
            if let Err(e) = self.uploads.enqueue(files).await {
                warn!("Failed to queue {} for upload: {}", artifact.path.display(), e);
            }
        }

        Some(artifact)
    }

    fn evict(&mut self, artifact: CrashArtifact) {
        self.reported.remove(&artifact.path);
        match fs::remove_file(&artifact.path) {
            Ok(()) => info!("Deleted duplicate crash dump {}", artifact.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Duplicate {} already gone", artifact.path.display())
            }
            Err(e) => warn!(
                "Failed to delete duplicate crash dump {}: {}",
                artifact.path.display(),
                e
            ),
        }
    }

    fn forget(&mut self, path: &Path) {
        let tracked = self.retention.remove(path);
        let reported = self.reported.remove(path);
        if tracked || reported {
            debug!("Crash dump {} removed", path.display());
        }
    }

    pub fn set_auto_delete(&mut self, enabled: bool) {
        debug!("Auto-delete duplicates: {}", enabled);
        self.policy.auto_delete = enabled;
    }

    pub fn set_auto_delete_max_similar_cores(&mut self, max: u32) {
        debug!("Maximum similar crash dumps: {}", max);
        self.policy.max_similar_cores = max;
    }

    pub fn set_auto_upload(&mut self, enabled: bool) {
        debug!("Automatic upload: {}", enabled);
        self.policy.auto_upload = enabled;
    }

    #[cfg(test)]
    pub fn policy(&self) -> MonitorPolicy {
        self.policy
    }

    #[cfg(test)]
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watcher.watched()
    }

    #[cfg(test)]
    pub fn retained(&self) -> &RetentionIndex {
        &self.retention
    }

    /// Release all watches and tracked artifacts; later calls do nothing
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.watcher.unwatch_all();
        self.retention.clear();
        self.reported.clear();
        self.stopped = true;
        info!("Crash monitoring stopped");
    }

    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crash_types::{CrashSignature, LocationsConfig, RegistryConfig, RemovableLocation};
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::RegistryEvent;
    use crate::test_support::{FakeProbe, RecordingUploads, TempDir};

    const POLICY: MonitorPolicy = MonitorPolicy {
        auto_delete: true,
        max_similar_cores: 2,
        auto_upload: false,
    };

    struct Fixture {
        temp: TempDir,
        probe: Arc<FakeProbe>,
        registry: StorageLocationRegistry,
        _events: mpsc::UnboundedReceiver<RegistryEvent>,
        uploads: Arc<RecordingUploads>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new("monitor");
            let probe = Arc::new(FakeProbe::default());
            let locations = LocationsConfig {
                canonical: temp.path.join("internal"),
                removable: vec![RemovableLocation {
                    mount_point: temp.path.join("media"),
                    directory: PathBuf::from("core-dumps"),
                }],
            };
            let (tx, events) = mpsc::unbounded_channel();
            let registry = StorageLocationRegistry::initialize(
                &locations,
                &RegistryConfig::default(),
                probe.clone(),
                tx,
            );
            Self {
                temp,
                probe,
                registry,
                _events: events,
                uploads: Arc::new(RecordingUploads::default()),
            }
        }

        fn internal(&self) -> PathBuf {
            self.temp.path.join("internal")
        }

        fn monitor(&self, policy: MonitorPolicy) -> CrashMonitor {
            CrashMonitor::new(&self.registry, policy, self.uploads.clone()).expect("monitor")
        }
    }

    /// Feed events into the monitor until `wanted` dumps were detected
    async fn detect(monitor: &mut CrashMonitor, wanted: usize) -> Vec<CrashArtifact> {
        let mut detected = Vec::new();
        while detected.len() < wanted {
            let events = tokio::time::timeout(Duration::from_secs(5), monitor.next_events())
                .await
                .expect("events within timeout")
                .expect("read events");
            detected.extend(monitor.handle_events(events).await);
        }
        detected
    }

    #[tokio::test]
    async fn third_duplicate_evicts_the_oldest() {
        let fixture = Fixture::new();
        let mut monitor = fixture.monitor(POLICY);
        let dir = fixture.internal();
        let names = [
            "appX-01-11-1.rcore.lzo",
            "appX-01-11-2.rcore.lzo",
            "appX-01-11-3.rcore.lzo",
        ];

        for name in names {
            fs::write(dir.join(name), b"core").expect("write dump");
            let detected = detect(&mut monitor, 1).await;
            assert_eq!(detected[0].path, dir.join(name));
        }

        assert!(!dir.join(names[0]).exists());
        assert!(dir.join(names[1]).exists());
        assert!(dir.join(names[2]).exists());
        let signature = CrashSignature::new("appX", "SIGSEGV");
        assert_eq!(monitor.retained().count(&signature), 2);
    }

    #[tokio::test]
    async fn auto_upload_routes_new_dumps() {
        let fixture = Fixture::new();
        let mut monitor = fixture.monitor(MonitorPolicy {
            auto_upload: true,
            ..POLICY
        });

        let dump = fixture.internal().join("appY-01-6-7.rcore");
        fs::write(&dump, b"core").expect("write dump");
        detect(&mut monitor, 1).await;

        assert_eq!(fixture.uploads.uploaded(), vec![dump]);
    }

    #[tokio::test]
    async fn policy_changes_apply_to_the_next_dump() {
        let fixture = Fixture::new();
        let mut monitor = fixture.monitor(POLICY);
        let dir = fixture.internal();

        fs::write(dir.join("appX-01-11-1.rcore.lzo"), b"core").expect("write dump");
        detect(&mut monitor, 1).await;
        assert!(fixture.uploads.uploaded().is_empty());

        monitor.set_auto_upload(true);
        monitor.set_auto_delete_max_similar_cores(1);
        fs::write(dir.join("appX-01-11-2.rcore.lzo"), b"core").expect("write dump");
        detect(&mut monitor, 1).await;

        assert_eq!(
            fixture.uploads.uploaded(),
            vec![dir.join("appX-01-11-2.rcore.lzo")]
        );
        assert!(!dir.join("appX-01-11-1.rcore.lzo").exists());
    }

    #[tokio::test]
    async fn existing_dumps_are_seeded_not_reported() {
        let fixture = Fixture::new();
        let dir = fixture.internal();
        fs::write(dir.join("appX-01-11-1.rcore.lzo"), b"core").expect("write dump");
        fs::write(dir.join("appX-01-11-2.rcore.lzo"), b"core").expect("write dump");

        let mut monitor = fixture.monitor(POLICY);
        let signature = CrashSignature::new("appX", "SIGSEGV");
        assert_eq!(monitor.retained().count(&signature), 2);

        fs::write(dir.join("appX-01-11-3.rcore.lzo"), b"core").expect("write dump");
        let detected = detect(&mut monitor, 1).await;
        assert_eq!(detected.len(), 1);
        assert_eq!(monitor.retained().count(&signature), 2);
    }

    #[tokio::test]
    async fn non_matching_files_are_ignored() {
        let fixture = Fixture::new();
        let mut monitor = fixture.monitor(POLICY);
        let dir = fixture.internal();

        fs::write(dir.join("notes.txt"), b"text").expect("write file");
        fs::write(dir.join("appX-01-11-1.rcore.lzo"), b"core").expect("write dump");

        let detected = detect(&mut monitor, 1).await;
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].path, dir.join("appX-01-11-1.rcore.lzo"));
    }

    #[tokio::test]
    async fn rewatch_follows_the_registry_without_duplicates() {
        let mut fixture = Fixture::new();
        let mut monitor = fixture.monitor(POLICY);
        assert_eq!(monitor.watched_paths(), vec![fixture.internal()]);

        let media = fixture.temp.path.join("media");
        fixture.probe.set(&media, true);
        fixture.registry.refresh_registry();
        monitor.rewatch(&fixture.registry);
        monitor.rewatch(&fixture.registry);

        let mut expected = vec![fixture.internal(), media.join("core-dumps")];
        expected.sort();
        assert_eq!(monitor.watched_paths(), expected);
    }

    #[tokio::test]
    async fn external_deletion_is_forgotten() {
        let fixture = Fixture::new();
        let mut monitor = fixture.monitor(POLICY);
        let dump = fixture.internal().join("appX-01-11-1.rcore.lzo");

        fs::write(&dump, b"core").expect("write dump");
        detect(&mut monitor, 1).await;
        fs::remove_file(&dump).expect("remove dump");
        fs::write(&dump, b"core again").expect("rewrite dump");

        // The same name reappearing after deletion is a new crash.
        let detected = detect(&mut monitor, 1).await;
        assert_eq!(detected[0].path, dump);
    }

    #[tokio::test]
    async fn dump_recreated_while_media_was_away_is_reported_again() {
        let mut fixture = Fixture::new();
        let media = fixture.temp.path.join("media");
        fixture.probe.set(&media, true);
        fixture.registry.refresh_registry();
        let mut monitor = fixture.monitor(POLICY);
        let dump = media.join("core-dumps").join("appX-01-11-1.rcore.lzo");

        fs::write(&dump, b"core").expect("write dump");
        assert_eq!(detect(&mut monitor, 1).await[0].path, dump);

        fixture.probe.set(&media, false);
        fixture.registry.refresh_registry();
        monitor.rewatch(&fixture.registry);
        fs::remove_file(&dump).expect("remove dump");

        fixture.probe.set(&media, true);
        fixture.registry.refresh_registry();
        monitor.rewatch(&fixture.registry);
        fs::write(&dump, b"new core").expect("rewrite dump");

        assert_eq!(detect(&mut monitor, 1).await[0].path, dump);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let fixture = Fixture::new();
        let mut monitor = fixture.monitor(POLICY);

        monitor.stop();
        assert!(monitor.is_stopped());
        assert!(monitor.watched_paths().is_empty());
        assert!(monitor.retained().is_empty());

        monitor.stop();
        monitor.rewatch(&fixture.registry);
        assert!(monitor.watched_paths().is_empty());
    }
}

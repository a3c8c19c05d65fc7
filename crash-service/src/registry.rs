// SPDX-License-Identifier: GPL-3.0-only

//! Storage location registry
//!
//! Tracks the canonical crash directory plus any crash directories on
//! removable media. Mount-state changes are debounced: a burst of changes
//! results in a single recomputation once the registry has been quiet for
//! the configured delay.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crash_types::{LocationsConfig, RegistryConfig, StorageLocation};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::timer::DebounceTimer;

/// Answers whether a removable root is currently mounted
pub trait MountProbe: Send + Sync {
    fn is_mounted(&self, mount_point: &Path) -> bool;
}

/// Probe backed by the kernel mount table
#[derive(Debug, Default)]
pub struct ProcMountProbe;

impl MountProbe for ProcMountProbe {
    fn is_mounted(&self, mount_point: &Path) -> bool {
        match crash_sys::is_mount_point(mount_point) {
            Ok(mounted) => mounted,
            Err(e) => {
                warn!("Failed to read mount table for {}: {}", mount_point.display(), e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The ordered set of available locations changed
    LocationsUpdated(Vec<StorageLocation>),
    /// An explicit refresh was processed
    RefreshNeeded,
}

#[derive(Debug)]
struct Slot {
    location: StorageLocation,
    /// Mount point of a removable location; `None` for the fixed one
    mount_point: Option<PathBuf>,
}

pub struct StorageLocationRegistry {
    slots: Vec<Slot>,
    probe: Arc<dyn MountProbe>,
    debounce: DebounceTimer,
    events: mpsc::UnboundedSender<RegistryEvent>,
}

impl StorageLocationRegistry {
    /// Build the ordered location list and probe current availability
    ///
    /// Never fails: unreachable removable roots are simply unavailable.
    pub fn initialize(
        locations: &LocationsConfig,
        config: &RegistryConfig,
        probe: Arc<dyn MountProbe>,
        events: mpsc::UnboundedSender<RegistryEvent>,
    ) -> Self {
        if let Err(e) = fs::create_dir_all(&locations.canonical) {
            warn!(
                "Failed to create canonical crash directory {}: {}",
                locations.canonical.display(),
                e
            );
        }

        let mut slots = vec![Slot {
            location: StorageLocation::fixed(&locations.canonical),
            mount_point: None,
        }];
        slots.extend(
            locations
                .removable
                .iter()
                .enumerate()
                .map(|(index, removable)| Slot {
                    location: StorageLocation::removable(removable.core_dir(), index + 1, false),
                    mount_point: Some(removable.mount_point.clone()),
                }),
        );

        let mut registry = Self {
            slots,
            probe,
            debounce: DebounceTimer::new(config.debounce()),
            events,
        };
        registry.recompute();

        info!(
            "Storage location registry initialized: {:?}",
            registry.location_paths()
        );
        registry
    }

    /// Record a mount-state indicator update; (re)starts the debounce window
    pub fn mount_state_changed(&mut self, mount_point: &Path, mounted: bool) {
        debug!(
            "Mount state of {} changed to {}; debouncing",
            mount_point.display(),
            mounted
        );
        self.debounce.arm();
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Handle debounce expiry; publishes only if availability changed
    pub fn on_debounce_expired(&mut self) {
        if !self.debounce.take_expired() {
            return;
        }

        if self.recompute() {
            info!("Crash locations changed: {:?}", self.location_paths());
            self.publish_locations();
        } else {
            debug!("Crash locations unchanged after mount state change");
        }
    }

    /// Recompute and publish immediately, bypassing the debounce window
    pub fn refresh_registry(&mut self) {
        debug!("Registry refresh requested");
        self.debounce.cancel();
        self.recompute();
        self.publish_locations();
        self.publish(RegistryEvent::RefreshNeeded);
    }

    /// Drop a pending debounce without recomputing
    pub fn cancel_pending(&mut self) {
        self.debounce.cancel();
    }

    /// Snapshot of all configured locations with their availability
    pub fn locations(&self) -> Vec<StorageLocation> {
        self.slots.iter().map(|slot| slot.location.clone()).collect()
    }

    pub fn available_locations(&self) -> Vec<StorageLocation> {
        self.slots
            .iter()
            .filter(|slot| slot.location.available)
            .map(|slot| slot.location.clone())
            .collect()
    }

    /// Ordered paths of available locations; index 0 is the canonical one
    pub fn location_paths(&self) -> Vec<PathBuf> {
        self.slots
            .iter()
            .filter(|slot| slot.location.available || slot.location.order == 0)
            .map(|slot| slot.location.path.clone())
            .collect()
    }

    pub fn canonical_path(&self) -> &Path {
        &self.slots[0].location.path
    }

    /// Mount points of the removable locations, in registry order
    pub fn removable_mount_points(&self) -> Vec<PathBuf> {
        self.slots
            .iter()
            .filter_map(|slot| slot.mount_point.clone())
            .collect()
    }

    /// Crash dumps from every available location, in location order
    pub fn collect_all_core_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for path in self.location_paths() {
            match crash_sys::list_core_files(&path) {
                Ok(found) => files.extend(found),
                Err(e) => warn!("Skipping unreadable crash directory {}: {}", path.display(), e),
            }
        }

        debug!("Collected {} crash dumps", files.len());
        files
    }

    /// Re-probe removable locations; returns true if the set changed
    fn recompute(&mut self) -> bool {
        let before = self.locations();

        for slot in &mut self.slots {
            let Some(mount_point) = &slot.mount_point else {
                continue;
            };
            slot.location.available =
                self.probe.is_mounted(mount_point) && ensure_directory(&slot.location.path);
        }

        self.locations() != before
    }

    fn publish_locations(&self) {
        self.publish(RegistryEvent::LocationsUpdated(self.available_locations()));
    }

    fn publish(&self, event: RegistryEvent) {
        if self.events.send(event).is_err() {
            debug!("No registry event consumer");
        }
    }
}

fn ensure_directory(path: &Path) -> bool {
    match fs::create_dir_all(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Crash directory {} is not usable: {}", path.display(), e);
            false
        }
    }
}

/// Observes the mount state of every removable root
///
/// Each poll compares against the last observed state and reports only the
/// roots whose state flipped.
pub struct MountStateIndicator {
    probe: Arc<dyn MountProbe>,
    states: Vec<(PathBuf, bool)>,
}

impl MountStateIndicator {
    pub fn new(mount_points: Vec<PathBuf>, probe: Arc<dyn MountProbe>) -> Self {
        let states = mount_points
            .into_iter()
            .map(|mount_point| {
                let mounted = probe.is_mounted(&mount_point);
                (mount_point, mounted)
            })
            .collect();
        Self { probe, states }
    }

    pub fn poll(&mut self) -> Vec<(PathBuf, bool)> {
        let mut changes = Vec::new();
        for (mount_point, mounted) in &mut self.states {
            let now = self.probe.is_mounted(mount_point);
            if now != *mounted {
                *mounted = now;
                changes.push((mount_point.clone(), now));
            }
        }
        changes
    }
}

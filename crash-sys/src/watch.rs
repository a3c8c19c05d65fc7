// SPDX-License-Identifier: GPL-3.0-only

//! inotify directory watches driven by the tokio reactor
//!
//! A file counts as created once it has been closed after writing or renamed
//! into a watched directory, so consumers never see half-written dumps.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

struct InotifyFd(Inotify);

impl AsRawFd for InotifyFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_fd().as_raw_fd()
    }
}

fn created_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_MOVED_TO
}

fn removed_mask() -> AddWatchFlags {
    AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM
}

/// Non-recursive watcher over a set of directories
///
/// Must be created from within a tokio runtime.
pub struct DirWatcher {
    fd: AsyncFd<InotifyFd>,
    watches: HashMap<WatchDescriptor, PathBuf>,
}

impl DirWatcher {
    pub fn new() -> Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)?;
        let fd = AsyncFd::new(InotifyFd(inotify))?;
        Ok(Self {
            fd,
            watches: HashMap::new(),
        })
    }

    /// Start watching `dir`; watching an already watched path is a no-op
    pub fn watch(&mut self, dir: &Path) -> Result<()> {
        if self.is_watching(dir) {
            return Ok(());
        }

        let wd = self
            .fd
            .get_ref()
            .0
            .add_watch(dir, created_mask() | removed_mask())?;
        self.watches.insert(wd, dir.to_path_buf());
        debug!("Watching {}", dir.display());
        Ok(())
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.watches.values().any(|path| path == dir)
    }

    /// Watched directories, sorted
    pub fn watched(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watches.values().cloned().collect();
        paths.sort();
        paths
    }

    pub fn unwatch(&mut self, dir: &Path) -> bool {
        let Some(wd) = self
            .watches
            .iter()
            .find_map(|(wd, path)| (path == dir).then_some(*wd))
        else {
            return false;
        };

        self.watches.remove(&wd);
        if let Err(e) = self.fd.get_ref().0.rm_watch(wd) {
            // The kernel drops the watch on its own when the directory goes away.
            debug!("Removing watch on {} failed: {}", dir.display(), e);
        }
        true
    }

    pub fn unwatch_all(&mut self) {
        for (wd, path) in self.watches.drain() {
            if let Err(e) = self.fd.get_ref().0.rm_watch(wd) {
                debug!("Removing watch on {} failed: {}", path.display(), e);
            }
        }
    }

    /// Wait for the next batch of create/remove events
    ///
    /// Cancel safe: events are only consumed in the same poll that returns them.
    pub async fn next_events(&mut self) -> Result<Vec<WatchEvent>> {
        loop {
            let raw = {
                let mut guard = self.fd.readable().await?;
                match guard.try_io(|fd| fd.get_ref().0.read_events().map_err(io::Error::from)) {
                    Ok(result) => result?,
                    Err(_would_block) => continue,
                }
            };

            let events = self.translate(raw);
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }

    fn translate(&mut self, raw: Vec<InotifyEvent>) -> Vec<WatchEvent> {
        let mut events = Vec::new();

        for event in raw {
            if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                warn!("inotify queue overflowed; some crash dumps may go unnoticed");
                continue;
            }
            if event.mask.contains(AddWatchFlags::IN_IGNORED) {
                if let Some(path) = self.watches.remove(&event.wd) {
                    debug!("Watch on {} released by the kernel", path.display());
                }
                continue;
            }
            if event.mask.contains(AddWatchFlags::IN_ISDIR) {
                continue;
            }

            let Some(dir) = self.watches.get(&event.wd) else {
                continue;
            };
            let Some(name) = event.name else {
                continue;
            };

            let kind = if event.mask.intersects(created_mask()) {
                WatchEventKind::Created
            } else if event.mask.intersects(removed_mask()) {
                WatchEventKind::Removed
            } else {
                continue;
            };

            events.push(WatchEvent {
                kind,
                path: dir.join(name),
            });
        }

        events
    }
}

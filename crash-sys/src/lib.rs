// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the crash reporter daemon
//!
//! This crate wraps the pieces that talk to the kernel or spawn processes:
//! - Mount table parsing (`/proc/self/mountinfo`)
//! - Crash directory listing
//! - inotify directory watches integrated with the tokio reactor
//! - Shell command execution for lifelog sampling

pub mod command;
pub mod error;
pub mod mounts;
pub mod scanner;
pub mod watch;

pub use command::{CommandRunner, ShellRunner};
pub use error::{Result, SysError};
pub use mounts::{is_mount_point, mount_points, parse_mount_points};
pub use scanner::list_core_files;
pub use watch::{DirWatcher, WatchEvent, WatchEventKind};

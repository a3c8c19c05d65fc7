// SPDX-License-Identifier: GPL-3.0-only

//! Contracts for the daemon's external collaborators
//!
//! The daemon only needs request/response semantics from these; how they
//! are reached (D-Bus in production, recording fakes in tests) is up to the
//! adapter.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Accepts crash dumps for upload; fire-and-forget from the daemon's side
#[async_trait]
pub trait UploadQueue: Send + Sync {
    async fn enqueue(&self, files: &[PathBuf]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    /// Offer to send or delete the listed stored crash reports
    SendSelected,
    /// A single crash was just detected
    NewCore,
}

impl DialogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogKind::SendSelected => "send-selected",
            DialogKind::NewCore => "new-core",
        }
    }
}

/// Launches the crash reporter UI; a failed launch is an `Err`
///
/// Dialogs are always announced by a notification first and open when it
/// is activated.
#[async_trait]
pub trait CrashReporterUi: Send + Sync {
    async fn request_dialog(&self, dialog: DialogKind, files: &[PathBuf]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationHandle(pub u32);

/// Local timed notification used when the UI cannot be launched
#[async_trait]
pub trait FallbackNotifier: Send + Sync {
    async fn show(&self, summary: &str, body: &str, timeout: Duration)
    -> Result<NotificationHandle>;

    async fn close(&self, handle: NotificationHandle) -> Result<()>;
}

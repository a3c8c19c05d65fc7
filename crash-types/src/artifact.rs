// SPDX-License-Identifier: GPL-3.0-only

//! Crash dump naming convention and grouping keys
//!
//! Crash dumps are named `<application>-<hardware id>-<signal>-<pid>.rcore.lzo`
//! (or `.rcore` when uncompressed). The application name may itself contain
//! dashes, so the stem is split from the right. Two dumps are "similar" when
//! they come from the same application and died from the same signal.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

/// Recognised crash dump suffixes, longest first
pub const CORE_FILE_SUFFIXES: &[&str] = &[".rcore.lzo", ".rcore"];

/// Prefix of archived lifelog packages; these are never grouped as duplicates
pub const LIFELOG_PACKAGE_PREFIX: &str = "lifelog";

/// Returns true if `name` follows the crash dump naming convention
pub fn is_core_file_name(name: &str) -> bool {
    strip_core_suffix(name).is_some_and(|stem| !stem.is_empty() && !stem.starts_with('.'))
}

fn strip_core_suffix(name: &str) -> Option<&str> {
    CORE_FILE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
}

/// Components parsed out of a crash dump file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreFileName {
    pub application: String,
    pub hardware_id: String,
    pub signal: String,
    pub pid: String,
}

impl CoreFileName {
    /// Parse a bare file name; `None` if it is not a crash dump or does not
    /// carry all four components.
    pub fn parse(name: &str) -> Option<Self> {
        if !is_core_file_name(name) {
            return None;
        }
        let stem = strip_core_suffix(name)?;

        let mut parts = stem.rsplitn(4, '-');
        let pid = parts.next()?;
        let signal = parts.next()?;
        let hardware_id = parts.next()?;
        let application = parts.next()?;

        if application.is_empty() || signal.is_empty() {
            return None;
        }

        Some(Self {
            application: application.to_string(),
            hardware_id: hardware_id.to_string(),
            signal: signal.to_string(),
            pid: pid.to_string(),
        })
    }

    /// Symbolic fault name, e.g. `11` becomes `SIGSEGV`
    pub fn fault(&self) -> String {
        self.signal
            .parse::<i32>()
            .ok()
            .and_then(|number| Signal::try_from(number).ok())
            .map(|signal| signal.as_str().to_string())
            .unwrap_or_else(|| self.signal.clone())
    }
}

/// Grouping key for duplicate detection: originating process + fault
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrashSignature {
    pub process: String,
    pub fault: String,
}

impl CrashSignature {
    pub fn new(process: impl Into<String>, fault: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            fault: fault.into(),
        }
    }

    /// Derive the signature from a file name; lifelog packages and names
    /// without all components have none.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.starts_with(&format!("{LIFELOG_PACKAGE_PREFIX}-")) {
            return None;
        }
        let parsed = CoreFileName::parse(name)?;
        let fault = parsed.fault();
        Some(Self::new(parsed.application, fault))
    }
}

impl fmt::Display for CrashSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process, self.fault)
    }
}

/// A crash dump observed in one of the storage locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashArtifact {
    pub path: PathBuf,
    pub discovered_at: DateTime<Utc>,
    pub signature: Option<CrashSignature>,
    pub size_bytes: u64,
}

impl CrashArtifact {
    /// Build an artifact for `path`; `None` if the file name does not match
    /// the crash dump convention.
    pub fn new(path: impl Into<PathBuf>, discovered_at: DateTime<Utc>, size_bytes: u64) -> Option<Self> {
        let path = path.into();
        let name = file_name(&path)?;
        if !is_core_file_name(name) {
            return None;
        }
        let signature = CrashSignature::from_file_name(name);

        Some(Self {
            path,
            discovered_at,
            signature,
            size_bytes,
        })
    }

    pub fn file_name(&self) -> Option<&str> {
        file_name(&self.path)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

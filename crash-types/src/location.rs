// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whether a location lives on built-in or on removable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Fixed,
    Removable,
}

/// A directory crash dumps may be written to
///
/// `order` is the fixed rank of the location in the registry. Rank 0 is the
/// canonical crash directory and is always a fixed location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub path: PathBuf,
    pub kind: LocationKind,
    pub available: bool,
    pub order: usize,
}

impl StorageLocation {
    pub fn fixed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: LocationKind::Fixed,
            available: true,
            order: 0,
        }
    }

    pub fn removable(path: impl Into<PathBuf>, order: usize, available: bool) -> Self {
        Self {
            path: path.into(),
            kind: LocationKind::Removable,
            available,
            order,
        }
    }

    pub fn is_removable(&self) -> bool {
        self.kind == LocationKind::Removable
    }

    pub fn is_canonical(&self) -> bool {
        self.order == 0 && self.kind == LocationKind::Fixed
    }
}

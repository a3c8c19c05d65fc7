// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::path::Path;

use crash_types::{CrashArtifact, CrashSignature};

/// Live crash dumps grouped by signature, oldest first
#[derive(Debug, Default)]
pub struct RetentionIndex {
    groups: HashMap<CrashSignature, Vec<CrashArtifact>>,
}

impl RetentionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `artifact`, evicting the oldest members of its group while the
    /// group is larger than `cap`
    ///
    /// The inserted artifact is never evicted, so a cap of 0 behaves like 1.
    /// Artifacts without a signature are not tracked. Returns the evicted
    /// artifacts, oldest first.
    pub fn insert(&mut self, artifact: CrashArtifact, cap: Option<usize>) -> Vec<CrashArtifact> {
        let Some(signature) = artifact.signature.clone() else {
            return Vec::new();
        };

        let group = self.groups.entry(signature).or_default();
        group.retain(|existing| existing.path != artifact.path);

        let position =
            group.partition_point(|existing| existing.discovered_at <= artifact.discovered_at);
        let inserted = artifact.path.clone();
        group.insert(position, artifact);

        let mut evicted = Vec::new();
        if let Some(cap) = cap {
            let cap = cap.max(1);
            while group.len() > cap {
                let Some(oldest) = group.iter().position(|member| member.path != inserted) else {
                    break;
                };
                evicted.push(group.remove(oldest));
            }
        }

        evicted
    }

    /// Forget an artifact that disappeared; returns true if it was tracked
    pub fn remove(&mut self, path: &Path) -> bool {
        let mut removed = false;
        self.groups.retain(|_, group| {
            let before = group.len();
            group.retain(|member| member.path.as_path() != path);
            removed |= group.len() != before;
            !group.is_empty()
        });
        removed
    }

    #[cfg(test)]
    pub fn count(&self, signature: &CrashSignature) -> usize {
        self.groups.get(signature).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub fn members(&self, signature: &CrashSignature) -> &[CrashArtifact] {
        self.groups.get(signature).map(Vec::as_slice).unwrap_or(&[])
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

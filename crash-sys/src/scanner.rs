// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use crash_types::is_core_file_name;

use crate::error::Result;

/// List crash dumps directly inside `dir`, sorted by file name
///
/// Only regular files following the crash dump naming convention are
/// returned; subdirectories are not descended into.
pub fn list_core_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if is_core_file_name(name) {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

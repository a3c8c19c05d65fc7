// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::Path;

use crash_types::DaemonConfig;
use tracing::info;

use crate::error::Result;

/// Read the daemon configuration; a missing file means built-in defaults
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let config = DaemonConfig::from_toml_str(&contents)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No configuration at {}; using defaults", path.display());
            Ok(DaemonConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

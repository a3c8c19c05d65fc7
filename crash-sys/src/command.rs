// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

use tracing::debug;

use crate::error::{Result, SysError};

/// Runs an external shell command and reports its exit code
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str) -> Result<i32>;
}

/// Executes commands synchronously through `sh -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<i32> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .map_err(|e| SysError::OperationFailed(format!("Failed to run sh: {}", e)))?;

        // Killed by a signal: no exit code.
        let code = status.code().unwrap_or(-1);
        debug!("Command exited with {}: {}", code, command);
        Ok(code)
    }
}

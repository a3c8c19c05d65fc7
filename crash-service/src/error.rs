// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;
use zbus::fdo;

/// Service-specific errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Service registration failed: {0}")]
    Registration(String),

    #[error("Another daemon instance already owns {0}")]
    AlreadyRunning(String),

    #[error("D-Bus error: {0}")]
    DBus(String),

    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    #[error("Daemon control loop is not running")]
    ControllerGone,

    #[error("System error: {0}")]
    Sys(#[from] crash_sys::SysError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crash_types::TypesError),
}

impl From<ServiceError> for fdo::Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidSettings(msg) => fdo::Error::InvalidArgs(msg),
            ServiceError::ControllerGone => fdo::Error::NoServer(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

impl From<zbus::Error> for ServiceError {
    fn from(err: zbus::Error) -> Self {
        ServiceError::DBus(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

// SPDX-License-Identifier: GPL-3.0-only

//! Daemon D-Bus interface
//!
//! Handlers run on the zbus executor and never touch daemon state
//! directly; each call is forwarded to the control loop through a
//! [`DaemonHandle`] and answered once the loop has processed it.

use async_trait::async_trait;
use crash_types::DbusConfig;
use enumflags2::BitFlags;
use tracing::info;
use zbus::fdo::{self, RequestNameFlags, RequestNameReply};
use zbus::{Connection, interface};

use crate::daemon::{DaemonHandle, ServiceRegistrar};
use crate::error::{Result, ServiceError};

pub struct CrashReporterDaemon {
    handle: DaemonHandle,
    version: String,
}

impl CrashReporterDaemon {
    pub fn new(handle: DaemonHandle) -> Self {
        Self {
            handle,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[interface(name = "org.crashreporter.Daemon")]
impl CrashReporterDaemon {
    #[zbus(property)]
    async fn version(&self) -> &str {
        &self.version
    }

    /// Start watching for crash dumps
    ///
    /// Args:
    /// - from_dbus: persist "notifications enabled" if monitoring starts
    async fn start_core_monitoring(&self, from_dbus: bool) -> fdo::Result<()> {
        self.handle.start_core_monitoring(from_dbus).await?;
        Ok(())
    }

    /// Stop watching for crash dumps
    ///
    /// Args:
    /// - from_dbus: persist "notifications disabled" if monitoring stops
    async fn stop_core_monitoring(&self, from_dbus: bool) -> fdo::Result<()> {
        self.handle.stop_core_monitoring(from_dbus).await?;
        Ok(())
    }

    /// Re-probe storage locations immediately
    async fn refresh_registry(&self) -> fdo::Result<()> {
        self.handle.refresh_registry().await?;
        Ok(())
    }

    /// Paths of every stored crash dump, in location order
    async fn collect_all_core_files(&self) -> fdo::Result<Vec<String>> {
        let files = self.handle.collect_all_core_files().await?;
        Ok(files
            .into_iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect())
    }
}

/// Serves the daemon object and claims its well-known name on the bus
pub struct DbusRegistrar {
    connection: Connection,
    config: DbusConfig,
}

impl DbusRegistrar {
    pub fn new(connection: Connection, config: DbusConfig) -> Self {
        Self { connection, config }
    }
}

#[async_trait]
impl ServiceRegistrar for DbusRegistrar {
    async fn register(&mut self, handle: DaemonHandle) -> Result<()> {
        let served = self
            .connection
            .object_server()
            .at(
                self.config.object_path.as_str(),
                CrashReporterDaemon::new(handle),
            )
            .await
            .map_err(|e| ServiceError::Registration(e.to_string()))?;
        if !served {
            return Err(ServiceError::Registration(format!(
                "object already served at {}",
                self.config.object_path
            )));
        }

        let name = self.config.service_name.as_str();
        let reply = self
            .connection
            .request_name_with_flags(name, BitFlags::from(RequestNameFlags::DoNotQueue))
            .await;
        match reply {
            Ok(RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) => {
                info!(
                    "Registered {} at {} on the session bus",
                    name, self.config.object_path
                );
                Ok(())
            }
            Ok(_) | Err(zbus::Error::NameTaken) => {
                Err(ServiceError::AlreadyRunning(name.to_string()))
            }
            Err(e) => Err(ServiceError::Registration(e.to_string())),
        }
    }
}

// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crash_sys::ShellRunner;
use crash_types::DbusConfig;
use tracing::debug;
use zbus::proxy::CacheProperties;
use zbus::zvariant::Value;
use zbus::{Connection, proxy};

use crate::contracts::{
    CrashReporterUi, DialogKind, FallbackNotifier, NotificationHandle, UploadQueue,
};
use crate::daemon::Collaborators;
use crate::error::{Result, ServiceError};

const APP_NAME: &str = "crash-reporter-daemon";

#[proxy(
    interface = "org.crashreporter.UI",
    default_service = "org.crashreporter.UI",
    default_path = "/org/crashreporter/UI"
)]
trait CrashReporterUiInterface {
    /// Open a dialog; `via_notification` shows a notification first
    async fn request_dialog(
        &self,
        dialog: &str,
        files: &[&str],
        via_notification: bool,
    ) -> zbus::Result<bool>;
}

#[proxy(
    interface = "org.crashreporter.AutoUploader",
    default_service = "org.crashreporter.AutoUploader",
    default_path = "/org/crashreporter/AutoUploader"
)]
trait AutoUploaderInterface {
    async fn upload_files(&self, files: &[&str]) -> zbus::Result<bool>;
}

#[proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    async fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: &HashMap<&str, &Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;

    async fn close_notification(&self, id: u32) -> zbus::Result<()>;
}

fn path_strings(files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect()
}

/// Hands crash dumps to the uploader service
pub struct DbusUploadQueue {
    proxy: AutoUploaderInterfaceProxy<'static>,
}

impl DbusUploadQueue {
    pub async fn new(connection: &Connection, config: &DbusConfig) -> Result<Self> {
        let proxy = AutoUploaderInterfaceProxy::builder(connection)
            .destination(config.uploader_service.clone())?
            .path(config.uploader_path.clone())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl UploadQueue for DbusUploadQueue {
    async fn enqueue(&self, files: &[PathBuf]) -> Result<()> {
        let files = path_strings(files);
        let files: Vec<&str> = files.iter().map(String::as_str).collect();

        let accepted = self.proxy.upload_files(&files).await?;
        debug!("Uploader accepted {} files: {}", files.len(), accepted);
        Ok(())
    }
}

/// Launches dialogs of the crash reporter UI
pub struct DbusCrashReporterUi {
    proxy: CrashReporterUiInterfaceProxy<'static>,
}

impl DbusCrashReporterUi {
    pub async fn new(connection: &Connection, config: &DbusConfig) -> Result<Self> {
        let proxy = CrashReporterUiInterfaceProxy::builder(connection)
            .destination(config.ui_service.clone())?
            .path(config.ui_path.clone())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl CrashReporterUi for DbusCrashReporterUi {
    async fn request_dialog(&self, dialog: DialogKind, files: &[PathBuf]) -> Result<()> {
        let files = path_strings(files);
        let files: Vec<&str> = files.iter().map(String::as_str).collect();

        let shown = self
            .proxy
            .request_dialog(dialog.as_str(), &files, true)
            .await?;
        if !shown {
            return Err(ServiceError::Collaborator(format!(
                "UI refused the {} dialog",
                dialog.as_str()
            )));
        }
        Ok(())
    }
}

/// Desktop notification server used when the UI cannot be reached
pub struct DbusFallbackNotifier {
    proxy: NotificationsProxy<'static>,
}

impl DbusFallbackNotifier {
    pub async fn new(connection: &Connection) -> Result<Self> {
        let proxy = NotificationsProxy::builder(connection)
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl FallbackNotifier for DbusFallbackNotifier {
    async fn show(
        &self,
        summary: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<NotificationHandle> {
        let expire_timeout = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let id = self
            .proxy
            .notify(
                APP_NAME,
                0,
                "",
                summary,
                body,
                &[],
                &HashMap::new(),
                expire_timeout,
            )
            .await?;
        Ok(NotificationHandle(id))
    }

    async fn close(&self, handle: NotificationHandle) -> Result<()> {
        self.proxy.close_notification(handle.0).await?;
        Ok(())
    }
}

/// Wire every collaborator to its D-Bus peer on `connection`
pub async fn build_dbus_collaborators(
    connection: &Connection,
    config: &DbusConfig,
) -> Result<Collaborators> {
    Ok(Collaborators {
        ui: Arc::new(DbusCrashReporterUi::new(connection, config).await?),
        notifier: Arc::new(DbusFallbackNotifier::new(connection).await?),
        uploads: Arc::new(DbusUploadQueue::new(connection, config).await?),
        runner: Arc::new(ShellRunner),
    })
}

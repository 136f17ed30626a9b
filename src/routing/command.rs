//! Typed commands produced by descriptor extraction

use crate::capability::DeviceCapabilities;
use crate::error::AgentResult;
use async_trait::async_trait;
use serde::Serialize;

/// Receiver for runtime subscription requests, normally the Connection Manager
#[async_trait]
pub trait SubscriptionSink: Send + Sync {
    /// Subscribe the active session to `filter` and keep it across reconnects
    async fn add_subscription(&self, filter: &str) -> AgentResult<()>;
}

/// One capability invocation with its extracted arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    Ping,
    Geolocate,
    Inventory,
    Lock { immediate: bool },
    Wipe,
    Unenroll,
    Subscribe { filters: Vec<String> },

    PasswordEnabled,
    PasswordQuality(String),
    PasswordMinLength(i64),
    PasswordMinLowerCase(i64),
    PasswordMinUpperCase(i64),
    PasswordMinNonLetter(i64),
    PasswordMinLetters(i64),
    PasswordMinNumeric(i64),
    PasswordMinSymbols(i64),
    MaximumFailedPasswordsForWipe(i64),
    MaximumTimeToLock(i64),
    StorageEncryption(bool),
    DisableCamera(bool),
    DisableBluetooth(bool),
    DisableScreenCapture(bool),
    DisableAirplaneMode(bool),
    DisableGps(bool),

    DeployApp {
        package: String,
        id: String,
        version_code: String,
        task_id: String,
    },
    RemoveApp {
        package: String,
    },
    DeployFile {
        file: String,
        id: String,
        version: String,
        task_id: String,
    },
    RemoveFile {
        file: String,
    },
}

impl Command {
    /// Name of the capability this command invokes
    pub fn capability_name(&self) -> &'static str {
        match self {
            Command::Ping => "send_keep_alive",
            Command::Geolocate => "send_gps",
            Command::Inventory => "create_inventory",
            Command::Lock { .. } => "lock_device",
            Command::Wipe => "wipe",
            Command::Unenroll => "unenroll",
            Command::Subscribe { .. } => "subscribe",
            Command::PasswordEnabled => "password_enabled",
            Command::PasswordQuality(_) => "password_quality",
            Command::PasswordMinLength(_) => "password_min_length",
            Command::PasswordMinLowerCase(_) => "password_min_lowercase",
            Command::PasswordMinUpperCase(_) => "password_min_uppercase",
            Command::PasswordMinNonLetter(_) => "password_min_non_letter",
            Command::PasswordMinLetters(_) => "password_min_letters",
            Command::PasswordMinNumeric(_) => "password_min_numeric",
            Command::PasswordMinSymbols(_) => "password_min_symbols",
            Command::MaximumFailedPasswordsForWipe(_) => "maximum_failed_passwords_for_wipe",
            Command::MaximumTimeToLock(_) => "maximum_time_to_lock",
            Command::StorageEncryption(_) => "storage_encryption",
            Command::DisableCamera(_) => "disable_camera",
            Command::DisableBluetooth(_) => "disable_bluetooth",
            Command::DisableScreenCapture(_) => "disable_screen_capture",
            Command::DisableAirplaneMode(_) => "disable_airplane_mode",
            Command::DisableGps(_) => "disable_gps",
            Command::DeployApp { .. } => "install_package",
            Command::RemoveApp { .. } => "remove_package",
            Command::DeployFile { .. } => "download_file",
            Command::RemoveFile { .. } => "remove_file",
        }
    }

    /// Invoke the capability. Subscribe filters go to `subscriptions` one by
    /// one; the first failure stops the rest.
    pub async fn execute(
        &self,
        capabilities: &dyn DeviceCapabilities,
        subscriptions: &dyn SubscriptionSink,
    ) -> AgentResult<()> {
        match self {
            Command::Ping => capabilities.send_keep_alive().await?,
            Command::Geolocate => capabilities.send_gps().await?,
            Command::Inventory => capabilities.create_inventory().await?,
            Command::Lock { immediate } => capabilities.lock_device(*immediate).await?,
            Command::Wipe => capabilities.wipe().await?,
            Command::Unenroll => capabilities.unenroll().await?,
            Command::Subscribe { filters } => {
                for filter in filters {
                    subscriptions.add_subscription(filter).await?;
                }
            }
            Command::PasswordEnabled => capabilities.password_enabled().await?,
            Command::PasswordQuality(quality) => capabilities.password_quality(quality).await?,
            Command::PasswordMinLength(v) => capabilities.password_min_length(*v).await?,
            Command::PasswordMinLowerCase(v) => capabilities.password_min_lowercase(*v).await?,
            Command::PasswordMinUpperCase(v) => capabilities.password_min_uppercase(*v).await?,
            Command::PasswordMinNonLetter(v) => capabilities.password_min_non_letter(*v).await?,
            Command::PasswordMinLetters(v) => capabilities.password_min_letters(*v).await?,
            Command::PasswordMinNumeric(v) => capabilities.password_min_numeric(*v).await?,
            Command::PasswordMinSymbols(v) => capabilities.password_min_symbols(*v).await?,
            Command::MaximumFailedPasswordsForWipe(v) => {
                capabilities.maximum_failed_passwords_for_wipe(*v).await?
            }
            Command::MaximumTimeToLock(v) => capabilities.maximum_time_to_lock(*v).await?,
            Command::StorageEncryption(v) => capabilities.storage_encryption(*v).await?,
            Command::DisableCamera(v) => capabilities.disable_camera(*v).await?,
            Command::DisableBluetooth(v) => capabilities.disable_bluetooth(*v).await?,
            Command::DisableScreenCapture(v) => capabilities.disable_screen_capture(*v).await?,
            Command::DisableAirplaneMode(v) => capabilities.disable_airplane_mode(*v).await?,
            Command::DisableGps(v) => capabilities.disable_gps(*v).await?,
            Command::DeployApp {
                package,
                id,
                version_code,
                task_id,
            } => {
                capabilities
                    .install_package(package, id, version_code, task_id)
                    .await?
            }
            Command::RemoveApp { package } => capabilities.remove_package(package).await?,
            Command::DeployFile {
                file,
                id,
                version,
                task_id,
            } => capabilities.download_file(file, id, version, task_id).await?,
            Command::RemoveFile { file } => capabilities.remove_file(file).await?,
        }
        Ok(())
    }
}

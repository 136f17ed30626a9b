//! Capability Dispatch Target
//!
//! The device actions themselves live outside this crate. The router calls
//! them through [`DeviceCapabilities`] with already-typed arguments; no
//! value validation happens on this side.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Failure reported by a capability implementation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("{capability} failed: {message}")]
    Failed {
        capability: &'static str,
        message: String,
    },

    #[error("{0} is not supported on this device")]
    Unsupported(&'static str),
}

impl CapabilityError {
    pub fn failed<S: Into<String>>(capability: &'static str, message: S) -> Self {
        Self::Failed {
            capability,
            message: message.into(),
        }
    }
}

pub type CapabilityResult = Result<(), CapabilityError>;

/// Device-management actions invoked by routed commands.
///
/// Implementations must tolerate concurrent calls: messages can be routed
/// in parallel.
#[async_trait]
pub trait DeviceCapabilities: Send + Sync {
    /// Answer a ping with a keep-alive report
    async fn send_keep_alive(&self) -> CapabilityResult;
    async fn send_gps(&self) -> CapabilityResult;
    async fn create_inventory(&self) -> CapabilityResult;
    /// `immediate` is true when the broker asked to lock now
    async fn lock_device(&self, immediate: bool) -> CapabilityResult;
    async fn wipe(&self) -> CapabilityResult;
    async fn unenroll(&self) -> CapabilityResult;

    async fn password_enabled(&self) -> CapabilityResult;
    async fn password_quality(&self, quality: &str) -> CapabilityResult;
    async fn password_min_length(&self, length: i64) -> CapabilityResult;
    async fn password_min_lowercase(&self, minimum: i64) -> CapabilityResult;
    async fn password_min_uppercase(&self, minimum: i64) -> CapabilityResult;
    async fn password_min_non_letter(&self, minimum: i64) -> CapabilityResult;
    async fn password_min_letters(&self, minimum: i64) -> CapabilityResult;
    async fn password_min_numeric(&self, minimum: i64) -> CapabilityResult;
    async fn password_min_symbols(&self, minimum: i64) -> CapabilityResult;
    async fn maximum_failed_passwords_for_wipe(&self, maximum: i64) -> CapabilityResult;
    async fn maximum_time_to_lock(&self, maximum: i64) -> CapabilityResult;

    async fn storage_encryption(&self, enable: bool) -> CapabilityResult;
    async fn disable_camera(&self, disable: bool) -> CapabilityResult;
    async fn disable_bluetooth(&self, disable: bool) -> CapabilityResult;
    /// Needs a privileged device
    async fn disable_screen_capture(&self, disable: bool) -> CapabilityResult;
    /// Needs a privileged device
    async fn disable_airplane_mode(&self, disable: bool) -> CapabilityResult;
    async fn disable_gps(&self, disable: bool) -> CapabilityResult;

    async fn install_package(
        &self,
        package: &str,
        id: &str,
        version_code: &str,
        task_id: &str,
    ) -> CapabilityResult;
    async fn remove_package(&self, package: &str) -> CapabilityResult;
    async fn download_file(
        &self,
        file: &str,
        id: &str,
        version: &str,
        task_id: &str,
    ) -> CapabilityResult;
    async fn remove_file(&self, file: &str) -> CapabilityResult;
}

/// Records each invocation in the log and does nothing else.
///
/// Used by the binary when no device backend is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCapabilities;

#[async_trait]
impl DeviceCapabilities for TracingCapabilities {
    async fn send_keep_alive(&self) -> CapabilityResult {
        info!(capability = "send_keep_alive", "Capability invoked");
        Ok(())
    }

    async fn send_gps(&self) -> CapabilityResult {
        info!(capability = "send_gps", "Capability invoked");
        Ok(())
    }

    async fn create_inventory(&self) -> CapabilityResult {
        info!(capability = "create_inventory", "Capability invoked");
        Ok(())
    }

    async fn lock_device(&self, immediate: bool) -> CapabilityResult {
        info!(capability = "lock_device", immediate, "Capability invoked");
        Ok(())
    }

    async fn wipe(&self) -> CapabilityResult {
        info!(capability = "wipe", "Capability invoked");
        Ok(())
    }

    async fn unenroll(&self) -> CapabilityResult {
        info!(capability = "unenroll", "Capability invoked");
        Ok(())
    }

    async fn password_enabled(&self) -> CapabilityResult {
        info!(capability = "password_enabled", "Capability invoked");
        Ok(())
    }

    async fn password_quality(&self, quality: &str) -> CapabilityResult {
        info!(capability = "password_quality", quality, "Capability invoked");
        Ok(())
    }

    async fn password_min_length(&self, length: i64) -> CapabilityResult {
        info!(capability = "password_min_length", length, "Capability invoked");
        Ok(())
    }

    async fn password_min_lowercase(&self, minimum: i64) -> CapabilityResult {
        info!(capability = "password_min_lowercase", minimum, "Capability invoked");
        Ok(())
    }

    async fn password_min_uppercase(&self, minimum: i64) -> CapabilityResult {
        info!(capability = "password_min_uppercase", minimum, "Capability invoked");
        Ok(())
    }

    async fn password_min_non_letter(&self, minimum: i64) -> CapabilityResult {
        info!(capability = "password_min_non_letter", minimum, "Capability invoked");
        Ok(())
    }

    async fn password_min_letters(&self, minimum: i64) -> CapabilityResult {
        info!(capability = "password_min_letters", minimum, "Capability invoked");
        Ok(())
    }

    async fn password_min_numeric(&self, minimum: i64) -> CapabilityResult {
        info!(capability = "password_min_numeric", minimum, "Capability invoked");
        Ok(())
    }

    async fn password_min_symbols(&self, minimum: i64) -> CapabilityResult {
        info!(capability = "password_min_symbols", minimum, "Capability invoked");
        Ok(())
    }

    async fn maximum_failed_passwords_for_wipe(&self, maximum: i64) -> CapabilityResult {
        info!(
            capability = "maximum_failed_passwords_for_wipe",
            maximum, "Capability invoked"
        );
        Ok(())
    }

    async fn maximum_time_to_lock(&self, maximum: i64) -> CapabilityResult {
        info!(capability = "maximum_time_to_lock", maximum, "Capability invoked");
        Ok(())
    }

    async fn storage_encryption(&self, enable: bool) -> CapabilityResult {
        info!(capability = "storage_encryption", enable, "Capability invoked");
        Ok(())
    }

    async fn disable_camera(&self, disable: bool) -> CapabilityResult {
        info!(capability = "disable_camera", disable, "Capability invoked");
        Ok(())
    }

    async fn disable_bluetooth(&self, disable: bool) -> CapabilityResult {
        info!(capability = "disable_bluetooth", disable, "Capability invoked");
        Ok(())
    }

    async fn disable_screen_capture(&self, disable: bool) -> CapabilityResult {
        info!(capability = "disable_screen_capture", disable, "Capability invoked");
        Ok(())
    }

    async fn disable_airplane_mode(&self, disable: bool) -> CapabilityResult {
        info!(capability = "disable_airplane_mode", disable, "Capability invoked");
        Ok(())
    }

    async fn disable_gps(&self, disable: bool) -> CapabilityResult {
        info!(capability = "disable_gps", disable, "Capability invoked");
        Ok(())
    }

    async fn install_package(
        &self,
        package: &str,
        id: &str,
        version_code: &str,
        task_id: &str,
    ) -> CapabilityResult {
        info!(
            capability = "install_package",
            package, id, version_code, task_id, "Capability invoked"
        );
        Ok(())
    }

    async fn remove_package(&self, package: &str) -> CapabilityResult {
        info!(capability = "remove_package", package, "Capability invoked");
        Ok(())
    }

    async fn download_file(
        &self,
        file: &str,
        id: &str,
        version: &str,
        task_id: &str,
    ) -> CapabilityResult {
        info!(
            capability = "download_file",
            file, id, version, task_id, "Capability invoked"
        );
        Ok(())
    }

    async fn remove_file(&self, file: &str) -> CapabilityResult {
        info!(capability = "remove_file", file, "Capability invoked");
        Ok(())
    }
}

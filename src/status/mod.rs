//! Status/Log Reporter
//!
//! Connectivity transitions and diagnostic entries leave the core through a
//! [`StatusReporter`]. Reporters are sinks: they never fail back into the
//! Connection Manager or the Command Router.

pub mod reporter;

pub use reporter::{BroadcastStatusReporter, StatusCache, StatusReporter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection parameters of each attempt (never the secret)
pub const CATEGORY_LOGIN: &str = "MQTT Login";
/// Connect failures and connection loss
pub const CATEGORY_ERROR: &str = "ERROR";
/// Delivery acknowledgements
pub const CATEGORY_DELIVERY: &str = "MQTT Delivery";
/// Bodies of routed messages
pub const CATEGORY_MESSAGE: &str = "MQTT Message";

/// Event broadcast to UI and log collaborators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Status {
        online: bool,
        at: DateTime<Utc>,
    },
    Log {
        category: String,
        field: String,
        value: String,
        at: DateTime<Utc>,
    },
}

impl StatusEvent {
    pub fn status(online: bool) -> Self {
        StatusEvent::Status {
            online,
            at: Utc::now(),
        }
    }

    pub fn log(category: &str, field: &str, value: &str) -> Self {
        StatusEvent::Log {
            category: category.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            at: Utc::now(),
        }
    }
}

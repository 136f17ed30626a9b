use super::{StatusEvent, CATEGORY_ERROR};
use crate::error::sanitize_error_message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the status event channel; slow subscribers lag, never block
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outward sink for connectivity and diagnostic events
pub trait StatusReporter: Send + Sync {
    /// Persist the online flag and emit a status event
    fn report_status(&self, online: bool);

    /// Emit a structured diagnostic entry
    fn report_log(&self, category: &str, field: &str, value: &str);
}

/// Contents of the status cache file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedStatus {
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

/// JSON file holding the last reported online flag for UI readers
#[derive(Debug, Clone)]
pub struct StatusCache {
    path: PathBuf,
}

impl StatusCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self, online: bool) -> std::io::Result<()> {
        let status = CachedStatus {
            online,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&status)?;
        std::fs::write(&self.path, json)
    }

    pub fn load(&self) -> std::io::Result<CachedStatus> {
        let content = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}

/// Production reporter: status cache file, tracing, and a broadcast channel
pub struct BroadcastStatusReporter {
    cache: StatusCache,
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastStatusReporter {
    pub fn new(cache: StatusCache) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { cache, sender }
    }

    /// Receive every event reported from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    fn emit(&self, event: StatusEvent) {
        // No subscribers is the normal headless case
        if self.sender.send(event).is_err() {
            debug!("No status event subscribers");
        }
    }
}

impl StatusReporter for BroadcastStatusReporter {
    fn report_status(&self, online: bool) {
        info!(online, "Connection status changed");
        if let Err(e) = self.cache.store(online) {
            warn!(
                path = %self.cache.path().display(),
                error = %e,
                "Failed to persist status flag"
            );
        }
        self.emit(StatusEvent::status(online));
    }

    fn report_log(&self, category: &str, field: &str, value: &str) {
        let value = sanitize_error_message(value);
        if category == CATEGORY_ERROR {
            warn!(category, field, value = %value, "Agent log entry");
        } else {
            info!(category, field, value = %value, "Agent log entry");
        }
        self.emit(StatusEvent::log(category, field, &value));
    }
}

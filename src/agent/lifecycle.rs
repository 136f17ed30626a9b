//! Host-facing agent lifecycle
//!
//! [`AgentService`] is what a host process drives: start the session,
//! trigger an inventory report, shut down. Dependencies are injected so the
//! same service runs against the `rumqttc` transport in production and the
//! mocks in tests.

use crate::capability::DeviceCapabilities;
use crate::config::{AgentConfig, ConfigSource, FileConfigSource};
use crate::connection::{
    ConnectOutcome, ConnectionManager, ManagerSettings, ReconnectSchedule, SessionState,
};
use crate::error::AgentResult;
use crate::status::{BroadcastStatusReporter, StatusCache, StatusEvent, StatusReporter};
use crate::transport::mqtt::MqttTransport;
use crate::transport::Transport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Agent lifecycle with injected transport, config store, device and sink
pub struct AgentService {
    manager: ConnectionManager,
    events: Option<Arc<BroadcastStatusReporter>>,
}

impl AgentService {
    /// Wire a service from its parts
    pub fn new(
        transport: Arc<dyn Transport>,
        config_source: Arc<dyn ConfigSource>,
        capabilities: Arc<dyn DeviceCapabilities>,
        reporter: Arc<dyn StatusReporter>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(
                transport,
                config_source,
                capabilities,
                reporter,
                settings,
            ),
            events: None,
        }
    }

    /// Production wiring: `rumqttc` transport, broker section re-read from
    /// `config_path` on each attempt, status cache and event broadcast.
    pub fn from_config(
        config: &AgentConfig,
        config_path: impl Into<PathBuf>,
        capabilities: Arc<dyn DeviceCapabilities>,
    ) -> Self {
        let reporter = Arc::new(BroadcastStatusReporter::new(StatusCache::new(
            config.status.cache_path.clone(),
        )));
        let settings = ManagerSettings {
            schedule: ReconnectSchedule::from(&config.reconnect),
            manifest_topic: config.status.manifest_topic.clone(),
        };

        Self::with_broadcast(
            Arc::new(MqttTransport::new()),
            Arc::new(FileConfigSource::new(config_path)),
            capabilities,
            reporter,
            settings,
        )
    }

    /// Like [`new`](Self::new), reporting through a broadcast reporter whose
    /// events are available from [`subscribe_events`](Self::subscribe_events)
    pub fn with_broadcast(
        transport: Arc<dyn Transport>,
        config_source: Arc<dyn ConfigSource>,
        capabilities: Arc<dyn DeviceCapabilities>,
        reporter: Arc<BroadcastStatusReporter>,
        settings: ManagerSettings,
    ) -> Self {
        let mut service = Self::new(
            transport,
            config_source,
            capabilities,
            reporter.clone(),
            settings,
        );
        service.events = Some(reporter);
        service
    }

    /// Start the session. A no-op when already connected.
    ///
    /// A transport failure is not fatal: the reconnect timer is already
    /// running when this returns the error.
    pub async fn start(&self) -> AgentResult<ConnectOutcome> {
        let outcome = self.manager.connect().await?;
        match outcome {
            ConnectOutcome::AlreadyConnected => info!("Agent already connected"),
            ConnectOutcome::Started(generation) => {
                info!(generation = %generation, "Agent connect attempt started")
            }
        }
        Ok(outcome)
    }

    /// Run the inventory report now, independent of inbound commands
    pub async fn request_inventory(&self) -> AgentResult<()> {
        info!("Inventory requested by host");
        self.manager.request_inventory().await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down agent");
        self.manager.shutdown().await;
        info!("Agent shutdown complete");
    }

    /// Status and log events, when the service reports through a broadcast
    /// reporter
    pub fn subscribe_events(&self) -> Option<broadcast::Receiver<StatusEvent>> {
        match &self.events {
            Some(reporter) => Some(reporter.subscribe()),
            None => {
                warn!("Event subscription requested but no broadcast reporter is attached");
                None
            }
        }
    }

    pub async fn state(&self) -> SessionState {
        self.manager.state().await
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

//! Connection Manager
//!
//! Owns the one current broker session. Every state change happens while
//! holding a single async mutex, and every connect attempt carries a fresh
//! [`Generation`]; callbacks tagged with an older generation are discarded.
//!
//! Network I/O that follows a transition (status publish, subscriptions,
//! the inventory report) runs after the lock is released so that transport
//! callbacks and the router can re-enter the manager. That work, and the
//! routing of each inbound message, runs on its own task: callbacks return
//! without waiting on a capability.

use super::reconnect::{PeriodicTask, ReconnectSchedule, TickControl};
use super::state::{ConnectionEvent, SessionState, SubscriptionSet};
use crate::capability::DeviceCapabilities;
use crate::config::ConfigSource;
use crate::error::{AgentError, AgentResult};
use crate::mqtt_span;
use crate::protocol::{DeliveryReceipt, InboundMessage, OnlineStatus, TopicBuilder};
use crate::routing::{CommandRouter, DispatchTarget, SubscriptionSink};
use crate::status::{StatusReporter, CATEGORY_DELIVERY, CATEGORY_ERROR, CATEGORY_LOGIN};
use crate::transport::{
    ConnectRequest, Generation, LastWill, Transport, TransportCallbacks, TransportError,
    TransportSession,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// MQTT 3.1.1 only guarantees client ids up to this length
const MAX_CLIENT_ID_LEN: usize = 23;
const CLIENT_ID_PREFIX: &str = "mdm-";

/// Settings that stay fixed for the manager's lifetime
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub schedule: ReconnectSchedule,
    /// Fixed topic subscribed on every connect next to the root wildcard
    pub manifest_topic: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            schedule: ReconnectSchedule::default(),
            manifest_topic: "/FlyvemdmManifest/Status/Version".to_string(),
        }
    }
}

/// Result of a [`ConnectionManager::connect`] call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Already connected; nothing was done
    AlreadyConnected,
    /// A request for this generation was handed to the transport
    Started(Generation),
}

#[derive(Debug, Clone, Copy)]
enum FailureKind {
    Connect,
    Lost,
}

struct ManagerState {
    phase: SessionState,
    generation: Generation,
    session: Option<Arc<dyn TransportSession>>,
    root_topic: String,
    subscriptions: SubscriptionSet,
    /// Filters added at runtime, re-issued after every reconnect
    runtime_filters: Vec<String>,
    reconnect: Option<PeriodicTask>,
    shut_down: bool,
    /// Orders status reports made after the lock is released
    status_seq: u64,
}

impl ManagerState {
    fn next_status_seq(&mut self) -> u64 {
        self.status_seq += 1;
        self.status_seq
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    config_source: Arc<dyn ConfigSource>,
    capabilities: Arc<dyn DeviceCapabilities>,
    reporter: Arc<dyn StatusReporter>,
    router: CommandRouter,
    settings: ManagerSettings,
    state: Mutex<ManagerState>,
    /// Sequence number of the last status handed to the reporter
    reported_seq: Mutex<u64>,
}

/// Cheap to clone; all clones drive the same session
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config_source: Arc<dyn ConfigSource>,
        capabilities: Arc<dyn DeviceCapabilities>,
        reporter: Arc<dyn StatusReporter>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config_source,
                capabilities,
                reporter,
                router: CommandRouter::new(),
                settings,
                state: Mutex::new(ManagerState {
                    phase: SessionState::Disconnected,
                    generation: Generation::default(),
                    session: None,
                    root_topic: String::new(),
                    subscriptions: SubscriptionSet::default(),
                    runtime_filters: Vec::new(),
                    reconnect: None,
                    shut_down: false,
                    status_seq: 0,
                }),
                reported_seq: Mutex::new(0),
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.state.lock().await.phase
    }

    pub async fn generation(&self) -> Generation {
        self.shared.state.lock().await.generation
    }

    /// Filters issued for the current session
    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.state.lock().await.subscriptions.to_vec()
    }

    pub async fn has_pending_reconnect(&self) -> bool {
        let state = self.shared.state.lock().await;
        state
            .reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start a connect attempt unless already connected.
    ///
    /// The broker config is loaded fresh. A config problem or missing secret
    /// aborts before any I/O and schedules nothing. A transport that fails
    /// synchronously is handled like an asynchronous connect failure,
    /// including the reconnect, and the error is also returned.
    pub async fn connect(&self) -> AgentResult<ConnectOutcome> {
        let mut state = self.shared.state.lock().await;
        if state.shut_down {
            return Err(AgentError::ShutDown);
        }
        if state.phase.is_connected() {
            debug!("Already connected, connect is a no-op");
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        let reporter = &self.shared.reporter;
        let broker = match self.shared.config_source.load_broker_config() {
            Ok(broker) => broker,
            Err(e) => {
                let error = AgentError::from(e);
                error!(error = %error, "Cannot load broker configuration");
                reporter.report_log(CATEGORY_ERROR, "Error on connect", &error.sanitized());
                return Err(error);
            }
        };
        if !broker.has_secret() {
            let error = AgentError::MissingSecret;
            error!("Broker secret is empty, connect attempt aborted");
            reporter.report_log(CATEGORY_ERROR, "Error on connect", &error.to_string());
            return Err(error);
        }

        reporter.report_log(CATEGORY_LOGIN, "Broker", &broker.host);
        reporter.report_log(CATEGORY_LOGIN, "Port", &broker.port.to_string());
        reporter.report_log(CATEGORY_LOGIN, "User", &broker.username);
        reporter.report_log(CATEGORY_LOGIN, "Topic", &broker.root_topic);

        let generation = state.generation.next();
        state.generation = generation;
        if let Some(superseded) = state.session.take() {
            debug!(generation = %superseded.generation(), "Closing superseded session");
            superseded.close();
        }
        state.root_topic = broker.root_topic.clone();

        let span = mqtt_span!(
            operation = "connect",
            generation = %generation,
            tls = broker.use_tls
        );
        let opened = span.in_scope(|| -> AgentResult<_> {
            info!(host = %broker.host, port = broker.port, "Connecting to broker");
            let request = ConnectRequest {
                generation,
                client_id: new_client_id(),
                last_will: LastWill {
                    topic: TopicBuilder::build_status_topic(&broker.root_topic),
                    payload: OnlineStatus::offline().to_payload()?,
                },
                broker,
            };
            Ok(self.shared.transport.open(request, Arc::new(self.clone())))
        })?;

        match opened {
            Ok(session) => {
                state.phase = state
                    .phase
                    .apply(ConnectionEvent::AttemptStarted)
                    .map_err(|e| AgentError::internal(e.to_string()))?;
                state.session = Some(session);
                Ok(ConnectOutcome::Started(generation))
            }
            Err(e) => {
                self.handle_failure(&mut state, FailureKind::Connect, &e);
                let seq = state.next_status_seq();
                drop(state);
                self.report_status_in_order(seq, false).await;
                Err(e.into())
            }
        }
    }

    /// Run the inventory report now, if connected
    pub async fn request_inventory(&self) -> AgentResult<()> {
        let phase = self.state().await;
        if !phase.is_connected() {
            info!(state = %phase, "Inventory requested while not connected, skipped");
            return Err(AgentError::NotConnected { state: phase });
        }
        self.shared.capabilities.create_inventory().await?;
        Ok(())
    }

    /// Stop reconnecting, close the session and report offline.
    ///
    /// A connected session publishes the offline status itself before it
    /// closes, since a clean disconnect suppresses the last will.
    pub async fn shutdown(&self) {
        let (session, status_topic, was_connected, seq) = {
            let mut state = self.shared.state.lock().await;
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            // Invalidates any callback still in flight
            state.generation = state.generation.next();
            if let Some(task) = state.reconnect.take() {
                task.cancel();
            }
            let was_connected = state.phase.is_connected();
            state.phase = SessionState::Disconnected;
            (
                state.session.take(),
                TopicBuilder::build_status_topic(&state.root_topic),
                was_connected,
                state.next_status_seq(),
            )
        };

        if let Some(session) = session {
            if was_connected {
                match OnlineStatus::offline().to_payload() {
                    Ok(payload) => {
                        if let Err(e) = session.publish(&status_topic, payload, false).await {
                            warn!(error = %e, "Failed to publish offline status");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode offline status"),
                }
            }
            session.close();
        }

        self.report_status_in_order(seq, false).await;
        info!("Connection manager shut down");
    }

    /// Hand the online flag to the reporter, which may write the status
    /// cache. Called without the state lock; a report overtaken by a newer
    /// transition is dropped.
    async fn report_status_in_order(&self, seq: u64, online: bool) {
        let mut reported = self.shared.reported_seq.lock().await;
        if seq <= *reported {
            debug!(online, "Skipping status overtaken by a newer transition");
            return;
        }
        *reported = seq;
        self.shared.reporter.report_status(online);
    }

    /// Common handling for connect failure and connection loss; caller holds
    /// the state lock and reports the offline status after releasing it.
    fn handle_failure(&self, state: &mut ManagerState, kind: FailureKind, cause: &TransportError) {
        let event = match kind {
            FailureKind::Connect => ConnectionEvent::ConnectFailed,
            FailureKind::Lost => ConnectionEvent::ConnectionLost,
        };
        state.phase = state.phase.apply(event).unwrap_or(SessionState::Disconnected);
        if let Some(session) = state.session.take() {
            session.close();
        }

        let code = cause.code();
        let reporter = &self.shared.reporter;
        match kind {
            FailureKind::Connect => {
                error!(
                    generation = %state.generation,
                    reason_code = code,
                    error = %cause,
                    "Connection failed"
                );
                reporter.report_log(CATEGORY_ERROR, "Error on connect", &cause.message);
                reporter.report_log(CATEGORY_ERROR, &code.to_string(), &cause.message);
            }
            FailureKind::Lost => {
                warn!(
                    generation = %state.generation,
                    reason_code = code,
                    error = %cause,
                    "Connection lost"
                );
                reporter.report_log(CATEGORY_ERROR, "Connection lost", &cause.message);
            }
        }

        self.schedule_reconnect(state);
    }

    /// Start the reconnect timer unless one is already alive
    fn schedule_reconnect(&self, state: &mut ManagerState) {
        if state.shut_down {
            return;
        }
        if state
            .reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            debug!("Reconnect timer already running");
            return;
        }

        let schedule = self.shared.settings.schedule;
        info!(
            initial_delay_ms = schedule.initial_delay.as_millis() as u64,
            period_ms = schedule.period.as_millis() as u64,
            "Scheduling reconnect"
        );
        let manager = self.clone();
        state.reconnect = Some(PeriodicTask::spawn(schedule, move || {
            let manager = manager.clone();
            async move { manager.reconnect_tick().await }
        }));
    }

    async fn reconnect_tick(&self) -> TickControl {
        {
            let mut state = self.shared.state.lock().await;
            if state.shut_down {
                return TickControl::Stop;
            }
            if state.phase.is_connected() {
                if let Some(task) = state.reconnect.take() {
                    task.cancel();
                }
                debug!("Reconnect finished");
                return TickControl::Stop;
            }
        }

        debug!("Reconnecting");
        match self.connect().await {
            Ok(_) => {}
            Err(e) if e.is_retryable() => debug!(error = %e, "Reconnect attempt failed"),
            Err(e) => warn!(error = %e, "Reconnect attempt aborted, retrying next period"),
        }
        TickControl::Continue
    }

    /// Post-connect I/O for one session: online status, subscriptions,
    /// inventory.
    async fn announce_session(
        &self,
        session: Arc<dyn TransportSession>,
        status_topic: String,
        filters: Vec<String>,
    ) {
        match OnlineStatus::online().to_payload() {
            Ok(payload) => {
                if let Err(e) = session.publish(&status_topic, payload, false).await {
                    warn!(error = %e, "Failed to publish online status");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode online status"),
        }

        for filter in &filters {
            match session.subscribe(filter).await {
                Ok(()) => debug!(filter = %filter, "Subscribed"),
                Err(e) => warn!(filter = %filter, error = %e, "Subscribe failed"),
            }
        }

        if let Err(e) = self.shared.capabilities.create_inventory().await {
            warn!(error = %e, "Inventory on connect failed");
        }
    }

    async fn route_message(&self, message: InboundMessage) {
        let target = DispatchTarget {
            capabilities: self.shared.capabilities.as_ref(),
            subscriptions: self,
            reporter: self.shared.reporter.as_ref(),
        };
        let report = self
            .shared
            .router
            .handle(&message.topic, &message.payload, &target)
            .await;
        debug!(
            sequence = message.sequence,
            dispatched = report.dispatched.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Message handled"
        );
    }
}

fn new_client_id() -> String {
    let mut id = format!("{CLIENT_ID_PREFIX}{}", Uuid::new_v4().simple());
    id.truncate(MAX_CLIENT_ID_LEN);
    id
}

#[async_trait]
impl TransportCallbacks for ConnectionManager {
    async fn on_connect_success(&self, generation: Generation) {
        let mut state = self.shared.state.lock().await;
        if generation != state.generation || state.phase != SessionState::Connecting {
            debug!(
                generation = %generation,
                current = %state.generation,
                state = %state.phase,
                "Discarding stale connect success"
            );
            return;
        }
        let Some(session) = state.session.clone() else {
            return;
        };

        // A running reconnect timer stops itself on its next fire
        state.phase = SessionState::Connected;
        state.subscriptions = SubscriptionSet::derive(
            &state.root_topic,
            &self.shared.settings.manifest_topic,
            &state.runtime_filters,
        );
        info!(generation = %generation, "Connected to broker");

        let status_topic = TopicBuilder::build_status_topic(&state.root_topic);
        let filters = state.subscriptions.to_vec();
        let seq = state.next_status_seq();
        drop(state);
        self.report_status_in_order(seq, true).await;

        // The inventory capability may be slow; the transport keeps
        // delivering callbacks meanwhile
        let manager = self.clone();
        tokio::spawn(
            async move {
                manager
                    .announce_session(session, status_topic, filters)
                    .await
            }
            .instrument(mqtt_span!(operation = "announce", generation = %generation)),
        );
    }

    async fn on_connect_failure(&self, generation: Generation, error: TransportError) {
        let mut state = self.shared.state.lock().await;
        if generation != state.generation || state.phase != SessionState::Connecting {
            debug!(generation = %generation, "Discarding stale connect failure");
            return;
        }
        self.handle_failure(&mut state, FailureKind::Connect, &error);
        let seq = state.next_status_seq();
        drop(state);
        self.report_status_in_order(seq, false).await;
    }

    async fn on_connection_lost(&self, generation: Generation, cause: TransportError) {
        let mut state = self.shared.state.lock().await;
        if generation != state.generation || !state.phase.is_connected() {
            debug!(generation = %generation, "Discarding stale connection loss");
            return;
        }
        self.handle_failure(&mut state, FailureKind::Lost, &cause);
        let seq = state.next_status_seq();
        drop(state);
        self.report_status_in_order(seq, false).await;
    }

    async fn on_message(&self, generation: Generation, message: InboundMessage) {
        {
            let state = self.shared.state.lock().await;
            if generation != state.generation || !state.phase.is_connected() {
                debug!(
                    generation = %generation,
                    topic = %message.topic,
                    "Dropping message from stale session"
                );
                return;
            }
        }

        // Routed off the callback path so a slow capability never holds up
        // a connection loss queued behind this message
        let manager = self.clone();
        tokio::spawn(async move { manager.route_message(message).await });
    }

    async fn on_delivery_ack(&self, generation: Generation, receipt: DeliveryReceipt) {
        if generation != self.shared.state.lock().await.generation {
            debug!(generation = %generation, "Discarding delivery ack from stale session");
            return;
        }
        debug!(generation = %generation, message_id = receipt.message_id, "Delivery complete");
        self.shared.reporter.report_log(
            CATEGORY_DELIVERY,
            "Response id",
            &receipt.message_id.to_string(),
        );
    }
}

#[async_trait]
impl SubscriptionSink for ConnectionManager {
    async fn add_subscription(&self, filter: &str) -> AgentResult<()> {
        let session = {
            let mut state = self.shared.state.lock().await;
            if !state.phase.is_connected() {
                return Err(AgentError::NotConnected { state: state.phase });
            }
            if !state.runtime_filters.iter().any(|f| f == filter) {
                state.runtime_filters.push(filter.to_string());
            }
            state.subscriptions.insert(filter.to_string());
            state.session.clone()
        };

        let session = session.ok_or_else(|| AgentError::internal("connected without a session"))?;
        session.subscribe(filter).await?;
        info!(filter, "Added runtime subscription");
        Ok(())
    }
}

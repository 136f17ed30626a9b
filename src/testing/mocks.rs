//! Mock implementations for testing
//!
//! Provides a scriptable Transport, recording capabilities and reporter, and
//! a static config source so the Connection Manager and Command Router can be
//! exercised without a broker or a device.

use crate::capability::{CapabilityError, CapabilityResult, DeviceCapabilities};
use crate::config::{BrokerConnectionConfig, ConfigError, ConfigSource};
use crate::connection::SessionState;
use crate::error::{AgentError, AgentResult};
use crate::protocol::{DeliveryOutcome, DeliveryReceipt, InboundMessage};
use crate::routing::{Command, SubscriptionSink};
use crate::status::{StatusEvent, StatusReporter};
use crate::transport::{
    ConnectRequest, Generation, Transport, TransportCallbacks, TransportError, TransportErrorKind,
    TransportSession,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Let tasks spawned by a callback run before the driver returns
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Broker parameters used across tests
pub fn test_broker_config() -> BrokerConnectionConfig {
    BrokerConnectionConfig {
        host: "broker.test".to_string(),
        port: 1883,
        username: "device-42".to_string(),
        secret: "s3cret".to_string(),
        root_topic: "/agents/device-42".to_string(),
        use_tls: false,
        ca_file: None,
        keep_alive: Duration::from_secs(60),
    }
}

/// One publish seen by a [`MockSession`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Session handle returned by [`MockTransport`]
#[derive(Debug)]
pub struct MockSession {
    generation: Generation,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<PublishedMessage>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockSession {
    fn new(generation: Generation) -> Self {
        Self {
            generation,
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSession for MockSession {
    fn generation(&self) -> Generation {
        self.generation
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::new(
                TransportErrorKind::Closed,
                "session closed",
            ));
        }
        lock(&self.subscriptions).push(filter.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::new(
                TransportErrorKind::Closed,
                "session closed",
            ));
        }
        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scriptable transport.
///
/// `open` only records the request; tests then drive the outcome with
/// [`complete_connect`](Self::complete_connect) and friends, exactly as a
/// network event loop would. Drivers return once work spawned by the
/// callback has had a chance to run.
#[derive(Default)]
pub struct MockTransport {
    requests: Mutex<Vec<ConnectRequest>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    callbacks: Mutex<Option<Arc<dyn TransportCallbacks>>>,
    open_failure: Mutex<Option<TransportError>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `open` fail synchronously with `error`
    pub fn fail_open_with(&self, error: TransportError) {
        *lock(&self.open_failure) = Some(error);
    }

    pub fn clear_open_failure(&self) {
        *lock(&self.open_failure) = None;
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        lock(&self.requests).clone()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        lock(&self.sessions).clone()
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        lock(&self.sessions).last().cloned()
    }

    pub fn last_generation(&self) -> Option<Generation> {
        lock(&self.requests).last().map(|r| r.generation)
    }

    fn callbacks(&self) -> Option<Arc<dyn TransportCallbacks>> {
        lock(&self.callbacks).clone()
    }

    pub async fn complete_connect(&self, generation: Generation) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_connect_success(generation).await;
            settle().await;
        }
    }

    pub async fn fail_connect(&self, generation: Generation, error: TransportError) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_connect_failure(generation, error).await;
        }
    }

    pub async fn lose_connection(&self, generation: Generation, cause: TransportError) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_connection_lost(generation, cause).await;
        }
    }

    pub async fn deliver(&self, generation: Generation, topic: &str, payload: &[u8]) {
        if let Some(callbacks) = self.callbacks() {
            let message = InboundMessage::new(topic, payload.to_vec(), 1);
            callbacks.on_message(generation, message).await;
            settle().await;
        }
    }

    pub async fn acknowledge(&self, generation: Generation, message_id: u16) {
        if let Some(callbacks) = self.callbacks() {
            let receipt = DeliveryReceipt {
                message_id,
                outcome: DeliveryOutcome::Completed,
            };
            callbacks.on_delivery_ack(generation, receipt).await;
        }
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        request: ConnectRequest,
        callbacks: Arc<dyn TransportCallbacks>,
    ) -> Result<Arc<dyn TransportSession>, TransportError> {
        let generation = request.generation;
        lock(&self.requests).push(request);
        if let Some(error) = lock(&self.open_failure).clone() {
            return Err(error);
        }

        *lock(&self.callbacks) = Some(callbacks);
        let session = Arc::new(MockSession::new(generation));
        lock(&self.sessions).push(session.clone());
        Ok(session)
    }
}

/// Capabilities that record every invocation as the [`Command`] it came from
#[derive(Debug, Default)]
pub struct MockCapabilities {
    invocations: AsyncMutex<Vec<Command>>,
    failing: Mutex<HashSet<&'static str>>,
    held: Mutex<HashSet<&'static str>>,
    released: AtomicBool,
    release: Notify,
}

impl MockCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named capability return an error from now on
    pub fn fail(&self, capability: &'static str) {
        lock(&self.failing).insert(capability);
    }

    /// Make the named capability wait, once recorded, until
    /// [`release`](Self::release)
    pub fn hold(&self, capability: &'static str) {
        self.released.store(false, Ordering::SeqCst);
        lock(&self.held).insert(capability);
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub async fn invocations(&self) -> Vec<Command> {
        self.invocations.lock().await.clone()
    }

    pub async fn count(&self, command: &Command) -> usize {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|c| *c == command)
            .count()
    }

    pub async fn clear(&self) {
        self.invocations.lock().await.clear();
    }

    async fn record(&self, command: Command) -> CapabilityResult {
        let capability = command.capability_name();
        self.invocations.lock().await.push(command);
        let held = lock(&self.held).contains(capability);
        if held {
            loop {
                let released = self.release.notified();
                if self.released.load(Ordering::SeqCst) {
                    break;
                }
                released.await;
            }
        }
        if lock(&self.failing).contains(capability) {
            return Err(CapabilityError::failed(capability, "mock capability failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceCapabilities for MockCapabilities {
    async fn send_keep_alive(&self) -> CapabilityResult {
        self.record(Command::Ping).await
    }

    async fn send_gps(&self) -> CapabilityResult {
        self.record(Command::Geolocate).await
    }

    async fn create_inventory(&self) -> CapabilityResult {
        self.record(Command::Inventory).await
    }

    async fn lock_device(&self, immediate: bool) -> CapabilityResult {
        self.record(Command::Lock { immediate }).await
    }

    async fn wipe(&self) -> CapabilityResult {
        self.record(Command::Wipe).await
    }

    async fn unenroll(&self) -> CapabilityResult {
        self.record(Command::Unenroll).await
    }

    async fn password_enabled(&self) -> CapabilityResult {
        self.record(Command::PasswordEnabled).await
    }

    async fn password_quality(&self, quality: &str) -> CapabilityResult {
        self.record(Command::PasswordQuality(quality.to_string())).await
    }

    async fn password_min_length(&self, length: i64) -> CapabilityResult {
        self.record(Command::PasswordMinLength(length)).await
    }

    async fn password_min_lowercase(&self, minimum: i64) -> CapabilityResult {
        self.record(Command::PasswordMinLowerCase(minimum)).await
    }

    async fn password_min_uppercase(&self, minimum: i64) -> CapabilityResult {
        self.record(Command::PasswordMinUpperCase(minimum)).await
    }

    async fn password_min_non_letter(&self, minimum: i64) -> CapabilityResult {
        self.record(Command::PasswordMinNonLetter(minimum)).await
    }

    async fn password_min_letters(&self, minimum: i64) -> CapabilityResult {
        self.record(Command::PasswordMinLetters(minimum)).await
    }

    async fn password_min_numeric(&self, minimum: i64) -> CapabilityResult {
        self.record(Command::PasswordMinNumeric(minimum)).await
    }

    async fn password_min_symbols(&self, minimum: i64) -> CapabilityResult {
        self.record(Command::PasswordMinSymbols(minimum)).await
    }

    async fn maximum_failed_passwords_for_wipe(&self, maximum: i64) -> CapabilityResult {
        self.record(Command::MaximumFailedPasswordsForWipe(maximum))
            .await
    }

    async fn maximum_time_to_lock(&self, maximum: i64) -> CapabilityResult {
        self.record(Command::MaximumTimeToLock(maximum)).await
    }

    async fn storage_encryption(&self, enable: bool) -> CapabilityResult {
        self.record(Command::StorageEncryption(enable)).await
    }

    async fn disable_camera(&self, disable: bool) -> CapabilityResult {
        self.record(Command::DisableCamera(disable)).await
    }

    async fn disable_bluetooth(&self, disable: bool) -> CapabilityResult {
        self.record(Command::DisableBluetooth(disable)).await
    }

    async fn disable_screen_capture(&self, disable: bool) -> CapabilityResult {
        self.record(Command::DisableScreenCapture(disable)).await
    }

    async fn disable_airplane_mode(&self, disable: bool) -> CapabilityResult {
        self.record(Command::DisableAirplaneMode(disable)).await
    }

    async fn disable_gps(&self, disable: bool) -> CapabilityResult {
        self.record(Command::DisableGps(disable)).await
    }

    async fn install_package(
        &self,
        package: &str,
        id: &str,
        version_code: &str,
        task_id: &str,
    ) -> CapabilityResult {
        self.record(Command::DeployApp {
            package: package.to_string(),
            id: id.to_string(),
            version_code: version_code.to_string(),
            task_id: task_id.to_string(),
        })
        .await
    }

    async fn remove_package(&self, package: &str) -> CapabilityResult {
        self.record(Command::RemoveApp {
            package: package.to_string(),
        })
        .await
    }

    async fn download_file(
        &self,
        file: &str,
        id: &str,
        version: &str,
        task_id: &str,
    ) -> CapabilityResult {
        self.record(Command::DeployFile {
            file: file.to_string(),
            id: id.to_string(),
            version: version.to_string(),
            task_id: task_id.to_string(),
        })
        .await
    }

    async fn remove_file(&self, file: &str) -> CapabilityResult {
        self.record(Command::RemoveFile {
            file: file.to_string(),
        })
        .await
    }
}

/// Subscription sink that records filters, for routing tests without a
/// Connection Manager
#[derive(Debug, Default)]
pub struct MockSubscriptionSink {
    filters: AsyncMutex<Vec<String>>,
    reject: AtomicBool,
}

impl MockSubscriptionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with `NotConnected`
    pub fn rejecting() -> Self {
        Self {
            reject: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub async fn filters(&self) -> Vec<String> {
        self.filters.lock().await.clone()
    }
}

#[async_trait]
impl SubscriptionSink for MockSubscriptionSink {
    async fn add_subscription(&self, filter: &str) -> AgentResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(AgentError::NotConnected {
                state: SessionState::Disconnected,
            });
        }
        self.filters.lock().await.push(filter.to_string());
        Ok(())
    }
}

/// Reporter that keeps every event in memory
#[derive(Debug, Default)]
pub struct MockReporter {
    events: Mutex<Vec<StatusEvent>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        lock(&self.events).clone()
    }

    /// Online flags in report order
    pub fn statuses(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Status { online, .. } => Some(online),
                StatusEvent::Log { .. } => None,
            })
            .collect()
    }

    /// `(field, value)` pairs logged under `category`
    pub fn logs(&self, category: &str) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Log {
                    category: c,
                    field,
                    value,
                    ..
                } if c == category => Some((field, value)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl StatusReporter for MockReporter {
    fn report_status(&self, online: bool) {
        lock(&self.events).push(StatusEvent::status(online));
    }

    fn report_log(&self, category: &str, field: &str, value: &str) {
        lock(&self.events).push(StatusEvent::log(category, field, value));
    }
}

/// Config source serving whatever the test last set
#[derive(Debug)]
pub struct StaticConfigSource {
    broker: Mutex<Option<BrokerConnectionConfig>>,
    loads: AtomicUsize,
}

impl StaticConfigSource {
    pub fn new(broker: BrokerConnectionConfig) -> Self {
        Self {
            broker: Mutex::new(Some(broker)),
            loads: AtomicUsize::new(0),
        }
    }

    /// A source with nothing to load
    pub fn empty() -> Self {
        Self {
            broker: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, broker: BrokerConnectionConfig) {
        *lock(&self.broker) = Some(broker);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ConfigSource for StaticConfigSource {
    fn load_broker_config(&self) -> Result<BrokerConnectionConfig, ConfigError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        lock(&self.broker)
            .clone()
            .ok_or_else(|| ConfigError::InvalidConfig("no broker configuration".to_string()))
    }
}

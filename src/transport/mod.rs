//! Transport Client interface
//!
//! The Connection Manager talks to the broker only through the narrow seam
//! defined here, so tests can drive every callback by hand and production
//! code can plug in the [`mqtt`] implementation.
//!
//! A transport opens one session per [`ConnectRequest`]. Everything the
//! session observes afterwards (connect outcome, messages, acknowledgements,
//! connection loss) is reported back through [`TransportCallbacks`] tagged
//! with the request's [`Generation`], which lets the receiver discard
//! callbacks from sessions it has already given up on.

use crate::config::BrokerConnectionConfig;
use crate::protocol::{DeliveryReceipt, InboundMessage};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

/// Reason code reported when a failure carries none of its own
pub const UNKNOWN_REASON_CODE: i32 = 0;

/// Monotonically increasing id of a connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message the broker publishes for us if the session drops uncleanly
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Everything a transport needs to open one session
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub generation: Generation,
    /// Fresh per attempt so a superseded session never collides at the broker
    pub client_id: String,
    pub broker: BrokerConnectionConfig,
    pub last_will: LastWill,
}

/// Broad failure classes reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TLS context could not be built or the handshake failed
    Tls,
    /// Socket level failure: resolution, refused, reset, timeout
    Network,
    /// Broker answered CONNACK with a refusal
    Refused,
    /// Protocol violation or unexpected packet
    Protocol,
    /// Request issued on a session that is no longer running
    Closed,
}

/// Transport failure, optionally carrying the broker's reason code
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind:?} transport error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub reason_code: Option<i32>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason_code: None,
            message: message.into(),
        }
    }

    pub fn with_reason_code(mut self, code: i32) -> Self {
        self.reason_code = Some(code);
        self
    }

    /// Broker reason code, or [`UNKNOWN_REASON_CODE`]
    pub fn code(&self) -> i32 {
        self.reason_code.unwrap_or(UNKNOWN_REASON_CODE)
    }
}

/// Events a running session reports back, in the order it observed them
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectSucceeded,
    ConnectFailed(TransportError),
    ConnectionLost(TransportError),
    Message(InboundMessage),
    DeliveryAck(DeliveryReceipt),
}

/// Callback-shaped entry points invoked by a transport
#[async_trait]
pub trait TransportCallbacks: Send + Sync {
    async fn on_connect_success(&self, generation: Generation);
    async fn on_connect_failure(&self, generation: Generation, error: TransportError);
    async fn on_connection_lost(&self, generation: Generation, cause: TransportError);
    async fn on_message(&self, generation: Generation, message: InboundMessage);
    async fn on_delivery_ack(&self, generation: Generation, receipt: DeliveryReceipt);
}

/// Hand one event to the matching callback
pub async fn deliver_event(
    callbacks: &dyn TransportCallbacks,
    generation: Generation,
    event: TransportEvent,
) {
    match event {
        TransportEvent::ConnectSucceeded => callbacks.on_connect_success(generation).await,
        TransportEvent::ConnectFailed(error) => {
            callbacks.on_connect_failure(generation, error).await
        }
        TransportEvent::ConnectionLost(cause) => {
            callbacks.on_connection_lost(generation, cause).await
        }
        TransportEvent::Message(message) => callbacks.on_message(generation, message).await,
        TransportEvent::DeliveryAck(receipt) => {
            callbacks.on_delivery_ack(generation, receipt).await
        }
    }
}

/// A transport able to open broker sessions
pub trait Transport: Send + Sync {
    /// Start a connect attempt.
    ///
    /// Returns once the request is constructed and handed to the network
    /// layer; the outcome arrives later through `callbacks`. An `Err` means
    /// the attempt never reached the network (for example the TLS context
    /// could not be built) and no callback will follow.
    fn open(
        &self,
        request: ConnectRequest,
        callbacks: Arc<dyn TransportCallbacks>,
    ) -> Result<Arc<dyn TransportSession>, TransportError>;
}

/// One live (or attempting) broker session
#[async_trait]
pub trait TransportSession: Send + Sync {
    fn generation(&self) -> Generation;

    /// Subscribe to a topic filter with at-least-once delivery
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Publish a payload with at-least-once delivery
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), TransportError>;

    /// Stop the session without reporting further events. Idempotent.
    fn close(&self);
}

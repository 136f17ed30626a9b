//! Pure connection state transitions
//!
//! The manager feeds every observed event through [`SessionState::apply`]
//! while holding its lock, so the state it exposes is always the product of
//! a serialized sequence of legal transitions.

use crate::protocol::TopicBuilder;
use std::fmt;

/// Connection state of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Events that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connect request was handed to the transport
    AttemptStarted,
    /// CONNACK for the current generation
    ConnectSucceeded,
    /// The current attempt failed, synchronously or asynchronously
    ConnectFailed,
    /// The live session dropped
    ConnectionLost,
    /// The host shut the session down
    Closed,
}

/// A transition that is not legal from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: SessionState,
    pub event: ConnectionEvent,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not valid while {}", self.event, self.from)
    }
}

impl SessionState {
    /// Next state for `event`, or an error when the event cannot happen here.
    ///
    /// A new attempt while `Connecting` supersedes the pending one. A new
    /// attempt while `Connected` is refused.
    pub fn apply(self, event: ConnectionEvent) -> Result<SessionState, IllegalTransition> {
        use ConnectionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Disconnected | Connecting, AttemptStarted) => Ok(Connecting),
            (Connecting, ConnectSucceeded) => Ok(Connected),
            (Connecting, ConnectFailed) => Ok(Disconnected),
            // Synchronous failures happen before Connecting is ever reached
            (Disconnected, ConnectFailed) => Ok(Disconnected),
            (Connected, ConnectionLost) => Ok(Disconnected),
            (_, Closed) => Ok(Disconnected),
            (from, event) => Err(IllegalTransition { from, event }),
        }
    }

    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }
}

/// Ordered, duplicate free set of topic filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    filters: Vec<String>,
}

impl SubscriptionSet {
    /// Full set issued after every successful connect: the root subtree
    /// wildcard, the manifest status topic, then runtime additions in the
    /// order they were first requested.
    pub fn derive(root_topic: &str, manifest_topic: &str, runtime_filters: &[String]) -> Self {
        let mut set = SubscriptionSet::default();
        set.insert(TopicBuilder::build_root_filter(root_topic));
        set.insert(manifest_topic.to_string());
        for filter in runtime_filters {
            set.insert(filter.clone());
        }
        set
    }

    /// Add a filter; returns false if it was already present
    pub fn insert(&mut self, filter: String) -> bool {
        if self.filters.contains(&filter) {
            return false;
        }
        self.filters.push(filter);
        true
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.filters.iter().any(|f| f == filter)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.filters.clone()
    }
}

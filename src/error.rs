//! Crate-wide error types
//!
//! Each layer has its own `thiserror` enum; [`AgentError`] collects them for
//! the host-facing entry points. Nothing here is ever raised across the core
//! boundary for a payload or network condition: routing and connection
//! failures are logged and reported, not returned to the broker.

use crate::capability::CapabilityError;
use crate::config::ConfigError;
use crate::connection::SessionState;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Top-level error for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No broker secret available; connect attempt aborted")]
    MissingSecret,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Agent has been shut down")]
    ShutDown,

    #[error("Session is {state}, not connected")]
    NotConnected { state: SessionState },

    #[error("Capability failed: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AgentError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the reconnect timer should keep trying after this error.
    /// Config problems wait for the config to change instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transport(_) | AgentError::NotConnected { .. })
    }

    /// Display form with secrets redacted, safe for the reporter
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+")
        .expect("secret pattern is a valid regex")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is a valid regex")
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact credentials and sensitive paths, and cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

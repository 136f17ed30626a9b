//! Agent configuration
//!
//! The agent reads a single TOML file with three sections: `[broker]`,
//! `[reconnect]` and `[status]`. The broker section is re-read through a
//! [`ConfigSource`] on every connect attempt so that credential or host
//! changes take effect on the next retry without restarting the agent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub status: StatusSection,
}

/// Broker section as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name or address
    pub host: String,
    /// Broker port (default: 1883)
    #[serde(default = "default_port")]
    pub port: u16,
    /// MQTT user name
    #[serde(default)]
    pub username: String,
    /// Inline secret; takes precedence over `secret_env`
    pub secret: Option<String>,
    /// Environment variable containing the secret
    pub secret_env: Option<String>,
    /// Root of the topic subtree this agent listens on
    pub root_topic: String,
    /// Connect over TLS
    #[serde(default)]
    pub use_tls: bool,
    /// PEM bundle used to verify the broker instead of the platform roots
    pub ca_file: Option<PathBuf>,
    /// MQTT keep alive in seconds (default: 60)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

/// Reconnect timer schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Delay before the first reconnect attempt (default: 1s)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Period between subsequent attempts (default: 30s)
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_period_ms() -> u64 {
    30_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            period_ms: default_period_ms(),
        }
    }
}

impl ReconnectSection {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Status cache and fixed subscription settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSection {
    /// File the online flag is persisted to for UI readers
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Manifest status topic subscribed on every connect
    #[serde(default = "default_manifest_topic")]
    pub manifest_topic: String,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("mdm-agent-status.json")
}

fn default_manifest_topic() -> String {
    "/FlyvemdmManifest/Status/Version".to_string()
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            manifest_topic: default_manifest_topic(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Broker parameters for exactly one connect attempt.
///
/// Produced fresh by a [`ConfigSource`] each time and never cached across
/// reconnects.
#[derive(Clone, PartialEq)]
pub struct BrokerConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub root_topic: String,
    pub use_tls: bool,
    pub ca_file: Option<PathBuf>,
    pub keep_alive: Duration,
}

impl BrokerConnectionConfig {
    /// A connect attempt must not start without a secret
    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }
}

// Hand-written so the secret never reaches a log line.
impl std::fmt::Debug for BrokerConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"***")
            .field("root_topic", &self.root_topic)
            .field("use_tls", &self.use_tls)
            .field("ca_file", &self.ca_file)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl BrokerSection {
    /// Resolve the secret and produce the per-attempt connection parameters.
    /// A secret that cannot be resolved becomes empty.
    pub fn resolve(&self) -> BrokerConnectionConfig {
        let secret = self
            .secret
            .clone()
            .or_else(|| {
                self.secret_env
                    .as_ref()
                    .and_then(|name| std::env::var(name).ok())
            })
            .unwrap_or_default();

        BrokerConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            secret,
            root_topic: self.root_topic.clone(),
            use_tls: self.use_tls,
            ca_file: self.ca_file.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }
        if self.broker.root_topic.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.root_topic must not be empty".to_string(),
            ));
        }
        if self.reconnect.period_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.period_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host = "localhost"
port = 1883
username = "device-42"
secret = "s3cret"
root_topic = "/agents/device-42"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Source of broker parameters, consulted once per connect attempt
pub trait ConfigSource: Send + Sync {
    fn load_broker_config(&self) -> Result<BrokerConnectionConfig, ConfigError>;
}

/// Re-reads the agent config file on every call
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load_broker_config(&self) -> Result<BrokerConnectionConfig, ConfigError> {
        let config = AgentConfig::load_from_file(&self.path)?;
        Ok(config.broker.resolve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = AgentConfig::test_config();
        assert_eq!(config.broker.port, 1883);
        assert!(!config.broker.use_tls);
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.reconnect.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect.period(), Duration::from_secs(30));
        assert_eq!(
            config.status.manifest_topic,
            "/FlyvemdmManifest/Status/Version"
        );
    }

    #[test]
    fn test_inline_secret_wins_over_env() {
        let mut section = AgentConfig::test_config().broker;
        section.secret_env = Some("MDM_AGENT_TEST_UNUSED_SECRET".to_string());
        let resolved = section.resolve();
        assert_eq!(resolved.secret, "s3cret");
        assert!(resolved.has_secret());
    }

    #[test]
    fn test_unresolvable_secret_is_empty() {
        let mut section = AgentConfig::test_config().broker;
        section.secret = None;
        section.secret_env = Some("MDM_AGENT_TEST_SECRET_THAT_IS_NOT_SET".to_string());
        let resolved = section.resolve();
        assert!(!resolved.has_secret());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let resolved = AgentConfig::test_config().broker.resolve();
        let rendered = format!("{resolved:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_zero_period_rejected() {
        let toml = r#"
[broker]
host = "localhost"
root_topic = "/agents/a"

[reconnect]
period_ms = 0
"#;
        let result = AgentConfig::from_toml_str(toml);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }
}

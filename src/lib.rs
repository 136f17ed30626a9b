//! MDM Agent - Rust Implementation
//!
//! Keeps an authenticated MQTT session between a managed device and its
//! management broker, and routes inbound control messages to device
//! capabilities.
//!
//! # Overview
//!
//! - [`connection`] - Connection Manager: session state machine, session
//!   generations, reconnect timer
//! - [`routing`] - Command Router: the substring-matched descriptor table
//!   over JSON payloads
//! - [`status`] - Status/Log Reporter
//! - [`transport`] - the Transport Client interface and its `rumqttc`
//!   implementation
//! - [`agent`] - host entry points
//!
//! # Quick Start
//!
//! ```rust
//! use mdm_agent::routing::{Command, CommandRouter, RouteOutcome};
//!
//! let router = CommandRouter::new();
//! let routed = router.route("/agents/device-42/Command/Lock", br#"{"lock":"now"}"#);
//!
//! assert_eq!(routed.len(), 1);
//! assert_eq!(
//!     routed[0].outcome,
//!     RouteOutcome::Dispatch(Command::Lock { immediate: true })
//! );
//! ```

pub mod agent;
pub mod capability;
pub mod config;
pub mod connection;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod status;
pub mod testing;
pub mod transport;

pub use agent::AgentService;
pub use capability::{CapabilityError, DeviceCapabilities, TracingCapabilities};
pub use config::*;
pub use connection::{ConnectionManager, SessionState};
pub use error::{AgentError, AgentResult};
pub use protocol::*;
pub use routing::{Command, CommandRouter};
pub use status::{StatusEvent, StatusReporter};

//! Agent lifecycle for MDM agents
//!
//! The host-level entry points that wrap the Connection Manager.
//!
//! # Usage
//!
//! ```rust
//! use mdm_agent::agent::AgentService;
//! use mdm_agent::connection::{ConnectOutcome, ManagerSettings};
//! use mdm_agent::testing::{
//!     test_broker_config, MockCapabilities, MockReporter, MockTransport, StaticConfigSource,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(MockTransport::new());
//! let service = AgentService::new(
//!     transport.clone(),
//!     Arc::new(StaticConfigSource::new(test_broker_config())),
//!     Arc::new(MockCapabilities::new()),
//!     Arc::new(MockReporter::new()),
//!     ManagerSettings::default(),
//! );
//!
//! if let ConnectOutcome::Started(generation) = service.start().await? {
//!     transport.complete_connect(generation).await;
//! }
//! assert!(service.state().await.is_connected());
//!
//! service.shutdown().await;
//! # Ok::<(), mdm_agent::AgentError>(())
//! # }).unwrap();
//! ```

pub mod lifecycle;

pub use lifecycle::*;

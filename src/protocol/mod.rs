//! Broker-facing wire model
//!
//! Topic construction for the agent's fixed subscriptions and status topic,
//! plus the payload types that cross the transport boundary.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;

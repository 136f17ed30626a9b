//! Testing utilities and mock implementations
//!
//! Mocks for the Transport Client, the device capabilities, the status sink
//! and the config store, so the agent can be tested without a broker.

pub mod mocks;

pub use mocks::*;

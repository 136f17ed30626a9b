//! Connection Manager
//!
//! - [`state`] - session states, the transition function, subscription set
//! - [`reconnect`] - the cancellable two-interval reconnect timer
//! - [`manager`] - the manager owning the current session

pub mod manager;
pub mod reconnect;
pub mod state;

pub use manager::{ConnectOutcome, ConnectionManager, ManagerSettings};
pub use reconnect::{PeriodicTask, ReconnectSchedule, TickControl};
pub use state::{ConnectionEvent, IllegalTransition, SessionState, SubscriptionSet};

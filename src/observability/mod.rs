//! Observability
//!
//! Structured logging setup and the span macros used around connection
//! attempts and command dispatch.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::{command_span, mqtt_span};

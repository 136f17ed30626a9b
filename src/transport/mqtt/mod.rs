//! MQTT 3.1.1 transport on `rumqttc`
//!
//! Pure functions are kept apart from I/O:
//!
//! - [`connection`] - option building, TLS setup, last will
//! - [`message_handler`] - routing of raw `rumqttc` events and errors
//! - [`client`] - the event loop task and session handle
//!
//! # Usage
//!
//! ```rust,no_run
//! use mdm_agent::transport::mqtt::MqttTransport;
//! use mdm_agent::transport::Transport;
//!
//! let transport: Box<dyn Transport> = Box::new(MqttTransport::new());
//! # drop(transport);
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttSession, MqttTransport};
pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler};

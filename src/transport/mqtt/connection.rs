//! Pure session configuration for the MQTT transport
//!
//! Turns a [`ConnectRequest`] into `rumqttc` options. Everything that can
//! fail before the network is touched (TLS material, empty host) fails here,
//! synchronously, so the caller can treat it as a connect failure that never
//! reached `Connecting`.

use crate::transport::{ConnectRequest, TransportError, TransportErrorKind};
use rumqttc::Transport as RumqttcTransport;
use rumqttc::{LastWill, MqttOptions, QoS};
use std::path::Path;
use std::time::Duration;

/// rumqttc rejects keep alive intervals shorter than this
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Capacity of the client request channel
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Build the options for one session.
///
/// Session semantics are fixed: clean session, MQTT 3.1.1, last will at
/// QoS 0 without retain. Reconnection is not configured here; the event
/// loop stops at the first connection error and recovery belongs to the
/// Connection Manager's timer. The network connect timeout is left at the
/// transport's own default.
pub fn configure_mqtt_options(request: &ConnectRequest) -> Result<MqttOptions, TransportError> {
    let broker = &request.broker;
    if broker.host.trim().is_empty() {
        return Err(TransportError::new(
            TransportErrorKind::Network,
            "broker host is empty",
        ));
    }

    let mut mqtt_options = MqttOptions::new(&request.client_id, &broker.host, broker.port);
    mqtt_options.set_credentials(&broker.username, &broker.secret);
    mqtt_options.set_clean_session(true);
    mqtt_options.set_keep_alive(broker.keep_alive.max(MIN_KEEP_ALIVE));

    let will = LastWill::new(
        &request.last_will.topic,
        request.last_will.payload.clone(),
        QoS::AtMostOnce,
        false,
    );
    mqtt_options.set_last_will(will);

    if broker.use_tls {
        mqtt_options.set_transport(build_tls_transport(broker.ca_file.as_deref())?);
    }

    Ok(mqtt_options)
}

/// TLS transport: a caller supplied CA bundle, or the platform roots.
/// rustls negotiates TLS 1.2 or newer only.
fn build_tls_transport(ca_file: Option<&Path>) -> Result<RumqttcTransport, TransportError> {
    match ca_file {
        Some(path) => {
            let ca = std::fs::read(path).map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Tls,
                    format!("cannot read CA bundle {}: {e}", path.display()),
                )
            })?;
            if ca.is_empty() {
                return Err(TransportError::new(
                    TransportErrorKind::Tls,
                    format!("CA bundle {} is empty", path.display()),
                ));
            }
            Ok(RumqttcTransport::tls(ca, None, None))
        }
        None => Ok(RumqttcTransport::tls_with_default_config()),
    }
}

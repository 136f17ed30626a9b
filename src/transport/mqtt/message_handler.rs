//! Pure event routing for the MQTT transport
//!
//! Maps raw `rumqttc` events and errors onto the transport-neutral model so
//! the impure event loop in [`super::client`] stays a thin shell.

use crate::protocol::{DeliveryOutcome, DeliveryReceipt};
use crate::transport::{TransportError, TransportErrorKind};
use bytes::Bytes;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Packet, SubscribeReasonCode};

/// Pure routing decisions for MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the action the event loop should take
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(Self::reason_code(code)),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::PubAck(puback) => EventRoute::DeliveryAcknowledged(DeliveryReceipt {
                    message_id: puback.pkid,
                    outcome: DeliveryOutcome::Acknowledged,
                }),
                Packet::PubComp(pubcomp) => EventRoute::DeliveryAcknowledged(DeliveryReceipt {
                    message_id: pubcomp.pkid,
                    outcome: DeliveryOutcome::Completed,
                }),
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure)),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Numeric CONNACK return code as defined by MQTT 3.1.1
    pub fn reason_code(code: ConnectReturnCode) -> i32 {
        match code {
            ConnectReturnCode::Success => 0,
            ConnectReturnCode::RefusedProtocolVersion => 1,
            ConnectReturnCode::BadClientId => 2,
            ConnectReturnCode::ServiceUnavailable => 3,
            ConnectReturnCode::BadUserNamePassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
        }
    }

    /// Classify an event loop error. Only broker refusals carry a reason code.
    pub fn classify_connection_error(error: &ConnectionError) -> TransportError {
        let message = error.to_string();
        match error {
            ConnectionError::ConnectionRefused(code) => {
                TransportError::new(TransportErrorKind::Refused, message)
                    .with_reason_code(Self::reason_code(*code))
            }
            ConnectionError::Tls(_) => TransportError::new(TransportErrorKind::Tls, message),
            ConnectionError::Io(_)
            | ConnectionError::NetworkTimeout
            | ConnectionError::FlushTimeout => {
                TransportError::new(TransportErrorKind::Network, message)
            }
            ConnectionError::RequestsDone => {
                TransportError::new(TransportErrorKind::Closed, message)
            }
            _ => TransportError::new(TransportErrorKind::Protocol, message),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK accepted; the session is usable
    ConnectionAcknowledged,
    /// CONNACK carried a refusal
    ConnectionRefused(i32),
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Outbound publish acknowledged by the broker
    DeliveryAcknowledged(DeliveryReceipt),
    /// SUBACK, possibly rejecting a filter
    SubscriptionConfirmed { packet_id: u16, rejected: bool },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

//! Wire payloads exchanged with the management broker

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Online/offline status published on `{root}/Status/Online`.
///
/// The same shape is used for the last will, so the broker announces
/// `{"online":false}` when the session drops uncleanly.
///
/// # Examples
/// ```
/// use mdm_agent::protocol::OnlineStatus;
///
/// let payload = OnlineStatus::offline().to_payload().unwrap();
/// assert_eq!(payload, br#"{"online":false}"#.to_vec());
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlineStatus {
    pub online: bool,
}

impl OnlineStatus {
    pub fn online() -> Self {
        Self { online: true }
    }

    pub fn offline() -> Self {
        Self { online: false }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A message delivered by the broker on one of our subscriptions
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Arrival order within one session, starting at 1
    pub sequence: u64,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            sequence,
        }
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn body(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Outcome of an outbound publish as reported by the transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Acknowledged,
    Completed,
}

/// Delivery acknowledgement; only ever logged
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: u16,
    pub outcome: DeliveryOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_status_payloads() {
        assert_eq!(
            OnlineStatus::online().to_payload().unwrap(),
            br#"{"online":true}"#.to_vec()
        );
        let parsed: OnlineStatus = serde_json::from_slice(br#"{"online":false}"#).unwrap();
        assert_eq!(parsed, OnlineStatus::offline());
    }

    #[test]
    fn test_inbound_body_is_lossy() {
        let message = InboundMessage::new("/a", vec![b'o', b'k', 0xff], 1);
        assert_eq!(message.body(), "ok\u{fffd}");
    }

    #[test]
    fn test_delivery_receipt_serialization() {
        let receipt = DeliveryReceipt {
            message_id: 7,
            outcome: DeliveryOutcome::Acknowledged,
        };
        let json = serde_json::to_value(receipt).unwrap();
        assert_eq!(json["message_id"], 7);
        assert_eq!(json["outcome"], "acknowledged");
    }
}

//! Impure I/O for the MQTT transport
//!
//! Each session owns one `rumqttc` event loop task and one dispatch task.
//! The event loop only polls the network and forwards what it sees over a
//! channel; the dispatch task invokes the callbacks. Keeping the two apart
//! means a callback that publishes or subscribes never blocks the loop that
//! has to drain those requests.

use super::connection::{configure_mqtt_options, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::protocol::InboundMessage;
use crate::transport::{
    deliver_event, ConnectRequest, Generation, Transport, TransportCallbacks, TransportError,
    TransportErrorKind, TransportEvent, TransportSession,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Production transport backed by `rumqttc`
#[derive(Debug, Default, Clone)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for MqttTransport {
    fn open(
        &self,
        request: ConnectRequest,
        callbacks: Arc<dyn TransportCallbacks>,
    ) -> Result<Arc<dyn TransportSession>, TransportError> {
        let mqtt_options = configure_mqtt_options(&request)?;
        let generation = request.generation;

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            generation = %generation,
            host = %request.broker.host,
            port = request.broker.port,
            tls = request.broker.use_tls,
            "Opening MQTT session"
        );

        tokio::spawn(run_event_loop(event_loop, generation, events_tx, shutdown_rx));
        tokio::spawn(dispatch_events(events_rx, generation, callbacks));

        Ok(Arc::new(MqttSession {
            generation,
            client,
            shutdown_tx,
        }))
    }
}

/// How long a closing session keeps polling to flush queued requests
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Poll the network until the first connection error or shutdown.
///
/// The first error ends the session: before CONNACK it is a connect
/// failure, afterwards a connection loss. Polling again would let rumqttc
/// reconnect on its own, which is the Connection Manager's job.
///
/// On shutdown a connected session keeps polling, without forwarding
/// anything, until the queued DISCONNECT is written or [`CLOSE_GRACE`]
/// runs out, so a final publish still reaches the broker.
async fn run_event_loop(
    mut event_loop: EventLoop,
    generation: Generation,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connected = false;
    let mut closing = false;
    let mut sequence = 0u64;
    let grace = tokio::time::sleep(CLOSE_GRACE);
    tokio::pin!(grace);

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed(), if !closing => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    if !connected {
                        debug!(generation = %generation, "MQTT session closed before CONNACK");
                        break;
                    }
                    closing = true;
                    grace.as_mut().reset(Instant::now() + CLOSE_GRACE);
                }
            }

            _ = &mut grace, if closing => {
                debug!(generation = %generation, "MQTT session close timed out");
                break;
            }

            polled = event_loop.poll() => {
                if closing {
                    match polled {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => {
                            debug!(generation = %generation, "MQTT session closed");
                            break;
                        }
                        Ok(_) => continue,
                    }
                }

                let event = match polled {
                    Ok(event) => event,
                    Err(e) => {
                        let error = MessageHandler::classify_connection_error(&e);
                        let event = if connected {
                            TransportEvent::ConnectionLost(error)
                        } else {
                            TransportEvent::ConnectFailed(error)
                        };
                        let _ = events.send(event);
                        break;
                    }
                };

                let forwarded = match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        connected = true;
                        Some(TransportEvent::ConnectSucceeded)
                    }
                    EventRoute::ConnectionRefused(code) => {
                        let error = TransportError::new(
                            TransportErrorKind::Refused,
                            format!("connection refused with return code {code}"),
                        )
                        .with_reason_code(code);
                        let _ = events.send(TransportEvent::ConnectFailed(error));
                        break;
                    }
                    EventRoute::MessageReceived { topic, payload } => {
                        sequence += 1;
                        Some(TransportEvent::Message(InboundMessage {
                            topic,
                            payload,
                            sequence,
                        }))
                    }
                    EventRoute::DeliveryAcknowledged(receipt) => {
                        Some(TransportEvent::DeliveryAck(receipt))
                    }
                    EventRoute::SubscriptionConfirmed { packet_id, rejected } => {
                        if rejected {
                            warn!(
                                generation = %generation,
                                packet_id,
                                "Broker rejected subscription"
                            );
                        } else {
                            debug!(
                                target: "mqtt_transport",
                                "Subscription confirmed: {}", packet_id
                            );
                        }
                        None
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                        None
                    }
                    EventRoute::OutgoingEvent => None,
                };

                if let Some(event) = forwarded {
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn dispatch_events(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    generation: Generation,
    callbacks: Arc<dyn TransportCallbacks>,
) {
    while let Some(event) = events.recv().await {
        deliver_event(callbacks.as_ref(), generation, event).await;
    }
}

/// Handle to one `rumqttc` session
pub struct MqttSession {
    generation: Generation,
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
}

#[async_trait]
impl TransportSession for MqttSession {
    fn generation(&self) -> Generation {
        self.generation
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Closed,
                    format!("failed to subscribe to {filter}: {e}"),
                )
            })
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Closed,
                    format!("failed to publish to {topic}: {e}"),
                )
            })
    }

    fn close(&self) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        // Queued behind any pending publish so it is flushed first
        if let Err(e) = self.client.try_disconnect() {
            debug!(generation = %self.generation, "Disconnect request not queued: {}", e);
        }
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Stops the event loop task if nobody closed the session explicitly
        let _ = self.shutdown_tx.send(true);
    }
}

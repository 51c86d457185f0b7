//! Message bus adapter: a durable FIFO queue with manual acknowledgment.
//!
//! One queue carries every job message. Deliveries are held by exactly one
//! consumer until acked or nacked; a nack with requeue makes the broker
//! redeliver, which is where the at-least-once guarantee comes from. The
//! AMQP implementation reconnects with bounded-exponential backoff while the
//! broker is down; the in-memory implementation mirrors the semantics for
//! tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};

/// Seconds between reconnect attempts once the backoff has saturated.
const RECONNECT_DELAY_SECS: u64 = 5;
/// Connect attempts per operation before surfacing a bus error.
const MAX_CONNECT_ATTEMPTS: u32 = 5;
/// AMQP heartbeat interval in seconds.
const HEARTBEAT_SECS: u16 = 30;
/// AMQP connection timeout in milliseconds.
const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Queue health snapshot for the stats endpoint.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// The configured queue name.
    pub queue_name: String,
    /// Messages waiting in the queue.
    pub message_count: u32,
    /// Consumers attached to the queue.
    pub consumer_count: u32,
    /// Whether the adapter currently holds a live connection.
    pub connected: bool,
}

/// One received message, holding the delivery until acked or nacked.
pub struct BusDelivery {
    /// Raw message body.
    pub body: Bytes,
    acker: Box<dyn Acker>,
}

impl BusDelivery {
    /// Acknowledges successful processing; the broker discards the message.
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` when the acknowledgment cannot be sent.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Rejects the message; with `requeue` the broker redelivers it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` when the rejection cannot be sent.
    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for BusDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusDelivery")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
trait Acker: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<()>;
    async fn nack(self: Box<Self>, requeue: bool) -> Result<()>;
}

/// Durable queue contract used by the coordinator (publish, stats) and the
/// worker (receive).
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes a persistent message to the queue.
    async fn publish(&self, body: Bytes) -> Result<()>;

    /// Blocks until the next delivery is available.
    async fn receive(&self) -> Result<BusDelivery>;

    /// Returns queue depth and consumer count.
    async fn stats(&self) -> Result<QueueStats>;
}

// ============================================================================
// In-memory bus
// ============================================================================

#[derive(Debug, Default)]
struct MemoryQueue {
    messages: std::sync::Mutex<VecDeque<Bytes>>,
    notify: Notify,
    consumers: AtomicU32,
}

/// In-memory FIFO bus for testing.
///
/// Redelivery order matches a broker requeue: a nacked message goes back to
/// the head of the queue.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    name: String,
    queue: Arc<MemoryQueue>,
}

impl MemoryBus {
    /// Creates an empty queue with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Arc::new(MemoryQueue::default()),
        }
    }

    /// Returns the number of waiting messages.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.queue.messages.lock().expect("bus lock").len()
    }
}

struct MemoryAcker {
    body: Bytes,
    queue: Arc<MemoryQueue>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()> {
        if requeue {
            self.queue
                .messages
                .lock()
                .expect("bus lock")
                .push_front(self.body);
            self.queue.notify.notify_one();
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, body: Bytes) -> Result<()> {
        self.queue
            .messages
            .lock()
            .expect("bus lock")
            .push_back(body);
        self.queue.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<BusDelivery> {
        self.queue.consumers.fetch_max(1, Ordering::SeqCst);
        loop {
            let notified = self.queue.notify.notified();
            if let Some(body) = self.queue.messages.lock().expect("bus lock").pop_front() {
                return Ok(BusDelivery {
                    body: body.clone(),
                    acker: Box::new(MemoryAcker {
                        body,
                        queue: Arc::clone(&self.queue),
                    }),
                });
            }
            notified.await;
        }
    }

    async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            queue_name: self.name.clone(),
            message_count: u32::try_from(self.depth()).unwrap_or(u32::MAX),
            consumer_count: self.queue.consumers.load(Ordering::SeqCst),
            connected: true,
        })
    }
}

// ============================================================================
// AMQP bus
// ============================================================================

/// AMQP (RabbitMQ) bus over a single connection with one channel.
///
/// The connection and channel are re-established on demand after a broker
/// outage; reconnect attempts back off exponentially up to five seconds.
pub struct AmqpBus {
    uri: String,
    queue: String,
    // The connection must outlive the channel, so both live together.
    state: Mutex<Option<AmqpState>>,
    consumer: Mutex<Option<Consumer>>,
}

struct AmqpState {
    _connection: Connection,
    channel: Channel,
}

impl std::fmt::Debug for AmqpBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpBus")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl AmqpBus {
    /// Creates an adapter for the given broker and queue.
    ///
    /// No connection is opened yet; the first operation connects, so a broker
    /// that is still starting does not fail process startup.
    #[must_use]
    pub fn new(host: &str, port: u16, user: &str, password: &str, queue: impl Into<String>) -> Self {
        let uri = format!(
            "amqp://{user}:{password}@{host}:{port}/%2f?heartbeat={HEARTBEAT_SECS}&connection_timeout={CONNECT_TIMEOUT_MS}"
        );
        Self {
            uri,
            queue: queue.into(),
            state: Mutex::new(None),
            consumer: Mutex::new(None),
        }
    }

    async fn open_state(&self) -> Result<AmqpState> {
        let mut delay = Duration::from_secs(1);
        let mut last_error = String::new();

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match self.try_open_state().await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        attempt,
                        error = %last_error,
                        "bus connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(RECONNECT_DELAY_SECS));
                }
            }
        }

        Err(Error::bus(format!(
            "failed to connect to broker after {MAX_CONNECT_ATTEMPTS} attempts: {last_error}"
        )))
    }

    async fn try_open_state(&self) -> Result<AmqpState> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| Error::bus(format!("broker connect failed: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Error::bus(format!("channel open failed: {e}")))?;

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::bus(format!("queue declare failed: {e}")))?;

        tracing::info!(queue = %self.queue, "connected to broker and declared queue");
        Ok(AmqpState {
            _connection: connection,
            channel,
        })
    }

    async fn channel(&self) -> Result<Channel> {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.as_ref() {
            if state.channel.status().connected() {
                return Ok(state.channel.clone());
            }
        }
        let state = self.open_state().await?;
        let channel = state.channel.clone();
        *guard = Some(state);
        Ok(channel)
    }

    async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| Error::bus(format!("ack failed: {e}")))
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| Error::bus(format!("nack failed: {e}")))
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn publish(&self, body: Bytes) -> Result<()> {
        let channel = self.channel().await?;
        let publish = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await;

        match publish {
            Ok(confirm) => {
                confirm
                    .await
                    .map_err(|e| Error::bus(format!("publish confirm failed: {e}")))?;
                Ok(())
            }
            Err(e) => {
                self.invalidate().await;
                Err(Error::bus(format!("publish failed: {e}")))
            }
        }
    }

    async fn receive(&self) -> Result<BusDelivery> {
        let mut guard = self.consumer.lock().await;
        loop {
            if guard.is_none() {
                let channel = self.channel().await?;
                channel
                    .basic_qos(1, BasicQosOptions::default())
                    .await
                    .map_err(|e| Error::bus(format!("qos failed: {e}")))?;
                let consumer = channel
                    .basic_consume(
                        &self.queue,
                        "basin-worker",
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| Error::bus(format!("consume failed: {e}")))?;
                tracing::info!(queue = %self.queue, "started consuming");
                *guard = Some(consumer);
            }

            let consumer = guard.as_mut().expect("consumer just set");
            match consumer.next().await {
                Some(Ok(delivery)) => {
                    return Ok(BusDelivery {
                        body: Bytes::from(delivery.data),
                        acker: Box::new(AmqpAcker {
                            acker: delivery.acker,
                        }),
                    });
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "consumer stream error, reconnecting");
                }
                None => {
                    tracing::warn!("consumer stream closed, reconnecting");
                }
            }

            *guard = None;
            self.invalidate().await;
            tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    }

    async fn stats(&self) -> Result<QueueStats> {
        let channel = match self.channel().await {
            Ok(channel) => channel,
            Err(_) => {
                return Ok(QueueStats {
                    queue_name: self.queue.clone(),
                    message_count: 0,
                    consumer_count: 0,
                    connected: false,
                });
            }
        };

        match channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(queue) => Ok(QueueStats {
                queue_name: self.queue.clone(),
                message_count: queue.message_count(),
                consumer_count: queue.consumer_count(),
                connected: true,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "queue stats unavailable");
                self.invalidate().await;
                Ok(QueueStats {
                    queue_name: self.queue.clone(),
                    message_count: 0,
                    consumer_count: 0,
                    connected: false,
                })
            }
        }
    }
}

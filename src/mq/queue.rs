//! Admission Queue
//!
//! Bounded FIFO work queue gated by an [`ExpiringWindow`]. A message enters
//! the queue only after reserving a window slot; the slot is released when a
//! consumer delivers the message successfully, or when it expires.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::metrics::QueueMetrics;
use super::sender::MessageSender;
use super::DEFAULT_QUEUE_CAPACITY;
use crate::error::{Error, Result};
use crate::window::ExpiringWindow;

/// Derives the window key of a message
pub type KeyFn<K, V> = Arc<dyn Fn(&V) -> Option<K> + Send + Sync>;

/// Admission queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued messages; may exceed the window capacity
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config(
                "queue capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// FIFO work queue whose admission is throttled by an expiring window
pub struct AdmissionQueue<K, V> {
    /// Admission gate
    window: ExpiringWindow<K, V>,
    /// Producer side of the FIFO
    tx: mpsc::Sender<V>,
    /// Consumer side of the FIFO, shared by all consumers
    rx: Mutex<mpsc::Receiver<V>>,
    /// Serializes "reserve in window, then push" across producers
    put_lock: Mutex<()>,
    /// Identity extraction
    key_fn: KeyFn<K, V>,
    /// Metrics collector
    metrics: Arc<QueueMetrics>,
}

impl<K, V> AdmissionQueue<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a queue of `queue_capacity` messages in front of `window` and
    /// start the window
    pub fn new(
        window: ExpiringWindow<K, V>,
        queue_capacity: usize,
        key_fn: impl Fn(&V) -> Option<K> + Send + Sync + 'static,
    ) -> Result<Arc<Self>> {
        Self::from_config(window, &QueueConfig { capacity: queue_capacity }, key_fn)
    }

    /// Create a queue from its configuration and start the window
    pub fn from_config(
        window: ExpiringWindow<K, V>,
        config: &QueueConfig,
        key_fn: impl Fn(&V) -> Option<K> + Send + Sync + 'static,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        window.start()?;

        let (tx, rx) = mpsc::channel(config.capacity);
        Ok(Arc::new(Self {
            window,
            tx,
            rx: Mutex::new(rx),
            put_lock: Mutex::new(()),
            key_fn: Arc::new(key_fn),
            metrics: Arc::new(QueueMetrics::new()),
        }))
    }

    /// Offer a message for delivery
    ///
    /// Returns `Ok(false)` without touching the queue when the message has no
    /// key or the window refused it (the window's reject callback has run).
    /// Otherwise pushes the message, waiting while the queue is full, and
    /// returns `Ok(true)`. Producers are serialized for the whole call.
    #[instrument(skip(self, value), fields(window = %self.window.name()))]
    pub async fn enqueue(&self, value: V) -> Result<bool> {
        let _producer = self.put_lock.lock().await;

        let key = (self.key_fn)(&value);
        if !self.window.offer(key.clone(), Some(value.clone()))? {
            self.metrics.record_not_admitted();
            return Ok(false);
        }

        if self.tx.send(value).await.is_err() {
            // Release the reservation; the message never reached the queue
            if let Some(key) = key {
                self.window.remove(&key);
            }
            return Err(Error::QueueClosed {
                name: self.window.name().to_string(),
            });
        }

        self.metrics.record_enqueued();
        Ok(true)
    }

    /// Take the next message, waiting while the queue is empty, and send it
    ///
    /// Returns the sender's status. When it equals `success_code` the
    /// message's window slot is released; otherwise the key stays in flight
    /// until it expires. A sender error is returned as [`Error::Send`] and
    /// also leaves the slot occupied.
    #[instrument(skip(self, sender), fields(window = %self.window.name()))]
    pub async fn dequeue_and_send<S>(&self, sender: &S, success_code: i32) -> Result<i32>
    where
        S: MessageSender<V> + ?Sized,
    {
        let message = {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        let message = message.ok_or_else(|| Error::QueueClosed {
            name: self.window.name().to_string(),
        })?;

        self.deliver(message, sender, success_code).await
    }

    /// Like [`dequeue_and_send`](Self::dequeue_and_send), but stops waiting
    /// with `Ok(None)` once `cancel` fires
    ///
    /// Cancellation is observed only while waiting for a message. A message
    /// already taken off the queue is always delivered.
    #[instrument(skip(self, sender, cancel), fields(window = %self.window.name()))]
    pub async fn dequeue_and_send_until<S>(
        &self,
        sender: &S,
        success_code: i32,
        cancel: &CancellationToken,
    ) -> Result<Option<i32>>
    where
        S: MessageSender<V> + ?Sized,
    {
        let message = {
            let mut rx = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                rx = self.rx.lock() => rx,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                message = rx.recv() => message,
            }
        };
        let message = message.ok_or_else(|| Error::QueueClosed {
            name: self.window.name().to_string(),
        })?;

        self.deliver(message, sender, success_code).await.map(Some)
    }

    /// Like [`dequeue_and_send`](Self::dequeue_and_send) but returns
    /// `Ok(None)` instead of waiting when the queue is empty
    ///
    /// Also returns `Ok(None)` while another consumer is parked waiting for
    /// a message, since the queue is then empty too.
    pub async fn try_dequeue_and_send<S>(&self, sender: &S, success_code: i32) -> Result<Option<i32>>
    where
        S: MessageSender<V> + ?Sized,
    {
        let message = match self.rx.try_lock() {
            Ok(mut rx) => rx.try_recv(),
            Err(_) => return Ok(None),
        };
        match message {
            Ok(message) => self.deliver(message, sender, success_code).await.map(Some),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::QueueClosed {
                name: self.window.name().to_string(),
            }),
        }
    }

    async fn deliver<S>(&self, message: V, sender: &S, success_code: i32) -> Result<i32>
    where
        S: MessageSender<V> + ?Sized,
    {
        let key = (self.key_fn)(&message);

        match sender.send(&message).await {
            Ok(status) if status == success_code => {
                if let Some(key) = &key {
                    self.window.remove(key);
                }
                self.metrics.record_sent();
                Ok(status)
            }
            Ok(status) => {
                self.metrics.record_send_failure();
                debug!(?key, status, "Send unsuccessful, key stays in flight");
                Ok(status)
            }
            Err(e) => {
                self.metrics.record_send_error();
                warn!(?key, "Send failed: {:#}", e);
                Err(Error::Send(e))
            }
        }
    }

    /// Number of queued messages
    pub fn queue_size(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Maximum number of queued messages
    pub fn queue_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of occupied window slots
    pub fn window_size(&self) -> usize {
        self.window.len()
    }

    /// Admission window
    pub fn window(&self) -> &ExpiringWindow<K, V> {
        &self.window
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Stop the window's expiration task
    pub async fn shutdown(&self) {
        self.window.stop().await;
    }
}

impl<K, V> Debug for AdmissionQueue<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("window", &self.window)
            .field("queue_size", &(self.tx.max_capacity() - self.tx.capacity()))
            .field("queue_capacity", &self.tx.max_capacity())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

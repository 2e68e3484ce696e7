//! Expiring Window
//!
//! Capacity-bounded key/value store whose entries expire after a fixed TTL.
//!
//! # Design
//!
//! - `DashMap` lookup table for lock-free `get`/`contains_key`
//! - [`ExpiryQueue`] ordering keys by deadline, drained by one background task
//! - Table and expiry queue are mutated only under the window lock, so a
//!   removed or evicted key never leaves a stale timed key behind
//! - Capacity is reserved under the same lock in [`AdmissionMode::Strict`];
//!   [`AdmissionMode::Soft`] checks it before locking

use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, warn};

use super::callback::{self, CallbackKind, WindowCallback};
use super::config::{AdmissionMode, WindowConfig};
use super::expiry::ExpiryQueue;
use super::metrics::WindowMetrics;
use crate::error::{Error, Result};

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Shared callback handle
pub type SharedCallback<K, V> = Arc<dyn WindowCallback<K, V>>;

/// Outcome of the locked part of `put`
enum Admission<K, V> {
    Inserted(usize),
    Refreshed,
    Rejected(K, V),
}

struct Inner<K, V> {
    config: WindowConfig,
    entries: DashMap<K, V>,
    expiry: ExpiryQueue<K>,
    count: AtomicUsize,
    /// Guards every mutation of `entries` and `expiry`
    lock: Mutex<()>,
    state: AtomicU8,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    expire_callback: Option<SharedCallback<K, V>>,
    reject_callback: Option<SharedCallback<K, V>>,
    metrics: Arc<WindowMetrics>,
}

/// Capacity-bounded, time-expiring key/value window
///
/// Cloning yields another handle to the same window. When every handle has
/// been dropped the background expiration task is cancelled.
pub struct ExpiringWindow<K, V> {
    inner: Arc<Inner<K, V>>,
    _cancel_on_drop: Arc<DropGuard>,
}

impl<K, V> Clone for ExpiringWindow<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _cancel_on_drop: Arc::clone(&self._cancel_on_drop),
        }
    }
}

/// Builder for [`ExpiringWindow`]
pub struct WindowBuilder<K, V> {
    config: WindowConfig,
    expire_callback: Option<SharedCallback<K, V>>,
    reject_callback: Option<SharedCallback<K, V>>,
    metrics: Option<Arc<WindowMetrics>>,
}

impl<K, V> WindowBuilder<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Invoke `callback` with each evicted entry
    pub fn on_expire(mut self, callback: impl WindowCallback<K, V> + 'static) -> Self {
        self.expire_callback = Some(Arc::new(callback));
        self
    }

    /// Invoke `callback` with each new entry refused because the window is full
    pub fn on_reject(mut self, callback: impl WindowCallback<K, V> + 'static) -> Self {
        self.reject_callback = Some(Arc::new(callback));
        self
    }

    /// Record into an existing metrics collector
    pub fn metrics(mut self, metrics: Arc<WindowMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the window
    ///
    /// The window must be started with [`ExpiringWindow::start`] before use.
    pub fn build(self) -> Result<ExpiringWindow<K, V>> {
        self.config.validate()?;

        let cancel = CancellationToken::new();
        let capacity = self.config.capacity;
        let inner = Arc::new(Inner {
            entries: DashMap::with_capacity(capacity),
            expiry: ExpiryQueue::with_capacity(capacity),
            count: AtomicUsize::new(0),
            lock: Mutex::new(()),
            state: AtomicU8::new(STATE_IDLE),
            cancel: cancel.clone(),
            task: Mutex::new(None),
            expire_callback: self.expire_callback,
            reject_callback: self.reject_callback,
            metrics: self.metrics.unwrap_or_default(),
            config: self.config,
        });

        Ok(ExpiringWindow {
            inner,
            _cancel_on_drop: Arc::new(cancel.drop_guard()),
        })
    }
}

impl<K, V> ExpiringWindow<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start building a window
    pub fn builder(config: WindowConfig) -> WindowBuilder<K, V> {
        WindowBuilder {
            config,
            expire_callback: None,
            reject_callback: None,
            metrics: None,
        }
    }

    /// Build a window without callbacks
    pub fn new(config: WindowConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start the background expiration task
    ///
    /// Idempotent while running. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime {
            name: self.name().to_string(),
        })?;

        match self.inner.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Ok(()),
            Err(_) => {
                return Err(Error::Stopped {
                    name: self.name().to_string(),
                })
            }
        }

        let inner = Arc::clone(&self.inner);
        let task = runtime.spawn(async move { inner.run_expiration().await });
        *self.inner.task.lock() = Some(task);

        info!(
            window = %self.name(),
            capacity = self.capacity(),
            ttl_ms = self.ttl().as_millis() as u64,
            "Started expiring window"
        );
        Ok(())
    }

    /// Stop the background expiration task and wait for it to exit
    ///
    /// Idempotent. A stopped window refuses further `put`/`get` calls but
    /// still allows `remove` so in-flight messages can be released.
    pub async fn stop(&self) {
        let previous = self.inner.state.swap(STATE_STOPPED, Ordering::AcqRel);
        self.inner.cancel.cancel();

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(window = %self.name(), "Expiration task ended abnormally: {}", e);
            }
        }

        if previous != STATE_STOPPED {
            info!(window = %self.name(), remaining = self.len(), "Stopped expiring window");
        }
    }

    /// Check if the expiration task is running
    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    fn ensure_running(&self) -> Result<()> {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_RUNNING => Ok(()),
            STATE_IDLE => Err(Error::NotStarted {
                name: self.name().to_string(),
            }),
            _ => Err(Error::Stopped {
                name: self.name().to_string(),
            }),
        }
    }

    /// Admit `key` with `value`
    ///
    /// Returns `Ok(true)` when the key was inserted or, if already present,
    /// its value replaced and its TTL restarted. Returns `Ok(false)` when the
    /// window is full and the key is new; the reject callback has then been
    /// invoked and the caller should fall back to another delivery path.
    pub fn put(&self, key: K, value: V) -> Result<bool> {
        self.ensure_running()?;

        match self.admit(key, value) {
            Admission::Inserted(size) => {
                self.inner.metrics.record_admitted(size);
                Ok(true)
            }
            Admission::Refreshed => {
                self.inner.metrics.record_refreshed();
                Ok(true)
            }
            Admission::Rejected(key, value) => {
                self.inner.metrics.record_rejected();
                info!(window = %self.name(), ?key, "Window full, rejecting new key");
                if let Some(callback) = &self.inner.reject_callback {
                    if !callback::invoke(
                        self.name(),
                        CallbackKind::Reject,
                        callback.as_ref(),
                        &key,
                        &value,
                    ) {
                        self.inner.metrics.record_callback_failure();
                    }
                }
                Ok(false)
            }
        }
    }

    /// Admit an entry whose key or value may be absent
    ///
    /// An absent key or value is refused with `Ok(false)` and no callback.
    pub fn offer(&self, key: Option<K>, value: Option<V>) -> Result<bool> {
        self.ensure_running()?;
        match (key, value) {
            (Some(key), Some(value)) => self.put(key, value),
            _ => Ok(false),
        }
    }

    fn admit(&self, key: K, value: V) -> Admission<K, V> {
        let inner = &*self.inner;
        let capacity = inner.config.capacity;

        if inner.config.admission == AdmissionMode::Soft
            && inner.count.load(Ordering::Acquire) >= capacity
            && !inner.entries.contains_key(&key)
        {
            return Admission::Rejected(key, value);
        }

        let _guard = inner.lock.lock();

        if let Some(mut slot) = inner.entries.get_mut(&key) {
            *slot = value;
            drop(slot);
            if !inner.expiry.refresh_by_key(&key) {
                debug!(window = %inner.config.name, ?key, "No live expiry entry to refresh");
            }
            return Admission::Refreshed;
        }

        if inner.config.admission == AdmissionMode::Strict
            && inner.count.load(Ordering::Acquire) >= capacity
        {
            return Admission::Rejected(key, value);
        }

        inner.expiry.push(key.clone(), inner.config.ttl);
        inner.entries.insert(key, value);
        Admission::Inserted(inner.count.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Remove `key`, releasing its slot
    ///
    /// A removed key never triggers the expire callback.
    pub fn remove(&self, key: &K) -> Option<V> {
        let inner = &*self.inner;
        let _guard = inner.lock.lock();

        let (_, value) = inner.entries.remove(key)?;
        if inner.expiry.remove_by_key(key).is_none() {
            warn!(window = %inner.config.name, ?key, "Removed key had no expiry entry");
        }
        inner.count.fetch_sub(1, Ordering::AcqRel);
        inner.metrics.record_removed();
        Some(value)
    }

    /// Get the value stored for `key`
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_running()?;
        Ok(self.inner.entries.get(key).map(|v| v.value().clone()))
    }

    /// Check if `key` currently holds a slot
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Check if no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a new key would currently be rejected
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Window name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Time-to-live of an admitted key
    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl
    }

    /// Window configuration
    pub fn config(&self) -> &WindowConfig {
        &self.inner.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Arc<WindowMetrics> {
        &self.inner.metrics
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Background loop: wait for the next deadline, evict, notify
    #[instrument(skip(self), fields(window = %self.config.name))]
    async fn run_expiration(self: Arc<Self>) {
        debug!("Expiration task running");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.expiry.wait_until_due() => {}
            }

            let evicted = match catch_unwind(AssertUnwindSafe(|| self.evict_due())) {
                Ok(evicted) => evicted,
                Err(_) => {
                    error!("Eviction pass panicked, retrying on next deadline");
                    continue;
                }
            };

            for (key, value) in evicted {
                self.metrics.record_expired();
                debug!(?key, "Evicted expired key");
                if let Some(callback) = &self.expire_callback {
                    if !callback::invoke(
                        &self.config.name,
                        CallbackKind::Expire,
                        callback.as_ref(),
                        &key,
                        &value,
                    ) {
                        self.metrics.record_callback_failure();
                    }
                }
            }
        }

        debug!("Expiration task exiting");
    }

    /// Pop due keys and drop them from the table, under the window lock
    fn evict_due(&self) -> Vec<(K, V)> {
        let _guard = self.lock.lock();
        let due = self.expiry.pop_due(Instant::now());

        let mut evicted = Vec::with_capacity(due.len());
        for item in due {
            match self.entries.remove(item.key()) {
                Some(entry) => {
                    self.count.fetch_sub(1, Ordering::AcqRel);
                    evicted.push(entry);
                }
                None => warn!(key = ?item.key(), "Expired key was not in the table"),
            }
        }
        evicted
    }
}

impl<K, V> Debug for ExpiringWindow<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringWindow")
            .field("name", &self.inner.config.name)
            .field("capacity", &self.inner.config.capacity)
            .field("ttl", &self.inner.config.ttl)
            .field("size", &self.inner.count.load(Ordering::Relaxed))
            .field("state", &self.inner.state.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

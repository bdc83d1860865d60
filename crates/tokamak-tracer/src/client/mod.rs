//! JSON-RPC client with in-flight call correlation and subscription delivery.
//!
//! ```text
//!   call() ──register id──> pending table ──write──> Transport
//!                                ^                       │
//!                                └──── listener task <───┘ read()
//!                                         │ id == 0
//!                                         v
//!                                  subscription queues (try_send)
//! ```
//!
//! One listener task per connection owns the read side. Responses are routed by id
//! only, so concurrent calls may complete in any order.

mod eth;

pub use eth::{EthClient, HeadSubscription};

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::transport::{self, Transport};
use crate::types::{RpcMessage, RpcRequest};

/// Process-wide request id counter. Zero is reserved for notifications.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Deadline for a single call, write included.
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    /// Retries for transient HTTP failures.
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Capacity of subscription queues and the HTTP response buffer.
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub poll_error_backoff: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            queue_capacity: 256,
            poll_interval: Duration::from_millis(200),
            poll_error_backoff: Duration::from_secs(1),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// State shared between callers and the listener task.
#[derive(Default)]
struct Shared {
    pending: Mutex<FxHashMap<u64, oneshot::Sender<RpcMessage>>>,
    subscriptions: Mutex<FxHashMap<String, mpsc::Sender<RpcMessage>>>,
    closed: AtomicBool,
}

impl Shared {
    fn dispatch(&self, frame: &str) {
        let parsed = if frame.trim_start().starts_with('[') {
            serde_json::from_str::<Vec<RpcMessage>>(frame)
        } else {
            serde_json::from_str::<RpcMessage>(frame).map(|message| vec![message])
        };

        match parsed {
            Ok(messages) => messages.into_iter().for_each(|message| self.route(message)),
            Err(e) => warn!(error = %e, "dropping malformed message"),
        }
    }

    fn route(&self, message: RpcMessage) {
        let id = message.numeric_id();
        if id == 0 {
            let subscriptions = lock(&self.subscriptions);
            if subscriptions.is_empty() {
                warn!(method = message.method(), "dropping notification, no subscribers");
            }
            for (subscription, queue) in subscriptions.iter() {
                if let Err(e) = queue.try_send(message.clone()) {
                    warn!(%subscription, "dropping notification: {e}");
                }
            }
            return;
        }

        match lock(&self.pending).remove(&id) {
            Some(slot) => {
                // The caller may have timed out in the meantime.
                let _ = slot.send(message);
            }
            None => warn!(id, "dropping response for unknown request"),
        }
    }

    /// Close every subscription queue and fail every pending call.
    fn shut_down(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.subscriptions).clear();
        lock(&self.pending).clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Removes the pending entry on every exit path of a call.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.id);
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    config: RpcConfig,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cheaply cloneable handle to one node connection.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Wrap an open transport and start its listener. Must run inside a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: RpcConfig) -> Self {
        let shared = Arc::new(Shared::default());
        let shutdown = CancellationToken::new();

        tokio::spawn(listen(
            Arc::clone(&transport),
            Arc::clone(&shared),
            shutdown.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                transport,
                shared,
                config,
                shutdown,
            }),
        }
    }

    pub async fn connect(url: &str, config: RpcConfig) -> Result<Self, RpcError> {
        let transport = transport::dial(url, &config).await?;
        Ok(Self::new(transport, config))
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Send a request and wait for the raw response message.
    pub async fn request(&self, method: &str, params: Value) -> Result<RpcMessage, RpcError> {
        let shared = &self.inner.shared;
        if shared.is_closed() {
            return Err(RpcError::Closed);
        }

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (slot, response) = oneshot::channel();
        lock(&shared.pending).insert(id, slot);
        let _guard = PendingGuard { shared, id };

        // The listener may have drained the table before our insert.
        if shared.is_closed() {
            return Err(RpcError::Closed);
        }

        let request = RpcRequest::new(id, method, params);
        let exchange = async {
            self.inner.transport.write(&request).await?;
            response.await.map_err(|_| RpcError::Closed)
        };

        let timeout = self.inner.config.call_timeout;
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Send a request and return its result, mapping a node error object to
    /// [`RpcError::JsonRpcError`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let response = self.request(method, params).await?;
        if let Some(error) = response.error {
            return Err(RpcError::JsonRpcError {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Register a queue for notifications. Every notification is offered to every
    /// registered queue; a full queue drops it.
    pub fn subscribe(&self, id: &str) -> Result<mpsc::Receiver<RpcMessage>, RpcError> {
        let shared = &self.inner.shared;
        if shared.is_closed() {
            return Err(RpcError::Closed);
        }

        let mut subscriptions = lock(&shared.subscriptions);
        match subscriptions.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RpcError::SubscriptionExists(id.to_string())),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    pub fn unsubscribe(&self, id: &str) -> Result<(), RpcError> {
        lock(&self.inner.shared.subscriptions)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RpcError::SubscriptionNotFound(id.to_string()))
    }

    /// Stop the listener and close the transport. Pending calls fail with
    /// [`RpcError::Closed`] and subscription queues end.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.shared.shut_down();
        self.inner.transport.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn pending_calls(&self) -> usize {
        lock(&self.inner.shared.pending).len()
    }
}

async fn listen(transport: Arc<dyn Transport>, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("rpc listener cancelled");
                break;
            }
            frame = transport.read() => frame,
        };

        match frame {
            Ok(Some(frame)) => shared.dispatch(&frame),
            Ok(None) => {
                debug!("rpc transport reached end of stream");
                break;
            }
            Err(e) => {
                warn!(error = %e, "rpc transport read failed, closing connection");
                break;
            }
        }
    }

    shared.shut_down();
}

//! Live price stream client.
//!
//! [`StreamHub`] keeps at most one connection per [`SubscriptionKey`].
//! Handles subscribing to the same key share the connection, its
//! [`ConnectionState`], and its reconnect history; the connection is torn
//! down when the last [`Subscription`] is released.
//!
//! This module is organized by concern:
//! - [`connection`] - connection state and the reconnect loop
//! - [`sse`] - `text/event-stream` framing and the HTTP transport

pub mod connection;
pub mod sse;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Result;
use crate::buffer::TickSink;
use crate::models::tick::PriceTick;
use crate::retry::RetryPolicy;

pub use connection::ConnectionState;
pub use sse::{HttpEventSource, SseDecoder};

/// Event name carrying a [`PriceTick`] payload.
pub const PRICE_UPDATE_EVENT: &str = "price-update";

/// Event name of the server keep-alive.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// Event name; `"message"` when the frame had no `event:` field.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// Events of one open connection. Ends (or yields an error) when the
/// connection drops.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ServerEvent>> + Send>>;

/// Something that can open a live event stream for a subscription key.
pub trait EventTransport: Send + Sync + 'static {
    /// Opens the stream. Resolves once the server has accepted it; dropping
    /// the returned stream closes the connection.
    fn open(&self, key: &SubscriptionKey) -> impl Future<Output = Result<EventStream>> + Send;
}

/// Callback invoked with every parsed tick of a subscription.
pub type UpdateListener = Arc<dyn Fn(&PriceTick) + Send + Sync>;

/// Which items a connection streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    All,
    /// Sorted and de-duplicated.
    Items(Vec<u32>),
}

impl SubscriptionKey {
    /// Builds a key from an optional item filter. `None` or an empty filter
    /// subscribes to every item.
    pub fn new(item_ids: Option<&[u32]>) -> Self {
        match item_ids {
            Some(ids) if !ids.is_empty() => {
                let mut ids = ids.to_vec();
                ids.sort_unstable();
                ids.dedup();
                SubscriptionKey::Items(ids)
            }
            _ => SubscriptionKey::All,
        }
    }

    /// Value of the `items` query parameter, if the key filters.
    pub fn query_value(&self) -> Option<String> {
        match self {
            SubscriptionKey::All => None,
            SubscriptionKey::Items(ids) => Some(
                ids.iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.query_value() {
            Some(ids) => write!(f, "items[{ids}]"),
            None => f.write_str("all"),
        }
    }
}

/// State shared between a connection task and its subscribers.
pub(crate) struct ConnectionShared {
    state: watch::Sender<ConnectionState>,
    listeners: Mutex<Vec<(u64, UpdateListener)>>,
}

impl ConnectionShared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            state,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Applies `f` unless the connection is being torn down.
    ///
    /// The cancellation check happens under the watch lock, so once
    /// teardown has written its final state no later update can land.
    pub(crate) fn update(&self, cancel: &CancellationToken, f: impl FnOnce(&mut ConnectionState)) {
        self.state.send_if_modified(|state| {
            if cancel.is_cancelled() {
                return false;
            }
            f(state);
            true
        });
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub(crate) fn notify(&self, tick: &PriceTick) {
        let listeners: Vec<UpdateListener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(tick);
        }
    }
}

struct ConnectionEntry {
    shared: Arc<ConnectionShared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    subscribers: usize,
}

#[derive(Default)]
struct Registry {
    connections: Mutex<HashMap<SubscriptionKey, ConnectionEntry>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every live connection and hands out [`Subscription`]s.
pub struct StreamHub<T: EventTransport> {
    transport: Arc<T>,
    policy: RetryPolicy,
    sink: TickSink,
    registry: Arc<Registry>,
}

impl<T: EventTransport> StreamHub<T> {
    /// Creates a hub whose connections feed parsed ticks into `sink`.
    pub fn new(transport: T, policy: RetryPolicy, sink: TickSink) -> Self {
        Self {
            transport: Arc::new(transport),
            policy,
            sink,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Subscribes to ticks for `item_ids` (all items when `None`).
    ///
    /// Reuses the open connection for the same item set if there is one.
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, item_ids: Option<&[u32]>, on_update: F) -> Subscription
    where
        F: Fn(&PriceTick) + Send + Sync + 'static,
    {
        self.subscribe_key(SubscriptionKey::new(item_ids), Arc::new(on_update))
    }

    /// Subscribes with an explicit key and shared listener.
    pub fn subscribe_key(&self, key: SubscriptionKey, on_update: UpdateListener) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = lock(&self.registry.connections);

        let entry = connections.entry(key.clone()).or_insert_with(|| {
            let shared = Arc::new(ConnectionShared::new());
            let cancel = CancellationToken::new();
            let task = tokio::spawn(connection::run_connection(
                Arc::clone(&self.transport),
                key.clone(),
                self.policy,
                Arc::clone(&shared),
                self.sink.clone(),
                cancel.clone(),
            ));
            info!(key = %key, "Opened stream subscription");
            ConnectionEntry {
                shared,
                cancel,
                task: Some(task),
                subscribers: 0,
            }
        });

        entry.subscribers += 1;
        lock(&entry.shared.listeners).push((id, on_update));
        debug!(key = %key, subscribers = entry.subscribers, "Added stream subscriber");

        Subscription {
            key,
            id,
            state: entry.shared.state.subscribe(),
            registry: Arc::clone(&self.registry),
            released: false,
        }
    }

    /// Number of distinct open connections.
    pub fn active_connections(&self) -> usize {
        lock(&self.registry.connections).len()
    }
}

/// A subscriber's handle on a shared connection.
///
/// Dropping the handle releases it; [`Subscription::unsubscribe`] does the
/// same and additionally waits for the connection task to finish when this
/// was the last subscriber.
pub struct Subscription {
    key: SubscriptionKey,
    id: u64,
    state: watch::Receiver<ConnectionState>,
    registry: Arc<Registry>,
    released: bool,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver notified on every connection state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected
    }

    pub fn reconnect_count(&self) -> u32 {
        self.state.borrow().reconnect_count
    }

    pub fn connection_error(&self) -> Option<String> {
        self.state.borrow().connection_error.clone()
    }

    pub fn last_update(&self) -> Option<PriceTick> {
        self.state.borrow().last_update.clone()
    }

    pub fn last_heartbeat_at(&self) -> Option<i64> {
        self.state.borrow().last_heartbeat_at
    }

    /// Releases this handle and, if it was the last one, waits for the
    /// connection to shut down.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.release() {
            // The task only ends by observing cancellation; a join error
            // means it panicked, which teardown has nothing to add to.
            let _ = task.await;
        }
    }

    fn release(&mut self) -> Option<JoinHandle<()>> {
        if self.released {
            return None;
        }
        self.released = true;

        let mut connections = lock(&self.registry.connections);
        let entry = connections.get_mut(&self.key)?;
        lock(&entry.shared.listeners).retain(|(id, _)| *id != self.id);
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers > 0 {
            return None;
        }

        let mut entry = connections.remove(&self.key)?;
        drop(connections);

        // Cancel first: from here on the task's own updates are ignored and
        // a close racing with teardown cannot schedule a reconnect.
        entry.cancel.cancel();
        entry.shared.state.send_modify(|state| {
            state.is_connected = false;
            state.reconnect_pending = false;
        });
        info!(key = %self.key, "Closed stream subscription");
        entry.task.take()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

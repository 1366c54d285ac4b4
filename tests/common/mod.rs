//! Shared test utilities: a scripted event transport and catalog source.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream;
use tokio::sync::mpsc;

use ge_tracker::models::catalog::{CatalogPage, Item, Pagination};
use ge_tracker::prefetch::CatalogSource;
use ge_tracker::stream::{
    EventStream, EventTransport, HEARTBEAT_EVENT, PRICE_UPDATE_EVENT, ServerEvent, SubscriptionKey,
};
use ge_tracker::{Result, TrackerError};

/// Abyssal whip.
pub const WHIP: u32 = 4151;

/// Builds a `price-update` payload.
pub fn price_update_json(item_id: u32, high: i64, low: i64, timestamp: i64) -> String {
    format!(
        r#"{{"item_id":{item_id},"high":{high},"low":{low},"high_time":{timestamp},"low_time":{timestamp},"timestamp":{timestamp}}}"#
    )
}

enum Step {
    Refuse,
    Accept(mpsc::UnboundedReceiver<Result<ServerEvent>>),
}

/// The server side of one accepted connection.
pub struct EventFeed {
    tx: mpsc::UnboundedSender<Result<ServerEvent>>,
}

impl EventFeed {
    pub fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(Ok(event));
    }

    pub fn price_update(&self, payload: &str) {
        self.send(ServerEvent::new(PRICE_UPDATE_EVENT, payload));
    }

    pub fn heartbeat(&self) {
        self.send(ServerEvent::new(HEARTBEAT_EVENT, "{}"));
    }

    /// Fails the connection with a transport error.
    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(TrackerError::Stream(message.to_string())));
    }

    /// Ends the stream as if the server closed it.
    pub fn close(self) {}
}

/// Transport whose connection attempts follow a script. Once the script is
/// exhausted every attempt is refused.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    opened: Arc<Mutex<Vec<SubscriptionKey>>>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a refused connection attempt.
    pub fn refuse(&self) {
        self.script.lock().unwrap().push_back(Step::Refuse);
    }

    /// Queues an accepted connection and returns its feed.
    pub fn accept(&self) -> EventFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(Step::Accept(rx));
        EventFeed { tx }
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Keys of every connection attempt, in order.
    pub fn opened_keys(&self) -> Vec<SubscriptionKey> {
        self.opened.lock().unwrap().clone()
    }
}

impl EventTransport for ScriptedTransport {
    fn open(&self, key: &SubscriptionKey) -> impl Future<Output = Result<EventStream>> + Send {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().unwrap().push(key.clone());
        let step = self.script.lock().unwrap().pop_front();

        async move {
            match step {
                Some(Step::Accept(rx)) => {
                    let events = stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|event| (event, rx))
                    });
                    Ok(Box::pin(events) as EventStream)
                }
                Some(Step::Refuse) | None => {
                    Err(TrackerError::Stream("connection refused".to_string()))
                }
            }
        }
    }
}

/// Catalog of `total_pages` pages with `per_page` items each. Pages in
/// `failing` always error.
#[derive(Clone)]
pub struct ScriptedCatalog {
    total_pages: u32,
    per_page: u32,
    failing: Arc<HashSet<u32>>,
    latency: Duration,
    calls: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedCatalog {
    pub fn new(total_pages: u32, failing: &[u32]) -> Self {
        Self {
            total_pages,
            per_page: 2,
            failing: Arc::new(failing.iter().copied().collect()),
            latency: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delays every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Pages requested so far, including retries.
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, page: u32) -> usize {
        self.calls().iter().filter(|p| **p == page).count()
    }

    /// Id of the `index`th item on `page`.
    pub fn item_id(page: u32, index: u32) -> u32 {
        page * 1000 + index
    }
}

impl CatalogSource for ScriptedCatalog {
    fn fetch_page(&self, page: u32, limit: u32) -> impl Future<Output = Result<CatalogPage>> + Send {
        self.calls.lock().unwrap().push(page);
        let result = if self.failing.contains(&page) {
            Err(TrackerError::Stream(format!("page {page} unavailable")))
        } else {
            let data = (0..self.per_page)
                .map(|i| Item {
                    id: Self::item_id(page, i),
                    name: format!("Item {page}-{i}"),
                    members: false,
                    limit: None,
                    value: None,
                    icon: None,
                    examine: None,
                })
                .collect();
            Ok(CatalogPage {
                data,
                meta: Pagination {
                    page,
                    limit,
                    total: u64::from(self.total_pages * self.per_page),
                    total_pages: self.total_pages,
                },
            })
        };
        let latency = self.latency;

        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            result
        }
    }
}

//! Background pagination of the item catalog.
//!
//! [`CatalogPrefetcher::run`] walks the paged item listing from page 1,
//! retrying each page under the prefetch [`RetryPolicy`], skipping pages
//! that keep failing and giving up once too many have. Results are merged
//! into a shared [`ItemCatalog`] that readers can query at any time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::api::ApiClient;
use crate::models::catalog::{CatalogPage, Item};
use crate::retry::RetryPolicy;

/// Items requested per catalog page.
pub const PAGE_SIZE: u32 = 200;

/// A run aborts once more than this many pages have failed.
pub const MAX_FAILED_PAGES: usize = 5;

/// Source of catalog pages.
pub trait CatalogSource: Send + Sync + 'static {
    fn fetch_page(&self, page: u32, limit: u32) -> impl Future<Output = Result<CatalogPage>> + Send;
}

impl CatalogSource for ApiClient {
    fn fetch_page(&self, page: u32, limit: u32) -> impl Future<Output = Result<CatalogPage>> + Send {
        self.fetch_catalog_page(page, limit)
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    items: HashMap<u32, Item>,
    fully_loaded: bool,
    load_error: Option<String>,
}

/// Client-side item cache filled by the prefetcher.
///
/// Updates only ever add or replace items until [`ItemCatalog::reset`].
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    inner: Arc<RwLock<CatalogState>>,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.items.is_empty()
    }

    pub async fn get(&self, item_id: u32) -> Option<Item> {
        self.inner.read().await.items.get(&item_id).cloned()
    }

    /// All cached items ordered by id.
    pub async fn items(&self) -> Vec<Item> {
        let state = self.inner.read().await;
        let mut items: Vec<Item> = state.items.values().cloned().collect();
        items.sort_by_key(|item| item.id);
        items
    }

    /// Items whose name contains `query`, ignoring case, ordered by name.
    /// An empty query matches nothing.
    pub async fn search(&self, query: &str) -> Vec<Item> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let state = self.inner.read().await;
        let mut hits: Vec<Item> = state
            .items
            .values()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        hits
    }

    /// Whether a prefetch run has finished (completely or by aborting).
    pub async fn is_fully_loaded(&self) -> bool {
        self.inner.read().await.fully_loaded
    }

    /// Summary of pages that could not be fetched by the last run.
    pub async fn load_error(&self) -> Option<String> {
        self.inner.read().await.load_error.clone()
    }

    /// Clears every item and the load flags so the catalog can be fetched
    /// again.
    pub async fn reset(&self) {
        let mut state = self.inner.write().await;
        *state = CatalogState::default();
    }

    /// Merges a page unless `cancel` has fired. Returns whether it was applied.
    async fn merge_page(&self, items: Vec<Item>, cancel: &CancellationToken) -> bool {
        let mut state = self.inner.write().await;
        if cancel.is_cancelled() {
            return false;
        }
        for item in items {
            state.items.insert(item.id, item);
        }
        true
    }

    async fn finish(&self, load_error: Option<String>, cancel: &CancellationToken) -> bool {
        let mut state = self.inner.write().await;
        if cancel.is_cancelled() || state.fully_loaded {
            return false;
        }
        state.fully_loaded = true;
        state.load_error = load_error;
        true
    }
}

/// How a prefetch run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// Every page was attempted. `failed_pages` were skipped.
    Completed { pages: u32, failed_pages: Vec<u32> },
    /// Too many pages failed; the run stopped early.
    Aborted { failed_pages: Vec<u32> },
    /// The cancellation token fired.
    Cancelled,
    /// Another run was in progress.
    AlreadyRunning,
    /// The catalog was already fully loaded.
    AlreadyLoaded,
}

/// Sequentially pages the item listing into an [`ItemCatalog`].
pub struct CatalogPrefetcher<S: CatalogSource> {
    source: Arc<S>,
    catalog: ItemCatalog,
    policy: RetryPolicy,
    running: Arc<AtomicBool>,
}

impl<S: CatalogSource> Clone for CatalogPrefetcher<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            catalog: self.catalog.clone(),
            policy: self.policy,
            running: Arc::clone(&self.running),
        }
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: CatalogSource> CatalogPrefetcher<S> {
    pub fn new(source: S, catalog: ItemCatalog, policy: RetryPolicy) -> Self {
        Self {
            source: Arc::new(source),
            catalog,
            policy,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fetches the whole catalog.
    ///
    /// A second call while a run is in progress returns
    /// [`PrefetchOutcome::AlreadyRunning`] without doing anything. After
    /// `cancel` fires the catalog is left untouched, even by requests that
    /// were already in flight.
    pub async fn run(&self, cancel: &CancellationToken) -> PrefetchOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Catalog prefetch already running");
            return PrefetchOutcome::AlreadyRunning;
        }
        let _guard = RunGuard(Arc::clone(&self.running));

        if self.catalog.is_fully_loaded().await {
            return PrefetchOutcome::AlreadyLoaded;
        }

        let mut page = 1;
        // Until a page succeeds there is nothing to tell us more exist.
        let mut total_pages = 1;
        let mut failed_pages = Vec::new();

        info!(page_size = PAGE_SIZE, "Starting catalog prefetch");
        loop {
            if cancel.is_cancelled() {
                return PrefetchOutcome::Cancelled;
            }

            match self.fetch_with_retry(page, cancel).await {
                PageResult::Fetched(result) => {
                    total_pages = result.meta.total_pages;
                    let count = result.data.len();
                    if !self.catalog.merge_page(result.data, cancel).await {
                        return PrefetchOutcome::Cancelled;
                    }
                    debug!(page, total_pages, items = count, "Fetched catalog page");
                }
                PageResult::Failed(error) => {
                    warn!(page, error = %error, "Skipping catalog page");
                    failed_pages.push(page);
                    if failed_pages.len() > MAX_FAILED_PAGES {
                        warn!(failed = failed_pages.len(), "Too many catalog pages failed, aborting");
                        let summary = failure_summary(&failed_pages, true);
                        if !self.catalog.finish(Some(summary), cancel).await {
                            return PrefetchOutcome::Cancelled;
                        }
                        return PrefetchOutcome::Aborted { failed_pages };
                    }
                }
                PageResult::Cancelled => return PrefetchOutcome::Cancelled,
            }

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        let summary = (!failed_pages.is_empty()).then(|| failure_summary(&failed_pages, false));
        if !self.catalog.finish(summary, cancel).await {
            return PrefetchOutcome::Cancelled;
        }
        let items = self.catalog.len().await;
        info!(pages = page, failed = failed_pages.len(), items, "Catalog prefetch finished");
        PrefetchOutcome::Completed {
            pages: page,
            failed_pages,
        }
    }

    async fn fetch_with_retry(&self, page: u32, cancel: &CancellationToken) -> PageResult {
        let mut attempts = 0;
        loop {
            let fetched = tokio::select! {
                biased;
                () = cancel.cancelled() => return PageResult::Cancelled,
                fetched = self.source.fetch_page(page, PAGE_SIZE) => fetched,
            };
            attempts += 1;

            let error = match fetched {
                Ok(_) if cancel.is_cancelled() => return PageResult::Cancelled,
                Ok(result) => return PageResult::Fetched(result),
                Err(e) => e,
            };

            if !self.policy.allows_another(attempts) {
                return PageResult::Failed(format!("{error} (after {attempts} attempts)"));
            }

            let delay = self.policy.delay_for(attempts - 1);
            debug!(page, attempt = attempts, backoff_ms = delay.as_millis() as u64, error = %error, "Retrying catalog page");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return PageResult::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

enum PageResult {
    Fetched(CatalogPage),
    Failed(String),
    Cancelled,
}

fn failure_summary(failed_pages: &[u32], aborted: bool) -> String {
    let pages = failed_pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if aborted {
        format!("catalog load aborted after {} failed pages: {pages}", failed_pages.len())
    } else {
        format!("failed to load catalog pages: {pages}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u32, name: &str) -> Item {
        Item {
            id,
            name: name.to_string(),
            members: false,
            limit: None,
            value: None,
            icon: None,
            examine: None,
        }
    }

    #[tokio::test]
    async fn search_is_case_insensitive_substring() {
        let catalog = ItemCatalog::new();
        let cancel = CancellationToken::new();
        catalog
            .merge_page(
                vec![item(4151, "Abyssal whip"), item(11802, "Armadyl godsword"), item(2, "Cannonball")],
                &cancel,
            )
            .await;

        let hits = catalog.search("WHIP").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 4151);

        let names: Vec<String> = catalog.search("a").await.into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["Abyssal whip", "Armadyl godsword", "Cannonball"]);

        assert!(catalog.search("  ").await.is_empty());
    }

    #[tokio::test]
    async fn merge_replaces_and_reset_clears() {
        let catalog = ItemCatalog::new();
        let cancel = CancellationToken::new();
        catalog.merge_page(vec![item(1, "Old name")], &cancel).await;
        catalog.merge_page(vec![item(1, "New name")], &cancel).await;
        assert_eq!(catalog.len().await, 1);
        assert_eq!(catalog.get(1).await.unwrap().name, "New name");

        assert!(catalog.finish(Some("x".into()), &cancel).await);
        assert!(!catalog.finish(None, &cancel).await);
        assert_eq!(catalog.load_error().await.as_deref(), Some("x"));

        catalog.reset().await;
        assert!(catalog.is_empty().await);
        assert!(!catalog.is_fully_loaded().await);
        assert!(catalog.load_error().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_catalog_is_not_mutated() {
        let catalog = ItemCatalog::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!catalog.merge_page(vec![item(1, "a")], &cancel).await);
        assert!(!catalog.finish(None, &cancel).await);
        assert!(catalog.is_empty().await);
        assert!(!catalog.is_fully_loaded().await);
    }

    #[test]
    fn run_future_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}
        let prefetcher = CatalogPrefetcher::new(
            ApiClient::new("http://localhost:8080/api"),
            ItemCatalog::new(),
            RetryPolicy::prefetch(),
        );
        let cancel = CancellationToken::new();
        assert_send(&prefetcher.run(&cancel));
    }

    #[test]
    fn summarizes_failures() {
        assert_eq!(failure_summary(&[3, 7], false), "failed to load catalog pages: 3, 7");
        assert!(failure_summary(&[1, 2, 3, 4, 5, 6], true).starts_with("catalog load aborted after 6"));
    }
}

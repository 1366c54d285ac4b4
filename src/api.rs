//! REST client for the tracker API.
//!
//! Covers the two request/response calls the pipeline depends on: price
//! history for one item and period, and a page of the item catalog.

use reqwest::Client;
use tracing::debug;

use crate::Result;
use crate::models::Period;
use crate::models::catalog::CatalogPage;
use crate::models::history::PriceHistory;

/// Thin wrapper over a shared [`reqwest::Client`] and the API base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a client rooted at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Creates a client that reuses an existing connection pool.
    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Fetches the price history of an item for a period.
    ///
    /// `sample` asks the server to downsample to roughly that many points.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`](crate::TrackerError) if the request fails,
    /// the server answers with an error status, or the body is not a
    /// history response.
    pub async fn fetch_price_history(
        &self,
        item_id: u32,
        period: Period,
        sample: Option<u32>,
    ) -> Result<PriceHistory> {
        let url = history_endpoint(&self.base_url, item_id, period, sample);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let history: PriceHistory = response.json().await?;
        debug!(
            item_id,
            period = period.as_str(),
            points = history.data.len(),
            sampled = history.meta.sampled,
            "Fetched price history"
        );
        Ok(history)
    }

    /// Fetches one page of the item catalog.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`](crate::TrackerError) if the request fails,
    /// the server answers with an error status, or the body is not a page.
    pub async fn fetch_catalog_page(&self, page: u32, limit: u32) -> Result<CatalogPage> {
        let url = catalog_endpoint(&self.base_url, page, limit);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let page: CatalogPage = response.json().await?;
        Ok(page)
    }
}

fn history_endpoint(base_url: &str, item_id: u32, period: Period, sample: Option<u32>) -> String {
    let mut endpoint = format!(
        "{base_url}/prices/{item_id}/history?period={}",
        period.as_str()
    );
    if let Some(sample) = sample {
        endpoint.push_str(&format!("&sample={sample}"));
    }
    endpoint
}

fn catalog_endpoint(base_url: &str, page: u32, limit: u32) -> String {
    format!("{base_url}/items?page={page}&limit={limit}")
}

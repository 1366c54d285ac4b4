use std::path::PathBuf;
use std::time::Duration;

use ge_tracker::TrackerError;
use ge_tracker::api::ApiClient;
use ge_tracker::buffer::{LiveTickBuffer, SharedTickBuffer};
use ge_tracker::config::fetch_config;
use ge_tracker::merge::ChartView;
use ge_tracker::models::{Period, now_unix_ms};
use ge_tracker::prefetch::{CatalogPrefetcher, ItemCatalog};
use ge_tracker::stream::{HttpEventSource, StreamHub};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt::init();

    let mut app_config = fetch_config()?;
    if let Some(path) = std::env::args().nth(1).map(PathBuf::from) {
        app_config = app_config.load_overrides(&path)?;
    }

    let client = ApiClient::new(app_config.api.base_url.clone());
    let shutdown = CancellationToken::new();

    let catalog = ItemCatalog::new();
    let prefetcher = CatalogPrefetcher::new(client.clone(), catalog.clone(), app_config.prefetch.retry);
    let prefetch = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { prefetcher.run(&shutdown).await })
    };

    let (buffer, sink) = SharedTickBuffer::spawn(LiveTickBuffer::default());
    let hub = StreamHub::new(
        HttpEventSource::new(client.clone()),
        app_config.stream.retry,
        sink,
    );
    let tracked = &app_config.stream.tracked_items;
    let subscription = hub.subscribe(Some(tracked.as_slice()), |tick| {
        tracing::trace!(item_id = tick.item_id, high = ?tick.high, low = ?tick.low, "Tick");
    });

    // Chart the first tracked item, if any, re-merging on every buffered tick.
    let chart = match tracked.first() {
        Some(&item_id) => match ChartView::load(&client, item_id, Period::OneDay).await {
            Ok(view) => Some(view),
            Err(e) => {
                warn!(item_id, error = %e, "Failed to load price history, charting live data only");
                Some(ChartView::new(item_id, Period::OneDay, Vec::new()))
            }
        },
        None => None,
    };

    let mut changes = buffer.changes();
    let mut health = tokio::time::interval(app_config.stream.stale_after.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(view) = &chart {
                    let merged = view.render_shared(&buffer).await;
                    if let Some(stats) = &merged.stats {
                        info!(
                            item_id = view.item_id,
                            points = merged.data.len(),
                            last = %stats.last,
                            change_percent = %stats.change_percent,
                            trend = ?stats.trend,
                            "Chart updated"
                        );
                    }
                }
            }
            _ = health.tick() => {
                let state = subscription.state();
                let catalog_items = catalog.len().await;
                if state.is_stale(now_unix_ms(), app_config.stream.stale_after) {
                    warn!(key = %subscription.key(), "Price stream is connected but silent");
                }
                info!(
                    connected = state.is_connected,
                    reconnects = state.reconnect_count,
                    error = ?state.connection_error,
                    catalog_items,
                    "Stream status"
                );
            }
        }
    }

    info!("Shutting down");
    shutdown.cancel();
    subscription.unsubscribe().await;
    if let Ok(outcome) = prefetch.await {
        info!(?outcome, "Catalog prefetch ended");
    }

    Ok(())
}

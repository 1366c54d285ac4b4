//! Deserialization tests for the tracker API payloads.

use rust_decimal_macros::dec;

use ge_tracker::TrackerError;
use ge_tracker::models::Period;
use ge_tracker::models::catalog::CatalogPage;
use ge_tracker::models::history::PriceHistory;
use ge_tracker::models::tick::PriceTick;

const HISTORY_24H_JSON: &str = include_str!("fixtures/history_24h.json");
const HISTORY_1Y_JSON: &str = include_str!("fixtures/history_1y.json");
const CATALOG_PAGE_JSON: &str = include_str!("fixtures/catalog_page.json");
const PRICE_UPDATE_JSON: &str = include_str!("fixtures/price_update.json");

#[test]
fn test_bucketed_history_deserializes() {
    let history: PriceHistory =
        serde_json::from_str(HISTORY_24H_JSON).expect("Failed to deserialize history");

    assert_eq!(history.meta.item_id, 4151);
    assert_eq!(history.meta.period, Period::OneDay);
    assert_eq!(history.meta.count, 3);
    assert!(!history.meta.sampled);
    assert_eq!(history.meta.start_date.as_deref(), Some("2023-11-14T22:13:20Z"));
    assert_eq!(history.data.len(), 3);

    let first = &history.data[0];
    assert_eq!(first.timestamp, 1_700_000_000_000);
    assert_eq!(first.resolved_high(), Some(dec!(1520000)));
    assert_eq!(first.resolved_low(), Some(dec!(1498000)));
    assert_eq!(first.total_volume(), Some(200));

    let second = &history.data[1];
    assert_eq!(second.resolved_low(), None);
    assert_eq!(second.total_volume(), Some(40));

    let third = &history.data[2];
    assert_eq!(third.resolved_high(), None);
    assert_eq!(third.total_volume(), None);
}

#[test]
fn test_daily_history_deserializes() {
    let history: PriceHistory =
        serde_json::from_str(HISTORY_1Y_JSON).expect("Failed to deserialize history");

    assert_eq!(history.meta.period, Period::OneYear);
    assert!(history.meta.sampled);
    assert!(history.meta.end_date.is_none());

    let first = &history.data[0];
    assert_eq!(first.avg_high_price, None);
    assert_eq!(first.resolved_high(), Some(dec!(1810000)));
    assert_eq!(first.resolved_low(), Some(dec!(1760000)));
    assert_eq!(first.total_volume(), Some(5021));

    let last = &history.data[2];
    assert_eq!(last.resolved_high(), None);
    assert_eq!(last.price, Some(dec!(1770000)));
}

#[test]
fn test_catalog_page_deserializes() {
    let page: CatalogPage =
        serde_json::from_str(CATALOG_PAGE_JSON).expect("Failed to deserialize catalog page");

    assert_eq!(page.meta.page, 1);
    assert_eq!(page.meta.limit, 200);
    assert_eq!(page.meta.total, 3);
    assert_eq!(page.meta.total_pages, 1);
    assert_eq!(page.data.len(), 3);

    let whip = &page.data[0];
    assert_eq!(whip.id, 4151);
    assert_eq!(whip.name, "Abyssal whip");
    assert!(whip.members);
    assert_eq!(whip.limit, Some(70));
    assert_eq!(whip.value, Some(120001));

    let bucket = &page.data[2];
    assert!(!bucket.members);
    assert!(bucket.icon.is_none());
    assert!(bucket.examine.is_none());
}

#[test]
fn test_price_update_parses() {
    let tick = PriceTick::parse(PRICE_UPDATE_JSON).expect("Failed to parse price update");

    assert_eq!(tick.item_id, 4151);
    assert_eq!(tick.high, Some(dec!(1520000)));
    assert_eq!(tick.low, None);
    assert_eq!(tick.high_time, Some(1_700_000_000_000));
    assert_eq!(tick.low_time, None);
    assert_eq!(tick.timestamp, 1_700_000_001_000);
    assert!(tick.has_price());
}

#[test]
fn test_price_update_without_item_is_rejected() {
    let result = PriceTick::parse(r#"{"high":1,"low":1,"timestamp":1700000000000}"#);
    assert!(matches!(result, Err(TrackerError::Json(_))));
}

#[test]
fn test_unknown_period_is_rejected() {
    let result = serde_json::from_str::<Period>(r#""2w""#);
    assert!(result.is_err());
    assert!("2w".parse::<Period>().is_err());
}

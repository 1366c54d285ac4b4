//! End-to-end chart rendering: fetched history plus buffered live ticks.

use rust_decimal_macros::dec;

use ge_tracker::buffer::LiveTickBuffer;
use ge_tracker::merge::ChartView;
use ge_tracker::models::Period;
use ge_tracker::models::chart::Trend;
use ge_tracker::models::history::PriceHistory;
use ge_tracker::models::tick::PriceTick;

const HISTORY_24H_JSON: &str = include_str!("fixtures/history_24h.json");

/// Timestamp of the first point in the history fixture.
const H0: i64 = 1_700_000_000_000;

fn tick(timestamp: i64, high: i64, low: i64) -> PriceTick {
    PriceTick {
        item_id: 4151,
        high: Some(high.into()),
        low: Some(low.into()),
        high_time: Some(timestamp),
        low_time: Some(timestamp),
        timestamp,
    }
}

fn whip_view() -> ChartView {
    let history: PriceHistory =
        serde_json::from_str(HISTORY_24H_JSON).expect("Failed to deserialize history");
    ChartView::new(4151, Period::OneDay, history.data)
}

#[test]
fn test_history_and_live_data_merge_in_order() {
    // Five-minute buckets are aligned 200s before H0, so the open bucket at
    // `now` starts at H0 + 1_000_000.
    let now = H0 + 1_100_000;
    let mut buffer = LiveTickBuffer::default();
    buffer.record_tick(tick(H0 + 650_000, 1_510_000, 1_490_000), now);
    buffer.record_tick(tick(H0 + 1_050_000, 1_530_000, 1_520_000), now);

    let chart = whip_view().render(&buffer, now);

    let timestamps: Vec<i64> = chart.data.iter().map(|p| p.timestamp).collect();
    assert_eq!(
        timestamps,
        vec![H0, H0 + 300_000, H0 + 400_000, H0 + 600_000, H0 + 1_050_000]
    );

    let mids: Vec<_> = chart.data.iter().map(|p| p.mid_price).collect();
    assert_eq!(
        mids,
        vec![
            dec!(1509000),
            dec!(1523000),
            dec!(1500000),
            dec!(1500000),
            dec!(1525000)
        ]
    );

    // The closed bucket slots in between history points.
    let bucket = &chart.data[2];
    assert!(!bucket.is_live);
    assert_eq!(bucket.previous_price, Some(dec!(1523000)));

    let tip = chart.data.last().unwrap();
    assert!(tip.is_live);
    assert_eq!(tip.previous_price, Some(dec!(1500000)));
    assert!(chart.data.iter().filter(|p| p.is_live).count() == 1);

    let stats = chart.stats.expect("stats should be present");
    assert_eq!(stats.first, dec!(1509000));
    assert_eq!(stats.last, dec!(1525000));
    assert_eq!(stats.min, dec!(1500000));
    assert_eq!(stats.max, dec!(1525000));
    assert_eq!(stats.change, dec!(16000));
    assert_eq!(stats.change_percent, dec!(1.06));
    assert_eq!(stats.trend, Trend::Up);
}

#[test]
fn test_open_bucket_is_only_visible_as_tip() {
    let now = H0 + 1_100_000;
    let mut buffer = LiveTickBuffer::default();
    buffer.record_tick(tick(H0 + 1_010_000, 1_600_000, 1_580_000), now);
    buffer.record_tick(tick(H0 + 1_020_000, 1_610_000, 1_590_000), now);

    let chart = ChartView::new(4151, Period::OneDay, Vec::new()).render(&buffer, now);

    assert_eq!(chart.data.len(), 1);
    assert!(chart.data[0].is_live);
    assert_eq!(chart.data[0].timestamp, H0 + 1_020_000);
    assert_eq!(chart.stats.unwrap().trend, Trend::Flat);
}

#[test]
fn test_empty_inputs_render_nothing() {
    let chart = ChartView::new(4151, Period::OneHour, Vec::new()).render(&LiveTickBuffer::default(), H0);

    assert!(!chart.has_data());
    assert!(chart.stats.is_none());
}

#[test]
fn test_other_items_do_not_leak_into_chart() {
    let now = H0 + 1_100_000;
    let mut buffer = LiveTickBuffer::default();
    let mut other = tick(H0 + 1_050_000, 5, 4);
    other.item_id = 2;
    buffer.record_tick(other, now);

    let chart = whip_view().render(&buffer, now);

    assert_eq!(chart.data.len(), 3);
    assert!(chart.data.iter().all(|p| !p.is_live));
}

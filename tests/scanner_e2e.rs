// tests/scanner_e2e.rs
//! Full-pipeline scenarios: annotate -> scan -> patterns -> redetection,
//! plus the worker fan-out over an in-memory candle source.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use surge_block_scanner::blocks::{
    assemble_patterns, BlockCondition, BlockScanner, ChainCondition, ConditionSet,
    DetectionStatus, ExitConditionType, ExitReason, RedetectionCondition, RedetectionScanner,
    RedetectionStatus,
};
use surge_block_scanner::database::models::Candle;
use surge_block_scanner::database::postgres::CandleSource;
use surge_block_scanner::indicators::IndicatorCalculator;
use surge_block_scanner::processor::{ScanWorker, WorkerConfig};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn candle(offset: i64, o: f64, h: f64, l: f64, c: f64, v: i64) -> Candle {
    Candle::new("005930", d("2024-01-01") + Duration::days(offset), o, h, l, c, v)
}

fn bare_base(exit: ExitConditionType) -> BlockCondition {
    BlockCondition {
        surge_rate_min: None,
        ma_period: None,
        close_above_ma: None,
        deviation_max: None,
        trading_value_min: None,
        volume_high_window: None,
        prev_volume_ratio_min: None,
        price_high_window: None,
        exit_condition: exit,
        exit_ma_period: None,
        min_start_interval_days: None,
    }
}

fn chain(base: BlockCondition) -> ChainCondition {
    ChainCondition {
        base,
        volume_ratio_vs_parent_peak: None,
        low_price_margin_vs_parent_peak: None,
        min_candles_from_parent_start: None,
        max_candles_from_parent_start: None,
    }
}

/// Level 1: full criteria stack with an MA(60)-break exit and a 30-day cooldown.
/// Level 2: surge plus 3x parent peak volume. Level-1 redetection in a 3%
/// band, days 3..40 from the seed start.
fn two_level_set() -> ConditionSet {
    let mut l1 = bare_base(ExitConditionType::MaBreak);
    l1.surge_rate_min = Some(5.0);
    l1.ma_period = Some(20);
    l1.trading_value_min = Some(0.1);
    l1.volume_high_window = Some(20);
    l1.prev_volume_ratio_min = Some(300.0);
    l1.price_high_window = Some(60);
    l1.exit_ma_period = Some(60);
    l1.min_start_interval_days = Some(30);

    let mut l2 = bare_base(ExitConditionType::BodyMiddleBreak);
    l2.surge_rate_min = Some(5.0);
    let mut l2 = chain(l2);
    l2.volume_ratio_vs_parent_peak = Some(300.0);

    ConditionSet {
        id: "e2e".into(),
        name: "two-level".into(),
        seed: vec![chain(l1), l2],
        redetect: vec![RedetectionCondition {
            base: bare_base(ExitConditionType::BodyMiddleBreak),
            tolerance_percent: 3.0,
            min_days_from_seed_start: 3,
            max_days_from_seed_start: 40,
        }],
    }
}

/// Twenty flat days, a clean surge on day 21, an MA break on day 22, a
/// too-weak follow-up surge on day 27, and an echo near the peak on day 31.
fn scenario_candles() -> Vec<Candle> {
    let mut candles: Vec<Candle> = (0..20)
        .map(|i| candle(i, 10_000.0, 10_000.0, 10_000.0, 10_000.0, 1_000))
        .collect();
    // Day 21: rate 8%, volume 4x the prior day, new 20-day volume high.
    candles.push(candle(20, 10_100.0, 10_800.0, 10_050.0, 10_700.0, 4_000));
    // Day 22: close 9,900 falls under MA(60) (partial window, ~10,027).
    candles.push(candle(21, 10_000.0, 10_000.0, 9_850.0, 9_900.0, 1_200));
    for i in 22..26 {
        candles.push(candle(i, 9_900.0, 9_900.0, 9_900.0, 9_900.0, 1_000));
    }
    // Day 27: qualifying surge, but volume 8_000 < 3x parent peak (12_000),
    // and level 1 is inside its cooldown.
    candles.push(candle(26, 10_000.0, 10_500.0, 9_950.0, 10_400.0, 8_000));
    for i in 27..30 {
        candles.push(candle(i, 9_900.0, 9_900.0, 9_900.0, 9_900.0, 1_000));
    }
    // Day 31: close 10_600 inside the 3% band around the 10_800 peak.
    candles.push(candle(30, 10_500.0, 10_650.0, 10_450.0, 10_600.0, 1_500));
    candles.push(candle(31, 10_550.0, 10_650.0, 10_550.0, 10_620.0, 1_000));
    // Day 33: body-middle break ends the echo.
    candles.push(candle(32, 10_100.0, 10_100.0, 10_000.0, 10_000.0, 900));
    candles
}

#[test]
fn surge_enters_and_ma_break_exits_with_peak_kept() {
    let set = two_level_set();
    let candles = scenario_candles();
    let series = IndicatorCalculator::annotate(&candles, &set.indicator_spec(), 100_000_000.0);
    let dets = BlockScanner::new(&set).unwrap().scan("005930", &series).unwrap();

    assert_eq!(dets.len(), 1, "only the level-1 surge should detect");
    let det = &dets[0];
    assert_eq!(det.level, 1);
    assert_eq!(det.status, DetectionStatus::Completed);
    assert_eq!(det.started_at, d("2024-01-21"));
    assert_eq!(det.ended_at, Some(d("2024-01-22")));
    assert_eq!(det.exit_reason, Some(ExitReason::MaBreak));
    assert_eq!(det.peak_price, 10_800.0);
    assert_eq!(det.peak_date, d("2024-01-21"));
    assert_eq!(det.peak_volume, 4_000);
}

#[test]
fn weak_follow_up_neither_restarts_level1_nor_enters_level2() {
    let set = two_level_set();
    let candles = scenario_candles();
    let series = IndicatorCalculator::annotate(&candles, &set.indicator_spec(), 100_000_000.0);
    let dets = BlockScanner::new(&set).unwrap().scan("005930", &series).unwrap();

    assert!(dets.iter().all(|det| det.level == 1));
    assert_eq!(dets.len(), 1);
}

#[test]
fn redetection_echo_inside_band_and_window() {
    let set = two_level_set();
    let candles = scenario_candles();
    let series = IndicatorCalculator::annotate(&candles, &set.indicator_spec(), 100_000_000.0);
    let mut arena = BlockScanner::new(&set).unwrap().scan("005930", &series).unwrap();

    let patterns = assemble_patterns(&mut arena, "005930", &set);
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].detection_ids, vec![arena[0].id.clone()]);
    assert_eq!(patterns[0].windows.len(), 1);
    assert_eq!(patterns[0].windows[0].from, d("2024-01-24"));
    assert_eq!(patterns[0].windows[0].to, d("2024-03-01"));

    let events = RedetectionScanner::new(&set)
        .scan(&patterns[0], &arena, &series)
        .unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.seq, 1);
    assert_eq!(event.parent_detection_id, arena[0].id);
    assert_eq!(event.started_at, d("2024-01-31"));
    assert_eq!(event.ended_at, Some(d("2024-02-02")));
    assert_eq!(event.status, RedetectionStatus::Completed);
    assert_eq!(event.peak_price, 10_650.0);
}

struct MemorySource {
    series: HashMap<String, Vec<Candle>>,
}

#[async_trait]
impl CandleSource for MemorySource {
    async fn tickers(&self) -> Result<Vec<String>> {
        let mut tickers: Vec<String> = self.series.keys().cloned().collect();
        tickers.sort();
        Ok(tickers)
    }

    async fn candles(&self, ticker: &str) -> Result<Vec<Candle>> {
        Ok(self.series.get(ticker).cloned().unwrap_or_default())
    }
}

#[tokio::test]
async fn worker_fans_out_and_aggregates() {
    let mut series = HashMap::new();
    series.insert("005930".to_string(), scenario_candles());
    // A ticker with no surge contributes nothing but still counts.
    series.insert(
        "000660".to_string(),
        (0..30)
            .map(|i| candle(i, 10_000.0, 10_000.0, 10_000.0, 10_000.0, 1_000))
            .collect(),
    );
    // An empty ticker is skipped gracefully.
    series.insert("035720".to_string(), Vec::new());

    let worker = ScanWorker::dry_run(
        Arc::new(MemorySource { series }),
        WorkerConfig {
            concurrency_limit: 2,
            monetary_unit: 100_000_000.0,
        },
    );
    let summary = worker.run(two_level_set()).await.unwrap();

    assert_eq!(summary.tickers, 3);
    assert_eq!(summary.detections, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.patterns, 1);
    assert_eq!(summary.redetections, 1);
    assert_eq!(summary.failures, 0);
}

// tests/properties.rs
//! Structural invariants of the scan over randomized candle walks.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use surge_block_scanner::blocks::{
    assemble_patterns, BlockCondition, BlockScanner, ChainCondition, ConditionSet, Detection,
    DetectionStatus, ExitConditionType, RedetectionCondition, RedetectionScanner,
};
use surge_block_scanner::database::models::Candle;
use surge_block_scanner::indicators::{AnnotatedCandle, IndicatorCalculator};

fn base_date() -> NaiveDate {
    "2024-01-01".parse().unwrap()
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

fn test_set() -> ConditionSet {
    let mut l1 = bare_base(ExitConditionType::BodyMiddleBreak);
    l1.surge_rate_min = Some(3.0);
    let mut l2 = bare_base(ExitConditionType::BodyMiddleBreak);
    l2.surge_rate_min = Some(3.0);
    ConditionSet {
        id: "prop".into(),
        name: "prop".into(),
        seed: vec![
            ChainCondition {
                base: l1,
                volume_ratio_vs_parent_peak: None,
                low_price_margin_vs_parent_peak: None,
                min_candles_from_parent_start: None,
                max_candles_from_parent_start: None,
            },
            ChainCondition {
                base: l2,
                volume_ratio_vs_parent_peak: Some(150.0),
                low_price_margin_vs_parent_peak: None,
                min_candles_from_parent_start: None,
                max_candles_from_parent_start: None,
            },
        ],
        redetect: vec![RedetectionCondition {
            base: bare_base(ExitConditionType::BodyMiddleBreak),
            tolerance_percent: 5.0,
            min_days_from_seed_start: 2,
            max_days_from_seed_start: 30,
        }],
    }
}

fn arb_candles() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((0.90f64..1.12, 100i64..10_000), 10..50).prop_map(|moves| {
        let mut candles = Vec::with_capacity(moves.len());
        let mut prev_close = 10_000.0;
        for (i, (factor, volume)) in moves.into_iter().enumerate() {
            let open = prev_close;
            let close = open * factor;
            let high = open.max(close) * 1.01;
            let low = open.min(close) * 0.99;
            candles.push(Candle::new(
                "T",
                base_date() + Duration::days(i as i64),
                open,
                high,
                low,
                close,
                volume,
            ));
            prev_close = close;
        }
        candles
    })
}

fn scan(candles: &[Candle]) -> (ConditionSet, Vec<AnnotatedCandle>, Vec<Detection>) {
    let set = test_set();
    let series = IndicatorCalculator::annotate(candles, &set.indicator_spec(), 1.0);
    let arena = BlockScanner::new(&set).unwrap().scan("T", &series).unwrap();
    (set, series, arena)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn peaks_dominate_entries_and_duration_tracks_status(candles in arb_candles()) {
        let (_, _, arena) = scan(&candles);
        for det in &arena {
            prop_assert!(det.peak_price >= det.entry.high);
            prop_assert!(det.peak_volume >= det.entry.volume);
            prop_assert!(det.peak_date >= det.started_at);
            match det.status {
                DetectionStatus::Completed => {
                    let end = det.ended_at.unwrap();
                    prop_assert!(end >= det.started_at);
                    prop_assert_eq!(
                        det.duration_days(),
                        Some((end - det.started_at).num_days() + 1)
                    );
                    prop_assert!(det.exit_reason.is_some());
                }
                _ => {
                    prop_assert_eq!(det.duration_days(), None);
                }
            }
        }
    }

    #[test]
    fn at_most_one_block_running_per_level(candles in arb_candles()) {
        let (set, _, arena) = scan(&candles);
        for level in 1..=set.levels() {
            let mut dets: Vec<&Detection> =
                arena.iter().filter(|det| det.level == level).collect();
            dets.sort_by_key(|det| det.started_at);
            for pair in dets.windows(2) {
                // An earlier block must have finished (and a failed block can
                // only ever be the last one at its level).
                prop_assert_eq!(pair[0].status, DetectionStatus::Completed);
                prop_assert!(pair[0].ended_at.unwrap() <= pair[1].started_at);
            }
        }
    }

    #[test]
    fn children_start_strictly_after_their_parent_ends(candles in arb_candles()) {
        let (_, _, arena) = scan(&candles);
        for det in arena.iter().filter(|det| det.level > 1) {
            let parent_id = det.parent_id.as_ref().unwrap();
            let parent = arena.iter().find(|p| &p.id == parent_id).unwrap();
            prop_assert_eq!(parent.level, det.level - 1);
            prop_assert!(parent.ended_at.unwrap() < det.started_at);
        }
    }

    #[test]
    fn rescan_is_deterministic(candles in arb_candles()) {
        let (_, _, first) = scan(&candles);
        let (_, _, second) = scan(&candles);
        let shape = |arena: &[Detection]| -> Vec<_> {
            arena
                .iter()
                .map(|det| {
                    (det.level, det.started_at, det.ended_at, det.status, det.exit_reason)
                })
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(shape(&first), shape(&second));
    }

    #[test]
    fn redetections_stay_in_band_and_window(candles in arb_candles()) {
        let (set, series, mut arena) = scan(&candles);
        let patterns = assemble_patterns(&mut arena, "T", &set);
        let redetector = RedetectionScanner::new(&set);
        for pattern in &patterns {
            let events = redetector.scan(pattern, &arena, &series).unwrap();
            for event in events {
                let seed = arena
                    .iter()
                    .find(|det| det.id == event.parent_detection_id)
                    .unwrap();
                let tol = 5.0 / 100.0;
                prop_assert!(event.entry_close >= seed.peak_price * (1.0 - tol));
                prop_assert!(event.entry_close <= seed.peak_price * (1.0 + tol));
                prop_assert!(event.started_at >= seed.started_at + Duration::days(2));
                prop_assert!(event.started_at <= seed.started_at + Duration::days(30));
                if let Some(end) = event.ended_at {
                    prop_assert!(end > event.started_at);
                }
            }
        }
    }
}

// src/blocks/checker.rs
//! Entry/exit evaluation. Pure functions of (condition, annotated candle,
//! history, optional parent): identical inputs always yield identical
//! results, which is what makes the scan re-runnable and memoizable.

use crate::blocks::condition::{BlockCondition, ChainCondition, ExitConditionType};
use crate::blocks::detection::{Detection, ExitReason};
use crate::indicators::trend::is_bearish_flip;
use crate::indicators::AnnotatedCandle;
use chrono::NaiveDate;

/// Logical AND over every non-null criterion. A missing required indicator
/// fails that sub-check (fail-closed, never fail-open). For level >= 2 the
/// parent-relative criteria gate on the completed parent's peak.
pub fn check_entry(
    cond: &ChainCondition,
    idx: usize,
    series: &[AnnotatedCandle],
    parent: Option<&Detection>,
) -> bool {
    let annotated = &series[idx];
    let candle = &annotated.candle;
    let base = &cond.base;

    if let Some(min_rate) = base.surge_rate_min {
        if annotated.indicators.rate < min_rate {
            return false;
        }
    }

    if let Some(period) = base.ma_period {
        if base.close_above_ma.unwrap_or(true) {
            match annotated.ma(period) {
                Some(ma) if candle.close > ma => {}
                _ => return false,
            }
        }
    }

    if let Some(max_dev) = base.deviation_max {
        // Deviation defaults to 100 when the MA is undefined (section 4.1),
        // so an unset ma_period degrades to checking 100 <= max_dev.
        let dev = base.ma_period.map_or(100.0, |p| annotated.deviation(p));
        if dev > max_dev {
            return false;
        }
    }

    if let Some(min_value) = base.trading_value_min {
        if annotated.indicators.trading_value < min_value {
            return false;
        }
    }

    if let Some(window) = base.volume_high_window {
        match annotated.indicators.volume_high.get(&window) {
            Some(true) => {}
            _ => return false,
        }
    }

    if let Some(min_ratio) = base.prev_volume_ratio_min {
        if idx == 0 {
            return false;
        }
        let prev_volume = series[idx - 1].candle.volume as f64;
        if prev_volume <= 0.0 || (candle.volume as f64) < prev_volume * min_ratio / 100.0 {
            return false;
        }
    }

    if let Some(window) = base.price_high_window {
        match annotated.indicators.price_high.get(&window) {
            Some(true) => {}
            _ => return false,
        }
    }

    check_parent_criteria(cond, idx, series, parent)
}

fn check_parent_criteria(
    cond: &ChainCondition,
    idx: usize,
    series: &[AnnotatedCandle],
    parent: Option<&Detection>,
) -> bool {
    let any_parent_criterion = cond.volume_ratio_vs_parent_peak.is_some()
        || cond.low_price_margin_vs_parent_peak.is_some()
        || cond.min_candles_from_parent_start.is_some()
        || cond.max_candles_from_parent_start.is_some();
    let parent = match parent {
        Some(p) => p,
        None => return !any_parent_criterion,
    };
    let candle = &series[idx].candle;

    if let Some(ratio) = cond.volume_ratio_vs_parent_peak {
        if (candle.volume as f64) < parent.peak_volume as f64 * ratio / 100.0 {
            return false;
        }
    }

    if let Some(margin) = cond.low_price_margin_vs_parent_peak {
        if candle.low * (1.0 + margin / 100.0) <= parent.peak_price {
            return false;
        }
    }

    if cond.min_candles_from_parent_start.is_some() || cond.max_candles_from_parent_start.is_some()
    {
        let elapsed = match candles_since(series, idx, parent.started_at) {
            Some(n) => n,
            None => return false,
        };
        if cond.min_candles_from_parent_start.is_some_and(|min| elapsed < min) {
            return false;
        }
        if cond.max_candles_from_parent_start.is_some_and(|max| elapsed > max) {
            return false;
        }
    }

    true
}

/// Candles elapsed from `start_date` to index `idx`, or None when the start
/// date predates the available history.
pub fn candles_since(series: &[AnnotatedCandle], idx: usize, start_date: NaiveDate) -> Option<u32> {
    let start_idx = series[..=idx]
        .iter()
        .position(|a| a.candle.date >= start_date)?;
    if series[start_idx].candle.date != start_date {
        return None;
    }
    Some((idx - start_idx) as u32)
}

/// Exit evaluation shared by seed blocks and redetection events: exactly one
/// of the three policies, selected by the condition's exit type.
pub fn exit_signal(
    exit: ExitConditionType,
    exit_period: Option<u32>,
    entry_body_middle: f64,
    idx: usize,
    series: &[AnnotatedCandle],
) -> Option<ExitReason> {
    let annotated = &series[idx];
    match exit {
        ExitConditionType::MaBreak => {
            let ma = annotated.ma(exit_period?)?;
            (annotated.candle.close < ma).then_some(ExitReason::MaBreak)
        }
        ExitConditionType::ThreeLineReversal => {
            let flipped = idx > 0
                && is_bearish_flip(
                    &[series[idx - 1].indicators.trend, annotated.indicators.trend],
                    1,
                );
            flipped.then_some(ExitReason::ThreeLineReversal)
        }
        ExitConditionType::BodyMiddleBreak => {
            (annotated.candle.close < entry_body_middle).then_some(ExitReason::BodyMiddleBreak)
        }
    }
}

/// Exit check for an active detection under its entry condition.
pub fn check_exit(
    cond: &BlockCondition,
    detection: &Detection,
    idx: usize,
    series: &[AnnotatedCandle],
) -> Option<ExitReason> {
    exit_signal(
        cond.exit_condition,
        cond.exit_period(),
        detection.entry.body_middle(),
        idx,
        series,
    )
}

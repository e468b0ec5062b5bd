// src/blocks/pattern.rs
//! Pattern assembly (grouping a seed chain) and the redetection pass that
//! looks for later echoes of each seed block near its peak. Redetection
//! outcomes are informative annotations only; they never gate or alter the
//! seed chain.

use crate::blocks::checker::{check_entry, exit_signal};
use crate::blocks::condition::{ChainCondition, ConditionSet, RedetectionCondition};
use crate::blocks::detection::Detection;
use crate::error::ScanError;
use crate::indicators::AnnotatedCandle;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Redetection scan bounds for one level of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedetectionWindow {
    pub level: u32,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// One seed chain (levels 1..N for one ticker/origin) plus its per-level
/// redetection windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub ticker: String,
    pub condition_set_id: String,
    /// Member detection ids, ordered by (level, start date).
    pub detection_ids: Vec<String>,
    pub windows: Vec<RedetectionWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedetectionStatus {
    Active,
    Completed,
}

/// A later, looser re-entry near a seed block's peak. At most one active
/// event per parent detection at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedetectionEvent {
    pub id: String,
    /// 1-based sequence number within the parent detection.
    pub seq: u32,
    pub parent_detection_id: String,
    pub started_at: NaiveDate,
    pub ended_at: Option<NaiveDate>,
    pub entry_open: f64,
    pub entry_close: f64,
    pub peak_price: f64,
    pub peak_volume: i64,
    pub status: RedetectionStatus,
}

impl RedetectionEvent {
    fn start(seq: u32, parent_id: &str, candle: &crate::database::models::Candle) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            seq,
            parent_detection_id: parent_id.to_string(),
            started_at: candle.date,
            ended_at: None,
            entry_open: candle.open,
            entry_close: candle.close,
            peak_price: candle.high,
            peak_volume: candle.volume,
            status: RedetectionStatus::Active,
        }
    }

    fn update_peak(&mut self, candle: &crate::database::models::Candle) {
        if candle.high > self.peak_price {
            self.peak_price = candle.high;
        }
        if candle.volume > self.peak_volume {
            self.peak_volume = candle.volume;
        }
    }

    fn complete(&mut self, ticker: &str, level: u32, date: NaiveDate) -> Result<(), ScanError> {
        if self.status != RedetectionStatus::Active {
            return Err(ScanError::State {
                ticker: ticker.to_string(),
                level,
                date,
                reason: format!("complete on non-active redetection {}", self.id),
            });
        }
        self.status = RedetectionStatus::Completed;
        self.ended_at = Some(date);
        Ok(())
    }
}

/// Group the detection arena into patterns: every level-1 detection roots a
/// pattern, and children inherit their parent's pattern id. Stamps
/// `pattern_id` on each member detection.
pub fn assemble_patterns(
    arena: &mut [Detection],
    ticker: &str,
    conditions: &ConditionSet,
) -> Vec<Pattern> {
    let mut pattern_of: HashMap<String, String> = HashMap::new();
    let mut patterns: Vec<Pattern> = Vec::new();

    // Arena is level-major, chronological within a level, so a parent is
    // always stamped before its children.
    let mut ordered: Vec<usize> = (0..arena.len()).collect();
    ordered.sort_by_key(|&i| (arena[i].level, arena[i].started_at));

    for i in ordered {
        let pattern_id = match &arena[i].parent_id {
            None => {
                let id = Uuid::new_v4().to_string();
                patterns.push(Pattern {
                    id: id.clone(),
                    ticker: ticker.to_string(),
                    condition_set_id: conditions.id.clone(),
                    detection_ids: Vec::new(),
                    windows: Vec::new(),
                });
                id
            }
            Some(parent_id) => match pattern_of.get(parent_id) {
                Some(id) => id.clone(),
                // Orphaned parent reference; leave the detection ungrouped.
                None => continue,
            },
        };
        pattern_of.insert(arena[i].id.clone(), pattern_id.clone());
        arena[i].pattern_id = Some(pattern_id.clone());
        let Some(pattern) = patterns.iter_mut().find(|p| p.id == pattern_id) else {
            continue;
        };
        pattern.detection_ids.push(arena[i].id.clone());

        // The first completed detection of a level defines that level's
        // window, matching the seed the redetection pass will scan.
        let level = arena[i].level;
        if arena[i].ended_at.is_some() && pattern.windows.iter().all(|w| w.level != level) {
            if let Some(redetect) = conditions.redetect_level(level) {
                pattern.windows.push(RedetectionWindow {
                    level,
                    from: arena[i].started_at + Duration::days(redetect.min_days_from_seed_start),
                    to: arena[i].started_at + Duration::days(redetect.max_days_from_seed_start),
                });
            }
        }
    }

    patterns
}

pub struct RedetectionScanner<'a> {
    conditions: &'a ConditionSet,
}

impl<'a> RedetectionScanner<'a> {
    pub fn new(conditions: &'a ConditionSet) -> Self {
        Self { conditions }
    }

    /// Scan a pattern's windows for redetection events. Only completed seed
    /// blocks are scanned: an active seed's peak is still moving, so a band
    /// around it is not yet meaningful.
    pub fn scan(
        &self,
        pattern: &Pattern,
        arena: &[Detection],
        series: &[AnnotatedCandle],
    ) -> Result<Vec<RedetectionEvent>, ScanError> {
        let mut events = Vec::new();
        for window in &pattern.windows {
            let Some(cond) = self.conditions.redetect_level(window.level) else {
                continue;
            };
            let Some(seed) = arena.iter().find(|d| {
                d.level == window.level
                    && d.pattern_id.as_deref() == Some(pattern.id.as_str())
                    && d.ended_at.is_some()
            }) else {
                continue;
            };
            self.scan_seed(seed, cond, window, series, &mut events)?;
        }
        Ok(events)
    }

    fn scan_seed(
        &self,
        seed: &Detection,
        cond: &RedetectionCondition,
        window: &RedetectionWindow,
        series: &[AnnotatedCandle],
        events: &mut Vec<RedetectionEvent>,
    ) -> Result<(), ScanError> {
        let tol = cond.tolerance_percent / 100.0;
        let band_low = seed.peak_price * (1.0 - tol);
        let band_high = seed.peak_price * (1.0 + tol);
        // Relaxed thresholds reuse the plain entry checker; redetection has
        // no parent-relative criteria of its own.
        let relaxed = ChainCondition {
            base: cond.base.clone(),
            volume_ratio_vs_parent_peak: None,
            low_price_margin_vs_parent_peak: None,
            min_candles_from_parent_start: None,
            max_candles_from_parent_start: None,
        };

        let mut active: Option<RedetectionEvent> = None;
        let mut seq = 0u32;

        for idx in 0..series.len() {
            let candle = &series[idx].candle;
            if candle.date < window.from || candle.date > window.to {
                continue;
            }

            if let Some(mut event) = active.take() {
                event.update_peak(candle);
                let reason = exit_signal(
                    cond.base.exit_condition,
                    cond.base.exit_period(),
                    (event.entry_open + event.entry_close) / 2.0,
                    idx,
                    series,
                );
                if reason.is_some() {
                    event.complete(&seed.ticker, seed.level, candle.date)?;
                    events.push(event);
                } else {
                    active = Some(event);
                }
                continue;
            }

            let in_band = candle.close >= band_low && candle.close <= band_high;
            if in_band && check_entry(&relaxed, idx, series, None) {
                seq += 1;
                debug!(
                    ticker = %seed.ticker,
                    level = seed.level,
                    date = %candle.date,
                    seq,
                    "redetection started"
                );
                active = Some(RedetectionEvent::start(seq, &seed.id, candle));
            }
        }

        // An event still running when the window closes stays active.
        events.extend(active);
        Ok(())
    }
}

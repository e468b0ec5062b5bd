// src/blocks/scanner.rs
//! Sequential block-chain scan: level L = 1..N, one ticker, chronological
//! walk. Each level is scanned to completion before the next one starts,
//! because parent lookups at level L+1 need completed level-L detections.

use crate::blocks::checker::{check_entry, check_exit};
use crate::blocks::condition::ConditionSet;
use crate::blocks::detection::Detection;
use crate::error::ScanError;
use crate::indicators::AnnotatedCandle;
use chrono::NaiveDate;
use tracing::debug;

pub struct BlockScanner<'a> {
    conditions: &'a ConditionSet,
}

impl<'a> BlockScanner<'a> {
    /// Validation happens here, before any candle is touched.
    pub fn new(conditions: &'a ConditionSet) -> Result<Self, ScanError> {
        conditions.validate()?;
        Ok(Self { conditions })
    }

    /// Scan one ticker's annotated series through every level. Returns the
    /// detection arena: all levels, chronological within each level,
    /// children referencing parents by id.
    pub fn scan(
        &self,
        ticker: &str,
        series: &[AnnotatedCandle],
    ) -> Result<Vec<Detection>, ScanError> {
        let mut arena: Vec<Detection> = Vec::new();
        if series.is_empty() {
            return Ok(arena);
        }

        for level in 1..=self.conditions.levels() {
            self.scan_level(ticker, level, series, &mut arena)?;
        }
        Ok(arena)
    }

    fn scan_level(
        &self,
        ticker: &str,
        level: u32,
        series: &[AnnotatedCandle],
        arena: &mut Vec<Detection>,
    ) -> Result<(), ScanError> {
        let Some(cond) = self.conditions.seed_level(level) else {
            return Ok(());
        };
        // At most one active detection per (ticker, level).
        let mut active: Option<usize> = None;
        let mut last_start: Option<NaiveDate> = None;

        for idx in 0..series.len() {
            let date = series[idx].candle.date;

            if let Some(ai) = active {
                arena[ai].update_peak(&series[idx].candle);
                if let Some(reason) = check_exit(&cond.base, &arena[ai], idx, series) {
                    arena[ai].complete(date, reason)?;
                    debug!(
                        ticker,
                        level,
                        date = %date,
                        reason = reason.as_str(),
                        "block completed"
                    );
                    active = None;
                }
            }

            if active.is_some() {
                continue;
            }
            if in_cooldown(cond.base.min_start_interval_days, last_start, date) {
                continue;
            }

            let parent = if level > 1 {
                match nearest_completed_parent(arena, level - 1, date) {
                    Some(p) => Some(arena[p].clone()),
                    // Absence of a qualifying parent blocks entry entirely.
                    None => continue,
                }
            } else {
                None
            };

            if check_entry(cond, idx, series, parent.as_ref()) {
                let parent_id = parent.map(|p| p.id);
                let det = Detection::open(ticker, level, &series[idx].candle, parent_id);
                debug!(ticker, level, date = %date, id = %det.id, "block entered");
                last_start = Some(date);
                arena.push(det);
                active = Some(arena.len() - 1);
            }
        }

        // A block still running when history ends stays active unless the
        // close has already fallen below its entry close, in which case the
        // surge fizzled without a clean exit signal.
        if let (Some(ai), Some(last)) = (active, series.last()) {
            if last.candle.close < arena[ai].entry.close {
                arena[ai].fail(last.candle.date)?;
            }
        }
        Ok(())
    }
}

fn in_cooldown(cooldown: Option<i64>, last_start: Option<NaiveDate>, date: NaiveDate) -> bool {
    match (cooldown, last_start) {
        (Some(days), Some(start)) => (date - start).num_days() < days,
        _ => false,
    }
}

/// The nearest level-`level` detection whose end date is strictly before
/// `date`: the completed instance with the greatest end date.
fn nearest_completed_parent(
    arena: &[Detection],
    level: u32,
    date: NaiveDate,
) -> Option<usize> {
    arena
        .iter()
        .enumerate()
        .filter(|(_, d)| {
            d.level == level && d.ended_at.is_some_and(|end| end < date)
        })
        .max_by_key(|(_, d)| d.ended_at)
        .map(|(i, _)| i)
}

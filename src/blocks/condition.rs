// src/blocks/condition.rs
use crate::error::ScanError;
use crate::indicators::IndicatorSpec;
use serde::{Deserialize, Serialize};

/// Which of the three mutually exclusive exit policies closes a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitConditionType {
    /// close < MA(exit period)
    MaBreak,
    /// first bearish flip of the three-line-break trend
    ThreeLineReversal,
    /// close < (entry_open + entry_close) / 2
    BodyMiddleBreak,
}

/// Per-level entry/exit thresholds. Every entry criterion is independently
/// nullable: `None` means "skip this check", never "fail this check".
///
/// Ratios and margins are percentages (300.0 = 3x); explicit nulls survive
/// serialization so a reloaded set skips exactly the same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockCondition {
    /// Minimum surge rate: (high - prev_close) / prev_close * 100.
    #[serde(default)]
    pub surge_rate_min: Option<f64>,
    /// Moving-average period for the above-MA entry requirement.
    #[serde(default)]
    pub ma_period: Option<u32>,
    /// Require close above MA(ma_period). Defaults to true when a period is set.
    #[serde(default)]
    pub close_above_ma: Option<bool>,
    /// Ceiling on close / MA(ma_period) * 100.
    #[serde(default)]
    pub deviation_max: Option<f64>,
    /// Floor on trading value in the configured monetary unit.
    #[serde(default)]
    pub trading_value_min: Option<f64>,
    /// Volume must be a new high over this many preceding trading days.
    #[serde(default)]
    pub volume_high_window: Option<u32>,
    /// Volume must be at least this percent of the prior day's volume.
    #[serde(default)]
    pub prev_volume_ratio_min: Option<f64>,
    /// High must be a new high over this many preceding calendar days.
    #[serde(default)]
    pub price_high_window: Option<u32>,
    /// Exit policy for blocks entered under this condition.
    pub exit_condition: ExitConditionType,
    /// MA period for the ma_break exit; falls back to `ma_period` when unset.
    #[serde(default)]
    pub exit_ma_period: Option<u32>,
    /// Cooldown: minimum days between two starts at this level.
    #[serde(default)]
    pub min_start_interval_days: Option<i64>,
}

impl BlockCondition {
    /// The period the ma_break exit reads, if any is configured.
    pub fn exit_period(&self) -> Option<u32> {
        self.exit_ma_period.or(self.ma_period)
    }

    /// Whether any entry criterion is active (non-null).
    pub fn has_active_criteria(&self) -> bool {
        self.surge_rate_min.is_some()
            || self.ma_period.is_some()
            || self.deviation_max.is_some()
            || self.trading_value_min.is_some()
            || self.volume_high_window.is_some()
            || self.prev_volume_ratio_min.is_some()
            || self.price_high_window.is_some()
    }
}

/// Seed condition for one level. Levels >= 2 may additionally gate entry on
/// the parent block's peak; those fields are ignored for level 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainCondition {
    #[serde(flatten)]
    pub base: BlockCondition,
    /// Volume floor as percent of parent.peak_volume.
    #[serde(default)]
    pub volume_ratio_vs_parent_peak: Option<f64>,
    /// low * (1 + margin/100) must exceed parent.peak_price.
    #[serde(default)]
    pub low_price_margin_vs_parent_peak: Option<f64>,
    /// Minimum candles elapsed since the parent block started.
    #[serde(default)]
    pub min_candles_from_parent_start: Option<u32>,
    /// Maximum candles elapsed since the parent block started.
    #[serde(default)]
    pub max_candles_from_parent_start: Option<u32>,
}

/// Relaxed re-entry thresholds for the redetection pass, plus the band and
/// date window that anchor events to a seed block's peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedetectionCondition {
    #[serde(flatten)]
    pub base: BlockCondition,
    /// Re-entry band around the seed peak: close within peak * (1 +/- tol/100).
    pub tolerance_percent: f64,
    /// Window start, days after the seed block's start date.
    pub min_days_from_seed_start: i64,
    /// Window end, days after the seed block's start date.
    pub max_days_from_seed_start: i64,
}

/// A named, persistable condition-set document: one strict seed chain
/// (index 0 = level 1) and one relaxed redetection set per level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSet {
    pub id: String,
    pub name: String,
    pub seed: Vec<ChainCondition>,
    #[serde(default)]
    pub redetect: Vec<RedetectionCondition>,
}

impl ConditionSet {
    pub fn levels(&self) -> u32 {
        self.seed.len() as u32
    }

    /// Seed condition for a 1-based level.
    pub fn seed_level(&self, level: u32) -> Option<&ChainCondition> {
        self.seed.get(level.checked_sub(1)? as usize)
    }

    /// Redetection condition for a 1-based level.
    pub fn redetect_level(&self, level: u32) -> Option<&RedetectionCondition> {
        self.redetect.get(level.checked_sub(1)? as usize)
    }

    /// Reject contradictory or empty sets before any candle is scanned.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.seed.is_empty() {
            return Err(ScanError::configuration(&self.name, "no seed levels defined"));
        }
        if !self.seed.iter().any(|c| c.base.has_active_criteria()) {
            return Err(ScanError::configuration(
                &self.name,
                "no active entry criteria in any level",
            ));
        }
        for (i, cond) in self.seed.iter().enumerate() {
            let level = i + 1;
            if cond.base.exit_condition == ExitConditionType::MaBreak
                && cond.base.exit_period().is_none()
            {
                return Err(ScanError::configuration(
                    &self.name,
                    format!("level {level}: ma_break exit needs exit_ma_period or ma_period"),
                ));
            }
            if let (Some(min), Some(max)) = (
                cond.min_candles_from_parent_start,
                cond.max_candles_from_parent_start,
            ) {
                if min > max {
                    return Err(ScanError::configuration(
                        &self.name,
                        format!("level {level}: min_candles_from_parent_start > max"),
                    ));
                }
            }
            if cond.base.min_start_interval_days.is_some_and(|d| d < 0) {
                return Err(ScanError::configuration(
                    &self.name,
                    format!("level {level}: negative cooldown"),
                ));
            }
        }
        for (i, cond) in self.redetect.iter().enumerate() {
            let level = i + 1;
            if cond.tolerance_percent < 0.0 {
                return Err(ScanError::configuration(
                    &self.name,
                    format!("redetect level {level}: negative tolerance"),
                ));
            }
            if cond.min_days_from_seed_start > cond.max_days_from_seed_start {
                return Err(ScanError::configuration(
                    &self.name,
                    format!("redetect level {level}: min_days > max_days"),
                ));
            }
        }
        Ok(())
    }

    /// Collect every MA period and high-flag window the set will read.
    pub fn indicator_spec(&self) -> IndicatorSpec {
        let mut spec = IndicatorSpec::default();
        let bases = self
            .seed
            .iter()
            .map(|c| &c.base)
            .chain(self.redetect.iter().map(|c| &c.base));
        for base in bases {
            if let Some(p) = base.ma_period {
                spec.ma_periods.insert(p);
            }
            if let Some(p) = base.exit_period() {
                spec.ma_periods.insert(p);
            }
            if let Some(w) = base.volume_high_window {
                spec.volume_high_windows.insert(w);
            }
            if let Some(w) = base.price_high_window {
                spec.price_high_windows.insert(w);
            }
        }
        spec
    }
}

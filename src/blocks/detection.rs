// src/blocks/detection.rs
use crate::database::models::Candle;
use crate::error::ScanError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cap on the per-detection spot list (near-miss higher-level entry days).
pub const SPOT_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Active,
    Completed,
    Failed,
}

/// Which exit policy fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    MaBreak,
    ThreeLineReversal,
    BodyMiddleBreak,
    /// Graph variant: the node's exit expression evaluated true.
    Expression,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::MaBreak => "ma_break",
            ExitReason::ThreeLineReversal => "three_line_reversal",
            ExitReason::BodyMiddleBreak => "body_middle_break",
            ExitReason::Expression => "expression",
        }
    }
}

/// OHLCV captured at the entry candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl EntrySnapshot {
    pub fn from_candle(c: &Candle) -> Self {
        Self {
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        }
    }

    /// Midpoint of the entry body, the body_middle_break exit threshold.
    pub fn body_middle(&self) -> f64 {
        (self.open + self.close) / 2.0
    }
}

/// One discovered block at any level. Created on entry-condition success,
/// mutated only by peak updates and the single completion/failure transition,
/// never deleted. Parent/child links are by id, not by pointer; detections
/// live in a per-ticker arena owned by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub ticker: String,
    pub level: u32,
    pub status: DetectionStatus,
    pub started_at: NaiveDate,
    pub ended_at: Option<NaiveDate>,
    pub entry: EntrySnapshot,
    pub peak_price: f64,
    pub peak_date: NaiveDate,
    pub peak_volume: i64,
    pub exit_reason: Option<ExitReason>,
    /// Completed level-(L-1) detection whose peak gated this entry.
    pub parent_id: Option<String>,
    pub pattern_id: Option<String>,
    /// Subsumed by a stronger coincident detection; kept for lineage,
    /// excluded from completion counts.
    pub is_virtual: bool,
    /// Days satisfying a higher level's entry that were not promoted.
    pub spots: Vec<NaiveDate>,
}

impl Detection {
    /// Open a new detection at `candle`, seeding the running peak from the
    /// entry values.
    pub fn open(ticker: &str, level: u32, candle: &Candle, parent_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            level,
            status: DetectionStatus::Active,
            started_at: candle.date,
            ended_at: None,
            entry: EntrySnapshot::from_candle(candle),
            peak_price: candle.high,
            peak_date: candle.date,
            peak_volume: candle.volume,
            exit_reason: None,
            parent_id,
            pattern_id: None,
            is_virtual: false,
            spots: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DetectionStatus::Active
    }

    /// Raise the running peak. Price/date move only on a strictly greater
    /// high; volume analogously. Neither ever decreases.
    pub fn update_peak(&mut self, candle: &Candle) {
        if candle.high > self.peak_price {
            self.peak_price = candle.high;
            self.peak_date = candle.date;
        }
        if candle.volume > self.peak_volume {
            self.peak_volume = candle.volume;
        }
    }

    /// Active -> Completed. Completing a non-active detection is a state error.
    pub fn complete(&mut self, end_date: NaiveDate, reason: ExitReason) -> Result<(), ScanError> {
        if !self.is_active() {
            return Err(self.state_error(end_date, "complete on non-active detection"));
        }
        self.status = DetectionStatus::Completed;
        self.ended_at = Some(end_date);
        self.exit_reason = Some(reason);
        Ok(())
    }

    /// Active -> Failed: the surge fizzled without any exit policy firing.
    /// No end date is recorded, so duration stays undefined for failures.
    pub fn fail(&mut self, at: NaiveDate) -> Result<(), ScanError> {
        if !self.is_active() {
            return Err(self.state_error(at, "fail on non-active detection"));
        }
        self.status = DetectionStatus::Failed;
        Ok(())
    }

    /// Inclusive day count, defined iff the detection completed.
    pub fn duration_days(&self) -> Option<i64> {
        match (self.status, self.ended_at) {
            (DetectionStatus::Completed, Some(end)) => {
                Some((end - self.started_at).num_days() + 1)
            }
            _ => None,
        }
    }

    /// Record a near-miss higher-level entry day, bounded by `SPOT_CAP`.
    pub fn add_spot(&mut self, date: NaiveDate) {
        if self.spots.len() < SPOT_CAP {
            self.spots.push(date);
        }
    }

    fn state_error(&self, date: NaiveDate, reason: &str) -> ScanError {
        ScanError::State {
            ticker: self.ticker.clone(),
            level: self.level,
            date,
            reason: format!("{reason} (id {})", self.id),
        }
    }
}

// src/processor/job.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of scan work: a single ticker against one condition set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub ticker: String,
    pub condition_set_id: String,
}

impl ScanJob {
    pub fn new(ticker: impl Into<String>, condition_set_id: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            condition_set_id: condition_set_id.into(),
        }
    }
}

impl fmt::Display for ScanJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.condition_set_id, self.ticker)
    }
}

/// Per-ticker scan result, rolled up into a `ScanSummary`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickerOutcome {
    pub detections: usize,
    pub completed: usize,
    pub patterns: usize,
    pub redetections: usize,
}

/// Aggregate result of one scan run across all tickers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub tickers: usize,
    pub detections: usize,
    pub completed: usize,
    pub patterns: usize,
    pub redetections: usize,
    pub failures: usize,
}

impl ScanSummary {
    pub fn absorb(&mut self, outcome: TickerOutcome) {
        self.tickers += 1;
        self.detections += outcome.detections;
        self.completed += outcome.completed;
        self.patterns += outcome.patterns;
        self.redetections += outcome.redetections;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_accumulates_outcomes() {
        let mut summary = ScanSummary::default();
        summary.absorb(TickerOutcome {
            detections: 3,
            completed: 2,
            patterns: 1,
            redetections: 1,
        });
        summary.absorb(TickerOutcome::default());
        assert_eq!(summary.tickers, 2);
        assert_eq!(summary.detections, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failures, 0);
    }
}

// src/database/models.rs
use crate::error::ScanError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar for a single ticker.
///
/// `trading_value` is the raw traded amount (close * volume) in the quote
/// currency; the indicator pass rescales it to the configured monetary unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Candle {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// May be omitted in imported files; recomputed as close * volume then.
    #[serde(default)]
    pub trading_value: f64,
}

impl Candle {
    pub fn new(
        ticker: impl Into<String>,
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            date,
            open,
            high,
            low,
            close,
            volume,
            trading_value: close * volume as f64,
        }
    }
}

/// A ticker's candle history in ascending date order, deduplicated by date.
///
/// The scan engine only ever sees series produced through this type, so it
/// can rely on ordering without re-checking it per candle.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub ticker: String,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series from rows in any order; later rows win on duplicate dates.
    pub fn from_rows(ticker: impl Into<String>, mut rows: Vec<Candle>) -> Self {
        rows.sort_by_key(|c| c.date);
        rows.dedup_by_key(|c| c.date);
        Self {
            ticker: ticker.into(),
            candles: rows,
        }
    }

    /// Reject series with unusable bars (non-positive prices, inverted
    /// high/low, negative volume) before any scan runs over them.
    pub fn validate(&self) -> Result<(), ScanError> {
        for candle in &self.candles {
            if candle.open <= 0.0 || candle.close <= 0.0 || candle.low <= 0.0 {
                return Err(ScanError::Data {
                    ticker: self.ticker.clone(),
                    reason: format!("non-positive price on {}", candle.date),
                });
            }
            if candle.high < candle.low {
                return Err(ScanError::Data {
                    ticker: self.ticker.clone(),
                    reason: format!("high below low on {}", candle.date),
                });
            }
            if candle.volume < 0 {
                return Err(ScanError::Data {
                    ticker: self.ticker.clone(),
                    reason: format!("negative volume on {}", candle.date),
                });
            }
        }
        Ok(())
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

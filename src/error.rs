// src/error.rs
use chrono::NaiveDate;
use thiserror::Error;

/// Domain errors for the scan engine. Anything recoverable at the run level
/// (a bad condition document, a malformed expression, an impossible state
/// transition) surfaces as one of these; infrastructure failures stay as
/// `anyhow` at the worker/CLI boundary.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A condition set or block graph rejected at validation time.
    #[error("invalid configuration '{name}': {reason}")]
    Configuration { name: String, reason: String },

    /// A ticker's candle history is unusable.
    #[error("bad candle data for {ticker}: {reason}")]
    Data { ticker: String, reason: String },

    /// An entry/exit expression failed to parse or validate.
    #[error("invalid expression at {location}: {reason}")]
    Expression { location: String, reason: String },

    /// An illegal detection state transition; indicates a scanner bug.
    #[error("state error for {ticker} level {level} on {date}: {reason}")]
    State {
        ticker: String,
        level: u32,
        date: NaiveDate,
        reason: String,
    },
}

impl ScanError {
    pub fn configuration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ScanError::Configuration {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn expression(location: impl Into<String>, reason: impl Into<String>) -> Self {
        ScanError::Expression {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

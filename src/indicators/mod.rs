// src/indicators/mod.rs
pub mod calculator;
pub mod trend;

pub use calculator::{AnnotatedCandle, IndicatorCalculator, IndicatorSet, IndicatorSpec};
pub use trend::TrendDirection;

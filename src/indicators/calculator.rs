// src/indicators/calculator.rs
use crate::database::models::Candle;
use crate::indicators::trend::{line_break_directions, TrendDirection};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};

/// Which indicator parameters a scan needs, collected up front from the
/// condition set (or block graph) so the annotation pass computes exactly
/// the moving averages and high-flag windows the checks will read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSpec {
    pub ma_periods: BTreeSet<u32>,
    pub volume_high_windows: BTreeSet<u32>,
    pub price_high_windows: BTreeSet<u32>,
}

impl IndicatorSpec {
    pub fn merge(&mut self, other: &IndicatorSpec) {
        self.ma_periods.extend(&other.ma_periods);
        self.volume_high_windows.extend(&other.volume_high_windows);
        self.price_high_windows.extend(&other.price_high_windows);
    }
}

/// Indicator values attached to one candle. Immutable once computed.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    /// Trailing moving averages keyed by period. Partial mean at series start.
    pub mas: BTreeMap<u32, f64>,
    /// (high - prev_close) / prev_close * 100; 0 for the first candle.
    pub rate: f64,
    /// close * volume scaled to the configured monetary unit.
    pub trading_value: f64,
    /// volume >= max volume over the preceding N trading days, keyed by N.
    pub volume_high: BTreeMap<u32, bool>,
    /// high >= max high over the preceding N calendar days, keyed by N.
    pub price_high: BTreeMap<u32, bool>,
    /// Three-line-break direction, the alternate exit signal.
    pub trend: TrendDirection,
}

/// A candle with its computed indicators. The annotation pass is pure over
/// the slice up to and including each index; nothing here depends on future
/// candles.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedCandle {
    pub candle: Candle,
    pub indicators: IndicatorSet,
}

impl AnnotatedCandle {
    pub fn ma(&self, period: u32) -> Option<f64> {
        self.indicators.mas.get(&period).copied()
    }

    /// close / MA(period) * 100, defaulting to 100 when the MA is undefined.
    pub fn deviation(&self, period: u32) -> f64 {
        match self.ma(period) {
            Some(ma) if ma > 0.0 => self.candle.close / ma * 100.0,
            _ => 100.0,
        }
    }

    /// Name-keyed indicator lookup for the expression engine. Boolean flags
    /// surface as 1.0 / 0.0 so the expression language stays numeric at the
    /// leaves.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        match name {
            "open" => return Some(self.candle.open),
            "high" => return Some(self.candle.high),
            "low" => return Some(self.candle.low),
            "close" => return Some(self.candle.close),
            "volume" => return Some(self.candle.volume as f64),
            "rate" => return Some(self.indicators.rate),
            "trading_value" => return Some(self.indicators.trading_value),
            _ => {}
        }
        if let Some(period) = name.strip_prefix("ma_").and_then(|p| p.parse().ok()) {
            return self.ma(period);
        }
        if let Some(period) = name.strip_prefix("deviation_").and_then(|p| p.parse().ok()) {
            return Some(self.deviation(period));
        }
        if let Some(window) = name.strip_prefix("volume_high_").and_then(|w| w.parse().ok()) {
            return self
                .indicators
                .volume_high
                .get(&window)
                .map(|&b| if b { 1.0 } else { 0.0 });
        }
        if let Some(window) = name.strip_prefix("price_high_").and_then(|w| w.parse().ok()) {
            return self
                .indicators
                .price_high
                .get(&window)
                .map(|&b| if b { 1.0 } else { 0.0 });
        }
        None
    }
}

pub struct IndicatorCalculator;

impl IndicatorCalculator {
    /// Annotate a ticker's candles (ascending date order) with every
    /// indicator named in `spec`. `monetary_unit` divides raw trading value,
    /// e.g. 1_000_000 to express it in millions.
    pub fn annotate(
        candles: &[Candle],
        spec: &IndicatorSpec,
        monetary_unit: f64,
    ) -> Vec<AnnotatedCandle> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let trend = line_break_directions(&closes);

        let mut out = Vec::with_capacity(candles.len());
        for (i, candle) in candles.iter().enumerate() {
            let mut mas = BTreeMap::new();
            for &period in &spec.ma_periods {
                mas.insert(period, trailing_mean(&closes, i, period as usize));
            }

            let rate = if i == 0 {
                0.0
            } else {
                let prev_close = candles[i - 1].close;
                if prev_close > 0.0 {
                    (candle.high - prev_close) / prev_close * 100.0
                } else {
                    0.0
                }
            };

            let unit = if monetary_unit > 0.0 { monetary_unit } else { 1.0 };
            let trading_value = candle.close * candle.volume as f64 / unit;

            let mut volume_high = BTreeMap::new();
            for &window in &spec.volume_high_windows {
                volume_high.insert(window, is_volume_high(candles, i, window as usize));
            }

            let mut price_high = BTreeMap::new();
            for &window in &spec.price_high_windows {
                price_high.insert(window, is_price_high(candles, i, window));
            }

            out.push(AnnotatedCandle {
                candle: candle.clone(),
                indicators: IndicatorSet {
                    mas,
                    rate,
                    trading_value,
                    volume_high,
                    price_high,
                    trend: trend[i],
                },
            });
        }
        out
    }
}

/// Trailing mean over the last `period` values ending at `i`, using however
/// many are available at the series start.
fn trailing_mean(values: &[f64], i: usize, period: usize) -> f64 {
    let start = (i + 1).saturating_sub(period.max(1));
    let window = &values[start..=i];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Current volume at least the max over the preceding `window` trading days,
/// excluding today. True with no prior history.
fn is_volume_high(candles: &[Candle], i: usize, window: usize) -> bool {
    let start = i.saturating_sub(window);
    let prior_max = candles[start..i].iter().map(|c| c.volume).max();
    match prior_max {
        Some(max) => candles[i].volume >= max,
        None => true,
    }
}

/// Current high at least the max high over the preceding `window` calendar
/// days, excluding today. True with no prior history in the window.
fn is_price_high(candles: &[Candle], i: usize, window: u32) -> bool {
    let cutoff = candles[i].date - Duration::days(window as i64);
    let prior_max = candles[..i]
        .iter()
        .filter(|c| c.date >= cutoff)
        .map(|c| c.high)
        .fold(None, |acc: Option<f64>, h| {
            Some(acc.map_or(h, |m: f64| m.max(h)))
        });
    match prior_max {
        Some(max) => candles[i].high >= max,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn day(offset: i64, close: f64, volume: i64) -> Candle {
        let base = d("2024-01-01");
        Candle::new(
            "T",
            base + Duration::days(offset),
            close,
            close,
            close,
            close,
            volume,
        )
    }

    fn spec() -> IndicatorSpec {
        IndicatorSpec {
            ma_periods: [3].into_iter().collect(),
            volume_high_windows: [2].into_iter().collect(),
            price_high_windows: [2].into_iter().collect(),
        }
    }

    #[test]
    fn ma_uses_partial_window_at_series_start() {
        let candles = vec![day(0, 10.0, 1), day(1, 20.0, 1), day(2, 30.0, 1)];
        let annotated = IndicatorCalculator::annotate(&candles, &spec(), 1.0);
        assert_eq!(annotated[0].ma(3), Some(10.0));
        assert_eq!(annotated[1].ma(3), Some(15.0));
        assert_eq!(annotated[2].ma(3), Some(20.0));
    }

    #[test]
    fn rate_is_zero_on_first_candle() {
        let candles = vec![day(0, 100.0, 1), day(1, 110.0, 1)];
        let annotated = IndicatorCalculator::annotate(&candles, &spec(), 1.0);
        assert_eq!(annotated[0].indicators.rate, 0.0);
        assert!((annotated[1].indicators.rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn deviation_defaults_to_100_without_ma() {
        let candles = vec![day(0, 100.0, 1)];
        let annotated = IndicatorCalculator::annotate(&candles, &spec(), 1.0);
        // Period 5 was never requested, so the MA is undefined.
        assert_eq!(annotated[0].deviation(5), 100.0);
    }

    #[test]
    fn high_flags_default_true_without_history() {
        let candles = vec![day(0, 100.0, 50)];
        let annotated = IndicatorCalculator::annotate(&candles, &spec(), 1.0);
        assert_eq!(annotated[0].indicators.volume_high.get(&2), Some(&true));
        assert_eq!(annotated[0].indicators.price_high.get(&2), Some(&true));
    }

    #[test]
    fn volume_high_excludes_today_and_compares_to_window_max() {
        let candles = vec![day(0, 1.0, 100), day(1, 1.0, 300), day(2, 1.0, 200)];
        let annotated = IndicatorCalculator::annotate(&candles, &spec(), 1.0);
        assert_eq!(annotated[1].indicators.volume_high.get(&2), Some(&true));
        assert_eq!(annotated[2].indicators.volume_high.get(&2), Some(&false));
    }

    #[test]
    fn trading_value_scales_to_monetary_unit() {
        let candles = vec![day(0, 1_000.0, 2_000)];
        let annotated = IndicatorCalculator::annotate(&candles, &spec(), 1_000_000.0);
        assert!((annotated[0].indicators.trading_value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn value_of_resolves_named_indicators() {
        let candles = vec![day(0, 10.0, 5), day(1, 20.0, 6)];
        let annotated = IndicatorCalculator::annotate(&candles, &spec(), 1.0);
        let last = &annotated[1];
        assert_eq!(last.value_of("close"), Some(20.0));
        assert_eq!(last.value_of("ma_3"), Some(15.0));
        assert_eq!(last.value_of("volume_high_2"), Some(1.0));
        assert_eq!(last.value_of("ma_9"), None);
        assert_eq!(last.value_of("nonsense"), None);
    }
}

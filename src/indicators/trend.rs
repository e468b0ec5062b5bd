// src/indicators/trend.rs
use serde::{Deserialize, Serialize};

/// Number of prior break lines a close must pierce to flip the trend.
pub const LINE_BREAK_COUNT: usize = 3;

/// Direction of the three-line-break trend at a given candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
}

/// Derive the three-line-break direction for every close in the series.
///
/// A new break line is drawn whenever the close extends the current trend
/// past the last line. The trend flips only when a close pierces the extreme
/// of the last `LINE_BREAK_COUNT` lines in the opposite direction. The first
/// candle starts an up trend, matching the engine's use of the flip (not the
/// absolute direction) as the exit signal.
pub fn line_break_directions(closes: &[f64]) -> Vec<TrendDirection> {
    let mut directions = Vec::with_capacity(closes.len());
    let mut lines: Vec<f64> = Vec::new();
    let mut direction = TrendDirection::Up;

    for &close in closes {
        if lines.is_empty() {
            lines.push(close);
            directions.push(direction);
            continue;
        }

        let last = *lines.last().unwrap();
        match direction {
            TrendDirection::Up => {
                if close > last {
                    lines.push(close);
                } else {
                    let floor = lines
                        .iter()
                        .rev()
                        .take(LINE_BREAK_COUNT)
                        .copied()
                        .fold(f64::INFINITY, f64::min);
                    if close < floor {
                        direction = TrendDirection::Down;
                        lines.push(close);
                    }
                }
            }
            TrendDirection::Down => {
                if close < last {
                    lines.push(close);
                } else {
                    let ceiling = lines
                        .iter()
                        .rev()
                        .take(LINE_BREAK_COUNT)
                        .copied()
                        .fold(f64::NEG_INFINITY, f64::max);
                    if close > ceiling {
                        direction = TrendDirection::Up;
                        lines.push(close);
                    }
                }
            }
        }
        directions.push(direction);
    }

    directions
}

/// True when the trend flips bearish exactly at index `i`.
pub fn is_bearish_flip(directions: &[TrendDirection], i: usize) -> bool {
    i > 0 && directions[i] == TrendDirection::Down && directions[i - 1] == TrendDirection::Up
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_closes_stay_up() {
        let dirs = line_break_directions(&[10.0, 11.0, 12.0, 13.0]);
        assert!(dirs.iter().all(|d| *d == TrendDirection::Up));
    }

    #[test]
    fn shallow_dip_does_not_flip() {
        // Close falls but stays above the min of the last three lines.
        let dirs = line_break_directions(&[10.0, 11.0, 12.0, 11.5]);
        assert_eq!(dirs[3], TrendDirection::Up);
    }

    #[test]
    fn deep_break_flips_bearish_once() {
        let closes = [10.0, 11.0, 12.0, 13.0, 9.0, 8.0];
        let dirs = line_break_directions(&closes);
        assert!(is_bearish_flip(&dirs, 4));
        // Continuation of the down trend is not a fresh flip.
        assert!(!is_bearish_flip(&dirs, 5));
    }

    #[test]
    fn recovers_to_up_after_piercing_down_lines() {
        let closes = [10.0, 11.0, 12.0, 13.0, 9.0, 8.0, 14.0];
        let dirs = line_break_directions(&closes);
        assert_eq!(dirs[6], TrendDirection::Up);
    }
}

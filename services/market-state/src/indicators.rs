//! Pure indicator math over bar data
//!
//! Everything here works on `f64` and has no state. Degenerate inputs
//! (empty slices, zero periods, zero deviation) return `None` or a
//! neutral value instead of dividing by zero.

use crate::bars::Bar;

/// `max(high - low, |high - prev_close|, |low - prev_close|)`.
pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    let range = high - low;
    match prev_close {
        Some(pc) => range.max((high - pc).abs()).max((low - pc).abs()),
        None => range,
    }
}

/// Simple average of true range over the last `period` bars.
///
/// The oldest bar in the period uses the close of the bar before it when
/// the slice has one. Returns `None` with fewer than `period` bars.
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let start = bars.len() - period;
    let sum: f64 = (start..bars.len())
        .map(|i| {
            let prev_close = i.checked_sub(1).map(|p| bars[p].close());
            true_range(bars[i].high(), bars[i].low(), prev_close)
        })
        .sum();
    Some(sum / period as f64)
}

/// Relative Strength Index with Wilder smoothing.
///
/// The first `period` close-to-close changes seed the averages, later
/// changes are smoothed with `(prev * (period - 1) + x) / period`. With
/// fewer than `period` changes the plain averages of what exists are used.
/// Returns 50 when there are no changes or no movement, and 100 when
/// there were gains but no losses.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < 2 {
        return 50.0;
    }
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let seed = period.min(changes.len());

    let mut avg_gain = changes[..seed].iter().map(|c| c.max(0.0)).sum::<f64>() / seed as f64;
    let mut avg_loss = changes[..seed].iter().map(|c| (-c).max(0.0)).sum::<f64>() / seed as f64;

    let p = period as f64;
    for change in &changes[seed..] {
        avg_gain = (avg_gain * (p - 1.0) + change.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-change).max(0.0)) / p;
    }

    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

pub fn sma(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    let mean = sma(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some((mean, variance.sqrt()))
}

/// `(value - mean) / std`, `None` when `std` is zero or not finite.
pub fn z_score(value: f64, mean: f64, std: f64) -> Option<f64> {
    if std == 0.0 || !std.is_finite() {
        return None;
    }
    Some((value - mean) / std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::Ohlcv;
    use types::numeric::{Price, Quantity};

    fn bar(high: &str, low: &str, close: &str) -> Bar {
        let p = |s: &str| Price::from_str(s).unwrap();
        Bar {
            timestamp: 0,
            ohlcv: Ohlcv {
                open: p(close),
                high: p(high),
                low: p(low),
                close: p(close),
                volume: Quantity::from_u64(1),
                vwap: p(close),
            },
        }
    }

    #[test]
    fn test_true_range_uses_gap() {
        assert_eq!(true_range(11.0, 10.0, None), 1.0);
        assert_eq!(true_range(11.0, 10.0, Some(8.0)), 3.0);
        assert_eq!(true_range(11.0, 10.0, Some(13.0)), 3.0);
        assert_eq!(true_range(11.0, 10.0, Some(10.5)), 1.0);
    }

    #[test]
    fn test_atr_first_bar_without_prior_close() {
        let bars = vec![bar("11", "10", "10.5"), bar("12", "10", "11")];
        // TR1 = 1, TR2 = max(2, 1.5, 0.5) = 2
        assert_eq!(average_true_range(&bars, 2), Some(1.5));
    }

    #[test]
    fn test_atr_uses_close_before_period() {
        let bars = vec![bar("11", "10", "8"), bar("11", "10", "10.5")];
        // Only the last bar is in the period; its prior close is 8.
        assert_eq!(average_true_range(&bars, 1), Some(3.0));
    }

    #[test]
    fn test_atr_not_enough_bars() {
        let bars = vec![bar("11", "10", "10.5")];
        assert_eq!(average_true_range(&bars, 5), None);
        assert_eq!(average_true_range(&bars, 0), None);
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        assert_eq!(rsi(&[10.0, 10.0, 10.0, 10.0], 3), 50.0);
        assert_eq!(rsi(&[10.0], 3), 50.0);
        assert_eq!(rsi(&[], 3), 50.0);
    }

    #[test]
    fn test_rsi_only_gains() {
        assert_eq!(rsi(&[10.0, 11.0, 12.0, 13.0], 3), 100.0);
    }

    #[test]
    fn test_rsi_only_losses() {
        assert_eq!(rsi(&[13.0, 12.0, 11.0, 10.0], 3), 0.0);
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        // changes: +2, -1, +1, -2 ; seed over first 3: gain 1, loss 1/3
        // smoothed: gain = (1*2 + 0)/3 = 2/3, loss = (1/3*2 + 2)/3 = 8/9
        // rs = 0.75 -> rsi = 100 - 100/1.75
        let value = rsi(&[10.0, 12.0, 11.0, 12.0, 10.0], 3);
        let expected = 100.0 - 100.0 / 1.75;
        assert!((value - expected).abs() < 1e-9, "got {}", value);
    }

    #[test]
    fn test_rsi_with_fewer_changes_than_period() {
        // changes: +2, -1 -> gain 1, loss 0.5 -> rs 2 -> 66.67
        let value = rsi(&[10.0, 12.0, 11.0], 5);
        assert!((value - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_std_population() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(mean, 5.0);
        assert_eq!(std, 2.0);
        assert!(mean_std(&[]).is_none());
    }

    #[test]
    fn test_z_score_zero_std() {
        assert_eq!(z_score(10.0, 5.0, 0.0), None);
        assert_eq!(z_score(9.0, 5.0, 2.0), Some(2.0));
    }

    #[test]
    fn test_sma() {
        assert_eq!(sma(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(sma(&[]), None);
    }
}

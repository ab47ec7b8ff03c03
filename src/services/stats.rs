//! Statistics helpers shared by the fetcher, aggregator and enrichment steps.

pub const RSI_PERIOD: usize = 14;
pub const RSI_NEUTRAL: f64 = 50.0;
pub const Z_SCORE_LIMIT: f64 = 10.0;

/// Wilder's smoothed RSI.
///
/// Seeds the average gain/loss from the first `period` deltas, then applies
/// `avg = (avg * (period - 1) + new) / period` for each later delta.
/// Returns 50.0 when fewer than `period + 1` closes are available.
pub fn wilder_rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return RSI_NEUTRAL;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let p = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / p;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / p;

    for i in period..gains.len() {
        avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
        avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
    }

    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    sanitize_rsi(rsi)
}

/// `Σ(value_i × weight_i) / Σ(weight_i)`, 0.0 when empty or the weights sum to 0.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
    if pairs.is_empty() || total_weight == 0.0 || !total_weight.is_finite() {
        return 0.0;
    }
    let weighted: f64 = pairs.iter().map(|(v, w)| v * w).sum();
    finite_or(weighted / total_weight, 0.0)
}

/// Percentage change from `prior` to `current`; 0.0 when `prior` is 0 or missing.
pub fn pct_change(prior: Option<f64>, current: Option<f64>) -> f64 {
    match (prior, current) {
        (Some(p), Some(c)) if p != 0.0 => finite_or((c - p) / p * 100.0, 0.0),
        _ => 0.0,
    }
}

/// Sample mean and standard deviation (n - 1). None with fewer than 2 values.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

/// Z-score of the last value in `window` against the whole window.
/// 0.0 when there is not enough data or the window has no spread.
pub fn rolling_z_score(window: &[f64]) -> f64 {
    let Some(&current) = window.last() else {
        return 0.0;
    };
    match mean_std(window) {
        Some((mean, std)) if std > 0.0 && std.is_finite() => (current - mean) / std,
        _ => 0.0,
    }
}

/// Clamp to [-10, 10]; infinities keep their sign, NaN becomes 0.
pub fn clip_z_score(z: f64) -> f64 {
    if z.is_nan() {
        return 0.0;
    }
    z.clamp(-Z_SCORE_LIMIT, Z_SCORE_LIMIT)
}

pub fn sanitize_rsi(rsi: f64) -> f64 {
    if rsi.is_finite() {
        rsi.clamp(0.0, 100.0)
    } else {
        RSI_NEUTRAL
    }
}

pub fn finite_or(value: f64, default: f64) -> f64 {
    if value.is_finite() { value } else { default }
}

/// Top-of-book skew: ((bid - ask) / (bid + ask)) × 100, 0.0 when both sides are empty.
pub fn imbalance_pct(bid_volume: f64, ask_volume: f64) -> f64 {
    let total = bid_volume + ask_volume;
    if total == 0.0 {
        return 0.0;
    }
    finite_or((bid_volume - ask_volume) / total * 100.0, 0.0).clamp(-100.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_rsi_neutral_with_too_few_closes() {
        let closes: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(wilder_rsi(&closes, RSI_PERIOD), 50.0);
        assert_eq!(wilder_rsi(&[], RSI_PERIOD), 50.0);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert_eq!(wilder_rsi(&closes, RSI_PERIOD), 100.0);
    }

    #[test]
    fn test_rsi_all_losses_is_0() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(wilder_rsi(&closes, RSI_PERIOD), 0.0);
    }

    #[test]
    fn test_rsi_flat_series() {
        // No gains and no losses: avg_loss == 0 -> RS treated as unbounded
        let closes = vec![42.0; 30];
        assert_eq!(wilder_rsi(&closes, RSI_PERIOD), 100.0);
    }

    #[test]
    fn test_rsi_reference_values() {
        // Wilder's textbook series; seed RSI = 70.46 (14 deltas),
        // next two smoothed values = 66.25, 66.48
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28, 46.00, 46.03,
        ];
        assert!(approx(wilder_rsi(&closes[..15], RSI_PERIOD), 70.46, 0.05));
        assert!(approx(wilder_rsi(&closes[..16], RSI_PERIOD), 66.25, 0.05));
        assert!(approx(wilder_rsi(&closes, RSI_PERIOD), 66.48, 0.05));
    }

    #[test]
    fn test_rsi_stays_in_range_for_noisy_input() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + ((i * 37) % 17) as f64 - 8.0)
            .collect();
        for end in 0..closes.len() {
            let rsi = wilder_rsi(&closes[..end], RSI_PERIOD);
            assert!((0.0..=100.0).contains(&rsi));
        }
    }

    #[test]
    fn test_weighted_mean() {
        let pairs = vec![(1e9, 1e9), (2e9, 2e9)];
        let expected = (1e9 * 1e9 + 2e9 * 2e9) / (1e9 + 2e9);
        assert!(approx(weighted_mean(&pairs), expected, 1.0));
        assert!(approx(weighted_mean(&pairs), 1.667e9, 1e6));
    }

    #[test]
    fn test_weighted_mean_zero_weights() {
        assert_eq!(weighted_mean(&[(5.0, 0.0), (7.0, 0.0)]), 0.0);
        assert_eq!(weighted_mean(&[]), 0.0);
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(Some(100.0), Some(110.0)), 10.0);
        assert_eq!(pct_change(Some(0.0), Some(110.0)), 0.0);
        assert_eq!(pct_change(None, Some(110.0)), 0.0);
        assert_eq!(pct_change(Some(2.0), None), 0.0);
        assert_eq!(pct_change(Some(1e-320), Some(1e308)), 0.0);
    }

    #[test]
    fn test_rolling_z_score() {
        // mean 3, sample std ~1.58
        let z = rolling_z_score(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(approx(z, 1.2649, 1e-3));
        assert_eq!(rolling_z_score(&[1.0]), 0.0);
        assert_eq!(rolling_z_score(&[2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn test_clip_z_score() {
        assert_eq!(clip_z_score(25.0), 10.0);
        assert_eq!(clip_z_score(-25.0), -10.0);
        assert_eq!(clip_z_score(f64::INFINITY), 10.0);
        assert_eq!(clip_z_score(f64::NEG_INFINITY), -10.0);
        assert_eq!(clip_z_score(f64::NAN), 0.0);
        assert_eq!(clip_z_score(2.6), 2.6);
    }

    #[test]
    fn test_imbalance() {
        assert_eq!(imbalance_pct(0.0, 0.0), 0.0);
        assert_eq!(imbalance_pct(75.0, 25.0), 50.0);
        assert_eq!(imbalance_pct(0.0, 10.0), -100.0);
    }
}

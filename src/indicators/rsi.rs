// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// RSI measures the speed and magnitude of recent price changes to evaluate
// whether an asset is overbought or oversold.
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Seed average gain / average loss with the SMA of the first `period`
//          gains / losses (deltas at close indices 1..=period).
// Step 3 — Apply Wilder's exponential smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS),   or 100 when avg_loss == 0
//
// The first value lands at index `period`, so the output carries exactly
// `period` leading `None`s. Values are rounded to 2 decimals.
// =============================================================================

use crate::error::{check_period, IndicatorError};
use crate::indicators::round_dp;

/// Compute the full RSI series for `closes` and `period`.
///
/// # Edge cases
/// - `period == 0` => `Err(InvalidPeriod)`
/// - `closes.len() < period + 1` => all `None` (need `period` deltas)
/// - If average loss is zero (no down moves, or no movement at all), RSI is
///   100.0.
/// - A non-finite result is emitted as `None` and ends the series.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Result<Vec<Option<f64>>, IndicatorError> {
    check_period("rsi", period)?;

    let mut out = vec![None; closes.len()];
    if closes.len() < period + 1 {
        return Ok(out);
    }

    // --- Compute price deltas ------------------------------------------------
    // deltas[j] is the move into close index j + 1.
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    // --- Seed averages with SMA of first `period` deltas ---------------------
    let (sum_gain, sum_loss) = deltas[..period].iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
        if d > 0.0 {
            (g + d, l)
        } else {
            (g, l + d.abs())
        }
    });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    match rsi_from_averages(avg_gain, avg_loss) {
        Some(rsi) => out[period] = Some(rsi),
        None => return Ok(out),
    }

    // --- Wilder's smoothing for subsequent values ----------------------------
    for (offset, &delta) in deltas[period..].iter().enumerate() {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => out[period + 1 + offset] = Some(rsi),
            None => break,
        }
    }

    Ok(out)
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Convert average gain / average loss into a rounded RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then(|| round_dp(rsi.clamp(0.0, 100.0), 2))
}

// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value (index `period - 1`) is seeded with the SMA of the
// first `period` closes. EMA is an internal building block for MACD and is
// not rounded.
// =============================================================================

use crate::error::{check_period, IndicatorError};

/// Compute the EMA series for `closes` and look-back `period`.
///
/// The output has the same length as `closes`; entries before index
/// `period - 1` are `None`.
///
/// # Edge cases
/// - `period == 0` => `Err(InvalidPeriod)`
/// - `closes.len() < period` => all `None`
/// - A non-finite intermediate value ends the series; every later entry is
///   `None` since downstream consumers should not trust a broken series.
pub fn calculate_ema(closes: &[f64], period: usize) -> Result<Vec<Option<f64>>, IndicatorError> {
    check_period("ema", period)?;
    Ok(ema_series(closes, period))
}

/// EMA over the contiguous non-`None` run that starts at the first `Some`.
///
/// Used for the MACD signal line, whose input is itself padded with leading
/// `None`s. The result is re-padded to the input length.
pub(crate) fn ema_over_tail(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    let Some(start) = values.iter().position(Option::is_some) else {
        return out;
    };

    let tail: Vec<f64> = values[start..].iter().map_while(|v| *v).collect();
    for (offset, value) in ema_series(&tail, period).into_iter().enumerate() {
        out[start + offset] = value;
    }
    out
}

fn ema_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period + 1) as f64;

    // Seed: SMA of the first `period` values.
    let sma: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return out;
    }
    out[period - 1] = Some(sma);

    let mut prev_ema = sma;
    for (i, &close) in closes.iter().enumerate().skip(period) {
        let ema = close * multiplier + prev_ema * (1.0 - multiplier);
        if !ema.is_finite() {
            break;
        }
        out[i] = Some(ema);
        prev_ema = ema;
    }

    out
}

// =============================================================================
// Simple Moving Average (MA)
// =============================================================================
//
//   MA_i = (close_{i-period+1} + ... + close_i) / period      for i >= period-1
//
// The display series is rounded to 2 decimals; `sma_series` keeps full
// precision for indicators built on top of it (Bollinger, EMA seed).
// =============================================================================

use crate::error::{check_period, IndicatorError};
use crate::indicators::round_dp;

/// Moving average of `closes` over a trailing window of `period` values,
/// rounded to 2 decimals.
pub fn calculate_ma(closes: &[f64], period: usize) -> Result<Vec<Option<f64>>, IndicatorError> {
    check_period("ma", period)?;
    Ok(sma_series(closes, period)
        .into_iter()
        .map(|v| v.map(|x| round_dp(x, 2)))
        .collect())
}

/// Unrounded trailing mean. `period` must be non-zero.
pub(crate) fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    for (offset, window) in values.windows(period).enumerate() {
        let mean = window.iter().sum::<f64>() / period as f64;
        if mean.is_finite() {
            out[offset + period - 1] = Some(mean);
        }
    }
    out
}

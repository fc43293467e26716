// =============================================================================
// Historical Volatility — annualised, in percent
// =============================================================================
//
// For each index i >= period-1 the window holds `period` closes and therefore
// `period - 1` simple returns:
//
//   r_j = (close_j - close_{j-1}) / close_{j-1}
//   vol = population_std(r) * sqrt(252) * 100
//
// A window with no returns (period 1) or a zero previous close yields `None`.
// Values are rounded to 2 decimals.

use crate::error::{check_period, IndicatorError};
use crate::indicators::{population_std, round_dp};

const TRADING_DAYS: f64 = 252.0;

pub fn calculate_volatility(closes: &[f64], period: usize) -> Result<Vec<Option<f64>>, IndicatorError> {
    check_period("volatility", period)?;

    let mut out = vec![None; closes.len()];
    if closes.len() < period {
        return Ok(out);
    }

    let annualise = TRADING_DAYS.sqrt() * 100.0;
    for (offset, window) in closes.windows(period).enumerate() {
        let returns: Option<Vec<f64>> = window
            .windows(2)
            .map(|w| (w[0] != 0.0).then(|| (w[1] - w[0]) / w[0]))
            .collect();

        let vol = returns
            .as_deref()
            .and_then(population_std)
            .map(|std| std * annualise)
            .filter(|v| v.is_finite());

        out[offset + period - 1] = vol.map(|v| round_dp(v, 2));
    }

    Ok(out)
}

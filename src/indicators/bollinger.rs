// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), where σ is the population standard deviation
// of the same trailing window. All three bands are rounded to 2 decimals.

use serde::Serialize;

use crate::error::{check_period, IndicatorError};
use crate::indicators::ma::sma_series;
use crate::indicators::{population_std, round_dp};

/// Per-candle Bollinger bands; `None` wherever the window is not filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BollingerSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

impl BollingerSeries {
    pub fn empty(len: usize) -> Self {
        Self {
            upper: vec![None; len],
            middle: vec![None; len],
            lower: vec![None; len],
        }
    }
}

/// Calculate Bollinger Bands for every close.
///
/// - `middle` = SMA(`period`)
/// - `upper`  = middle + `num_std` * σ
/// - `lower`  = middle - `num_std` * σ
///
/// The band offset uses `|num_std|` so that `lower <= middle <= upper`
/// always holds.
pub fn calculate_bollinger(
    closes: &[f64],
    period: usize,
    num_std: f64,
) -> Result<BollingerSeries, IndicatorError> {
    check_period("bollinger", period)?;

    let mut bands = BollingerSeries::empty(closes.len());
    let middle = sma_series(closes, period);
    let k = num_std.abs();

    for (i, mid) in middle.iter().enumerate() {
        let Some(mid) = *mid else { continue };
        let window = &closes[i + 1 - period..=i];
        let Some(std) = population_std(window) else {
            continue;
        };

        let upper = mid + std * k;
        let lower = mid - std * k;
        if upper.is_finite() && lower.is_finite() {
            bands.upper[i] = Some(round_dp(upper, 2));
            bands.middle[i] = Some(round_dp(mid, 2));
            bands.lower[i] = Some(round_dp(lower, 2));
        }
    }

    Ok(bands)
}

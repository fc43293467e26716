// =============================================================================
// KDJ — stochastic oscillator with J line
// =============================================================================
//
//   RSV_i = (close_i - LL) / (HH - LL) * 100      over the last `period` bars
//           (50 when HH == LL)
//   K_i   = (K_{i-1} * (k_smooth - 1) + RSV_i) / k_smooth    seed K = RSV
//   D_i   = (D_{i-1} * (d_smooth - 1) + K_i)   / d_smooth    seed D = K
//   J_i   = 3 * K_i - 2 * D_i
//
// K and D are carried as an explicit accumulator through a single pass so
// long series never recurse. The accumulator is unrounded; outputs are
// rounded to 2 decimals.
// =============================================================================

use serde::Serialize;

use crate::error::{check_period, IndicatorError};
use crate::indicators::round_dp;

/// RSV used when the window has no range.
const FLAT_RSV: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KdjSeries {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
    pub j: Vec<Option<f64>>,
}

impl KdjSeries {
    pub fn empty(len: usize) -> Self {
        Self {
            k: vec![None; len],
            d: vec![None; len],
            j: vec![None; len],
        }
    }
}

/// Compute K, D and J for aligned `highs`, `lows`, `closes`.
///
/// Output length is `closes.len()`; if the slices differ in length only the
/// common prefix is evaluated.
pub fn calculate_kdj(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    k_smooth: usize,
    d_smooth: usize,
) -> Result<KdjSeries, IndicatorError> {
    check_period("kdj", period)?;
    check_period("kdj k_smooth", k_smooth)?;
    check_period("kdj d_smooth", d_smooth)?;

    let mut out = KdjSeries::empty(closes.len());
    let n = closes.len().min(highs.len()).min(lows.len());
    if n < period {
        return Ok(out);
    }

    let ks = k_smooth as f64;
    let ds = d_smooth as f64;

    // (K, D) of the previous bar; None until the first full window.
    let mut prev: Option<(f64, f64)> = None;

    for i in (period - 1)..n {
        let Some(rsv) = rsv(&highs[i + 1 - period..=i], &lows[i + 1 - period..=i], closes[i]) else {
            continue;
        };

        let (k, d) = match prev {
            None => (rsv, rsv),
            Some((pk, pd)) => {
                let k = (pk * (ks - 1.0) + rsv) / ks;
                (k, (pd * (ds - 1.0) + k) / ds)
            }
        };
        prev = Some((k, d));

        out.k[i] = Some(round_dp(k, 2));
        out.d[i] = Some(round_dp(d, 2));
        out.j[i] = Some(round_dp(3.0 * k - 2.0 * d, 2));
    }

    Ok(out)
}

/// Raw stochastic value of `close` within the window's range.
fn rsv(highs: &[f64], lows: &[f64], close: f64) -> Option<f64> {
    let highest = highs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lowest = lows.iter().copied().fold(f64::INFINITY, f64::min);

    let value = if highest == lowest {
        FLAT_RSV
    } else {
        (close - lowest) / (highest - lowest) * 100.0
    };
    value.is_finite().then_some(value)
}

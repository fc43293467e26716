// =============================================================================
// Moving Average Convergence-Divergence (MACD)
// =============================================================================
//
//   macd_line   = EMA(fast) - EMA(slow)          (None where either is None)
//   signal_line = EMA(signal) over macd_line's non-null tail, re-padded
//   histogram   = macd_line - signal_line
//
// Outputs are rounded to 4 decimals; the histogram is taken from the
// unrounded lines.
// =============================================================================

use crate::error::{check_period, IndicatorError};
use crate::indicators::ema::{calculate_ema, ema_over_tail};
use crate::indicators::round_dp;

/// The three MACD lines, each the length of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub macd_line: Vec<Option<f64>>,
    pub signal_line: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

impl MacdSeries {
    pub fn empty(len: usize) -> Self {
        Self {
            macd_line: vec![None; len],
            signal_line: vec![None; len],
            histogram: vec![None; len],
        }
    }
}

pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<MacdSeries, IndicatorError> {
    check_period("macd fast", fast)?;
    check_period("macd slow", slow)?;
    check_period("macd signal", signal)?;

    let ema_fast = calculate_ema(closes, fast)?;
    let ema_slow = calculate_ema(closes, slow)?;

    let macd_line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let signal_line = ema_over_tail(&macd_line, signal);

    let histogram = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| match (m, s) {
            (Some(m), Some(s)) => Some(round_dp(m - s, 4)),
            _ => None,
        })
        .collect();

    let round4 = |series: Vec<Option<f64>>| -> Vec<Option<f64>> {
        series.into_iter().map(|v| v.map(|x| round_dp(x, 4))).collect()
    };

    Ok(MacdSeries {
        macd_line: round4(macd_line),
        signal_line: round4(signal_line),
        histogram,
    })
}

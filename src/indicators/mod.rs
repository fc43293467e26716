// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the K-line indicators served by
// the chart API. Every function takes an ascending series of length N and
// returns output of length N, index-aligned with the input: positions whose
// look-back window is not yet filled are `None`.
//
// Parameter errors (a zero period) are the only failure mode. A series that
// is too short for the window is not an error; it simply yields all-`None`
// output.

pub mod bollinger;
pub mod ema;
pub mod kdj;
pub mod ma;
pub mod macd;
pub mod rsi;
pub mod volatility;

pub use bollinger::{calculate_bollinger, BollingerSeries};
pub use ema::calculate_ema;
pub use kdj::{calculate_kdj, KdjSeries};
pub use ma::calculate_ma;
pub use macd::{calculate_macd, MacdSeries};
pub use rsi::calculate_rsi;
pub use volatility::calculate_volatility;

/// Round to `dp` decimal places for display.
pub(crate) fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// Population standard deviation (divides by `len`). `None` for an empty
/// window.
pub(crate) fn population_std(window: &[f64]) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    let len = window.len() as f64;
    let mean = window.iter().sum::<f64>() / len;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / len;
    let std = variance.sqrt();
    std.is_finite().then_some(std)
}

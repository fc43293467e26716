// =============================================================================
// Error taxonomy for the computational core
// =============================================================================
//
// Plumbing (config, sources, snapshot files, HTTP) uses `anyhow`. The core
// exposes typed errors so callers can tell a bad timestamp from an empty
// series without string matching.

use thiserror::Error;

use crate::types::Granularity;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A timestamp string matched none of the accepted formats.
    #[error("unrecognised timestamp format: {input}")]
    Parse { input: String },

    /// No rows at all for the requested series.
    #[error("no {granularity} data found for {symbol}")]
    EmptyInput {
        symbol: String,
        granularity: Granularity,
    },

    /// OHLCV values violating the candle invariants.
    #[error("invalid candle: {0}")]
    InvalidCandle(String),

    #[error("unknown granularity: {0}")]
    UnknownGranularity(String),
}

/// Indicator parameter errors. Insufficient data is never an error: it is
/// represented as `None` padding in the output series.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("{name}: period must be at least 1 (got {period})")]
    InvalidPeriod { name: &'static str, period: usize },
}

/// Reject a zero look-back period.
pub(crate) fn check_period(name: &'static str, period: usize) -> Result<(), IndicatorError> {
    if period == 0 {
        Err(IndicatorError::InvalidPeriod { name, period })
    } else {
        Ok(())
    }
}

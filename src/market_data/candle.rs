use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::timestamps::TimestampInput;

/// Wire form of a candle: `[epoch_ms, open, high, low, close, volume]`.
pub type CandleTuple = (i64, f64, f64, f64, f64, f64);

/// One OHLCV bucket with a UTC, millisecond-precision timestamp.
///
/// Only constructible through [`Candle::new`], which enforces
/// `high >= max(open, close)`, `low <= min(open, close)`, `volume >= 0` and
/// finite prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candle {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CoreError> {
        if ![open, high, low, close, volume].iter().all(|v| v.is_finite()) {
            return Err(CoreError::InvalidCandle(format!(
                "non-finite value at {timestamp}"
            )));
        }
        if high < open.max(close) {
            return Err(CoreError::InvalidCandle(format!(
                "high {high} below open/close at {timestamp}"
            )));
        }
        if low > open.min(close) {
            return Err(CoreError::InvalidCandle(format!(
                "low {low} above open/close at {timestamp}"
            )));
        }
        if volume < 0.0 {
            return Err(CoreError::InvalidCandle(format!(
                "negative volume {volume} at {timestamp}"
            )));
        }

        // Truncate to millisecond precision.
        let timestamp = DateTime::from_timestamp_millis(timestamp.timestamp_millis()).unwrap_or(timestamp);

        Ok(Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn to_tuple(&self) -> CandleTuple {
        (
            self.timestamp.timestamp_millis(),
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }

    /// Storage-row form of this candle.
    pub fn to_row(&self) -> CandleRow {
        CandleRow {
            timestamp: TimestampInput::Utc(self.timestamp),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// A raw row as handed over by a storage collaborator. The timestamp has not
/// been normalised yet and the prices have not been validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRow {
    pub timestamp: TimestampInput,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

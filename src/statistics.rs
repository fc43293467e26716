// =============================================================================
// Price Statistics — summary figures over an assembled series
// =============================================================================
//
// Computed over the same newest-`limit` window the chart endpoint serves:
//
//   current / average        last close, mean close
//   highest / lowest         max high, min low
//   change / change %        last close - first close, relative to first close
//   volatility               sample standard deviation of closes
//   total volume             sum of volumes
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::series::Series;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStatistics {
    pub current_price: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub average_price: f64,
    pub price_change: f64,
    /// `None` when the first close is zero.
    pub price_change_percent: Option<f64>,
    /// `None` with fewer than two closes.
    pub volatility: Option<f64>,
    pub total_volume: f64,
    pub data_points: usize,
    pub first_timestamp: DateTime<Utc>,
    pub latest_timestamp: DateTime<Utc>,
}

/// Summary of `series`; `None` for an empty series.
pub fn price_statistics(series: &Series) -> Option<PriceStatistics> {
    let candles = series.candles();
    let first = candles.first()?;
    let last = candles.last()?;

    let closes = series.closes();
    let n = closes.len() as f64;
    let average = closes.iter().sum::<f64>() / n;

    let highest = candles.iter().map(|c| c.high()).fold(f64::NEG_INFINITY, f64::max);
    let lowest = candles.iter().map(|c| c.low()).fold(f64::INFINITY, f64::min);

    let change = last.close() - first.close();
    let change_percent = (first.close() != 0.0).then(|| (last.close() / first.close() - 1.0) * 100.0);

    let volatility = (closes.len() >= 2).then(|| {
        let var = closes.iter().map(|c| (c - average).powi(2)).sum::<f64>() / (n - 1.0);
        var.sqrt()
    });

    Some(PriceStatistics {
        current_price: last.close(),
        highest_price: highest,
        lowest_price: lowest,
        average_price: average,
        price_change: change,
        price_change_percent: change_percent,
        volatility,
        total_volume: candles.iter().map(|c| c.volume()).sum(),
        data_points: candles.len(),
        first_timestamp: first.timestamp(),
        latest_timestamp: last.timestamp(),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::CandleRow;
    use crate::series::assemble;
    use crate::timestamps::{TimestampInput, TimestampNormalizer};
    use crate::types::Granularity;

    fn series(bars: &[(f64, f64, f64, f64)]) -> Series {
        let rows = bars
            .iter()
            .enumerate()
            .map(|(i, &(high, low, close, volume))| CandleRow {
                timestamp: TimestampInput::EpochMillis(i as i64 * 3_600_000),
                open: close,
                high,
                low,
                close,
                volume,
            })
            .collect();
        assemble(&TimestampNormalizer::new(), rows, usize::MAX, "BTC", Granularity::Hour).unwrap()
    }

    #[test]
    fn summary_over_three_bars() {
        let stats = price_statistics(&series(&[
            (101.0, 99.0, 100.0, 1.0),
            (112.0, 100.0, 110.0, 2.0),
            (106.0, 95.0, 105.0, 3.0),
        ]))
        .unwrap();

        assert_eq!(stats.current_price, 105.0);
        assert_eq!(stats.highest_price, 112.0);
        assert_eq!(stats.lowest_price, 95.0);
        assert_eq!(stats.average_price, 105.0);
        assert_eq!(stats.price_change, 5.0);
        assert!((stats.price_change_percent.unwrap() - 5.0).abs() < 1e-9);
        // Sample std of 100, 110, 105 is 5.
        assert!((stats.volatility.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(stats.total_volume, 6.0);
        assert_eq!(stats.data_points, 3);
        assert_eq!(stats.latest_timestamp.timestamp_millis(), 2 * 3_600_000);
    }

    #[test]
    fn single_bar_has_no_volatility() {
        let stats = price_statistics(&series(&[(2.0, 1.0, 1.5, 4.0)])).unwrap();
        assert_eq!(stats.volatility, None);
        assert_eq!(stats.price_change, 0.0);
        assert_eq!(stats.price_change_percent, Some(0.0));
    }

    #[test]
    fn zero_first_close_has_no_percent_change() {
        let stats = price_statistics(&series(&[(1.0, 0.0, 0.0, 1.0), (2.0, 1.0, 2.0, 1.0)])).unwrap();
        assert_eq!(stats.price_change, 2.0);
        assert_eq!(stats.price_change_percent, None);
    }

    #[test]
    fn empty_series_has_no_summary() {
        assert!(price_statistics(&Series::default()).is_none());
    }
}

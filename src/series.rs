// =============================================================================
// Series Assembler — raw rows → ordered candles → indicator set
// =============================================================================
//
// `assemble` turns whatever a `CandleSource` returned (any order, mixed
// timestamp representations) into an ascending, bounded `Series`.
// `compute_all` runs the full indicator suite over it. An indicator that
// fails on its parameters degrades to an all-`None` line; the rest of the
// set is still served.
// =============================================================================

use serde::Serialize;
use tracing::warn;

use crate::error::{CoreError, IndicatorError};
use crate::indicators::{
    calculate_bollinger, calculate_kdj, calculate_ma, calculate_macd, calculate_rsi,
    calculate_volatility, BollingerSeries, KdjSeries, MacdSeries,
};
use crate::market_data::{Candle, CandleRow};
use crate::timestamps::TimestampNormalizer;
use crate::types::Granularity;

// Indicator parameters served by the chart API.
const MA_PERIODS: [usize; 3] = [5, 10, 20];
const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_STD: f64 = 2.0;
const VOLATILITY_PERIOD: usize = 20;
const KDJ_PERIOD: usize = 9;
const KDJ_K_SMOOTH: usize = 3;
const KDJ_D_SMOOTH: usize = 3;

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Candles ascending by timestamp. Built per query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    candles: Vec<Candle>,
}

impl Series {
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(Candle::close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(Candle::high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(Candle::low).collect()
    }
}

/// Normalise, validate, sort ascending and keep the newest `limit` rows.
///
/// A timestamp that cannot be parsed fails the whole call; a row with
/// inconsistent OHLCV values is dropped with a warning.
pub fn assemble(
    normalizer: &TimestampNormalizer,
    rows: Vec<CandleRow>,
    limit: usize,
    symbol: &str,
    granularity: Granularity,
) -> Result<Series, CoreError> {
    if rows.is_empty() {
        return Err(CoreError::EmptyInput {
            symbol: symbol.to_string(),
            granularity,
        });
    }

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let ts = normalizer.normalize(&row.timestamp)?;
        match Candle::new(ts, row.open, row.high, row.low, row.close, row.volume) {
            Ok(candle) => candles.push(candle),
            Err(e) => warn!(symbol, granularity = %granularity, error = %e, "skipping row"),
        }
    }

    if candles.is_empty() {
        return Err(CoreError::EmptyInput {
            symbol: symbol.to_string(),
            granularity,
        });
    }

    // `sort_by_key` is stable: equal timestamps keep their storage order.
    candles.sort_by_key(Candle::timestamp);
    let start = candles.len().saturating_sub(limit);
    candles.drain(..start);

    Ok(Series { candles })
}

// ---------------------------------------------------------------------------
// IndicatorSet
// ---------------------------------------------------------------------------

/// Every indicator line for a series, index-aligned with its candles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSet {
    pub ma5: Vec<Option<f64>>,
    pub ma10: Vec<Option<f64>>,
    pub ma20: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd_line: Vec<Option<f64>>,
    pub signal_line: Vec<Option<f64>>,
    pub macd_hist: Vec<Option<f64>>,
    pub bollinger: BollingerSeries,
    pub volatility: Vec<Option<f64>>,
    pub kdj: KdjSeries,
}

impl IndicatorSet {
    /// Every line with its name.
    pub fn lines(&self) -> Vec<(&'static str, &[Option<f64>])> {
        vec![
            ("ma5", self.ma5.as_slice()),
            ("ma10", self.ma10.as_slice()),
            ("ma20", self.ma20.as_slice()),
            ("rsi", self.rsi.as_slice()),
            ("macd_line", self.macd_line.as_slice()),
            ("signal_line", self.signal_line.as_slice()),
            ("macd_hist", self.macd_hist.as_slice()),
            ("bollinger.upper", self.bollinger.upper.as_slice()),
            ("bollinger.middle", self.bollinger.middle.as_slice()),
            ("bollinger.lower", self.bollinger.lower.as_slice()),
            ("volatility", self.volatility.as_slice()),
            ("kdj.k", self.kdj.k.as_slice()),
            ("kdj.d", self.kdj.d.as_slice()),
            ("kdj.j", self.kdj.j.as_slice()),
        ]
    }
}

/// Log the failure and fall back to an all-`None` result of length `len`.
fn or_empty<T>(
    name: &str,
    len: usize,
    result: Result<T, IndicatorError>,
    empty: impl FnOnce(usize) -> T,
) -> T {
    result.unwrap_or_else(|e| {
        warn!(indicator = name, error = %e, "indicator failed, serving empty line");
        empty(len)
    })
}

/// Run the full indicator suite over `series`.
pub fn compute_all(series: &Series) -> IndicatorSet {
    let n = series.len();
    let closes = series.closes();
    let highs = series.highs();
    let lows = series.lows();
    let none = |len: usize| -> Vec<Option<f64>> { vec![None; len] };

    let [ma5, ma10, ma20] =
        MA_PERIODS.map(|p| or_empty("ma", n, calculate_ma(&closes, p), none));

    let macd = or_empty(
        "macd",
        n,
        calculate_macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
        MacdSeries::empty,
    );

    let set = IndicatorSet {
        ma5,
        ma10,
        ma20,
        rsi: or_empty("rsi", n, calculate_rsi(&closes, RSI_PERIOD), none),
        macd_line: macd.macd_line,
        signal_line: macd.signal_line,
        macd_hist: macd.histogram,
        bollinger: or_empty(
            "bollinger",
            n,
            calculate_bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_STD),
            BollingerSeries::empty,
        ),
        volatility: or_empty(
            "volatility",
            n,
            calculate_volatility(&closes, VOLATILITY_PERIOD),
            none,
        ),
        kdj: or_empty(
            "kdj",
            n,
            calculate_kdj(&highs, &lows, &closes, KDJ_PERIOD, KDJ_K_SMOOTH, KDJ_D_SMOOTH),
            KdjSeries::empty,
        ),
    };

    debug_assert!(
        set.lines().iter().all(|(_, line)| line.len() == n),
        "indicator line length differs from candle count"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamps::TimestampInput;
    use chrono::DateTime;

    fn row(ms: i64, close: f64) -> CandleRow {
        CandleRow {
            timestamp: TimestampInput::EpochMillis(ms),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn series_of(closes: &[f64]) -> Series {
        let rows = closes
            .iter()
            .enumerate()
            .map(|(i, c)| row(i as i64 * 60_000, *c))
            .collect();
        assemble(&TimestampNormalizer::new(), rows, usize::MAX, "BTC", Granularity::Minute).unwrap()
    }

    #[test]
    fn empty_rows_are_an_error() {
        let err = assemble(&TimestampNormalizer::new(), Vec::new(), 10, "BTC", Granularity::Hour).unwrap_err();
        assert!(matches!(err, CoreError::EmptyInput { .. }));
        assert_eq!(err.to_string(), "no hour data found for BTC");
    }

    #[test]
    fn unparseable_timestamp_propagates() {
        let rows = vec![
            row(0, 1.0),
            CandleRow {
                timestamp: TimestampInput::from("next tuesday"),
                ..row(0, 1.0)
            },
        ];
        let err = assemble(&TimestampNormalizer::new(), rows, 10, "BTC", Granularity::Hour).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[test]
    fn invalid_rows_are_skipped() {
        let mut bad = row(60_000, 5.0);
        bad.high = 1.0;
        let rows = vec![row(0, 1.0), bad, row(120_000, 3.0)];
        let series = assemble(&TimestampNormalizer::new(), rows, 10, "BTC", Granularity::Minute).unwrap();
        assert_eq!(series.closes(), vec![1.0, 3.0]);
    }

    #[test]
    fn only_invalid_rows_is_empty_input() {
        let mut bad = row(0, 5.0);
        bad.volume = -1.0;
        let err = assemble(&TimestampNormalizer::new(), vec![bad], 10, "BTC", Granularity::Minute).unwrap_err();
        assert!(matches!(err, CoreError::EmptyInput { .. }));
    }

    #[test]
    fn sorts_ascending_and_keeps_newest() {
        // Newest first, as a DESC query returns them, with mixed inputs.
        let rows = vec![
            row(180_000, 4.0),
            CandleRow {
                timestamp: TimestampInput::from("1970-01-01T00:02:00Z"),
                ..row(0, 3.0)
            },
            row(60_000, 2.0),
            row(0, 1.0),
        ];
        let series = assemble(&TimestampNormalizer::new(), rows, 3, "BTC", Granularity::Minute).unwrap();
        assert_eq!(series.closes(), vec![2.0, 3.0, 4.0]);
        let first = series.candles()[0].timestamp();
        assert_eq!(first, DateTime::from_timestamp_millis(60_000).unwrap());
    }

    #[test]
    fn equal_timestamps_keep_input_order() {
        let rows = vec![row(0, 1.0), row(0, 2.0), row(0, 3.0)];
        let series = assemble(&TimestampNormalizer::new(), rows, 10, "BTC", Granularity::Minute).unwrap();
        assert_eq!(series.closes(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn flat_twenty_closes() {
        let set = compute_all(&series_of(&[100.0; 20]));
        assert_eq!(set.ma20[19], Some(100.0));
        assert_eq!(set.volatility[19], Some(0.0));
        assert_eq!(set.bollinger.upper[19], Some(100.0));
        assert_eq!(set.bollinger.middle[19], Some(100.0));
        assert_eq!(set.bollinger.lower[19], Some(100.0));
        assert!(set.ma20[..19].iter().all(Option::is_none));
    }

    #[test]
    fn rsi_with_exactly_fifteen_candles() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + (i % 3) as f64).collect();
        let set = compute_all(&series_of(&closes));
        assert_eq!(set.rsi.len(), 15);
        assert!(set.rsi[..14].iter().all(Option::is_none));
        assert!(set.rsi[14].is_some());
    }

    #[test]
    fn every_line_matches_candle_count() {
        for n in [1usize, 8, 26, 40, 120] {
            let closes: Vec<f64> = (0..n).map(|i| 50.0 + (i as f64 * 0.7).sin() * 5.0).collect();
            let set = compute_all(&series_of(&closes));
            for (name, line) in set.lines() {
                assert_eq!(line.len(), n, "{name} at n={n}");
            }
        }
    }

    #[test]
    fn failed_indicator_degrades_to_none() {
        let line: Vec<Option<f64>> = or_empty(
            "test",
            3,
            Err(IndicatorError::InvalidPeriod { name: "test", period: 0 }),
            |n| vec![None; n],
        );
        assert_eq!(line, vec![None, None, None]);
    }
}

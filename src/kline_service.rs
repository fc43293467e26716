// =============================================================================
// KlineService — the query façade behind the chart endpoints
// =============================================================================
//
// Owns the injected collaborators (candle source, normaliser, clock) and turns
// a `(symbol, granularity, limit)` query into candles plus indicators, or a
// freshness report. Failures never escape as errors: an empty or broken
// series becomes an empty response carrying a message.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::market_data::{CandleSource, CandleTuple};
use crate::series::{assemble, compute_all, IndicatorSet, Series};
use crate::statistics::{price_statistics, PriceStatistics};
use crate::timestamps::{Clock, TimestampNormalizer};
use crate::types::{FreshnessStatus, Granularity};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Serialises as `{}` when no indicators could be computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NoIndicators {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndicatorPayload {
    Computed(Box<IndicatorSet>),
    Empty(NoIndicators),
}

#[cfg(test)]
impl IndicatorPayload {
    pub fn computed(&self) -> Option<&IndicatorSet> {
        match self {
            Self::Computed(set) => Some(set),
            Self::Empty(_) => None,
        }
    }
}

/// Candles as `[epoch_ms, open, high, low, close, volume]` plus aligned
/// indicator lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KlineResponse {
    pub candles: Vec<CandleTuple>,
    pub indicators: IndicatorPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KlineResponse {
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            candles: Vec::new(),
            indicators: IndicatorPayload::Empty(NoIndicators {}),
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessReport {
    pub symbol: String,
    pub granularity: Granularity,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub expected_timestamp: DateTime<Utc>,
    pub lag_ms: Option<i64>,
    pub freshness_minutes: Option<f64>,
    pub is_fresh: bool,
    pub quality_score: f64,
    pub status: FreshnessStatus,
}

/// Summary statistics for one series; `statistics` is null and `error` set
/// when the series is empty or could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsResponse {
    pub symbol: String,
    pub granularity: Granularity,
    pub statistics: Option<PriceStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Newest hourly close of a symbol and its change over the last 24 hours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestPrice {
    pub symbol: String,
    pub price: f64,
    /// Percent change against the newest close at least 24h older; `None`
    /// when the stored history is shorter.
    pub change_24h: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Hourly candles fetched to cover a 24h lookback.
const LATEST_PRICE_WINDOW: usize = 25;

// ---------------------------------------------------------------------------
// KlineService
// ---------------------------------------------------------------------------

pub struct KlineService {
    source: Arc<dyn CandleSource>,
    normalizer: TimestampNormalizer,
    clock: Arc<dyn Clock>,
}

impl KlineService {
    pub fn new(
        source: Arc<dyn CandleSource>,
        normalizer: TimestampNormalizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            normalizer,
            clock,
        }
    }

    pub fn normalizer(&self) -> &TimestampNormalizer {
        &self.normalizer
    }

    pub fn source(&self) -> &dyn CandleSource {
        self.source.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fetch and assemble the newest `limit` candles. The error is the
    /// message served to the client.
    async fn load_series(
        &self,
        symbol: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Series, String> {
        let rows = match self.source.fetch_candles(symbol, granularity, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(symbol, granularity = %granularity, source = self.source.name(), error = %e, "candle fetch failed");
                return Err(format!("failed to load {granularity} data for {symbol}: {e}"));
            }
        };

        assemble(&self.normalizer, rows, limit, symbol, granularity).map_err(|e| {
            info!(symbol, granularity = %granularity, error = %e, "no series to serve");
            e.to_string()
        })
    }

    /// The newest `limit` candles of the series with every indicator line.
    pub async fn series_with_indicators(
        &self,
        symbol: &str,
        granularity: Granularity,
        limit: usize,
    ) -> KlineResponse {
        let series = match self.load_series(symbol, granularity, limit).await {
            Ok(series) => series,
            Err(message) => return KlineResponse::empty(message),
        };

        let indicators = compute_all(&series);
        debug!(symbol, granularity = %granularity, candles = series.len(), "indicators computed");

        KlineResponse {
            candles: series.candles().iter().map(|c| c.to_tuple()).collect(),
            indicators: IndicatorPayload::Computed(Box::new(indicators)),
            error: None,
        }
    }

    /// Price statistics over the newest `limit` candles.
    pub async fn statistics(
        &self,
        symbol: &str,
        granularity: Granularity,
        limit: usize,
    ) -> StatisticsResponse {
        let (statistics, error) = match self.load_series(symbol, granularity, limit).await {
            Ok(series) => (price_statistics(&series), None),
            Err(message) => (None, Some(message)),
        };

        StatisticsResponse {
            symbol: symbol.trim().to_uppercase(),
            granularity,
            statistics,
            error,
        }
    }

    /// Latest price of each symbol that has hourly data. Symbols without
    /// data are left out.
    pub async fn latest_prices(&self, symbols: &[String]) -> Vec<LatestPrice> {
        let mut prices = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let Ok(series) = self
                .load_series(symbol, Granularity::Hour, LATEST_PRICE_WINDOW)
                .await
            else {
                continue;
            };
            let Some(last) = series.candles().last() else {
                continue;
            };

            let cutoff = last.timestamp() - TimeDelta::hours(24);
            let change_24h = series
                .candles()
                .iter()
                .rev()
                .find(|c| c.timestamp() <= cutoff)
                .filter(|c| c.close() != 0.0)
                .map(|c| (last.close() / c.close() - 1.0) * 100.0);

            prices.push(LatestPrice {
                symbol: symbol.trim().to_uppercase(),
                price: last.close(),
                change_24h,
                timestamp: last.timestamp(),
            });
        }

        prices
    }

    /// Freshness of the newest stored candle against the clock's `now`.
    pub async fn freshness_report(&self, symbol: &str, granularity: Granularity) -> FreshnessReport {
        let now = self.clock.now();
        self.freshness_report_at(symbol, granularity, now).await
    }

    /// As [`Self::freshness_report`] with an explicit `now`, so a caller
    /// checking several granularities can share one instant.
    pub async fn freshness_report_at(
        &self,
        symbol: &str,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> FreshnessReport {
        let expected = self.normalizer.expected_latest(granularity, now);

        let latest = match self.source.latest_timestamp(symbol, granularity).await {
            Ok(latest) => latest,
            Err(e) => {
                error!(symbol, granularity = %granularity, error = %e, "latest timestamp lookup failed");
                None
            }
        };

        let Some(latest) = latest else {
            return FreshnessReport {
                symbol: symbol.to_string(),
                granularity,
                latest_timestamp: None,
                expected_timestamp: expected,
                lag_ms: None,
                freshness_minutes: None,
                is_fresh: false,
                quality_score: 0.0,
                status: FreshnessStatus::NoData,
            };
        };

        let (lag, is_fresh) = self.normalizer.freshness(latest, granularity, now);
        let score = self.normalizer.quality_score(latest, granularity, now);

        FreshnessReport {
            symbol: symbol.to_string(),
            granularity,
            latest_timestamp: Some(latest),
            expected_timestamp: expected,
            lag_ms: Some(lag.num_milliseconds()),
            freshness_minutes: Some(self.normalizer.freshness_minutes(latest, granularity, now)),
            is_fresh,
            quality_score: score,
            status: FreshnessStatus::from_score(score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Candle, InMemoryCandleStore, SeriesKey};
    use crate::timestamps::FixedClock;
    use chrono::TimeDelta;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn service_with(store: Arc<InMemoryCandleStore>, now: DateTime<Utc>) -> KlineService {
        KlineService::new(store, TimestampNormalizer::new(), Arc::new(FixedClock(now)))
    }

    fn flat_candle(ts: DateTime<Utc>) -> Candle {
        Candle::new(ts, 100.0, 100.0, 100.0, 100.0, 1.0).unwrap()
    }

    #[tokio::test]
    async fn empty_store_yields_empty_response() {
        let svc = service_with(Arc::new(InMemoryCandleStore::new(10)), Utc::now());
        let resp = svc.series_with_indicators("BTC", Granularity::Hour, 100).await;

        assert!(resp.candles.is_empty());
        assert!(resp.indicators.computed().is_none());
        assert_eq!(resp.error.as_deref(), Some("no hour data found for BTC"));

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["candles"], serde_json::json!([]));
        assert_eq!(json["indicators"], serde_json::json!({}));
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn series_with_indicators_is_aligned() {
        let store = Arc::new(InMemoryCandleStore::new(100));
        let key = SeriesKey::new("BTC", Granularity::Hour);
        let start = at("2024-03-01T00:00:00Z");
        for i in 0..30 {
            store.upsert(key.clone(), flat_candle(start + TimeDelta::hours(i)));
        }

        let svc = service_with(store, start + TimeDelta::hours(30));
        let resp = svc.series_with_indicators("btc", Granularity::Hour, 25).await;

        assert!(resp.error.is_none());
        assert_eq!(resp.candles.len(), 25);
        assert_eq!(resp.candles[0].0, (start + TimeDelta::hours(5)).timestamp_millis());
        let set = resp.indicators.computed().unwrap();
        for (name, line) in set.lines() {
            assert_eq!(line.len(), 25, "{name}");
        }
        assert_eq!(set.ma20[24], Some(100.0));

        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["candles"][0].as_array().unwrap().len(), 6);
        assert!(json["indicators"]["bollinger"]["upper"].is_array());
    }

    #[tokio::test]
    async fn recent_hourly_data_is_fresh() {
        let now = at("2024-03-01T12:05:00Z");
        let store = Arc::new(InMemoryCandleStore::new(10));
        store.upsert(SeriesKey::new("BTC", Granularity::Hour), flat_candle(now - TimeDelta::minutes(10)));

        let report = service_with(store, now).freshness_report("BTC", Granularity::Hour).await;
        assert!(report.is_fresh);
        assert_eq!(report.quality_score, 1.0);
        assert_eq!(report.status, FreshnessStatus::Healthy);
        assert_eq!(report.expected_timestamp, at("2024-03-01T12:00:00Z"));
    }

    #[tokio::test]
    async fn stale_hourly_data_scores_zero() {
        let now = at("2024-03-01T12:05:00Z");
        let store = Arc::new(InMemoryCandleStore::new(10));
        store.upsert(SeriesKey::new("BTC", Granularity::Hour), flat_candle(now - TimeDelta::minutes(40)));

        let report = service_with(store, now).freshness_report("BTC", Granularity::Hour).await;
        assert!(!report.is_fresh);
        assert_eq!(report.quality_score, 0.0);
        assert_eq!(report.status, FreshnessStatus::Critical);
        assert_eq!(report.lag_ms, Some(35 * 60_000));
    }

    #[tokio::test]
    async fn lag_between_thresholds_decays_linearly() {
        let now = at("2024-03-01T12:05:00Z");
        let store = Arc::new(InMemoryCandleStore::new(10));
        let key = SeriesKey::new("BTC", Granularity::Hour);

        // Lag of exactly 15 minutes is still fresh.
        store.upsert(key.clone(), flat_candle(at("2024-03-01T11:45:00Z")));
        let svc = service_with(store.clone(), now);
        let report = svc.freshness_report("BTC", Granularity::Hour).await;
        assert!(report.is_fresh);
        assert_eq!(report.freshness_minutes, Some(15.0));

        // 20 minutes: 1 - 20/30.
        let store = Arc::new(InMemoryCandleStore::new(10));
        store.upsert(key, flat_candle(at("2024-03-01T11:40:00Z")));
        let report = service_with(store, now).freshness_report("BTC", Granularity::Hour).await;
        assert!(!report.is_fresh);
        assert!((report.quality_score - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.status, FreshnessStatus::Critical);
    }

    #[tokio::test]
    async fn missing_series_is_no_data() {
        let svc = service_with(Arc::new(InMemoryCandleStore::new(10)), Utc::now());
        let report = svc.freshness_report("ETH", Granularity::Day).await;
        assert_eq!(report.status, FreshnessStatus::NoData);
        assert_eq!(report.quality_score, 0.0);
        assert!(report.latest_timestamp.is_none());
    }

    #[tokio::test]
    async fn statistics_over_stored_series() {
        let store = Arc::new(InMemoryCandleStore::new(100));
        let key = SeriesKey::new("BTC", Granularity::Hour);
        let start = at("2024-03-01T00:00:00Z");
        for (i, close) in [100.0, 110.0, 105.0].into_iter().enumerate() {
            let ts = start + TimeDelta::hours(i as i64);
            store.upsert(key.clone(), Candle::new(ts, close, close + 1.0, close - 1.0, close, 2.0).unwrap());
        }

        let resp = service_with(store, start + TimeDelta::hours(3))
            .statistics("btc", Granularity::Hour, 100)
            .await;
        assert_eq!(resp.symbol, "BTC");
        assert!(resp.error.is_none());
        let stats = resp.statistics.unwrap();
        assert_eq!(stats.current_price, 105.0);
        assert_eq!(stats.highest_price, 111.0);
        assert_eq!(stats.lowest_price, 99.0);
        assert_eq!(stats.total_volume, 6.0);
        assert_eq!(stats.data_points, 3);
    }

    #[tokio::test]
    async fn statistics_for_empty_series() {
        let svc = service_with(Arc::new(InMemoryCandleStore::new(10)), Utc::now());
        let resp = svc.statistics("ETH", Granularity::Day, 100).await;

        assert!(resp.statistics.is_none());
        assert_eq!(resp.error.as_deref(), Some("no day data found for ETH"));

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["symbol"], "ETH");
        assert_eq!(json["granularity"], "day");
        assert!(json["statistics"].is_null());
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn latest_prices_with_day_change() {
        let store = Arc::new(InMemoryCandleStore::new(100));
        let key = SeriesKey::new("BTC", Granularity::Hour);
        let start = at("2024-03-01T00:00:00Z");
        for i in 0..=24 {
            let close = if i == 24 { 110.0 } else { 100.0 };
            let ts = start + TimeDelta::hours(i);
            store.upsert(key.clone(), Candle::new(ts, close, close, close, close, 1.0).unwrap());
        }
        // Only two hours of ETH history: no 24h reference.
        let eth = SeriesKey::new("ETH", Granularity::Hour);
        store.upsert(eth.clone(), flat_candle(start + TimeDelta::hours(23)));
        store.upsert(eth, flat_candle(start + TimeDelta::hours(24)));

        let svc = service_with(store, start + TimeDelta::hours(25));
        let symbols = vec!["BTC".to_string(), "eth".to_string(), "SOL".to_string()];
        let prices = svc.latest_prices(&symbols).await;

        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].symbol, "BTC");
        assert_eq!(prices[0].price, 110.0);
        assert!((prices[0].change_24h.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(prices[0].timestamp, start + TimeDelta::hours(24));
        assert_eq!(prices[1].symbol, "ETH");
        assert_eq!(prices[1].change_24h, None);
    }
}

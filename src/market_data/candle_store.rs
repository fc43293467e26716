use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::{Candle, CandleRow, CandleSource};
use crate::types::Granularity;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub granularity: Granularity,
}

impl SeriesKey {
    /// Symbols are stored upper-case (`btc` and `BTC` are the same series).
    pub fn new(symbol: &str, granularity: Granularity) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            granularity,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.granularity)
    }
}

// ---------------------------------------------------------------------------
// InMemoryCandleStore -- thread-safe bounded store per (symbol, granularity)
// ---------------------------------------------------------------------------

/// Thread-safe store that keeps the most recent candles per
/// `(symbol, granularity)` pair, keyed by timestamp so each bucket holds at
/// most one candle. Re-ingesting a bucket replaces it in place; once a series
/// grows past `max_candles` the oldest buckets are dropped.
pub struct InMemoryCandleStore {
    series: RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Candle>>>,
    max_candles: usize,
}

impl InMemoryCandleStore {
    pub fn new(max_candles: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_candles: max_candles.max(1),
        }
    }

    /// Insert or replace the candle for its bucket.
    pub fn upsert(&self, key: SeriesKey, candle: Candle) {
        let mut map = self.series.write();
        let series = map.entry(key).or_default();
        series.insert(candle.timestamp(), candle);

        // Trim oldest past capacity.
        while series.len() > self.max_candles {
            series.pop_first();
        }
    }

    /// Upsert a batch under a single write lock. Returns the series length
    /// afterwards.
    pub fn upsert_many(&self, key: SeriesKey, candles: impl IntoIterator<Item = Candle>) -> usize {
        let mut map = self.series.write();
        let series = map.entry(key.clone()).or_default();
        for candle in candles {
            series.insert(candle.timestamp(), candle);
        }
        while series.len() > self.max_candles {
            series.pop_first();
        }
        debug!(key = %key, len = series.len(), "series updated");
        series.len()
    }

    /// The most recent `count` candles, oldest first.
    pub fn recent(&self, key: &SeriesKey, count: usize) -> Vec<Candle> {
        let map = self.series.read();
        match map.get(key) {
            Some(series) => {
                let start = series.len().saturating_sub(count);
                series.values().skip(start).copied().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn latest(&self, key: &SeriesKey) -> Option<DateTime<Utc>> {
        let map = self.series.read();
        map.get(key)
            .and_then(|series| series.last_key_value().map(|(ts, _)| *ts))
    }

    /// Number of candles stored for a key.
    pub fn count(&self, key: &SeriesKey) -> usize {
        let map = self.series.read();
        map.get(key).map_or(0, BTreeMap::len)
    }

    pub fn keys(&self) -> Vec<SeriesKey> {
        self.series.read().keys().cloned().collect()
    }
}

#[async_trait]
impl CandleSource for InMemoryCandleStore {
    fn name(&self) -> &str {
        "memory"
    }

    /// Newest first, the way a `ORDER BY date DESC LIMIT n` query returns
    /// them.
    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<CandleRow>> {
        let key = SeriesKey::new(symbol, granularity);
        let map = self.series.read();
        let rows = map
            .get(&key)
            .map(|series| series.values().rev().take(limit).map(Candle::to_row).collect())
            .unwrap_or_default();
        Ok(rows)
    }

    async fn latest_timestamp(
        &self,
        symbol: &str,
        granularity: Granularity,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.latest(&SeriesKey::new(symbol, granularity)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

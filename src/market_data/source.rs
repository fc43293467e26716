// =============================================================================
// Candle sources — the storage collaborator seen by the core
// =============================================================================
//
// The core never talks to storage directly. Anything that can hand back raw
// OHLCV rows for a (symbol, granularity) implements `CandleSource`; the
// in-memory store and the snapshot directory are two such sources, and
// `FallbackSource` chains them.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::market_data::CandleRow;
use crate::types::Granularity;

#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Up to `limit` of the most recent rows. Ordering is unspecified; the
    /// caller sorts.
    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<CandleRow>>;

    /// Timestamp of the newest stored row, if any.
    async fn latest_timestamp(
        &self,
        symbol: &str,
        granularity: Granularity,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// Tries `primary`, and `secondary` only when the primary yields nothing
/// (or fails).
pub struct FallbackSource {
    primary: Arc<dyn CandleSource>,
    secondary: Arc<dyn CandleSource>,
}

impl FallbackSource {
    pub fn new(primary: Arc<dyn CandleSource>, secondary: Arc<dyn CandleSource>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl CandleSource for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<CandleRow>> {
        match self.primary.fetch_candles(symbol, granularity, limit).await {
            Ok(rows) if !rows.is_empty() => return Ok(rows),
            Ok(_) => debug!(
                source = self.primary.name(),
                symbol,
                granularity = %granularity,
                "primary source empty, trying secondary"
            ),
            Err(e) => warn!(
                source = self.primary.name(),
                symbol,
                granularity = %granularity,
                error = %e,
                "primary source failed, trying secondary"
            ),
        }
        self.secondary.fetch_candles(symbol, granularity, limit).await
    }

    async fn latest_timestamp(
        &self,
        symbol: &str,
        granularity: Granularity,
    ) -> Result<Option<DateTime<Utc>>> {
        match self.primary.latest_timestamp(symbol, granularity).await {
            Ok(Some(ts)) => return Ok(Some(ts)),
            Ok(None) => {}
            Err(e) => warn!(
                source = self.primary.name(),
                symbol,
                error = %e,
                "primary source failed to report latest timestamp"
            ),
        }
        self.secondary.latest_timestamp(symbol, granularity).await
    }
}

// =============================================================================
// Central Application State — K-line service
// =============================================================================
//
// Ties the collaborators together: the in-memory candle store (primary
// source), the snapshot directory (fallback source and snapshot target), the
// query service layered on both, and the data quality monitor. Shared across
// the HTTP handlers and background tasks as `Arc<AppState>`.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the config, the last health report and the
//     per-series snapshot times.
//   - The candle store manages its own interior mutability.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::kline_service::KlineService;
use crate::market_data::{
    Candle, CandleRow, FallbackSource, InMemoryCandleStore, SeriesKey, SnapshotDirectory,
};
use crate::monitor::{DataQualityMonitor, HealthReport};
use crate::runtime_config::RuntimeConfig;
use crate::timestamps::{Clock, SystemClock, TimestampNormalizer};
use crate::types::Granularity;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every ingest so clients can tell when data moved.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Market Data ─────────────────────────────────────────────────────
    pub candle_store: Arc<InMemoryCandleStore>,
    pub snapshots: Arc<SnapshotDirectory>,
    /// When each series was last written to disk.
    last_snapshot: RwLock<HashMap<SeriesKey, DateTime<Utc>>>,

    // ── Query & Monitoring ──────────────────────────────────────────────
    pub kline_service: Arc<KlineService>,
    pub quality_monitor: Arc<DataQualityMonitor>,
    pub last_health_report: RwLock<Option<HealthReport>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the service was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` on the system clock.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Construct with an explicit clock (tests pin `now`).
    pub fn with_clock(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        let normalizer = TimestampNormalizer::new();

        let candle_store = Arc::new(InMemoryCandleStore::new(config.max_candles_per_series));
        let snapshots = Arc::new(SnapshotDirectory::new(
            config.snapshot_dir.clone(),
            normalizer.clone(),
            config.snapshot_retention,
        ));
        let source = Arc::new(FallbackSource::new(candle_store.clone(), snapshots.clone()));

        let kline_service = Arc::new(KlineService::new(source, normalizer, clock));
        let quality_monitor = Arc::new(DataQualityMonitor::new(
            kline_service.clone(),
            config.gap_check_depth,
        ));

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            candle_store,
            snapshots,
            last_snapshot: RwLock::new(HashMap::new()),
            kline_service,
            quality_monitor,
            last_health_report: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Ingest ──────────────────────────────────────────────────────────

    /// Validate and store a batch of rows. All-or-nothing: the first bad
    /// timestamp or candle rejects the batch. Returns the series length
    /// afterwards.
    pub fn ingest(
        &self,
        symbol: &str,
        granularity: Granularity,
        rows: Vec<CandleRow>,
    ) -> Result<usize, CoreError> {
        let normalizer = self.kline_service.normalizer();
        let candles = rows
            .into_iter()
            .map(|row| {
                let ts = normalizer.normalize(&row.timestamp)?;
                Candle::new(ts, row.open, row.high, row.low, row.close, row.volume)
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let accepted = candles.len();
        let key = SeriesKey::new(symbol, granularity);
        let len = self.candle_store.upsert_many(key.clone(), candles);
        self.increment_version();

        info!(key = %key, accepted, len, "candles ingested");
        Ok(len)
    }

    // ── Health report ───────────────────────────────────────────────────

    pub fn record_health_report(&self, report: HealthReport) {
        *self.last_health_report.write() = Some(report);
    }

    pub fn latest_health_report(&self) -> Option<HealthReport> {
        self.last_health_report.read().clone()
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    /// Write one snapshot per series held in memory. A series is skipped
    /// while its granularity's poll interval has not elapsed since its last
    /// write, unless `force` is set. Returns the number of files written.
    pub async fn write_snapshots(&self, now: DateTime<Utc>, force: bool) -> Result<usize> {
        let depth = self.runtime_config.read().max_candles_per_series;
        let mut keys = self.candle_store.keys();
        keys.sort_by(|a, b| a.to_string().cmp(&b.to_string()));

        let mut written = 0;
        for key in keys {
            let last = self.last_snapshot.read().get(&key).copied();
            let due = self
                .kline_service
                .normalizer()
                .should_request_new_data(last, key.granularity, now);
            if !force && !due {
                debug!(key = %key, "snapshot not due");
                continue;
            }

            let candles = self.candle_store.recent(&key, depth);
            if candles.is_empty() {
                continue;
            }
            self.snapshots.save(&key.symbol, key.granularity, &candles, now).await?;
            self.last_snapshot.write().insert(key, now);
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamps::{FixedClock, TimestampInput};

    fn row(ts: &str, close: f64) -> CandleRow {
        CandleRow {
            timestamp: TimestampInput::from(ts),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            snapshot_dir: std::env::temp_dir()
                .join(format!("kline-state-{}", uuid::Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn ingest_stores_and_bumps_version() {
        let state = AppState::new(test_config());
        let before = state.current_state_version();

        let len = state
            .ingest(
                "btc",
                Granularity::Hour,
                vec![row("2024-03-01T00:00:00Z", 1.0), row("2024-03-01 01:00:00", 2.0)],
            )
            .unwrap();

        assert_eq!(len, 2);
        assert_eq!(state.current_state_version(), before + 1);
        assert_eq!(state.candle_store.count(&SeriesKey::new("BTC", Granularity::Hour)), 2);
    }

    #[test]
    fn ingest_rejects_whole_batch_on_bad_row() {
        let state = AppState::new(test_config());
        let err = state
            .ingest(
                "BTC",
                Granularity::Hour,
                vec![row("2024-03-01T00:00:00Z", 1.0), row("sometime", 2.0)],
            )
            .unwrap_err();

        assert!(matches!(err, CoreError::Parse { .. }));
        assert_eq!(state.candle_store.count(&SeriesKey::new("BTC", Granularity::Hour)), 0);
    }

    #[tokio::test]
    async fn snapshots_feed_the_fallback_source() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let config = test_config();
        let dir = config.snapshot_dir.clone();

        let writer = AppState::with_clock(config.clone(), Arc::new(FixedClock(now)));
        writer
            .ingest("BTC", Granularity::Hour, vec![row("2024-03-01T01:00:00Z", 5.0)])
            .unwrap();
        assert_eq!(writer.write_snapshots(now, false).await.unwrap(), 1);

        // A fresh state has an empty store and falls back to the snapshot.
        let reader = AppState::with_clock(config, Arc::new(FixedClock(now)));
        let rows = reader
            .kline_service
            .source()
            .fetch_candles("BTC", Granularity::Hour, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 5.0);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn snapshots_cover_every_ingested_symbol_when_due() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let config = RuntimeConfig {
            symbols: vec!["BTC".into()],
            ..test_config()
        };
        let dir = config.snapshot_dir.clone();
        let state = AppState::with_clock(config, Arc::new(FixedClock(start)));

        state
            .ingest("BTC", Granularity::Hour, vec![row("2024-03-01T01:00:00Z", 5.0)])
            .unwrap();
        state
            .ingest("DOGE", Granularity::Day, vec![row("2024-02-29", 0.1)])
            .unwrap();

        // DOGE is not a configured symbol but is still written.
        assert_eq!(state.write_snapshots(start, false).await.unwrap(), 2);

        // Ten minutes on: hour (5 min) is due again, day (1 h) is not.
        let later = start + chrono::TimeDelta::minutes(10);
        assert_eq!(state.write_snapshots(later, false).await.unwrap(), 1);

        // A forced write ignores the interval.
        assert_eq!(state.write_snapshots(later, true).await.unwrap(), 2);

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("DOGE_day_kline_")));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn health_report_slot_starts_empty() {
        let state = AppState::new(test_config());
        assert!(state.latest_health_report().is_none());
    }
}

// =============================================================================
// Snapshot directory — JSON K-line snapshots on disk
// =============================================================================
//
// File layout: `{SYMBOL}_{granularity}_kline_{YYYYmmdd_HHMMSS}.json`
//
// ```json
// { "symbol": "BTC", "timeframe": "hour", "timestamp": "20240301_120000",
//   "data_count": 2,
//   "kline_data": [ { "timestamp_ms": 1709290800000, "date": "...",
//                     "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0,
//                     "volume": 1.0 },
//                   [1709294400000, 1.0, 1.0, 1.0, 1.0, 1.0] ] }
// ```
//
// Entries may be objects (with `timestamp_ms` or a `date` string) or bare
// arrays. The newest file (by name) wins; malformed entries are skipped.
// Writes go to a `.tmp` sibling first and are renamed into place, after which
// only the newest `retention` files of the series are kept.
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::market_data::{Candle, CandleRow, CandleSource};
use crate::timestamps::{TimestampInput, TimestampNormalizer};
use crate::types::Granularity;

/// Format of the `{timestamp}` part of a snapshot file name.
const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    timeframe: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    data_count: usize,
    #[serde(default)]
    kline_data: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotEntry {
    Tuple(i64, f64, f64, f64, f64, f64),
    Record(SnapshotRecord),
}

impl SnapshotEntry {
    fn into_row(self) -> Option<CandleRow> {
        match self {
            Self::Tuple(ms, open, high, low, close, volume) => Some(CandleRow {
                timestamp: TimestampInput::EpochMillis(ms),
                open,
                high,
                low,
                close,
                volume,
            }),
            Self::Record(r) => {
                let timestamp = match (r.timestamp_ms, r.date) {
                    (Some(ms), _) => TimestampInput::EpochMillis(ms),
                    (None, Some(date)) => TimestampInput::Text(date),
                    (None, None) => return None,
                };
                Some(CandleRow {
                    timestamp,
                    open: r.open,
                    high: r.high,
                    low: r.low,
                    close: r.close,
                    volume: r.volume,
                })
            }
        }
    }
}

/// A directory of K-line snapshot files, usable as a read-only fallback
/// source and as the target of periodic snapshot writes.
pub struct SnapshotDirectory {
    dir: PathBuf,
    normalizer: TimestampNormalizer,
    /// Files kept per series after a save (at least one).
    retention: usize,
}

impl SnapshotDirectory {
    pub fn new(dir: impl Into<PathBuf>, normalizer: TimestampNormalizer, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            normalizer,
            retention: retention.max(1),
        }
    }

    fn file_prefix(symbol: &str, granularity: Granularity) -> String {
        format!("{}_{}_kline_", symbol.trim().to_uppercase(), granularity)
    }

    /// Names of the series' snapshot files, oldest first.
    async fn series_files(&self, symbol: &str, granularity: Granularity) -> Result<Vec<String>> {
        let prefix = Self::file_prefix(symbol, granularity);

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", self.dir.display()))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of the newest snapshot for the series, if any.
    async fn latest_file(&self, symbol: &str, granularity: Granularity) -> Result<Option<PathBuf>> {
        let names = self.series_files(symbol, granularity).await?;
        Ok(names.last().map(|n| self.dir.join(n)))
    }

    /// Delete all but the newest `retention` files of the series. Returns the
    /// number removed.
    async fn prune(&self, symbol: &str, granularity: Granularity) -> Result<usize> {
        let names = self.series_files(symbol, granularity).await?;
        let excess = names.len().saturating_sub(self.retention);

        for name in &names[..excess] {
            let path = self.dir.join(name);
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        if excess > 0 {
            debug!(symbol, granularity = %granularity, removed = excess, "old snapshots pruned");
        }
        Ok(excess)
    }

    /// All well-formed candles of the newest snapshot, ascending by time.
    async fn load(&self, symbol: &str, granularity: Granularity) -> Result<Vec<Candle>> {
        let Some(path) = self.latest_file(symbol, granularity).await? else {
            return Ok(Vec::new());
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let file: SnapshotFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;

        let mut candles = Vec::with_capacity(file.kline_data.len());
        for (idx, value) in file.kline_data.into_iter().enumerate() {
            match self.entry_to_candle(value) {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!(path = %path.display(), index = idx, error = %e, "skipping snapshot entry"),
            }
        }
        candles.sort_by_key(Candle::timestamp);

        debug!(path = %path.display(), count = candles.len(), "snapshot loaded");
        Ok(candles)
    }

    fn entry_to_candle(&self, value: serde_json::Value) -> Result<Candle> {
        let entry: SnapshotEntry = serde_json::from_value(value).context("unrecognised entry shape")?;
        let row = entry.into_row().context("entry has no timestamp")?;
        let ts = self.normalizer.normalize(&row.timestamp)?;
        Ok(Candle::new(ts, row.open, row.high, row.low, row.close, row.volume)?)
    }

    /// Write `candles` as a new snapshot file stamped with `now`. Returns the
    /// path written.
    pub async fn save(
        &self,
        symbol: &str,
        granularity: Granularity,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let stamp = now.format(FILE_STAMP_FORMAT).to_string();
        let path = self
            .dir
            .join(format!("{}{}.json", Self::file_prefix(symbol, granularity), stamp));

        let kline_data = candles
            .iter()
            .map(|c| {
                serde_json::to_value(SnapshotRecord {
                    timestamp_ms: Some(c.timestamp().timestamp_millis()),
                    date: Some(self.normalizer.format_for_api(c.timestamp())),
                    open: c.open(),
                    high: c.high(),
                    low: c.low(),
                    close: c.close(),
                    volume: c.volume(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("failed to serialise snapshot entries")?;

        let file = SnapshotFile {
            symbol: symbol.trim().to_uppercase(),
            timeframe: granularity.to_string(),
            timestamp: stamp,
            data_count: candles.len(),
            kline_data,
        };
        let content = serde_json::to_string_pretty(&file).context("failed to serialise snapshot")?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to rename snapshot to {}", path.display()))?;

        info!(path = %path.display(), count = candles.len(), "snapshot saved");

        self.prune(symbol, granularity).await?;
        Ok(path)
    }
}

#[async_trait]
impl CandleSource for SnapshotDirectory {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<CandleRow>> {
        let candles = self.load(symbol, granularity).await?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].iter().map(Candle::to_row).collect())
    }

    async fn latest_timestamp(
        &self,
        symbol: &str,
        granularity: Granularity,
    ) -> Result<Option<DateTime<Utc>>> {
        let candles = self.load(symbol, granularity).await?;
        Ok(candles.last().map(Candle::timestamp))
    }
}

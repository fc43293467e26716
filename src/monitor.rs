// =============================================================================
// Data Quality Monitor — freshness, gaps and an overall health verdict
// =============================================================================
//
// For one symbol, checks every granularity for:
//
//   * freshness  — the service's `FreshnessReport` at a shared `now`
//   * gaps       — among the most recent `depth` candles, how many
//                  consecutive intervals exceed 1.5 × the bucket size
//
// Overall status: critical if any granularity is critical, else warning if
// any is warning, else healthy if any is healthy, else unknown (no data at
// all). Gap rates are reported but do not move the overall status.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::kline_service::{FreshnessReport, KlineService};
use crate::types::{FreshnessStatus, Granularity, HealthStatus};

/// A gap is an interval longer than this multiple of the bucket size.
const GAP_TOLERANCE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Checked,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapReport {
    pub granularity: Granularity,
    pub status: GapStatus,
    pub total_checked: usize,
    pub gaps_found: usize,
    pub gap_rate: f64,
}

impl GapReport {
    fn insufficient(granularity: Granularity) -> Self {
        Self {
            granularity,
            status: GapStatus::InsufficientData,
            total_checked: 0,
            gaps_found: 0,
            gap_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub freshness: Vec<FreshnessReport>,
    pub gaps: Vec<GapReport>,
    pub overall_status: HealthStatus,
}

pub struct DataQualityMonitor {
    service: Arc<KlineService>,
    gap_check_depth: usize,
}

impl DataQualityMonitor {
    pub fn new(service: Arc<KlineService>, gap_check_depth: usize) -> Self {
        Self {
            service,
            gap_check_depth: gap_check_depth.max(2),
        }
    }

    /// One freshness report per granularity, all evaluated at `now`.
    pub async fn check_freshness(&self, symbol: &str, now: DateTime<Utc>) -> Vec<FreshnessReport> {
        let mut reports = Vec::with_capacity(Granularity::ALL.len());
        for granularity in Granularity::ALL {
            let report = self.service.freshness_report_at(symbol, granularity, now).await;
            match report.status {
                FreshnessStatus::NoData => warn!(symbol, granularity = %granularity, "no data"),
                status => info!(
                    symbol,
                    granularity = %granularity,
                    status = %status,
                    lag_minutes = report.freshness_minutes.unwrap_or_default(),
                    quality_score = report.quality_score,
                    "freshness checked"
                ),
            }
            reports.push(report);
        }
        reports
    }

    /// Gap statistics over the most recent candles of every granularity.
    pub async fn check_gaps(&self, symbol: &str) -> Vec<GapReport> {
        let mut reports = Vec::with_capacity(Granularity::ALL.len());
        for granularity in Granularity::ALL {
            let timestamps = self.recent_timestamps(symbol, granularity).await;
            let report = gap_report(granularity, &timestamps);
            if report.status == GapStatus::InsufficientData {
                warn!(symbol, granularity = %granularity, "insufficient data for gap check");
            } else {
                info!(
                    symbol,
                    granularity = %granularity,
                    gaps = report.gaps_found,
                    checked = report.total_checked,
                    gap_rate = report.gap_rate,
                    "gap check"
                );
            }
            reports.push(report);
        }
        reports
    }

    /// Freshness and gaps for `symbol` with an overall verdict. `now` is read
    /// once from the service clock.
    pub async fn health_report(&self, symbol: &str) -> HealthReport {
        let now = self.service.now();
        let freshness = self.check_freshness(symbol, now).await;
        let gaps = self.check_gaps(symbol).await;
        let overall_status = overall_status(&freshness);

        info!(symbol, overall = %overall_status, "health report generated");

        HealthReport {
            symbol: symbol.to_string(),
            generated_at: now,
            freshness,
            gaps,
            overall_status,
        }
    }

    /// Normalised timestamps of the newest `gap_check_depth` candles,
    /// ascending. Unreadable rows are dropped.
    async fn recent_timestamps(&self, symbol: &str, granularity: Granularity) -> Vec<DateTime<Utc>> {
        let rows = match self
            .service
            .source()
            .fetch_candles(symbol, granularity, self.gap_check_depth)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol, granularity = %granularity, error = %e, "gap check fetch failed");
                return Vec::new();
            }
        };

        let normalizer = self.service.normalizer();
        let mut timestamps: Vec<DateTime<Utc>> = rows
            .iter()
            .filter_map(|row| normalizer.normalize(&row.timestamp).ok())
            .collect();
        timestamps.sort();
        let start = timestamps.len().saturating_sub(self.gap_check_depth);
        timestamps.split_off(start)
    }
}

/// Count intervals between consecutive (ascending) timestamps that exceed
/// the tolerated bucket width.
pub fn gap_report(granularity: Granularity, timestamps: &[DateTime<Utc>]) -> GapReport {
    if timestamps.len() < 2 {
        return GapReport::insufficient(granularity);
    }

    let bucket_ms = granularity.bucket().num_milliseconds() as f64;
    let limit = TimeDelta::milliseconds((bucket_ms * GAP_TOLERANCE) as i64);

    let total_checked = timestamps.len() - 1;
    let gaps_found = timestamps
        .windows(2)
        .filter(|pair| pair[1] - pair[0] > limit)
        .count();

    GapReport {
        granularity,
        status: GapStatus::Checked,
        total_checked,
        gaps_found,
        gap_rate: gaps_found as f64 / total_checked as f64,
    }
}

/// Worst freshness status across granularities.
pub fn overall_status(freshness: &[FreshnessReport]) -> HealthStatus {
    let has = |status: FreshnessStatus| freshness.iter().any(|r| r.status == status);

    if has(FreshnessStatus::Critical) {
        HealthStatus::Critical
    } else if has(FreshnessStatus::Warning) {
        HealthStatus::Warning
    } else if has(FreshnessStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unknown
    }
}

// =============================================================================
// K-line Backend — Main Entry Point
// =============================================================================
//
// Serves K-line series with technical indicators, data-freshness reports and
// data-quality health reports. Candles arrive through the authenticated
// ingest endpoint and are kept in memory; periodic JSON snapshots on disk act
// as the fallback source when memory has nothing for a series.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod error;
mod indicators;
mod kline_service;
mod market_data;
mod monitor;
mod runtime_config;
mod series;
mod statistics;
mod timestamps;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::{RuntimeConfig, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("K-line backend starting up");

    let config_path =
        std::env::var("KLINE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    if config.admin_token.is_none() {
        warn!("KLINE_ADMIN_TOKEN not set, candle ingest is disabled");
    }
    info!(
        symbols = ?config.symbols,
        snapshot_dir = %config.snapshot_dir,
        "Configured series"
    );

    let bind_addr = config.bind_addr.clone();
    let monitor_interval = config.monitor_interval_secs.max(1);
    let snapshot_interval = config.snapshot_interval_secs;
    let monitor_symbol = config.monitor_symbol.clone();

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));

    // ── 3. Data quality monitor loop ─────────────────────────────────────
    let monitor_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(monitor_interval));
        loop {
            interval.tick().await;
            let report = monitor_state
                .quality_monitor
                .health_report(&monitor_symbol)
                .await;
            monitor_state.record_health_report(report);
        }
    });

    // ── 4. Snapshot loop ─────────────────────────────────────────────────
    if snapshot_interval > 0 {
        let snap_state = state.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(snapshot_interval));
            // The first tick fires immediately; nothing has been ingested yet.
            interval.tick().await;
            loop {
                interval.tick().await;
                let now = snap_state.kline_service.now();
                match snap_state.write_snapshots(now, false).await {
                    Ok(written) => info!(written, "Snapshots written"),
                    Err(e) => error!(error = %e, "Snapshot write failed"),
                }
            }
        });
    } else {
        info!("Snapshots disabled");
    }

    // ── 5. API server with graceful shutdown ─────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await
        .context("API server failed")?;

    // ── 6. Final snapshot ────────────────────────────────────────────────
    if snapshot_interval > 0 {
        if let Err(e) = state.write_snapshots(state.kline_service.now(), true).await {
            error!(error = %e, "Failed to write snapshots on shutdown");
        }
    }

    info!("K-line backend shut down complete.");
    Ok(())
}

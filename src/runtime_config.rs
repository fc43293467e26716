// =============================================================================
// Runtime Configuration — service settings loaded at startup
// =============================================================================
//
// Every tunable of the K-line service lives here. The file is JSON and every
// field carries a serde default, so a partial (or empty) file still loads and
// an older file never breaks after a field is added.
//
// Environment variables take precedence over the file:
//
//   KLINE_BIND_ADDR     listen address
//   KLINE_SYMBOLS       comma-separated symbol list
//   KLINE_SNAPSHOT_DIR  snapshot directory
//   KLINE_ADMIN_TOKEN   bearer token for the ingest endpoint
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default config file name, overridable with `KLINE_CONFIG`.
pub const DEFAULT_CONFIG_PATH: &str = "kline_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string()]
}

fn default_limit() -> usize {
    100
}

fn default_max_limit() -> usize {
    1000
}

fn default_max_candles_per_series() -> usize {
    5000
}

fn default_snapshot_dir() -> String {
    "data/kline_data".to_string()
}

fn default_snapshot_interval_secs() -> u64 {
    300
}

fn default_snapshot_retention() -> usize {
    24
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_monitor_symbol() -> String {
    "BTC".to_string()
}

fn default_gap_check_depth() -> usize {
    10
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Server ---------------------------------------------------------------

    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Bearer token required by `POST /api/v1/klines`. Ingest is refused
    /// while unset. Never written back out.
    #[serde(default, skip_serializing)]
    pub admin_token: Option<String>,

    // --- Series -----------------------------------------------------------------

    /// Symbols listed by `GET /api/v1/latest-prices`.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Candles served when a query gives no `limit`.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound on the `limit` query parameter.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Candles retained in memory per (symbol, granularity).
    #[serde(default = "default_max_candles_per_series")]
    pub max_candles_per_series: usize,

    // --- Snapshots ----------------------------------------------------------------

    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    /// Seconds between snapshot writes; 0 disables them.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Snapshot files kept per series; older ones are deleted after a save.
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention: usize,

    // --- Data quality monitor -----------------------------------------------------

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_monitor_symbol")]
    pub monitor_symbol: String,

    /// Number of recent candles inspected by the gap check.
    #[serde(default = "default_gap_check_depth")]
    pub gap_check_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_token: None,
            symbols: default_symbols(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            max_candles_per_series: default_max_candles_per_series(),
            snapshot_dir: default_snapshot_dir(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            snapshot_retention: default_snapshot_retention(),
            monitor_interval_secs: default_monitor_interval_secs(),
            monitor_symbol: default_monitor_symbol(),
            gap_check_depth: default_gap_check_depth(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            bind_addr = %config.bind_addr,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `KLINE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(addr) = get("KLINE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(syms) = get("KLINE_SYMBOLS") {
            let symbols: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                self.symbols = symbols;
            }
        }
        if let Some(dir) = get("KLINE_SNAPSHOT_DIR") {
            self.snapshot_dir = dir;
        }
        if let Some(token) = get("KLINE_ADMIN_TOKEN") {
            self.admin_token = Some(token);
        }
    }

    /// Resolve a requested `limit` against the configured default and cap.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols, vec!["BTC"]);
        assert_eq!(cfg.default_limit, 100);
        assert_eq!(cfg.max_limit, 1000);
        assert_eq!(cfg.snapshot_dir, "data/kline_data");
        assert_eq!(cfg.snapshot_interval_secs, 300);
        assert_eq!(cfg.snapshot_retention, 24);
        assert_eq!(cfg.monitor_interval_secs, 60);
        assert_eq!(cfg.gap_check_depth, 10);
        assert!(cfg.admin_token.is_none());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.monitor_symbol, "BTC");
        assert_eq!(cfg.max_candles_per_series, 5000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETH", "SOL"], "snapshot_interval_secs": 0 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETH", "SOL"]);
        assert_eq!(cfg.snapshot_interval_secs, 0);
        assert_eq!(cfg.snapshot_retention, 24);
        assert_eq!(cfg.default_limit, 100);
    }

    #[test]
    fn admin_token_is_not_serialised() {
        let cfg = RuntimeConfig {
            admin_token: Some("secret".into()),
            ..RuntimeConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("KLINE_BIND_ADDR", "127.0.0.1:9000"),
            ("KLINE_SYMBOLS", " btc, eth ,,"),
            ("KLINE_ADMIN_TOKEN", "t0ken"),
            ("KLINE_SNAPSHOT_DIR", "   "),
        ]
        .into_iter()
        .collect();

        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.symbols, vec!["BTC", "ETH"]);
        assert_eq!(cfg.admin_token.as_deref(), Some("t0ken"));
        assert_eq!(cfg.snapshot_dir, "data/kline_data");
    }

    #[test]
    fn limit_is_clamped() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.clamp_limit(None), 100);
        assert_eq!(cfg.clamp_limit(Some(0)), 1);
        assert_eq!(cfg.clamp_limit(Some(50_000)), 1000);
        assert_eq!(cfg.clamp_limit(Some(250)), 250);
    }

    #[test]
    fn load_missing_file_is_error() {
        assert!(RuntimeConfig::load("/definitely/not/here/kline_config.json").is_err());
    }
}

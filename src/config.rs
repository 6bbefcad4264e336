//! Application configuration.
//!
//! Loaded from a TOML file; missing file means defaults are written back so
//! the operator has something to edit. The scheduler trigger list is kept
//! as a JSON array inside the `[schedule]` section, matching the persisted
//! format the GUI shell edits.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "keirin-config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Worker pool size for stages 4 and 5.
    pub max_workers: usize,
    /// Worker pool size for stage 3; the race-detail endpoint is the most
    /// sensitive upstream so this defaults low.
    pub step3_max_workers: usize,
    /// Minimum seconds between provider W requests per endpoint class.
    pub rate_limit_winticket: f64,
    /// Minimum seconds between provider Y HTML page fetches.
    pub rate_limit_yenjoy_html: f64,
    /// Minimum seconds between provider Y calendar index probes.
    pub rate_limit_yenjoy_api: f64,
    /// Rows per batched store write.
    pub saver_batch_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            step3_max_workers: 1,
            rate_limit_winticket: 1.0,
            rate_limit_yenjoy_html: 2.0,
            rate_limit_yenjoy_api: 1.0,
            saver_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    /// Maximum fetch attempts for transient failures.
    pub retry_count: u32,
    /// Base of the exponential backoff, in seconds.
    pub retry_delay: f64,
    /// Upper bound for a single backoff sleep, in seconds.
    pub max_retry_delay: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: 30,
            retry_count: 3,
            retry_delay: 2.0,
            max_retry_delay: 60.0,
        }
    }
}

/// One wall-clock trigger: fire `steps` at `time` (local `HH:MM`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    pub time: String,
    pub steps: Vec<u8>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    /// JSON array of [`ScheduleTrigger`]. Kept as a string so the on-disk
    /// format matches what the configuration UI reads and writes.
    pub schedule_list: String,
}

impl ScheduleConfig {
    pub fn triggers(&self) -> Vec<ScheduleTrigger> {
        if self.schedule_list.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str(&self.schedule_list) {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed schedule_list");
                Vec::new()
            }
        }
    }

    pub fn set_triggers(&mut self, triggers: &[ScheduleTrigger]) -> Result<()> {
        self.schedule_list =
            serde_json::to_string(triggers).context("Failed to encode schedule list")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub performance: PerformanceConfig,
    pub api: ApiConfig,
    pub schedule: ScheduleConfig,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the config file, writing defaults when it does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let mut cfg: AppConfig = toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            cfg.path = Some(path.to_path_buf());
            info!(path = %path.display(), "Loaded configuration");
            Ok(cfg)
        } else {
            let mut cfg = AppConfig::default();
            cfg.path = Some(path.to_path_buf());
            cfg.save()?;
            info!(path = %path.display(), "Wrote default configuration");
            Ok(cfg)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let raw = toml::to_string_pretty(self).context("Failed to encode config")?;
        std::fs::write(&path, raw)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }
}

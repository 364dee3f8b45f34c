use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::recorder::TouchThresholds;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Pause after interactive steps before the screen is validated (ms)
    pub settle_delay_ms: u64,

    /// Allowed mismatch ratio for per-step reference validation
    pub step_screenshot_threshold: f64,

    /// Allowed mismatch ratio for `screenMatches` assertions
    pub assert_screenshot_threshold: f64,

    /// Per-channel difference under which two pixels count as equal
    pub pixel_tolerance: u8,

    pub companion_timeout_ms: u64,
    pub command_timeout_ms: u64,

    /// Execution records kept per test
    pub history_limit: usize,

    pub verification_caching: bool,
    pub cache_ttl_secs: Option<u64>,
    pub cache_sweep_interval_secs: u64,

    pub stop_on_first_failure: bool,
    pub output_dir: PathBuf,

    // Touch gesture classification
    pub tap_max_duration_ms: u64,
    pub tap_max_distance_px: f64,
    pub double_tap_window_ms: u64,
    pub swipe_min_distance_px: f64,
    pub swipe_min_duration_ms: u64,
    pub swipe_max_duration_ms: u64,

    pub gesture_queue_capacity: usize,

    /// Gaps between recorded gestures at least this long become `wait` steps
    pub record_min_wait_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let touch = TouchThresholds::default();
        Self {
            settle_delay_ms: 500,
            step_screenshot_threshold: 0.1,
            assert_screenshot_threshold: 0.1,
            pixel_tolerance: 16,
            companion_timeout_ms: 5000,
            command_timeout_ms: 30000,
            history_limit: 20,
            verification_caching: true,
            cache_ttl_secs: None,
            cache_sweep_interval_secs: 60,
            stop_on_first_failure: true,
            output_dir: PathBuf::from("./output"),
            tap_max_duration_ms: touch.tap_max_duration_ms,
            tap_max_distance_px: touch.tap_max_distance_px,
            double_tap_window_ms: touch.double_tap_window_ms,
            swipe_min_distance_px: touch.swipe_min_distance_px,
            swipe_min_duration_ms: touch.swipe_min_duration_ms,
            swipe_max_duration_ms: touch.swipe_max_duration_ms,
            gesture_queue_capacity: 64,
            record_min_wait_ms: Some(1000),
        }
    }
}

impl Config {
    /// Read a YAML config file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Override keys from `LUMI_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(std::env::vars().filter(|(k, _)| k.starts_with("LUMI_")))
    }

    fn apply_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<()> {
        for (key, value) in vars {
            match key.as_str() {
                "LUMI_OUTPUT_DIR" => self.output_dir = PathBuf::from(value),
                "LUMI_SETTLE_DELAY_MS" => self.settle_delay_ms = parse_var(&key, &value)?,
                "LUMI_COMMAND_TIMEOUT_MS" => self.command_timeout_ms = parse_var(&key, &value)?,
                "LUMI_COMPANION_TIMEOUT_MS" => {
                    self.companion_timeout_ms = parse_var(&key, &value)?
                }
                "LUMI_CACHE_TTL_SECS" => self.cache_ttl_secs = Some(parse_var(&key, &value)?),
                "LUMI_VERIFICATION_CACHING" => {
                    self.verification_caching = parse_var(&key, &value)?
                }
                "LUMI_STOP_ON_FIRST_FAILURE" => {
                    self.stop_on_first_failure = parse_var(&key, &value)?
                }
                "LUMI_HISTORY_LIMIT" => self.history_limit = parse_var(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn touch_thresholds(&self) -> TouchThresholds {
        TouchThresholds {
            tap_max_duration_ms: self.tap_max_duration_ms,
            tap_max_distance_px: self.tap_max_distance_px,
            double_tap_window_ms: self.double_tap_window_ms,
            swipe_min_distance_px: self.swipe_min_distance_px,
            swipe_min_duration_ms: self.swipe_min_duration_ms,
            swipe_max_duration_ms: self.swipe_max_duration_ms,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("Invalid value for {}: '{}'", key, value)))
}

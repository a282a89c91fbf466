use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OUTPUT_DIR: &str = "generated_images";
pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";

const MAX_HTTP_TIMEOUT_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory generated artifacts are written to; created on demand.
    pub output_dir: PathBuf,
    pub api_base: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(120),
            http_timeout: Duration::from_secs(90),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `FLUXGEN_*` and `REPLICATE_API_BASE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            output_dir: non_empty_env("FLUXGEN_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            api_base: non_empty_env("REPLICATE_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            poll_interval: seconds_env("FLUXGEN_POLL_INTERVAL")
                .map(clamp_poll_interval)
                .unwrap_or(defaults.poll_interval),
            poll_timeout: seconds_env("FLUXGEN_POLL_TIMEOUT")
                .map(clamp_poll_timeout)
                .unwrap_or(defaults.poll_timeout),
            http_timeout: seconds_env("FLUXGEN_HTTP_TIMEOUT")
                .and_then(http_timeout)
                .unwrap_or(defaults.http_timeout),
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll(mut self, interval_s: f64, timeout_s: f64) -> Self {
        self.poll_interval = clamp_poll_interval(interval_s);
        self.poll_timeout = clamp_poll_timeout(timeout_s);
        self
    }
}

/// Token from `REPLICATE_API_TOKEN`, falling back to `REPLICATE_API_KEY`.
pub fn api_token_from_env() -> Option<String> {
    non_empty_env("REPLICATE_API_TOKEN").or_else(|| non_empty_env("REPLICATE_API_KEY"))
}

fn clamp_poll_interval(seconds: f64) -> Duration {
    Duration::from_secs_f64(finite_or(seconds, 1.0).clamp(0.2, 5.0))
}

fn clamp_poll_timeout(seconds: f64) -> Duration {
    Duration::from_secs_f64(finite_or(seconds, 120.0).clamp(10.0, 600.0))
}

/// Positive, finite and at most one day; anything else keeps the default.
fn http_timeout(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds.min(MAX_HTTP_TIMEOUT_SECS)).ok()
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn seconds_env(key: &str) -> Option<f64> {
    non_empty_env(key).and_then(|value| value.parse::<f64>().ok())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

//! Configuration management for the quota service.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{QuotaError, Result};
use crate::ratelimit::{
    LimiterSettings, RateLimiter, RateLimiterBackend, ResetPolicy, SlidingWindowLimiter,
    SlidingWindowSettings, SweeperSettings,
};

/// Prefix for environment overrides, e.g. `VECEM_QUOTA__LIMITER__DAILY_LIMIT=100`.
pub const ENV_PREFIX: &str = "VECEM_QUOTA";

/// Main configuration for the quota service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Idle record sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which limiting algorithm to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Short burst window plus daily allowance
    #[default]
    FixedWindow,
    /// Rolling request log
    SlidingLog,
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub strategy: Strategy,

    /// Requests allowed per short window
    #[serde(default = "default_short_window_limit")]
    pub short_window_limit: u64,

    /// Short window length in seconds
    #[serde(default = "default_short_window_secs")]
    pub short_window_secs: u64,

    /// Requests allowed per daily window
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u64,

    /// Daily window length in seconds
    #[serde(default = "default_daily_window_secs")]
    pub daily_window_secs: u64,

    #[serde(default)]
    pub reset_policy: ResetPolicy,

    /// Settings for the `sliding_log` strategy
    #[serde(default)]
    pub sliding: SlidingConfig,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            short_window_limit: default_short_window_limit(),
            short_window_secs: default_short_window_secs(),
            daily_limit: default_daily_limit(),
            daily_window_secs: default_daily_window_secs(),
            reset_policy: ResetPolicy::default(),
            sliding: SlidingConfig::default(),
        }
    }
}

fn default_short_window_limit() -> u64 {
    60
}

fn default_short_window_secs() -> u64 {
    60
}

fn default_daily_limit() -> u64 {
    250
}

fn default_daily_window_secs() -> u64 {
    86_400
}

impl LimiterConfig {
    pub fn settings(&self) -> LimiterSettings {
        LimiterSettings {
            short_window_limit: self.short_window_limit,
            short_window: Duration::from_secs(self.short_window_secs),
            daily_limit: self.daily_limit,
            daily_window: Duration::from_secs(self.daily_window_secs),
            reset_policy: self.reset_policy,
        }
    }

    /// Build the configured limiter.
    pub fn build(&self) -> Result<Arc<dyn RateLimiterBackend>> {
        let limiter: Arc<dyn RateLimiterBackend> = match self.strategy {
            Strategy::FixedWindow => Arc::new(RateLimiter::new(self.settings())?),
            Strategy::SlidingLog => Arc::new(SlidingWindowLimiter::new(self.sliding.settings())?),
        };
        Ok(limiter)
    }
}

/// Sliding log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingConfig {
    #[serde(default = "default_sliding_max_requests")]
    pub max_requests: u64,

    #[serde(default = "default_sliding_window_secs")]
    pub window_secs: u64,
}

impl Default for SlidingConfig {
    fn default() -> Self {
        Self {
            max_requests: default_sliding_max_requests(),
            window_secs: default_sliding_window_secs(),
        }
    }
}

fn default_sliding_max_requests() -> u64 {
    100
}

fn default_sliding_window_secs() -> u64 {
    60
}

impl SlidingConfig {
    pub fn settings(&self) -> SlidingWindowSettings {
        SlidingWindowSettings {
            max_requests: self.max_requests,
            window: Duration::from_secs(self.window_secs),
        }
    }
}

/// Idle record sweeper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Seconds a record must stay idle past its daily window before removal
    #[serde(default = "default_idle_grace")]
    pub idle_grace_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval(),
            idle_grace_secs: default_idle_grace(),
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_idle_grace() -> u64 {
    3600
}

impl SweeperConfig {
    pub fn settings(&self) -> Result<SweeperSettings> {
        SweeperSettings::from_secs(self.interval_secs, self.idle_grace_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl QuotaConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from defaults, an optional YAML file and
    /// `VECEM_QUOTA__*` environment variables, in that order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: QuotaConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| QuotaError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can be turned into running components.
    pub fn validate(&self) -> Result<()> {
        self.limiter.build()?;

        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(QuotaError::Config(
                "sweeper.interval_secs must be greater than zero".to_string(),
            ));
        }

        self.sweeper.settings()?;

        Ok(())
    }
}

use envconfig::Envconfig;
use std::str::FromStr;
use std::time::Duration;

use crate::side_effect::SideEffectToggles;
use crate::throttle::{ThrottleConfig, ThrottlePolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration parsing error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Environment variable error: {0}")]
    EnvError(#[from] envconfig::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ConfigError::ValidationError(errors.to_string())
    }
}

/// What to do when a batch carries two equal items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Refuse the whole batch.
    #[default]
    Reject,
    /// Log and process every copy in order.
    Allow,
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "allow" => Ok(Self::Allow),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown duplicate policy `{other}`, expected reject or allow"
            ))),
        }
    }
}

/// Per-batch behaviour knobs of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub duplicate_policy: DuplicatePolicy,
    pub side_effects: SideEffectToggles,
}

#[derive(Debug, Clone, Envconfig)]
pub struct PipelineConfig {
    #[envconfig(from = "ASPECT_THROTTLE_UPDATE_INTERVAL_MS", default = "60000")]
    pub throttle_update_interval_ms: u64,

    // Versioned aspects
    #[envconfig(from = "ASPECT_THROTTLE_VERSIONED_ENABLED", default = "false")]
    pub versioned_enabled: bool,

    #[envconfig(from = "ASPECT_THROTTLE_VERSIONED_THRESHOLD", default = "4000")]
    pub versioned_threshold: u64,

    #[envconfig(
        from = "ASPECT_THROTTLE_VERSIONED_MAX_ATTEMPTS",
        default = "1000"
    )]
    pub versioned_max_attempts: u32,

    #[envconfig(
        from = "ASPECT_THROTTLE_VERSIONED_INITIAL_INTERVAL_MS",
        default = "100"
    )]
    pub versioned_initial_interval_ms: u64,

    #[envconfig(from = "ASPECT_THROTTLE_VERSIONED_MULTIPLIER", default = "10")]
    pub versioned_multiplier: u32,

    #[envconfig(
        from = "ASPECT_THROTTLE_VERSIONED_MAX_INTERVAL_MS",
        default = "30000"
    )]
    pub versioned_max_interval_ms: u64,

    // Timeseries aspects
    #[envconfig(from = "ASPECT_THROTTLE_TIMESERIES_ENABLED", default = "false")]
    pub timeseries_enabled: bool,

    #[envconfig(
        from = "ASPECT_THROTTLE_TIMESERIES_THRESHOLD",
        default = "4000"
    )]
    pub timeseries_threshold: u64,

    #[envconfig(
        from = "ASPECT_THROTTLE_TIMESERIES_MAX_ATTEMPTS",
        default = "1000"
    )]
    pub timeseries_max_attempts: u32,

    #[envconfig(
        from = "ASPECT_THROTTLE_TIMESERIES_INITIAL_INTERVAL_MS",
        default = "100"
    )]
    pub timeseries_initial_interval_ms: u64,

    #[envconfig(
        from = "ASPECT_THROTTLE_TIMESERIES_MULTIPLIER",
        default = "10"
    )]
    pub timeseries_multiplier: u32,

    #[envconfig(
        from = "ASPECT_THROTTLE_TIMESERIES_MAX_INTERVAL_MS",
        default = "30000"
    )]
    pub timeseries_max_interval_ms: u64,

    /// Comma separated `name=true|false` pairs.
    #[envconfig(from = "ASPECT_SIDE_EFFECTS")]
    pub side_effects: Option<String>,

    #[envconfig(from = "ASPECT_DUPLICATE_POLICY", default = "reject")]
    pub duplicate_policy: String,
}

impl PipelineConfig {
    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            update_interval: Duration::from_millis(
                self.throttle_update_interval_ms,
            ),
            versioned: ThrottleConfig {
                enabled: self.versioned_enabled,
                threshold: self.versioned_threshold,
                max_attempts: self.versioned_max_attempts,
                initial_interval: Duration::from_millis(
                    self.versioned_initial_interval_ms,
                ),
                multiplier: self.versioned_multiplier,
                max_interval: Duration::from_millis(
                    self.versioned_max_interval_ms,
                ),
            },
            timeseries: ThrottleConfig {
                enabled: self.timeseries_enabled,
                threshold: self.timeseries_threshold,
                max_attempts: self.timeseries_max_attempts,
                initial_interval: Duration::from_millis(
                    self.timeseries_initial_interval_ms,
                ),
                multiplier: self.timeseries_multiplier,
                max_interval: Duration::from_millis(
                    self.timeseries_max_interval_ms,
                ),
            },
        }
    }

    pub fn side_effect_toggles(
        &self,
    ) -> Result<SideEffectToggles, ConfigError> {
        match &self.side_effects {
            Some(raw) => raw.parse(),
            None => Ok(SideEffectToggles::default()),
        }
    }

    pub fn duplicate_policy(&self) -> Result<DuplicatePolicy, ConfigError> {
        self.duplicate_policy.parse()
    }

    pub fn options(&self) -> Result<PipelineOptions, ConfigError> {
        Ok(PipelineOptions {
            duplicate_policy: self.duplicate_policy()?,
            side_effects: self.side_effect_toggles()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle_update_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Throttle update interval cannot be 0".to_string(),
            ));
        }
        let policy = self.throttle_policy();
        policy.versioned.validate("versioned")?;
        policy.timeseries.validate("timeseries")?;
        self.options().map(drop)
    }
}

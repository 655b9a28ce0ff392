//! Admission throttling driven by observed ingestion backlog.

use aspect_models::AspectClass;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// Backlog above which batches are refused.
    pub threshold: u64,
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub multiplier: u32,
    pub max_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 4000,
            max_attempts: 1000,
            initial_interval: Duration::from_millis(100),
            multiplier: 10,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl ThrottleConfig {
    pub fn enabled(threshold: u64) -> Self {
        Self {
            enabled: true,
            threshold,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_interval.min(self.max_interval),
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            remaining: self.max_attempts,
        }
    }

    pub(crate) fn validate(&self, class: &str) -> Result<(), ConfigError> {
        if self.multiplier < 1 {
            return Err(ConfigError::ValidationError(format!(
                "{class} throttle multiplier must be at least 1"
            )));
        }
        if self.initial_interval > self.max_interval {
            return Err(ConfigError::ValidationError(format!(
                "{class} throttle initial interval exceeds max interval"
            )));
        }
        if self.enabled && self.threshold == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{class} throttle is enabled with a zero threshold"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// How often the backlog sensor refreshes.
    pub update_interval: Duration,
    pub versioned: ThrottleConfig,
    pub timeseries: ThrottleConfig,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(60),
            versioned: ThrottleConfig::default(),
            timeseries: ThrottleConfig::default(),
        }
    }
}

impl ThrottlePolicy {
    pub fn for_class(&self, class: AspectClass) -> &ThrottleConfig {
        match class {
            AspectClass::Versioned => &self.versioned,
            AspectClass::Timeseries => &self.timeseries,
        }
    }
}

/// Exponential delays `initial * multiplier^n`, capped at the max interval,
/// yielding at most `max_attempts` values.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: u32,
    max_interval: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        self.next = current
            .saturating_mul(self.multiplier)
            .min(self.max_interval);
        Some(current)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Throttled: {class} backlog {backlog} exceeds threshold {threshold}, \
     retry after {retry_after:?}"
)]
pub struct ThrottleExceeded {
    pub class: AspectClass,
    pub backlog: u64,
    pub threshold: u64,
    pub retry_after: Duration,
}

/// Latest observed backlog per aspect class, checked on admission.
#[derive(Debug, Default)]
pub struct AdmissionThrottle {
    policy: ThrottlePolicy,
    versioned: AtomicU64,
    timeseries: AtomicU64,
}

impl AdmissionThrottle {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            versioned: AtomicU64::new(0),
            timeseries: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    fn slot(&self, class: AspectClass) -> &AtomicU64 {
        match class {
            AspectClass::Versioned => &self.versioned,
            AspectClass::Timeseries => &self.timeseries,
        }
    }

    pub fn record_backlog(&self, class: AspectClass, backlog: u64) {
        self.slot(class).store(backlog, Ordering::Relaxed);
    }

    pub fn backlog(&self, class: AspectClass) -> u64 {
        self.slot(class).load(Ordering::Relaxed)
    }

    /// Refuses admission when any of `classes` is over its threshold.
    pub fn check(
        &self,
        classes: impl IntoIterator<Item = AspectClass>,
    ) -> Result<(), ThrottleExceeded> {
        for class in classes {
            let config = self.policy.for_class(class);
            if !config.enabled {
                continue;
            }
            let backlog = self.backlog(class);
            if backlog > config.threshold {
                warn!(
                    %class,
                    backlog,
                    threshold = config.threshold,
                    "refusing batch admission"
                );
                return Err(ThrottleExceeded {
                    class,
                    backlog,
                    threshold: config.threshold,
                    retry_after: config.initial_interval,
                });
            }
        }
        Ok(())
    }
}

/// Source of backlog readings, such as consumer lag on the change log.
#[async_trait]
pub trait BacklogSensor: Send + Sync {
    async fn backlog(&self, class: AspectClass) -> anyhow::Result<u64>;
}

/// Polls `sensor` every `update_interval` and records the readings until
/// `token` is cancelled.
pub fn spawn_sensor(
    throttle: Arc<AdmissionThrottle>,
    sensor: Arc<dyn BacklogSensor>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(throttle.policy().update_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            for class in [AspectClass::Versioned, AspectClass::Timeseries] {
                if !throttle.policy().for_class(class).enabled {
                    continue;
                }
                match sensor.backlog(class).await {
                    Ok(backlog) => {
                        debug!(%class, backlog, "backlog updated");
                        throttle.record_backlog(class, backlog);
                    }
                    Err(e) => warn!(%class, "backlog sensor failed: {e}"),
                }
            }
        }
        debug!("backlog sensor stopped");
    })
}

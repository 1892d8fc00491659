//! Sentinel configuration
//!
//! Every knob has a default matching the baseline behavior, so an empty
//! TOML document yields a working configuration.

use crate::error::SentinelError;
use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default identity used when guardian mode approves a plan
pub const DEFAULT_SYSTEM_APPROVER: &str = "guardian-system";

/// Sentinel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// How far back discovery looks in the feed
    pub recency_window_hours: u32,
    /// Max characters of threat content kept in a mission snapshot
    pub excerpt_limit: usize,
    /// Delay before a mission is marked completed
    pub completion_delay_ms: u64,
    /// Retry policy for completion writes
    pub retry: RetryPolicy,
    /// Tier to effectiveness mapping
    pub effectiveness: EffectivenessPolicy,
    /// Identity recorded on guardian self-approval
    pub system_approver: String,
    /// Completion queue depth
    pub queue_capacity: usize,
}

impl SentinelConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML and validate it
    ///
    /// # Errors
    /// - `SentinelError::Config` if the document is malformed or invalid
    pub fn from_toml_str(raw: &str) -> Result<Self, SentinelError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| SentinelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// With completion delay
    #[inline]
    #[must_use]
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With recency window
    #[inline]
    #[must_use]
    pub fn with_recency_window_hours(mut self, hours: u32) -> Self {
        self.recency_window_hours = hours;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With effectiveness policy
    #[inline]
    #[must_use]
    pub fn with_effectiveness(mut self, effectiveness: EffectivenessPolicy) -> Self {
        self.effectiveness = effectiveness;
        self
    }

    /// With system approver identity
    #[inline]
    #[must_use]
    pub fn with_system_approver(mut self, approver: impl Into<String>) -> Self {
        self.system_approver = approver.into();
        self
    }

    /// Completion delay as a `Duration`
    #[inline]
    #[must_use]
    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    /// Recency window as a `chrono::Duration`
    #[inline]
    #[must_use]
    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.recency_window_hours))
    }

    /// Check value ranges
    ///
    /// # Errors
    /// - `SentinelError::Config` naming the first offending field
    pub fn validate(&self) -> Result<(), SentinelError> {
        if self.recency_window_hours == 0 {
            return Err(SentinelError::Config(
                "recency_window_hours must be positive".to_string(),
            ));
        }
        if self.excerpt_limit == 0 {
            return Err(SentinelError::Config("excerpt_limit must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(SentinelError::Config("queue_capacity must be positive".to_string()));
        }
        if self.system_approver.trim().is_empty() {
            return Err(SentinelError::Config("system_approver cannot be empty".to_string()));
        }
        self.retry.validate()?;
        self.effectiveness.validate()
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            recency_window_hours: 72,
            excerpt_limit: 200,
            completion_delay_ms: 2_000,
            retry: RetryPolicy::default(),
            effectiveness: EffectivenessPolicy::default(),
            system_approver: DEFAULT_SYSTEM_APPROVER.to_string(),
            queue_capacity: 256,
        }
    }
}

/// Retry policy for the completion worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff_base_ms: u64,
    /// Cap on any single delay
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    /// Exponential delay after `attempt` failed attempts, capped
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_ms.max(1);
        let max = self.backoff_max_ms.max(base);
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        Duration::from_millis(base.saturating_mul(factor).min(max))
    }

    fn validate(&self) -> Result<(), SentinelError> {
        if self.max_attempts == 0 {
            return Err(SentinelError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(SentinelError::Config(
                "retry.backoff_max_ms must not be below backoff_base_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 2_000,
        }
    }
}

/// Tier to effectiveness score mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectivenessPolicy {
    /// Score for soft plans
    pub soft: f64,
    /// Score for hard plans
    pub hard: f64,
    /// Score for nuclear plans
    pub nuclear: f64,
}

impl EffectivenessPolicy {
    /// Score for a tier
    #[inline]
    #[must_use]
    pub fn score(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Soft => self.soft,
            Tier::Hard => self.hard,
            Tier::Nuclear => self.nuclear,
        }
    }

    /// Scores lie in `[0, 1]` and never decrease with escalation
    ///
    /// # Errors
    /// - `SentinelError::Config` when a score is out of range or the order breaks
    pub fn validate(&self) -> Result<(), SentinelError> {
        for tier in Tier::ALL {
            let score = self.score(tier);
            if !(0.0..=1.0).contains(&score) {
                return Err(SentinelError::Config(format!(
                    "effectiveness.{tier} must be within [0, 1], got {score}"
                )));
            }
        }
        if self.soft > self.hard || self.hard > self.nuclear {
            return Err(SentinelError::Config(
                "effectiveness must satisfy soft <= hard <= nuclear".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EffectivenessPolicy {
    fn default() -> Self {
        Self {
            soft: 0.65,
            hard: 0.80,
            nuclear: 0.95,
        }
    }
}

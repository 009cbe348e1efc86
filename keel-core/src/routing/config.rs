//! Routing configuration.
//!
//! Plain serde data so it can be loaded from JSON alongside templates.

use crate::error::AiError;
use crate::types::ProviderRoute;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size-based route selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicConfig {
    /// Prompts longer than this (in chars, system prompt included) go to `high`
    pub threshold_chars: usize,
    pub low: ProviderRoute,
    pub high: ProviderRoute,
}

/// Candidate filtering applied after the candidate list is built
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FallbackPolicy {
    #[serde(default)]
    pub skip_provider_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,
}

/// Per-candidate retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Retries per candidate after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay_ms = initial_delay.as_millis() as u64;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Attempts per candidate (first attempt included)
    pub fn attempts_per_candidate(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate the delay before retry number `retry` (zero-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Provider routing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRoutingConfig {
    pub primary: ProviderRoute,
    #[serde(default)]
    pub fallbacks: Vec<ProviderRoute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristic: Option<HeuristicConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_policy: Option<FallbackPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl ProviderRoutingConfig {
    /// Route everything to `primary`
    pub fn new(primary: ProviderRoute) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            heuristic: None,
            fallback_policy: None,
            retry_policy: None,
        }
    }

    /// Add a fallback route
    pub fn with_fallback(mut self, route: ProviderRoute) -> Self {
        self.fallbacks.push(route);
        self
    }

    /// Set the size heuristic
    pub fn with_heuristic(mut self, heuristic: HeuristicConfig) -> Self {
        self.heuristic = Some(heuristic);
        self
    }

    /// Set the fallback policy
    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = Some(policy);
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Load from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, AiError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective retry policy
    pub fn retry(&self) -> RetryPolicy {
        self.retry_policy.clone().unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AiError> {
        let mut routes = vec![&self.primary];
        routes.extend(self.fallbacks.iter());
        if let Some(heuristic) = &self.heuristic {
            routes.push(&heuristic.low);
            routes.push(&heuristic.high);
        }
        for route in routes {
            if route.provider_id.trim().is_empty() || route.model_id.trim().is_empty() {
                return Err(AiError::configuration(format!(
                    "route '{}' must have a non-empty providerId and modelId",
                    route
                )));
            }
        }

        if let Some(policy) = &self.fallback_policy {
            if policy.max_attempts == Some(0) {
                return Err(AiError::configuration(
                    "fallbackPolicy.maxAttempts must be at least 1",
                ));
            }
        }

        if let Some(retry) = &self.retry_policy {
            if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
                return Err(AiError::configuration(
                    "retryPolicy.backoffMultiplier must be a finite number >= 1",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_json() {
        let config = ProviderRoutingConfig::from_json_str(
            r#"{
                "primary": {"providerId": "openai", "modelId": "gpt-4o"},
                "fallbacks": [{"providerId": "deepseek", "modelId": "deepseek-chat"}],
                "heuristic": {
                    "thresholdChars": 2000,
                    "low": {"providerId": "openai", "modelId": "gpt-4o-mini"},
                    "high": {"providerId": "openai", "modelId": "gpt-4o"}
                },
                "fallbackPolicy": {"skipProviderIds": ["legacy"], "maxAttempts": 2},
                "retryPolicy": {"maxRetries": 1}
            }"#,
        )
        .unwrap();

        assert_eq!(config.fallbacks.len(), 1);
        assert_eq!(config.heuristic.as_ref().unwrap().threshold_chars, 2000);
        let retry = config.retry();
        assert_eq!(retry.max_retries, 1);
        assert_eq!(retry.attempts_per_candidate(), 2);
        assert_eq!(retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_max_attempts_zero_rejected() {
        let config = ProviderRoutingConfig::new(ProviderRoute::new("openai", "gpt-4o"))
            .with_fallback_policy(FallbackPolicy {
                skip_provider_ids: vec![],
                max_attempts: Some(0),
            });
        assert!(matches!(config.validate(), Err(AiError::Configuration(_))));
    }

    #[test]
    fn test_empty_route_rejected() {
        let config = ProviderRoutingConfig::new(ProviderRoute::new("", "gpt-4o"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(20), Duration::from_millis(10_000));
        assert_eq!(RetryPolicy::default().delay_for(5), Duration::ZERO);
    }
}

//! Retry policy for network attempts
//!
//! Bridges [`RetryPolicyConfig`] to the generic executor in
//! `netweave_common::resilience::retry`.

use std::collections::HashSet;

use netweave_common::error::ErrorClassification;
use netweave_common::resilience::{
    BackoffStrategy, RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryPolicy,
};
use netweave_domain::{BackoffSetting, FailureClass, NetworkError, NetworkResult, RetryPolicyConfig};

/// Retries an error only when its class is configured as retryable and the
/// error itself is transient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRetryPolicy {
    retryable: HashSet<FailureClass>,
}

impl NetworkRetryPolicy {
    pub fn new(classes: impl IntoIterator<Item = FailureClass>) -> Self {
        Self { retryable: classes.into_iter().collect() }
    }

    pub fn is_retryable(&self, error: &NetworkError) -> bool {
        self.retryable.contains(&error.failure_class()) && error.is_retryable()
    }
}

impl Default for NetworkRetryPolicy {
    fn default() -> Self {
        Self::new(FailureClass::DEFAULT_RETRYABLE)
    }
}

impl RetryPolicy<NetworkError> for NetworkRetryPolicy {
    fn should_retry(&self, error: &NetworkError, _attempt: u32) -> RetryDecision {
        if !self.is_retryable(error) {
            return RetryDecision::Stop;
        }
        match error.retry_after() {
            Some(delay) => RetryDecision::RetryAfter(delay),
            None => RetryDecision::Retry,
        }
    }
}

/// Executor used by the request pipeline
pub type NetworkRetryExecutor = RetryExecutor<NetworkRetryPolicy>;

/// Backoff strategy for a configured setting
pub fn backoff_strategy(setting: &BackoffSetting) -> BackoffStrategy {
    match *setting {
        BackoffSetting::Fixed { delay } => BackoffStrategy::Fixed(delay),
        BackoffSetting::Linear { unit } => BackoffStrategy::Linear { unit },
        BackoffSetting::Exponential { unit, max_delay } => {
            BackoffStrategy::Exponential { unit, max_delay }
        }
    }
}

/// Build an executor from configuration. `custom_backoff` replaces the
/// configured strategy when set.
pub fn build_executor(
    config: &RetryPolicyConfig,
    custom_backoff: Option<BackoffStrategy>,
) -> NetworkResult<NetworkRetryExecutor> {
    let backoff = custom_backoff.unwrap_or_else(|| backoff_strategy(&config.backoff_strategy));
    let retry_config = RetryConfig::builder()
        .max_attempts(config.max_attempts)
        .backoff(backoff)
        .build()
        .map_err(|e| match e {
            RetryError::InvalidConfiguration { message } => {
                NetworkError::Config(format!("retryPolicy: {message}"))
            }
            other => NetworkError::Config(format!("retryPolicy: {other:?}")),
        })?;
    Ok(RetryExecutor::new(
        retry_config,
        NetworkRetryPolicy::new(config.retryable_failures.iter().copied()),
    ))
}

/// Collapse an executor failure into the last network error
pub(crate) fn into_network_error(error: RetryError<NetworkError>) -> NetworkError {
    match error {
        RetryError::InvalidConfiguration { message } => NetworkError::Config(message),
        other => other
            .into_source()
            .unwrap_or_else(|| NetworkError::Internal("retry ended without an error".into())),
    }
}

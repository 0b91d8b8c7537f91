use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::logging::{LogRecord, LogSink};
use crate::provider::{Provider, ProviderCallError, QueryRequest};

#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    /// Attempt ceiling for one `execute` call.
    pub max_attempts: usize,
    /// Linear backoff: attempt `n` sleeps `backoff_step * n` before retrying.
    pub backoff_step: Duration,
    /// Mandatory delay after every successful call. Omitting it causes
    /// upstream throttling, so it is part of the contract.
    pub pacing: Duration,
    /// Consecutive failures after which a provider is disabled for the
    /// rest of the session.
    pub disable_threshold: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step: Duration::from_secs(5),
            pacing: Duration::from_secs(1),
            disable_threshold: 5,
        }
    }
}

impl ExecutorConfig {
    /// All delays zeroed; attempt and disablement bounds unchanged.
    pub fn immediate() -> Self {
        Self {
            backoff_step: Duration::ZERO,
            pacing: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("provider `{0}` is disabled for this session")]
    Disabled(String),
    #[error("provider `{name}` exhausted {attempts} attempts: {source}")]
    Exhausted {
        name: String,
        attempts: usize,
        #[source]
        source: ProviderCallError,
    },
}

/// Wraps one adapter call with bounded retry, consecutive-failure counting,
/// and session-scoped disablement. The circuit breaker is soft: a disabled
/// provider is never probed again and never re-enabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResilientExecutor {
    config: ExecutorConfig,
}

impl ResilientExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn execute(
        &self,
        provider: &mut Provider,
        request: &QueryRequest,
        sink: &dyn LogSink,
    ) -> Result<String, ExecuteError> {
        if !provider.is_enabled() {
            return Err(ExecuteError::Disabled(provider.name().to_string()));
        }

        let mut attempts = 0;
        let mut last_error: Option<ProviderCallError> = None;

        for attempt in 1..=self.config.max_attempts {
            attempts = attempt;
            match provider.adapter().query(request) {
                Ok(reply) => {
                    provider.record_success(&reply.usage);
                    if !self.config.pacing.is_zero() {
                        thread::sleep(self.config.pacing);
                    }
                    return Ok(reply.text);
                }
                Err(err) => {
                    let failures = provider.record_failure();
                    sink.log(LogRecord::warn(format!(
                        "provider `{}` attempt {}/{} failed: {}",
                        provider.name(),
                        attempt,
                        self.config.max_attempts,
                        err
                    )));

                    if failures >= self.config.disable_threshold {
                        provider.disable();
                        sink.log(LogRecord::warn(format!(
                            "disabling provider `{}` after {} consecutive failures",
                            provider.name(),
                            failures
                        )));
                        last_error = Some(err);
                        break;
                    }

                    if attempt < self.config.max_attempts {
                        let delay = self.config.backoff_step * attempt as u32;
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(ExecuteError::Exhausted {
            name: provider.name().to_string(),
            attempts,
            source: last_error.unwrap_or(ProviderCallError::Empty),
        })
    }
}

//! Retry logic with exponential backoff and multiplicative jitter.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// `min(max, base * factor^attempt * (1 + jitter * U[0, 1)))`.
    Exponential {
        /// Delay before the first retry, ignoring jitter.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// Hard ceiling, applied after jitter.
        max: Duration,
        /// Upper bound of the random stretch applied to each delay.
        jitter: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based: the first retry is 0).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let stretch = 1.0 + jitter * fastrand::f64();
                let seconds = base.as_secs_f64() * factor.powi(exponent) * stretch;
                let capped_seconds = seconds.min(max.as_secs_f64());

                Duration::from_secs_f64(capped_seconds.max(0.0))
            }
        }
    }
}

/// What a retried operation produced, and how many tries it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, EngineError>,
    pub attempts: u32,
}

/// Bounded retry policy: the original attempt plus at most `max_retries` more.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::Exponential {
                base: config.base_retry_delay,
                factor: config.backoff_factor,
                max: config.max_retry_delay,
                jitter: config.jitter_fraction,
            },
        }
    }

    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, error: &EngineError) -> bool {
        error.is_retryable()
    }

    pub fn compute_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Drive `operation` until it succeeds, fails fatally, or runs out of
    /// retries. `operation` receives the 0-based attempt index. Only the error
    /// from the final attempt is returned.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0;

        loop {
            let error = match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                    };
                }
                Err(error) => error,
            };

            if !self.is_retryable(&error) || attempt >= self.max_retries {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt + 1,
                };
            }

            let delay = self.compute_delay(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = self.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                status = error.status(),
                error = %error,
                "retrying request after transient failure"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

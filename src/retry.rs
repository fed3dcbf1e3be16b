//! Bounded retry with a delay schedule and a caller-supplied failure classifier.
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    /// Doubles the delay after every failed attempt, capped at `max_delay_secs`.
    Exponential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_secs: u64,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_delay_secs() -> u64 {
    60
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay_secs: u64) -> Self {
        Self {
            attempts,
            delay_secs,
            backoff: Backoff::Fixed,
            max_delay_secs: default_max_delay_secs(),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let secs = match self.backoff {
            Backoff::Fixed => self.delay_secs,
            Backoff::Exponential => {
                let factor = 1u64 << attempt.saturating_sub(1).min(16);
                self.delay_secs
                    .saturating_mul(factor)
                    .min(self.max_delay_secs.max(self.delay_secs))
            }
        };
        Duration::from_secs(secs)
    }

    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Tagged result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    /// The classifier marked a failure permanent; no further attempts were made.
    Permanent { error: E, attempts: u32 },
    /// Every attempt failed transiently; `error` is the last one.
    Exhausted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::Permanent { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            RetryOutcome::Success { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Run `op` up to `policy.attempts` times.
///
/// `op` receives the 1-based attempt number and must be safe to repeat. A failure the
/// classifier marks permanent ends the loop immediately; transient failures sleep per the
/// policy's schedule before the next attempt. No sleep follows the final attempt.
pub async fn execute<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    classify: C,
    mut op: Op,
) -> RetryOutcome<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Disposition,
    E: Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(label, attempt, "recovered after retries");
                }
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) => match classify(&error) {
                Disposition::Permanent => {
                    warn!(label, attempt, %error, "permanent failure; not retrying");
                    return RetryOutcome::Permanent {
                        error,
                        attempts: attempt,
                    };
                }
                Disposition::Transient if attempt >= max_attempts => {
                    warn!(label, attempt, %error, "attempt budget exhausted");
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }
                Disposition::Transient => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        %error,
                        "transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}

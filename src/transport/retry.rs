//! Retry loop shared by every upstream call.
//!
//! The caller supplies the operation and a classifier. Each error is either
//! terminal (returned at once), transient (retried with exponential backoff
//! until the attempt budget is spent) or an authorisation failure (retried
//! exactly once, immediately, with `Attempt::reauthenticate` set so the
//! operation can drop its credentials first).

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for transient failures (at least one is always made).
    pub max_retries: u32,
    /// Delay after failed attempt `n` is `backoff_unit * backoff_base^n`.
    pub backoff_base: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Backoff after the `attempt`-th (1-based) failure. Never decreases as
    /// `attempt` grows.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.max(1).checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Business outcome; retrying cannot change it.
    Terminal,
    /// Infrastructure fault; retry with backoff.
    Transient,
    /// Credentials rejected; refresh them and retry once.
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based count of backoff cycles so far.
    pub number: u32,
    /// Set on the single retry that follows an `Unauthorized` error.
    pub reauthenticate: bool,
}

#[derive(Debug)]
pub enum RetryError<E> {
    Terminal(E),
    /// A second `Unauthorized` after the refresh.
    AuthExhausted(E),
    Exhausted { last: E, attempts: u32 },
}

/// Run `operation` until it succeeds or `classify` says stop.
///
/// `on_backoff` is called with the error, the failed attempt number and the
/// delay before every backoff sleep.
pub async fn with_retry<T, E, F, Fut, C, B>(
    policy: &RetryPolicy,
    mut operation: F,
    classify: C,
    mut on_backoff: B,
) -> Result<T, RetryError<E>>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Disposition,
    B: FnMut(&E, u32, Duration),
{
    let mut number = 1;
    let mut reauthenticate = false;
    let mut reauthenticated = false;

    loop {
        let err = match operation(Attempt { number, reauthenticate }).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        reauthenticate = false;

        match classify(&err) {
            Disposition::Terminal => return Err(RetryError::Terminal(err)),
            Disposition::Unauthorized if !reauthenticated => {
                reauthenticated = true;
                reauthenticate = true;
            }
            Disposition::Unauthorized => return Err(RetryError::AuthExhausted(err)),
            Disposition::Transient if number < policy.max_attempts() => {
                let delay = policy.delay_for(number);
                on_backoff(&err, number, delay);
                tokio::time::sleep(delay).await;
                number += 1;
            }
            Disposition::Transient => {
                return Err(RetryError::Exhausted {
                    last: err,
                    attempts: number,
                })
            }
        }
    }
}

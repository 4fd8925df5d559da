use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::api::{ApiError, FailureKind};
use crate::config::RetrySettings;

/// Result of a remote call after the retry policy has run its course.
#[derive(Debug)]
pub enum Outcome<T, E = ApiError> {
    Success(T),
    /// Retries exhausted; carries the last error.
    TransientFailure(E),
    NotFound(E),
    Forbidden(E),
}

impl<T, E> Outcome<T, E> {
    /// Collapses every failure variant into `Err`.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::TransientFailure(e) | Outcome::NotFound(e) | Outcome::Forbidden(e) => Err(e),
        }
    }
}

/// Bounded exponential backoff with jitter. Only transient failures are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_elapsed: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            max_elapsed: Duration::from_secs(settings.max_elapsed_secs),
            min_wait: Duration::from_secs(settings.min_wait_secs),
            max_wait: Duration::from_secs(settings.max_wait_secs.max(settings.min_wait_secs)),
            multiplier: settings.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            max_elapsed: Duration::from_secs(5),
            min_wait: Duration::from_millis(1),
            max_wait: Duration::from_millis(5),
            multiplier: 0.001,
        }
    }

    /// Upper bound of the wait after the given (1-based) failed attempt:
    /// `multiplier * 2^(attempt - 1)` seconds, clamped to `[min_wait, max_wait]`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let secs = self.multiplier * 2f64.powi(exponent);
        let raw = Duration::try_from_secs_f64(secs).unwrap_or(self.max_wait);
        raw.clamp(self.min_wait, self.max_wait)
    }

    /// A uniformly jittered wait between `min_wait` and [`Self::ceiling`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling <= self.min_wait {
            return self.min_wait;
        }
        rand::thread_rng().gen_range(self.min_wait..=ceiling)
    }

    /// Runs a remote API operation, classifying failures with [`ApiError::kind`].
    pub async fn run<T, F, Fut>(&self, name: &str, operation: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.run_classified(name, operation, ApiError::kind).await
    }

    pub async fn run_classified<T, E, F, Fut, C>(
        &self,
        name: &str,
        mut operation: F,
        classify: C,
    ) -> Outcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        C: Fn(&E) -> FailureKind,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("'{}' succeeded on attempt {}", name, attempt);
                    }
                    return Outcome::Success(value);
                }
                Err(err) => err,
            };

            match classify(&err) {
                FailureKind::NotFound => return Outcome::NotFound(err),
                FailureKind::Forbidden => return Outcome::Forbidden(err),
                FailureKind::Transient => {}
            }

            if attempt >= self.max_attempts {
                warn!("'{}' failed after {} attempts: {}", name, attempt, err);
                return Outcome::TransientFailure(err);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.max_elapsed {
                warn!("'{}' gave up after {:?} ({} attempts): {}", name, elapsed, attempt, err);
                return Outcome::TransientFailure(err);
            }

            let wait = self.backoff(attempt).min(self.max_elapsed - elapsed);
            warn!(
                "'{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                name, attempt, self.max_attempts, err, wait
            );
            sleep(wait).await;
        }
    }
}

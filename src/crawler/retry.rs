//! Bounded retry with exponential backoff
//!
//! [`RetryExecutor`] runs an async operation up to `max_attempts` times:
//! - attempt 1 runs immediately
//! - a failure whose error is [`Retryable::is_transient`] sleeps and retries
//! - the delay starts at `initial_delay` and grows by `backoff_multiplier`
//! - non-transient failures are returned at once
//!
//! Each attempt is reported to an [`AttemptObserver`].

use crate::config::RetryConfig;
use crate::ConfigError;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Classifies errors as worth retrying
pub trait Retryable {
    /// Returns true if another attempt might succeed
    fn is_transient(&self) -> bool;
}

/// Boxed future for one attempt that borrows its context for `'a`
pub type AttemptFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Immutable retry parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy, rejecting values that would never terminate or never wait
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Total attempts including the first (at least 1)
    /// * `initial_delay` - Delay before the second attempt (non-zero)
    /// * `backoff_multiplier` - Growth factor applied after each failure (at least 1.0)
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry max-attempts must be at least 1".to_string(),
            ));
        }
        if initial_delay.is_zero() {
            return Err(ConfigError::Validation(
                "retry initial-delay-ms must be greater than 0".to_string(),
            ));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(format!(
                "retry backoff-multiplier must be >= 1.0, got {}",
                backoff_multiplier
            )));
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            backoff_multiplier,
        })
    }

    /// Builds the policy from the `[retry]` configuration section
    pub fn from_config(config: &RetryConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            config.backoff_multiplier,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Delay slept after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// What happened to one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// Failed transiently; the next attempt starts after `delay`
    Retrying { delay: Duration },
    /// Failed transiently on the last allowed attempt
    Exhausted,
    /// Failed with a non-transient error
    Fatal,
}

/// Receives one notification per attempt
pub trait AttemptObserver: Send + Sync {
    fn on_attempt(&self, label: &str, attempt: u32, outcome: AttemptOutcome, error: Option<&str>);
}

/// Default observer that reports attempts through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AttemptObserver for TracingObserver {
    fn on_attempt(&self, label: &str, attempt: u32, outcome: AttemptOutcome, error: Option<&str>) {
        let error = error.unwrap_or("-");
        match outcome {
            AttemptOutcome::Succeeded => {
                tracing::debug!("{} succeeded on attempt {}", label, attempt);
            }
            AttemptOutcome::Retrying { delay } => {
                tracing::warn!(
                    "{} failed on attempt {} ({}), retrying in {:?}",
                    label,
                    attempt,
                    error,
                    delay
                );
            }
            AttemptOutcome::Exhausted => {
                tracing::error!("{} failed after {} attempts: {}", label, attempt, error);
            }
            AttemptOutcome::Fatal => {
                tracing::error!("{} failed permanently on attempt {}: {}", label, attempt, error);
            }
        }
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    observer: Arc<dyn AttemptObserver>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails non-transiently or runs out of attempts
    ///
    /// The closure receives the 1-based attempt number.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful result
    /// * `Err(E)` - The fatal error, or the last transient error
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            let result = operation(attempt).await;
            match self.judge(label, attempt, result) {
                Verdict::Done(result) => return result,
                Verdict::RetryAfter(delay) => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }

    /// Like [`run`](Self::run), lending `context` mutably to every attempt
    ///
    /// Used when each attempt needs the same exclusive resource, such as a
    /// rendering session.
    pub async fn run_with<C, T, E, F>(
        &self,
        label: &str,
        context: &mut C,
        mut operation: F,
    ) -> Result<T, E>
    where
        C: ?Sized,
        F: for<'c> FnMut(&'c mut C, u32) -> AttemptFuture<'c, T, E>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            let result = operation(&mut *context, attempt).await;
            match self.judge(label, attempt, result) {
                Verdict::Done(result) => return result,
                Verdict::RetryAfter(delay) => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }

    fn judge<T, E>(&self, label: &str, attempt: u32, result: Result<T, E>) -> Verdict<T, E>
    where
        E: Retryable + Display,
    {
        let error = match result {
            Ok(value) => {
                self.observer
                    .on_attempt(label, attempt, AttemptOutcome::Succeeded, None);
                return Verdict::Done(Ok(value));
            }
            Err(e) => e,
        };

        let message = error.to_string();
        if !error.is_transient() {
            self.observer
                .on_attempt(label, attempt, AttemptOutcome::Fatal, Some(&message));
            return Verdict::Done(Err(error));
        }

        if attempt >= self.policy.max_attempts {
            self.observer
                .on_attempt(label, attempt, AttemptOutcome::Exhausted, Some(&message));
            return Verdict::Done(Err(error));
        }

        let delay = self.policy.delay_after(attempt);
        self.observer.on_attempt(
            label,
            attempt,
            AttemptOutcome::Retrying { delay },
            Some(&message),
        );
        Verdict::RetryAfter(delay)
    }
}

enum Verdict<T, E> {
    Done(Result<T, E>),
    RetryAfter(Duration),
}

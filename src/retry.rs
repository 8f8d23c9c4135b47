use crate::logging::LogFields;
use crate::{BoxError, ExecResult, ExecScope, ScopeError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

type ShouldRetry<T> = dyn Fn(&ExecResult<T>) -> bool + Send + Sync;
type DelayForAttempt<T> = dyn Fn(u32, &ExecResult<T>) -> Result<Duration, BoxError> + Send + Sync;

/// Decides whether a finished attempt is retried and how long to wait first.
///
/// `max_retries` bounds the retries after the first attempt, so a policy
/// with `max_retries = n` makes at most `n + 1` attempts.
pub struct RetryPolicy<T> {
    pub max_retries: u32,
    should_retry: Arc<ShouldRetry<T>>,
    delay_for_attempt: Arc<DelayForAttempt<T>>,
}

impl<T> Clone for RetryPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            should_retry: Arc::clone(&self.should_retry),
            delay_for_attempt: Arc::clone(&self.delay_for_attempt),
        }
    }
}

impl<T> std::fmt::Debug for RetryPolicy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl<T> RetryPolicy<T> {
    /// `delay_for_attempt` receives the number of the attempt that just
    /// finished (1-based) and its result. Returning `Err` ends the retry
    /// chain with [`ScopeError::Policy`].
    pub fn new<S, D>(max_retries: u32, should_retry: S, delay_for_attempt: D) -> Self
    where
        S: Fn(&ExecResult<T>) -> bool + Send + Sync + 'static,
        D: Fn(u32, &ExecResult<T>) -> Result<Duration, BoxError> + Send + Sync + 'static,
    {
        Self {
            max_retries,
            should_retry: Arc::new(should_retry),
            delay_for_attempt: Arc::new(delay_for_attempt),
        }
    }

    /// Retries failures only, waiting `base_delay * attempt` in between.
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self::new(max_retries, |result| result.is_err(), move |attempt, _| {
            Ok(base_delay.saturating_mul(attempt))
        })
    }

    /// Forwards the first result whatever it is.
    pub fn never() -> Self {
        Self::new(0, |_| false, |_, _| Ok(Duration::ZERO))
    }

    fn should_retry(&self, result: &ExecResult<T>) -> bool {
        (self.should_retry)(result)
    }

    fn delay_for(&self, attempt: u32, result: &ExecResult<T>) -> Result<Duration, BoxError> {
        (self.delay_for_attempt)(attempt, result)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub first_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            first_delay: Duration::from_millis(20),
        }
    }
}

impl BackoffConfig {
    fn normalized(mut self) -> Self {
        if self.first_delay.is_zero() {
            self.first_delay = Duration::from_millis(20);
        }
        self
    }
}

/// One finished attempt threaded through the retry loop.
struct Attempt<T> {
    number: u32,
    result: ExecResult<T>,
    earlier_failures: Vec<ScopeError>,
}

impl<T> Attempt<T> {
    fn exhausted(&self, max_retries: u32) -> bool {
        self.number > max_retries
    }

    /// Terminal result: a failure carries every earlier failure as a
    /// suppressed cause.
    fn finish(self) -> ExecResult<T> {
        self.result.map_err(|err| err.with_suppressed(self.earlier_failures))
    }

    /// Ends the chain with `err`, attaching all failures seen so far.
    fn fail_with(self, err: ScopeError) -> ExecResult<T> {
        let mut causes = self.earlier_failures;
        if let Err(last) = self.result {
            causes.push(last);
        }
        Err(err.with_suppressed(causes))
    }

    fn next(self, result: ExecResult<T>) -> Self {
        let mut earlier_failures = self.earlier_failures;
        if let Err(err) = self.result {
            earlier_failures.push(err);
        }
        Self {
            number: self.number + 1,
            result,
            earlier_failures,
        }
    }
}

impl ExecScope {
    /// Runs `operation` and retries it while `policy` asks for it.
    ///
    /// The factory receives the 1-based attempt number. Cancelling the scope
    /// prevents the next attempt from starting but never interrupts one that
    /// is already running.
    pub async fn retry<T, F, Fut>(&self, policy: &RetryPolicy<T>, mut operation: F) -> ExecResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ExecResult<T>>,
    {
        if self.is_cancelled() {
            return Err(ScopeError::cancelled("scope cancelled before first attempt"));
        }

        let mut attempt = Attempt {
            number: 1,
            result: operation(1).await,
            earlier_failures: Vec::new(),
        };

        loop {
            if attempt.exhausted(policy.max_retries) || !policy.should_retry(&attempt.result) {
                return attempt.finish();
            }

            let wait_time = match policy.delay_for(attempt.number, &attempt.result) {
                Ok(wait_time) => wait_time,
                Err(source) => {
                    return attempt.fail_with(ScopeError::Policy {
                        source,
                        suppressed: Vec::new(),
                    });
                }
            };

            let number = attempt.number + 1;
            tokio::select! {
                biased;
                _ = self.cancellation_token().cancelled() => {
                    let reason = format!("cancelled while waiting for attempt {number}");
                    return attempt.fail_with(ScopeError::cancelled(reason));
                }
                _ = self.scheduler().delay(wait_time) => {}
            }
            if self.is_cancelled() {
                let reason = format!("cancelled before attempt {number}");
                return attempt.fail_with(ScopeError::cancelled(reason));
            }

            attempt = attempt.next(operation(number).await);
        }
    }

    /// Retries failures with linear backoff (`first_delay * retry`), logging
    /// a warning under `failure_key` for every failed attempt that is about
    /// to be retried.
    pub async fn backoff_retry_with_warnings<T, F, Fut>(
        &self,
        config: BackoffConfig,
        failure_key: &str,
        fields: &LogFields,
        operation: F,
    ) -> ExecResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ExecResult<T>>,
    {
        let config = config.normalized();
        let first_delay = config.first_delay;
        let logger = self.logger_handle();
        let failure_key = failure_key.to_string();
        let fields = fields.clone();

        let policy = RetryPolicy::new(
            config.max_retries,
            |result: &ExecResult<T>| result.is_err(),
            move |attempt, result: &ExecResult<T>| {
                if let Err(err) = result {
                    logger.log(Level::WARN, &failure_key, &fields, Some(err));
                }
                Ok(first_delay.saturating_mul(attempt))
            },
        );

        self.retry(&policy, operation).await
    }
}

//! Bounded retry with exponential backoff and jitter.
//!
//! The executor knows nothing about HTTP: it drives any async attempt closure
//! returning `Result<T, E>`, so it can be exercised without a network.

use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;

/// Base backoff used when the caller does not pick one.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound (exclusive) of the random jitter added to each wait.
pub const DEFAULT_JITTER_BOUND: Duration = Duration::from_millis(100);

/// Configures how many times and how patiently an operation is retried.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retry: u32,
    /// Wait before the first retry; doubled for every following one.
    pub base_backoff: Duration,
    /// Exclusive upper bound of the uniform jitter added to each wait.
    pub jitter_bound: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: 0,
            base_backoff: DEFAULT_BASE_BACKOFF,
            jitter_bound: DEFAULT_JITTER_BOUND,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `max_retry` retries and default backoff.
    pub fn new(max_retry: u32) -> Self {
        Self {
            max_retry,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_jitter_bound(mut self, jitter_bound: Duration) -> Self {
        self.jitter_bound = jitter_bound;
        self
    }

    /// Deterministic part of the wait after failed attempt `attempt`
    /// (0-indexed): `base_backoff * 2^attempt`, saturating at
    /// [`Duration::MAX`].
    pub fn base_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Full wait after failed attempt `attempt`: [`base_delay`](Self::base_delay)
    /// plus independent jitter in `[0, jitter_bound)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay(attempt).saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter_bound.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..bound))
    }
}

type ErrorPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Runs an attempt closure under a [`RetryPolicy`].
pub struct RetryExecutor<T, E> {
    policy: RetryPolicy,
    should_retry: Option<ErrorPredicate<E>>,
    retry_on_result: Option<ResultPredicate<T>>,
}

impl<T, E> Clone for RetryExecutor<T, E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            should_retry: self.should_retry.clone(),
            retry_on_result: self.retry_on_result.clone(),
        }
    }
}

impl<T, E> RetryExecutor<T, E> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            should_retry: None,
            retry_on_result: None,
        }
    }

    /// Errors for which the predicate returns `false` end the loop at once.
    pub fn should_retry<P>(self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry_arc(Arc::new(predicate))
    }

    pub(crate) fn should_retry_arc(mut self, predicate: ErrorPredicate<E>) -> Self {
        self.should_retry = Some(predicate);
        self
    }

    /// Successful results for which the predicate returns `true` are retried
    /// while budget remains. The last attempt's result is returned as-is.
    pub fn retry_on_result<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.retry_on_result_arc(Arc::new(predicate))
    }

    pub(crate) fn retry_on_result_arc(mut self, predicate: ResultPredicate<T>) -> Self {
        self.retry_on_result = Some(predicate);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `attempt` until it succeeds, the budget is spent, or an error is
    /// rejected by `should_retry`. A terminal error is the last attempt's own
    /// error, never a wrapper.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt_count = 0u32;
        loop {
            match attempt().await {
                Ok(value) => {
                    let forced = attempt_count < self.policy.max_retry
                        && self
                            .retry_on_result
                            .as_ref()
                            .is_some_and(|predicate| predicate(&value));
                    if !forced {
                        return Ok(value);
                    }
                }
                Err(err) => {
                    let rejected = self
                        .should_retry
                        .as_ref()
                        .is_some_and(|predicate| !predicate(&err));
                    if attempt_count >= self.policy.max_retry || rejected {
                        return Err(err);
                    }
                }
            }

            let delay = self.policy.backoff(attempt_count);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt = attempt_count + 1,
                max_retry = self.policy.max_retry,
                delay_ms = delay.as_millis() as u64,
                "retrying after backoff"
            );

            tokio::time::sleep(delay).await;
            attempt_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use tokio::time::Instant;

    use super::{RetryExecutor, RetryPolicy};

    fn fast_policy(max_retry: u32) -> RetryPolicy {
        RetryPolicy::new(max_retry)
            .with_base_backoff(Duration::from_millis(1))
            .with_jitter_bound(Duration::ZERO)
    }

    #[test]
    fn base_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5).with_base_backoff(Duration::from_millis(100));
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn backoff_adds_bounded_jitter() {
        let policy = RetryPolicy::new(5)
            .with_base_backoff(Duration::from_millis(100))
            .with_jitter_bound(Duration::from_millis(10));
        for attempt in 0..5 {
            for _ in 0..50 {
                let delay = policy.backoff(attempt);
                let base = policy.base_delay(attempt);
                assert!(delay >= base);
                assert!(delay < base + Duration::from_millis(10));
            }
        }
    }

    #[test]
    fn backoff_without_jitter_is_exact_and_non_decreasing() {
        let policy = RetryPolicy::new(40)
            .with_base_backoff(Duration::from_millis(3))
            .with_jitter_bound(Duration::ZERO);
        let delays: Vec<_> = (0..40).map(|attempt| policy.backoff(attempt)).collect();
        assert_eq!(delays[0], Duration::from_millis(3));
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn base_delay_keeps_doubling_past_sixteen_attempts() {
        let policy = RetryPolicy::new(40).with_base_backoff(Duration::from_millis(1));
        assert_eq!(policy.base_delay(16), Duration::from_millis(1 << 16));
        assert_eq!(policy.base_delay(17), Duration::from_millis(1 << 17));
        assert_eq!(policy.base_delay(20), policy.base_delay(19) * 2);
    }

    #[test]
    fn base_delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(u32::MAX).with_base_backoff(Duration::from_secs(1));
        assert_eq!(policy.base_delay(31), Duration::from_secs(1 << 31));
        assert_eq!(policy.base_delay(32), Duration::MAX);
        assert_eq!(policy.base_delay(u32::MAX), Duration::MAX);
        assert_eq!(policy.backoff(u32::MAX), Duration::MAX);
    }

    #[tokio::test]
    async fn succeeds_after_f_transient_failures_within_budget() {
        for budget in 0..4u32 {
            for failures in 0..=budget {
                let calls = AtomicU32::new(0);
                let executor = RetryExecutor::<u32, &str>::new(fast_policy(budget));
                let result = executor
                    .run(|| {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n < failures {
                                Err("transient")
                            } else {
                                Ok(n)
                            }
                        }
                    })
                    .await;

                assert_eq!(result, Ok(failures));
                assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
            }
        }
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::<(), String>::new(fast_policy(2));
        let result = executor
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure #{n}")) }
            })
            .await;

        assert_eq!(result, Err("failure #2".to_owned()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn should_retry_false_is_terminal() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::<(), &str>::new(fast_policy(5))
            .should_retry(|err: &&str| *err != "permanent");
        let result = executor
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            })
            .await;

        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_on_result_forces_retry_until_budget() {
        let calls = AtomicU32::new(0);
        let executor =
            RetryExecutor::<u32, ()>::new(fast_policy(2)).retry_on_result(|value| *value < 100);
        let result = executor
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n) }
            })
            .await;

        // The final attempt's result is returned even if the predicate still matches.
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_on_result_stops_when_predicate_clears() {
        let calls = AtomicU32::new(0);
        let executor =
            RetryExecutor::<u32, ()>::new(fast_policy(5)).retry_on_result(|value| *value < 1);
        let result = executor
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(n) }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_wait_base_then_double_base() {
        let policy = RetryPolicy::new(3)
            .with_base_backoff(Duration::from_millis(100))
            .with_jitter_bound(Duration::from_millis(10));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = RetryExecutor::<&str, &str>::new(policy)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        let waited = started.elapsed();
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(waited >= Duration::from_millis(300));
        assert!(waited < Duration::from_millis(320));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_does_not_wait() {
        let started = Instant::now();
        let result = RetryExecutor::<u8, ()>::new(RetryPolicy::new(3))
            .run(|| async { Ok(7) })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}

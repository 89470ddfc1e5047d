use std::time::Duration;

use crate::{HttpError, Result, RetryPolicy};

/// Default per-request deadline for clients created by the manager.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_TIMEOUT_MS: &str = "RESILIENT_HTTP_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "RESILIENT_HTTP_MAX_RETRIES";
const ENV_RETRY_BACKOFF_MS: &str = "RESILIENT_HTTP_RETRY_BACKOFF_MS";
const ENV_RETRY_JITTER_MS: &str = "RESILIENT_HTTP_RETRY_JITTER_MS";

/// Per-call deadline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Timeout {
    /// Each attempt is abandoned once this much time has passed.
    After(Duration),
    /// No deadline; no timer is created for the call.
    Infinite,
}

impl Timeout {
    pub fn from_millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }

    /// Returns the finite deadline, or `None` for [`Timeout::Infinite`].
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::After(duration) => Some(*duration),
            Self::Infinite => None,
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::After(DEFAULT_TIMEOUT)
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// Configures the default timeout and retry behavior of created clients.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct ClientOptions {
    /// Deadline used when a request carries no override.
    pub timeout: Timeout,
    /// Retry policy applied to every request of the client.
    pub retry: RetryPolicy,
}

impl ClientOptions {
    /// Reads options from environment variables.
    ///
    /// Reads:
    /// - `RESILIENT_HTTP_TIMEOUT_MS`: milliseconds, or `infinite`
    /// - `RESILIENT_HTTP_MAX_RETRIES`
    /// - `RESILIENT_HTTP_RETRY_BACKOFF_MS`
    /// - `RESILIENT_HTTP_RETRY_JITTER_MS`
    ///
    /// Unset variables keep their defaults. Values that do not parse are
    /// reported as [`HttpError::Config`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(raw) = non_empty(lookup(ENV_TIMEOUT_MS)) {
            options.timeout = if raw.eq_ignore_ascii_case("infinite") {
                Timeout::Infinite
            } else {
                Timeout::from_millis(parse_number(ENV_TIMEOUT_MS, &raw)?)
            };
        }
        if let Some(raw) = non_empty(lookup(ENV_MAX_RETRIES)) {
            options.retry.max_retry = parse_number(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = non_empty(lookup(ENV_RETRY_BACKOFF_MS)) {
            options.retry.base_backoff =
                Duration::from_millis(parse_number(ENV_RETRY_BACKOFF_MS, &raw)?);
        }
        if let Some(raw) = non_empty(lookup(ENV_RETRY_JITTER_MS)) {
            options.retry.jitter_bound =
                Duration::from_millis(parse_number(ENV_RETRY_JITTER_MS, &raw)?);
        }

        Ok(options)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| HttpError::Config(format!("invalid {key} value '{raw}': {err}")))
}

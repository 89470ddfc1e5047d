use std::time::Duration;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Misuse of the handler registry or invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
    /// No transport handler registered under the requested name.
    #[error("no transport handler registered under name '{name}'")]
    NotFound { name: String },
    /// The caller's cancellation token fired. Never retried.
    #[error("request was cancelled by the caller")]
    Cancelled,
    /// The per-request deadline elapsed before the exchange, body included,
    /// completed.
    #[error("request {url} timed out after {timeout:?} (attempt {attempts})")]
    TimedOut {
        /// Target URL of the request.
        url: String,
        /// Deadline that was in effect for the attempt.
        timeout: Duration,
        /// Attempts made, this one included.
        attempts: u32,
    },
    /// Network or request execution error from `reqwest`.
    #[error("transport error for {url} (attempt {attempts}): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    /// The request could not be built or replayed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

impl HttpError {
    /// Returns `true` for failures the retry loop treats as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Transport { .. })
    }

    /// Attempts made before a retryable error surfaced.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::TimedOut { attempts, .. } | Self::Transport { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub(crate) fn with_attempts(mut self, count: u32) -> Self {
        if let Self::TimedOut { attempts, .. } | Self::Transport { attempts, .. } = &mut self {
            *attempts = count;
        }
        self
    }

    /// Returns `true` when the deadline of the last attempt elapsed.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

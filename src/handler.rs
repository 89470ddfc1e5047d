use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use reqwest::{Request, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::{
    EndpointKey, HttpError, HttpResponse, Result, RetryExecutor, RetryPolicy, Timeout,
    TransportHandler,
};

type ErrorPredicate = Arc<dyn Fn(&HttpError) -> bool + Send + Sync>;
type ResponsePredicate = Arc<dyn Fn(&HttpResponse) -> bool + Send + Sync>;

/// Enforces a per-request deadline and retries transient failures around a
/// shared [`TransportHandler`].
#[derive(Clone)]
pub struct TimeoutRetryHandler {
    transport: Arc<TransportHandler>,
    timeout: Timeout,
    retry: RetryPolicy,
    should_retry: Option<ErrorPredicate>,
    retry_on_result: Option<ResponsePredicate>,
}

impl fmt::Debug for TimeoutRetryHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutRetryHandler")
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("should_retry", &self.should_retry.is_some())
            .field("retry_on_result", &self.retry_on_result.is_some())
            .finish()
    }
}

impl TimeoutRetryHandler {
    pub fn new(transport: Arc<TransportHandler>, timeout: Timeout, retry: RetryPolicy) -> Self {
        Self {
            transport,
            timeout,
            retry,
            should_retry: None,
            retry_on_result: None,
        }
    }

    /// Narrows which transient errors are retried. Cancellation and
    /// non-transient errors are never retried, whatever the predicate says.
    pub fn with_should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&HttpError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Retries successful exchanges whose response matches `predicate`,
    /// e.g. [`transient_status`].
    pub fn with_retry_on_result<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    {
        self.retry_on_result = Some(Arc::new(predicate));
        self
    }

    pub fn transport(&self) -> &Arc<TransportHandler> {
        &self.transport
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Sends `request`, retrying per the policy.
    ///
    /// `timeout` overrides the handler's default deadline for this call. The
    /// deadline covers the whole exchange, response body included. Once
    /// `cancel` fires the call ends with [`HttpError::Cancelled`], also while
    /// waiting between attempts.
    pub async fn send(
        &self,
        request: Request,
        timeout: Option<Timeout>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let key = EndpointKey::from_url(request.url())?;
        self.transport.ensure_connection_lease(&key);

        let deadline = timeout.unwrap_or(self.timeout);
        let executor = self.executor();

        let made = AtomicU32::new(0);
        let made = &made;
        let request = &request;
        let key = &key;
        let attempts = executor.run(move || {
            let request = request.try_clone();
            let number = made.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                let request = request.ok_or_else(|| {
                    HttpError::InvalidRequest(
                        "request body is a stream and cannot be replayed".to_owned(),
                    )
                })?;
                self.attempt(key, request, deadline, cancel)
                    .await
                    .map_err(|err| err.with_attempts(number))
            }
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HttpError::Cancelled),
            result = attempts => result,
        };

        #[cfg(feature = "tracing")]
        if let Err(err) = &result {
            if err.is_retryable() {
                tracing::debug!(endpoint = %key, attempts = made.load(Ordering::Relaxed), error = %err, "request failed");
            }
        }

        result
    }

    fn executor(&self) -> RetryExecutor<HttpResponse, HttpError> {
        let user = self.should_retry.clone();
        let mut executor = RetryExecutor::<HttpResponse, HttpError>::new(self.retry.clone())
            .should_retry(move |err: &HttpError| {
                err.is_retryable() && user.as_ref().map_or(true, |predicate| predicate(err))
            });
        if let Some(predicate) = &self.retry_on_result {
            executor = executor.retry_on_result_arc(Arc::clone(predicate));
        }
        executor
    }

    /// One exchange, classified at the point where it is abandoned.
    async fn attempt(
        &self,
        key: &EndpointKey,
        request: Request,
        deadline: Timeout,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let url = request.url().to_string();
        let exchange = self.transport.exchange(key, request);

        match deadline.as_duration() {
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(HttpError::Cancelled),
                response = exchange => response,
            },
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(HttpError::Cancelled),
                response = tokio::time::timeout(limit, exchange) => match response {
                    Ok(response) => response,
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(endpoint = %key, timeout_ms = limit.as_millis() as u64, "request attempt timed out");

                        Err(HttpError::TimedOut {
                            url,
                            timeout: limit,
                            attempts: 1,
                        })
                    }
                },
            },
        }
    }
}

/// Matches statuses that usually clear up on their own: 429, 500, 502, 503
/// and 504.
pub fn transient_status(response: &HttpResponse) -> bool {
    matches!(
        response.status(),
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

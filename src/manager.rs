//! Creates [`HttpClient`]s over shared, named transports.
//!
//! Clients are cheap and may be created per call site; the transports behind
//! them are long-lived and shared, so connections are pooled across clients.

use std::sync::Arc;

use crate::{
    ClientOptions, HandlerRegistry, HttpClient, Result, RetryPolicy, Timeout,
    TimeoutRetryHandler, TransportHandler, DEFAULT_HANDLER,
};

/// Owns the handler registry and the defaults applied to created clients.
#[derive(Debug, Default)]
pub struct HttpClientManager {
    registry: HandlerRegistry,
    options: ClientOptions,
}

impl HttpClientManager {
    /// Creates a manager with [`ClientOptions::default`]: 30 s timeout and
    /// no retries.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            options,
        }
    }

    /// Registers a shared transport under `name`.
    pub fn add_http_handler(
        &self,
        name: impl Into<String>,
        handler: impl Into<Arc<TransportHandler>>,
    ) -> Result<&Self> {
        self.registry.register(name, handler)?;
        Ok(self)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Client over the default transport with the manager's defaults.
    pub fn create_client(&self) -> Result<HttpClient> {
        self.create_named_client(DEFAULT_HANDLER)
    }

    /// Client over the transport registered as `name`, with the manager's
    /// default timeout and retry policy.
    pub fn create_named_client(&self, name: &str) -> Result<HttpClient> {
        self.create_client_with(name, self.options.timeout, self.options.retry.clone())
    }

    /// Client over the transport registered as `name`.
    ///
    /// The client has no outer timeout of its own; `timeout` is enforced per
    /// attempt inside the handler.
    pub fn create_client_with(
        &self,
        name: &str,
        timeout: Timeout,
        retry: RetryPolicy,
    ) -> Result<HttpClient> {
        let transport = self.registry.resolve(name)?;
        Ok(HttpClient::new(TimeoutRetryHandler::new(
            transport, timeout, retry,
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::HttpClientManager;
    use crate::{ClientOptions, HttpError, RetryPolicy, Timeout, TransportHandler};

    #[test]
    fn default_client_uses_manager_defaults() {
        let manager = HttpClientManager::new();
        let client = manager.create_client().expect("default client must build");
        assert_eq!(client.handler().timeout(), Timeout::After(Duration::from_secs(30)));
        assert_eq!(client.handler().retry_policy().max_retry, 0);
    }

    #[test]
    fn unknown_name_fails_fast() {
        let manager = HttpClientManager::new();
        let err = manager
            .create_named_client("nope")
            .expect_err("must fail");
        assert!(matches!(err, HttpError::NotFound { .. }));
    }

    #[test]
    fn reserved_name_cannot_be_replaced() {
        let manager = HttpClientManager::new();
        let err = manager
            .add_http_handler("default", TransportHandler::new().expect("transport must build"))
            .expect_err("must fail");
        assert!(matches!(err, HttpError::Config(_)));
    }

    #[test]
    fn clients_of_one_name_share_the_transport() {
        let manager = HttpClientManager::with_options(ClientOptions {
            timeout: Timeout::Infinite,
            retry: RetryPolicy::new(3),
        });
        manager
            .add_http_handler("api", TransportHandler::new().expect("transport must build"))
            .expect("must register")
            .add_http_handler("search", TransportHandler::new().expect("transport must build"))
            .expect("must register");

        let first = manager.create_named_client("api").expect("must build");
        let second = manager
            .create_client_with("api", Timeout::from_millis(5), RetryPolicy::none())
            .expect("must build");
        let other = manager.create_named_client("search").expect("must build");

        assert!(Arc::ptr_eq(first.handler().transport(), second.handler().transport()));
        assert!(!Arc::ptr_eq(first.handler().transport(), other.handler().transport()));
        assert_eq!(first.handler().timeout(), Timeout::Infinite);
        assert_eq!(first.handler().retry_policy().max_retry, 3);
        assert_eq!(second.handler().timeout(), Timeout::from_millis(5));
    }
}

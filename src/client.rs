use std::{fmt, sync::Arc};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    body::{content_types, encode_body},
    response::{ensure_success, read_json},
    url_util::{append_query, combine_url},
    Body, HttpError, HttpResponse, QueryString, Result, Timeout, TimeoutRetryHandler,
};

/// Per-call request settings.
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    query: Option<QueryString>,
    body: Option<Body>,
    content_type: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Option<Timeout>,
    cancel: Option<CancellationToken>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<QueryString>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Content-type hint for text bodies. Defaults to JSON.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Overrides the client's default deadline for this call only. A zero
    /// duration means no override.
    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = match timeout.into() {
            Timeout::After(limit) if limit.is_zero() => None,
            timeout => Some(timeout),
        };
        self
    }

    /// Cancels the call, retries included, once `token` fires.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Clone)]
enum Authorization {
    Raw(String),
    Basic { username: String, password: String },
}

/// HTTP client bound to one shared transport through a
/// [`TimeoutRetryHandler`].
///
/// Cloning is cheap; clones share the handler and its transport.
#[derive(Clone)]
pub struct HttpClient {
    handler: Arc<TimeoutRetryHandler>,
    base_address: Option<String>,
    default_headers: HeaderMap,
    authorization: Option<Authorization>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("handler", &self.handler)
            .field("base_address", &self.base_address)
            .field("default_headers", &self.default_headers.len())
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl HttpClient {
    pub fn new(handler: TimeoutRetryHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            base_address: None,
            default_headers: HeaderMap::new(),
            authorization: None,
        }
    }

    /// Relative request URLs are joined onto `base_address`. Absolute URLs
    /// are used unchanged.
    pub fn with_base_address(mut self, base_address: impl Into<String>) -> Self {
        self.base_address = Some(base_address.into());
        self
    }

    /// Adds a header sent with every request.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value).map_err(HttpError::Config)?;
        self.default_headers.append(name, value);
        Ok(self)
    }

    /// Sends `Authorization: <value>` verbatim.
    pub fn with_raw_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(Authorization::Raw(authorization.into()));
        self
    }

    /// Sends a bearer token. The `Bearer ` prefix is added when missing.
    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        let authorization = normalize_bearer_authorization(token.as_ref());
        self.with_raw_authorization(authorization)
    }

    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.authorization = Some(Authorization::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// See [`TimeoutRetryHandler::with_should_retry`].
    pub fn with_should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&HttpError) -> bool + Send + Sync + 'static,
    {
        let handler = self.handler.as_ref().clone().with_should_retry(predicate);
        self.handler = Arc::new(handler);
        self
    }

    /// See [`TimeoutRetryHandler::with_retry_on_result`].
    pub fn with_retry_on_result<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    {
        let handler = self.handler.as_ref().clone().with_retry_on_result(predicate);
        self.handler = Arc::new(handler);
        self
    }

    pub fn handler(&self) -> &TimeoutRetryHandler {
        &self.handler
    }

    /// Builds and sends one request. The returned body is already read.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        options: SendOptions,
    ) -> Result<HttpResponse> {
        if url.trim().is_empty() {
            return Err(HttpError::InvalidRequest("url cannot be empty".to_owned()));
        }
        let full_url = self.build_url(url, options.query.as_ref());

        let mut builder = self
            .handler
            .transport()
            .client()
            .request(method, &full_url)
            .headers(self.default_headers.clone());

        builder = match &self.authorization {
            Some(Authorization::Raw(value)) => builder.header(AUTHORIZATION, value),
            Some(Authorization::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            None => builder,
        };

        for (name, value) in &options.headers {
            let (name, value) = parse_header(name, value).map_err(HttpError::InvalidRequest)?;
            builder = builder.header(name, value);
        }

        if let Some(body) = &options.body {
            let hint = options.content_type.as_deref().unwrap_or(content_types::JSON);
            let (payload, media_type) = encode_body(body, hint);
            builder = builder
                .header(CONTENT_TYPE, format!("{media_type}; charset=utf-8"))
                .body(payload);
        }

        let request = builder.build().map_err(|err| {
            HttpError::InvalidRequest(format!("cannot build request for '{full_url}': {err}"))
        })?;
        let cancel = options.cancel.unwrap_or_default();
        self.handler.send(request, options.timeout, &cancel).await
    }

    pub async fn get(&self, url: &str, options: SendOptions) -> Result<HttpResponse> {
        self.send(Method::GET, url, options).await
    }

    /// GET that requires a 2xx status and returns the body as text.
    pub async fn get_string(&self, url: &str, options: SendOptions) -> Result<String> {
        Ok(ensure_success(self.get(url, options).await?)?.text())
    }

    /// GET that requires a 2xx status and returns the raw body.
    pub async fn get_bytes(&self, url: &str, options: SendOptions) -> Result<Bytes> {
        Ok(ensure_success(self.get(url, options).await?)?.into_body())
    }

    /// GET that requires a 2xx status and a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: SendOptions,
    ) -> Result<T> {
        read_json(&ensure_success(self.get(url, options).await?)?)
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Body>,
        options: SendOptions,
    ) -> Result<HttpResponse> {
        self.send(Method::POST, url, options.body(body)).await
    }

    /// POST that requires a 2xx status and returns the body as text.
    pub async fn post_for_string(
        &self,
        url: &str,
        body: impl Into<Body>,
        options: SendOptions,
    ) -> Result<String> {
        Ok(ensure_success(self.post(url, body, options).await?)?.text())
    }

    /// POST that requires a 2xx status and returns the raw body.
    pub async fn post_for_bytes(
        &self,
        url: &str,
        body: impl Into<Body>,
        options: SendOptions,
    ) -> Result<Bytes> {
        Ok(ensure_success(self.post(url, body, options).await?)?.into_body())
    }

    pub async fn put(
        &self,
        url: &str,
        body: impl Into<Body>,
        options: SendOptions,
    ) -> Result<HttpResponse> {
        self.send(Method::PUT, url, options.body(body)).await
    }

    pub async fn patch(
        &self,
        url: &str,
        body: impl Into<Body>,
        options: SendOptions,
    ) -> Result<HttpResponse> {
        self.send(Method::PATCH, url, options.body(body)).await
    }

    pub async fn delete(&self, url: &str, options: SendOptions) -> Result<HttpResponse> {
        self.send(Method::DELETE, url, options).await
    }

    fn build_url(&self, url: &str, query: Option<&QueryString>) -> String {
        let url = match &self.base_address {
            Some(base) if Url::parse(url).is_err() => combine_url(base, url),
            _ => url.to_owned(),
        };
        match query {
            Some(query) => append_query(&url, &query.to_string()),
            None => url,
        }
    }
}

fn parse_header(name: &str, value: &str) -> std::result::Result<(HeaderName, HeaderValue), String> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| format!("invalid header name '{name}': {err}"))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|err| format!("invalid value for header '{name}': {err}"))?;
    Ok((header_name, header_value))
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

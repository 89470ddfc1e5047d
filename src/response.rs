use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    StatusCode, Url,
};
use serde::de::DeserializeOwned;

use crate::{body::content_types, HttpError, Result};

/// A response whose body was read in full inside the exchange, so the
/// request deadline covered the download too.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            url,
            body: body.into(),
        }
    }

    pub(crate) async fn buffer(response: reqwest::Response) -> reqwest::Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            url,
            body,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body as text. Invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Fails with [`HttpError::HttpStatus`] unless the status is 2xx.
pub fn ensure_success(response: HttpResponse) -> Result<HttpResponse> {
    if response.status.is_success() {
        return Ok(response);
    }
    Err(HttpError::HttpStatus {
        status: response.status.as_u16(),
        url: response.url.to_string(),
        body: response.text(),
    })
}

/// Deserializes a JSON response body.
///
/// Responses whose content type is not JSON are rejected without looking at
/// the body.
pub fn read_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    let media_type = response.content_type().unwrap_or_default();
    if !media_type.contains(content_types::JSON) {
        return Err(HttpError::Decode(format!(
            "content type \"{media_type}\" not supported"
        )));
    }

    serde_json::from_slice(&response.body).map_err(|err| {
        HttpError::Decode(format!(
            "invalid JSON response: {err}; body: {}",
            response.text()
        ))
    })
}

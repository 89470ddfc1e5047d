//! `resilient-http` issues outbound HTTP requests through shared, pooled
//! transports with per-request deadlines and bounded retries.
//!
//! - [`HttpClientManager`] owns a registry of named [`TransportHandler`]s and
//!   creates [`HttpClient`]s bound to them.
//! - [`TimeoutRetryHandler`] enforces the deadline of every attempt and
//!   drives [`RetryExecutor`].
//! - Each transport applies a connection lease once per endpoint so pooled
//!   connections are periodically retired and DNS changes are picked up.

mod body;
mod client;
mod error;
mod handler;
mod lease;
mod manager;
mod options;
mod params;
mod registry;
mod response;
mod retry;
mod transport;
mod url_util;

pub use body::{content_types, encode_body, Body};
pub use client::{HttpClient, SendOptions};
pub use error::HttpError;
pub use handler::{transient_status, TimeoutRetryHandler};
pub use lease::{EndpointKey, EndpointLeaseTracker};
pub use manager::HttpClientManager;
pub use options::{ClientOptions, Timeout, DEFAULT_TIMEOUT};
pub use params::{FormString, QueryString};
pub use registry::{HandlerRegistry, DEFAULT_HANDLER};
pub use response::{ensure_success, read_json, HttpResponse};
pub use retry::{RetryExecutor, RetryPolicy, DEFAULT_BASE_BACKOFF, DEFAULT_JITTER_BOUND};
pub use transport::{TransportHandler, TransportTuning, CONNECTION_LEASE_PERIOD};
pub use url_util::{append_query, combine_url};

pub type Result<T> = std::result::Result<T, HttpError>;

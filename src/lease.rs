use std::fmt;

use dashmap::{mapref::entry::Entry, DashMap};
use reqwest::Url;

use crate::{HttpError, Result};

/// Identifies an endpoint for one-time transport configuration.
///
/// Only scheme, host and port take part; path and query are ignored, so
/// `https://a.example/x` and `https://a.example:443/y?z=1` share a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    scheme: String,
    host: String,
    port: u16,
}

impl EndpointKey {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Derives the key of a request target. The port falls back to the
    /// scheme's well-known default.
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::InvalidRequest(format!("url '{url}' has no host")))?;
        let port = url.port_or_known_default().ok_or_else(|| {
            HttpError::InvalidRequest(format!("url '{url}' has no port for its scheme"))
        })?;
        Ok(Self::new(url.scheme(), host, port))
    }

    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| HttpError::InvalidRequest(format!("invalid url '{url}': {err}")))?;
        Self::from_url(&url)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Set of endpoints that already received their one-time configuration.
///
/// The set only grows. Check-then-insert is atomic per key: the configure
/// callback runs while the key's shard is write-locked, so concurrent first
/// requests to one endpoint configure it exactly once. Requests to known
/// endpoints only take a shard read lock.
#[derive(Debug, Default)]
pub struct EndpointLeaseTracker {
    known: DashMap<EndpointKey, ()>,
}

impl EndpointLeaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `configure` for `key` unless it already ran for that key.
    ///
    /// Returns `true` when this call performed the configuration.
    pub fn ensure_configured<F>(&self, key: &EndpointKey, configure: F) -> bool
    where
        F: FnOnce(&EndpointKey),
    {
        if self.known.contains_key(key) {
            return false;
        }

        match self.known.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                configure(key);
                slot.insert(());
                true
            }
        }
    }

    pub fn contains(&self, key: &EndpointKey) -> bool {
        self.known.contains_key(key)
    }

    /// Number of configured endpoints.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

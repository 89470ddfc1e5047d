use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{mapref::entry::Entry, DashMap};
use reqwest::{header::EXPECT, Request};
use tokio::sync::Semaphore;

use crate::{EndpointKey, EndpointLeaseTracker, HttpError, HttpResponse, Result};

/// How long the connections of one endpoint may be reused before the
/// endpoint's pool is retired, so that DNS changes are eventually picked up.
pub const CONNECTION_LEASE_PERIOD: Duration = Duration::from_secs(120);

/// Connection tuning applied once, when a transport is built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportTuning {
    /// Simultaneous connections per endpoint. Further exchanges queue.
    pub max_connections_per_endpoint: usize,
    /// Whether requests may carry `Expect: 100-continue`.
    pub expect_continue: bool,
    /// Whether Nagle's algorithm stays enabled on sockets.
    pub nagle: bool,
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            max_connections_per_endpoint: 10,
            expect_continue: false,
            nagle: false,
        }
    }
}

struct ConnectionLease {
    period: Duration,
    // Milliseconds since the transport's epoch.
    renewed_at: u64,
}

/// Connections to one endpoint: a dedicated pool plus the permits that cap
/// how many exchanges use it at once.
struct EndpointPool {
    client: Option<reqwest::Client>,
    permits: Arc<Semaphore>,
    lease: Option<ConnectionLease>,
    generation: u64,
}

impl EndpointPool {
    fn new(max_connections: usize) -> Self {
        Self {
            client: None,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            lease: None,
            generation: 0,
        }
    }

    fn lease_due(&self, now: u64) -> bool {
        self.lease.as_ref().is_some_and(|lease| {
            let period = u64::try_from(lease.period.as_millis()).unwrap_or(u64::MAX);
            now.saturating_sub(lease.renewed_at) >= period
        })
    }

    fn ready(&self, now: u64) -> Option<(reqwest::Client, Arc<Semaphore>)> {
        match &self.client {
            Some(client) if !self.lease_due(now) => {
                Some((client.clone(), Arc::clone(&self.permits)))
            }
            _ => None,
        }
    }
}

/// Shared, long-lived owner of per-endpoint connection pools.
///
/// One transport is shared, as `Arc<TransportHandler>`, by every client
/// created from the same registry entry.
pub struct TransportHandler {
    template: reqwest::Client,
    tuning: TransportTuning,
    tracker: EndpointLeaseTracker,
    pools: DashMap<EndpointKey, EndpointPool>,
    epoch: Instant,
}

impl fmt::Debug for TransportHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandler")
            .field("tuning", &self.tuning)
            .field("endpoints", &self.pools.len())
            .field("leased_endpoints", &self.tracker.len())
            .finish()
    }
}

impl TransportHandler {
    /// Builds a transport with [`TransportTuning::default`].
    pub fn new() -> Result<Self> {
        Self::with_tuning(TransportTuning::default())
    }

    /// Builds a transport with explicit tuning.
    ///
    /// Clients have no global timeout; deadlines are enforced per request
    /// by [`crate::TimeoutRetryHandler`].
    pub fn with_tuning(tuning: TransportTuning) -> Result<Self> {
        Ok(Self {
            template: build_client(&tuning)?,
            tuning,
            tracker: EndpointLeaseTracker::new(),
            pools: DashMap::new(),
            epoch: Instant::now(),
        })
    }

    /// Client used to build requests. Exchanges run on the per-endpoint
    /// pools, not on this client.
    pub fn client(&self) -> &reqwest::Client {
        &self.template
    }

    pub fn tuning(&self) -> &TransportTuning {
        &self.tuning
    }

    /// Endpoints that already received their connection lease.
    pub fn lease_tracker(&self) -> &EndpointLeaseTracker {
        &self.tracker
    }

    /// Applies the connection lease to `key` the first time the endpoint is
    /// seen. Returns `true` when this call applied it.
    pub fn ensure_connection_lease(&self, key: &EndpointKey) -> bool {
        self.tracker.ensure_configured(key, |key| {
            self.set_connection_lease(key, CONNECTION_LEASE_PERIOD);
        })
    }

    pub fn has_connection_lease(&self, key: &EndpointKey) -> bool {
        self.pools
            .get(key)
            .is_some_and(|pool| pool.lease.is_some())
    }

    pub(crate) fn set_connection_lease(&self, key: &EndpointKey, period: Duration) {
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %key, period_ms = period.as_millis() as u64, "connection lease configured");

        let now = self.now_ms();
        let mut pool = self
            .pools
            .entry(key.clone())
            .or_insert_with(|| EndpointPool::new(self.tuning.max_connections_per_endpoint));
        pool.lease = Some(ConnectionLease {
            period,
            renewed_at: now,
        });
    }

    /// Number of times the pool of `key` was retired and replaced.
    pub(crate) fn pool_generation(&self, key: &EndpointKey) -> Option<u64> {
        self.pools.get(key).map(|pool| pool.generation)
    }

    /// Sends one request and reads its body in full.
    ///
    /// At most `max_connections_per_endpoint` exchanges per endpoint run at
    /// once; the rest wait for a permit.
    pub async fn exchange(&self, key: &EndpointKey, mut request: Request) -> Result<HttpResponse> {
        if !self.tuning.expect_continue {
            request.headers_mut().remove(EXPECT);
        }
        let (client, permits) = self.checkout(key)?;
        let _permit = permits.acquire().await.map_err(|_| {
            HttpError::InvalidRequest(format!("connection limiter for {key} is closed"))
        })?;

        let url = request.url().to_string();
        let transport_error = |source| HttpError::Transport {
            url: url.clone(),
            attempts: 1,
            source,
        };
        let response = client.execute(request).await.map_err(transport_error)?;
        HttpResponse::buffer(response).await.map_err(transport_error)
    }

    /// Returns the pool of `key`, building it on first use and replacing it
    /// once its lease ran out. Replacing the client drops every idle
    /// connection of the endpoint; in-flight exchanges finish on the old one.
    pub(crate) fn checkout(&self, key: &EndpointKey) -> Result<(reqwest::Client, Arc<Semaphore>)> {
        let now = self.now_ms();
        if let Some(ready) = self.pools.get(key).and_then(|pool| pool.ready(now)) {
            return Ok(ready);
        }

        let mut pool = match self.pools.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                entry.insert(EndpointPool::new(self.tuning.max_connections_per_endpoint))
            }
        };
        if let Some(ready) = pool.ready(now) {
            return Ok(ready);
        }

        let fresh = build_client(&self.tuning)?;
        if pool.client.replace(fresh).is_some() {
            pool.generation += 1;

            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %key, generation = pool.generation, "connection lease expired, pool retired");
        }
        if let Some(lease) = pool.lease.as_mut() {
            lease.renewed_at = now;
        }
        pool.ready(now).ok_or_else(|| {
            HttpError::Config(format!("connection pool for {key} could not be prepared"))
        })
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

fn build_client(tuning: &TransportTuning) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(tuning.max_connections_per_endpoint)
        .tcp_nodelay(!tuning.nagle)
        .build()
        .map_err(|err| HttpError::Config(format!("cannot build http client: {err}")))
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::{Arc, Barrier, Mutex},
        time::Duration,
    };

    use axum::{extract::ConnectInfo, routing::get, Router};

    use super::{TransportHandler, TransportTuning};
    use crate::EndpointKey;

    fn transport() -> TransportHandler {
        TransportHandler::new().expect("transport must build")
    }

    async fn spawn_peer_recorder() -> (String, Arc<Mutex<Vec<SocketAddr>>>) {
        let peers = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&peers);
        let app = Router::new().route(
            "/ping",
            get(move |ConnectInfo(peer): ConnectInfo<SocketAddr>| {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded
                        .lock()
                        .expect("peer mutex must not be poisoned")
                        .push(peer);
                    "pong"
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("must bind test listener");
        let address = listener.local_addr().expect("must have local addr");
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("peer recorder must run");
        });

        (format!("http://{address}"), peers)
    }

    async fn ping(transport: &TransportHandler, key: &EndpointKey, url: &reqwest::Url) {
        let request = reqwest::Request::new(reqwest::Method::GET, url.clone());
        let response = transport
            .exchange(key, request)
            .await
            .expect("exchange must succeed");
        assert_eq!(response.text(), "pong");
    }

    #[test]
    fn default_tuning_matches_process_defaults() {
        let tuning = TransportTuning::default();
        assert_eq!(tuning.max_connections_per_endpoint, 10);
        assert!(!tuning.expect_continue);
        assert!(!tuning.nagle);
    }

    #[test]
    fn lease_is_applied_once_per_endpoint() {
        let transport = transport();
        let key = EndpointKey::new("https", "a.example", 443);

        assert!(transport.ensure_connection_lease(&key));
        assert!(!transport.ensure_connection_lease(&key));
        assert!(transport.has_connection_lease(&key));
        assert_eq!(transport.lease_tracker().len(), 1);
    }

    #[test]
    fn fresh_lease_keeps_the_pool() {
        let transport = transport();
        let key = EndpointKey::new("https", "a.example", 443);
        transport.ensure_connection_lease(&key);

        transport.checkout(&key).expect("pool must build");
        transport.checkout(&key).expect("pool must build");
        assert_eq!(transport.pool_generation(&key), Some(0));
    }

    #[test]
    fn endpoint_without_lease_is_never_retired() {
        let transport = transport();
        let key = EndpointKey::new("http", "b.example", 80);

        transport.checkout(&key).expect("pool must build");
        assert!(!transport.has_connection_lease(&key));
        assert_eq!(transport.pool_generation(&key), Some(0));
    }

    #[test]
    fn endpoints_share_the_limit_only_with_themselves() {
        let transport = TransportHandler::with_tuning(TransportTuning {
            max_connections_per_endpoint: 2,
            ..TransportTuning::default()
        })
        .expect("transport must build");
        let a = EndpointKey::new("https", "a.example", 443);
        let b = EndpointKey::new("https", "b.example", 443);

        let (_, permits_a) = transport.checkout(&a).expect("pool must build");
        let (_, again_a) = transport.checkout(&a).expect("pool must build");
        let (_, permits_b) = transport.checkout(&b).expect("pool must build");

        assert!(Arc::ptr_eq(&permits_a, &again_a));
        assert!(!Arc::ptr_eq(&permits_a, &permits_b));
        assert_eq!(permits_a.available_permits(), 2);
    }

    #[test]
    fn due_lease_retires_the_pool_exactly_once() {
        const THREADS: usize = 16;

        let transport = transport();
        let key = EndpointKey::new("https", "a.example", 443);
        transport.set_connection_lease(&key, Duration::from_millis(200));
        transport.checkout(&key).expect("pool must build");
        std::thread::sleep(Duration::from_millis(250));

        let barrier = Barrier::new(THREADS);
        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    barrier.wait();
                    transport.checkout(&key).expect("pool must build");
                });
            }
        });

        assert_eq!(transport.pool_generation(&key), Some(1));
    }

    #[tokio::test]
    async fn due_lease_moves_the_endpoint_to_new_connections() {
        let (base, peers) = spawn_peer_recorder().await;
        let transport = transport();
        let url = reqwest::Url::parse(&format!("{base}/ping")).expect("url must parse");
        let key = EndpointKey::from_url(&url).expect("key must parse");
        transport.set_connection_lease(&key, Duration::from_millis(300));

        ping(&transport, &key, &url).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        ping(&transport, &key, &url).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        ping(&transport, &key, &url).await;

        let peers = peers.lock().expect("peer mutex must not be poisoned").clone();
        assert_eq!(peers.len(), 3);
        assert_eq!(peers[0], peers[1], "pooled connection must be reused");
        assert_ne!(peers[1], peers[2], "retired pool must not be reused");
        assert_eq!(transport.pool_generation(&key), Some(1));
    }
}

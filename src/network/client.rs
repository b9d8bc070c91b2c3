//! Client for fetching values from other peers.

use crate::config::PeerClientConfig;
use crate::error::{Error, NetworkError, Result};
use crate::metrics::Counter;
use crate::network::rpc::{
    read_message, write_message, FetchRequest, Message, PingRequest, PongResponse,
};
use crate::types::PeerId;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Fetches a key from the peer that owns it.
#[async_trait]
pub trait PeerFetcher: Send + Sync + 'static {
    /// Ask `peer` for `key` in `group`, served from the peer's own store or
    /// loader.
    async fn fetch(&self, peer: &PeerId, group: &str, key: &[u8]) -> Result<Bytes>;
}

/// TCP client for the peer protocol.
///
/// Every call has a deadline covering permit acquisition, connect, send and
/// receive. Idle connections are kept per peer and reused; a connection that
/// fails mid-call is discarded.
pub struct PeerClient {
    config: PeerClientConfig,
    permits: Semaphore,
    idle: Mutex<HashMap<PeerId, Vec<TcpStream>>>,
    calls: Counter,
    failures: Counter,
}

impl PeerClient {
    pub fn new(config: PeerClientConfig) -> Self {
        Self {
            permits: Semaphore::new(config.max_outstanding.max(1)),
            idle: Mutex::new(HashMap::new()),
            calls: Counter::new(),
            failures: Counter::new(),
            config,
        }
    }

    /// Run the full lookup path on `peer`, as an external client would.
    pub async fn get(&self, peer: &PeerId, group: &str, key: &[u8]) -> Result<Bytes> {
        let request = FetchRequest::new(group, Bytes::copy_from_slice(key));
        self.lookup(peer, Message::Get(request)).await
    }

    /// Check that `peer` is up and list the groups it serves.
    pub async fn ping(&self, peer: &PeerId, from: Option<&PeerId>) -> Result<PongResponse> {
        let ping = PingRequest {
            from: from.map(|p| p.to_string()),
        };
        match self.call(peer, Message::Ping(ping)).await? {
            Message::Pong(pong) => Ok(pong),
            other => Err(self.unexpected(peer, &other)),
        }
    }

    /// Requests sent so far.
    pub fn calls(&self) -> u64 {
        self.calls.get()
    }

    /// Requests that failed before a response was decoded.
    pub fn failures(&self) -> u64 {
        self.failures.get()
    }

    /// Permits currently available for new requests.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn lookup(&self, peer: &PeerId, msg: Message) -> Result<Bytes> {
        match self.call(peer, msg).await? {
            Message::Response(response) => response.into_result(),
            other => Err(self.unexpected(peer, &other)),
        }
    }

    fn unexpected(&self, peer: &PeerId, msg: &Message) -> Error {
        self.failures.inc();
        Error::Protocol(format!("unexpected reply from {peer}: {msg:?}"))
    }

    /// Send one request and wait for its reply within the request deadline.
    async fn call(&self, peer: &PeerId, msg: Message) -> Result<Message> {
        self.calls.inc();
        let deadline = Instant::now() + self.config.request_timeout;

        let result = self.call_until(peer, &msg, deadline).await;
        if let Err(e) = &result {
            self.failures.inc();
            debug!(peer = %peer, error = %e, "Peer request failed");
        }
        result
    }

    async fn call_until(&self, peer: &PeerId, msg: &Message, deadline: Instant) -> Result<Message> {
        let _permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                trace!(peer = %peer, "Waiting for a request permit");
                tokio::time::timeout_at(deadline, self.permits.acquire())
                    .await
                    .map_err(|_| NetworkError::Busy {
                        limit: self.config.max_outstanding,
                    })?
                    .map_err(|_| Error::Internal("peer client closed".into()))?
            }
            Err(TryAcquireError::Closed) => {
                return Err(Error::Internal("peer client closed".into()));
            }
        };

        tokio::time::timeout_at(deadline, self.exchange_with(peer, msg))
            .await
            .map_err(|_| NetworkError::Timeout {
                addr: peer.to_string(),
            })?
    }

    async fn exchange_with(&self, peer: &PeerId, msg: &Message) -> Result<Message> {
        if let Some(mut stream) = self.take_idle(peer) {
            match exchange(&mut stream, msg).await {
                Ok(reply) => {
                    self.put_idle(peer, stream);
                    return Ok(reply);
                }
                // The peer may have closed a pooled connection; one fresh
                // attempt on a new connection.
                Err(Error::Network(e)) => {
                    trace!(peer = %peer, error = %e, "Pooled connection failed, reconnecting");
                }
                Err(e) => return Err(e),
            }
        }

        let mut stream = self.connect(peer).await?;
        let reply = exchange(&mut stream, msg).await?;
        self.put_idle(peer, stream);
        Ok(reply)
    }

    async fn connect(&self, peer: &PeerId) -> Result<TcpStream> {
        let connection_failed = |reason: String| NetworkError::ConnectionFailed {
            addr: peer.to_string(),
            reason,
        };

        let addr = tokio::net::lookup_host(peer.as_str())
            .await
            .map_err(|e| NetworkError::InvalidAddress(format!("{peer}: {e}")))?
            .next()
            .ok_or_else(|| NetworkError::InvalidAddress(format!("{peer}: no addresses resolved")))?;

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| connection_failed("connect timed out".into()))?
            .map_err(|e| connection_failed(e.to_string()))?;
        stream.set_nodelay(true)?;

        debug!(peer = %peer, addr = %addr, "Connected to peer");
        Ok(stream)
    }

    fn take_idle(&self, peer: &PeerId) -> Option<TcpStream> {
        self.idle.lock().get_mut(peer)?.pop()
    }

    fn put_idle(&self, peer: &PeerId, stream: TcpStream) {
        let mut idle = self.idle.lock();
        let conns = idle.entry(peer.clone()).or_default();
        if conns.len() < self.config.max_idle_per_peer {
            conns.push(stream);
        }
    }
}

async fn exchange(stream: &mut TcpStream, msg: &Message) -> Result<Message> {
    write_message(stream, msg).await?;
    read_message(stream)
        .await?
        .ok_or_else(|| NetworkError::ReceiveFailed("connection closed by peer".into()).into())
}

#[async_trait]
impl PeerFetcher for PeerClient {
    async fn fetch(&self, peer: &PeerId, group: &str, key: &[u8]) -> Result<Bytes> {
        let request = FetchRequest::new(group, Bytes::copy_from_slice(key));
        self.lookup(peer, Message::Fetch(request)).await
    }
}

impl std::fmt::Debug for PeerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerClient")
            .field("config", &self.config)
            .field("calls", &self.calls.get())
            .field("failures", &self.failures.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::network::rpc::FetchResponse;
    use crate::network::server::{PeerServer, RequestHandler};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Answers fetches for "present" and "empty", NotFound otherwise.
    struct FixedHandler {
        delay: Duration,
    }

    #[async_trait]
    impl RequestHandler for FixedHandler {
        async fn handle(&self, msg: Message) -> Option<Message> {
            tokio::time::sleep(self.delay).await;
            let req = match msg {
                Message::Fetch(req) | Message::Get(req) => req,
                _ => return None,
            };
            let result = match &req.key[..] {
                b"present" => Ok(Bytes::from_static(b"value")),
                b"empty" => Ok(Bytes::new()),
                b"down" => Err(LoadError::Unavailable("redis down".into()).into()),
                _ => Err(LoadError::NotFound.into()),
            };
            Some(Message::Response(FetchResponse::from(result)))
        }
    }

    async fn start(delay: Duration) -> (PeerId, tokio::sync::mpsc::Sender<()>) {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (server, shutdown) = PeerServer::bind(addr).await.unwrap();
        let peer = PeerId::from(server.local_addr().unwrap());
        tokio::spawn(server.run(Arc::new(FixedHandler { delay })));
        (peer, shutdown)
    }

    #[tokio::test]
    async fn test_fetch_statuses() {
        let (peer, _shutdown) = start(Duration::ZERO).await;
        let client = PeerClient::new(PeerClientConfig::default());

        assert_eq!(
            client.fetch(&peer, "g", b"present").await.unwrap(),
            Bytes::from_static(b"value")
        );
        assert_eq!(client.fetch(&peer, "g", b"empty").await.unwrap(), Bytes::new());
        assert!(client.fetch(&peer, "g", b"missing").await.unwrap_err().is_not_found());
        assert!(client.fetch(&peer, "g", b"down").await.unwrap_err().is_unavailable());

        assert_eq!(client.calls(), 4);
        assert_eq!(client.failures(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Grab a free port, then close it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = PeerId::from(listener.local_addr().unwrap());
        drop(listener);

        let client = PeerClient::new(PeerClientConfig::default());
        let err = client.fetch(&peer, "g", b"k").await.unwrap_err();

        assert!(matches!(err, Error::Network(NetworkError::ConnectionFailed { .. })));
        assert_eq!(client.failures(), 1);
    }

    #[tokio::test]
    async fn test_request_deadline() {
        let (peer, _shutdown) = start(Duration::from_millis(500)).await;
        let config = PeerClientConfig::default().with_request_timeout(Duration::from_millis(50));
        let client = PeerClient::new(config);

        let err = client.fetch(&peer, "g", b"present").await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_outstanding_calls_bounded() {
        let (peer, _shutdown) = start(Duration::ZERO).await;
        let config = PeerClientConfig::default()
            .with_max_outstanding(1)
            .with_request_timeout(Duration::from_millis(50));
        let client = PeerClient::new(config);

        // Occupy the only slot for longer than the request deadline
        let held = client.permits.try_acquire().unwrap();
        assert_eq!(client.available_permits(), 0);

        let err = client.fetch(&peer, "g", b"present").await.unwrap_err();
        assert!(
            matches!(err, Error::Network(NetworkError::Busy { limit: 1 })),
            "unexpected error: {err}"
        );

        drop(held);
        assert!(client.fetch(&peer, "g", b"present").await.is_ok());
    }

    #[tokio::test]
    async fn test_pooled_connection_reused() {
        let (peer, shutdown) = start(Duration::ZERO).await;
        let client = PeerClient::new(PeerClientConfig::default());
        assert!(client.fetch(&peer, "g", b"present").await.is_ok());

        // Stop accepting; only the pooled connection can still be served
        shutdown.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.fetch(&peer, "g", b"present").await.is_ok());
        assert_eq!(client.failures(), 0);
    }

    #[tokio::test]
    async fn test_ping() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let registry = Arc::new(crate::cache::GroupRegistry::new());
        let (server, _shutdown) = PeerServer::bind(addr).await.unwrap();
        let peer = PeerId::from(server.local_addr().unwrap());
        let service = crate::network::GroupService::new(registry, PeerId::new("me:1"));
        tokio::spawn(server.run(Arc::new(service)));

        let client = PeerClient::new(PeerClientConfig::default());
        let pong = client.ping(&peer, None).await.unwrap();
        assert_eq!(pong.addr, "me:1");
    }
}

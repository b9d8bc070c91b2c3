//! TCP server answering lookups from other peers.

use crate::cache::GroupRegistry;
use crate::error::{Error, NetworkError, Result};
use crate::network::rpc::{read_message, write_message, FetchResponse, Message, PongResponse};
use crate::types::PeerId;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Handler for incoming messages.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle an incoming message and optionally return a response.
    async fn handle(&self, msg: Message) -> Option<Message>;
}

/// TCP server for peer requests.
pub struct PeerServer {
    listener: TcpListener,

    /// Shutdown signal receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

impl PeerServer {
    /// Bind to `bind_addr`. Connections queue until [`run`](Self::run) is
    /// called.
    pub async fn bind(bind_addr: SocketAddr) -> Result<(Self, mpsc::Sender<()>)> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            NetworkError::ConnectionFailed {
                addr: bind_addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let server = Self {
            listener,
            shutdown_rx,
        };

        Ok((server, shutdown_tx))
    }

    /// The address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests with `handler` until a shutdown signal arrives.
    pub async fn run(mut self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        info!(addr = %self.local_addr()?, "Peer server listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted connection");
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    debug!(peer = %peer_addr, error = %e, "Connection handler error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Peer server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<()> {
        stream.set_nodelay(true)?;

        while let Some(msg) = read_message(&mut stream).await? {
            if let Some(response) = handler.handle(msg).await {
                write_message(&mut stream, &response).await?;
            }
        }

        Ok(())
    }
}

/// Serves lookups against the groups of a [`GroupRegistry`].
pub struct GroupService {
    registry: Arc<GroupRegistry>,
    self_id: PeerId,
}

impl GroupService {
    pub fn new(registry: Arc<GroupRegistry>, self_id: PeerId) -> Self {
        Self { registry, self_id }
    }
}

#[async_trait]
impl RequestHandler for GroupService {
    async fn handle(&self, msg: Message) -> Option<Message> {
        let response: FetchResponse = match msg {
            Message::Fetch(req) => match self.registry.get_group(&req.group) {
                Some(group) => group.load_local(&req.key).await.into(),
                None => FetchResponse::from_error(&Error::GroupNotFound(req.group)),
            },
            Message::Get(req) => self.registry.get(&req.group, &req.key).await.into(),
            Message::Ping(ping) => {
                debug!(from = ?ping.from, "Ping");
                return Some(Message::Pong(PongResponse {
                    addr: self.self_id.to_string(),
                    groups: self.registry.names(),
                }));
            }
            other => {
                debug!(message = ?other, "Ignoring unexpected message");
                return None;
            }
        };

        Some(Message::Response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::rpc::{FetchRequest, PingRequest};
    use bytes::Bytes;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, msg: Message) -> Option<Message> {
            Some(msg)
        }
    }

    #[tokio::test]
    async fn test_server_round_trip() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (server, shutdown_tx) = PeerServer::bind(addr).await.unwrap();
        let actual_addr = server.local_addr().unwrap();
        assert_ne!(actual_addr.port(), 0);

        let server_handle = tokio::spawn(server.run(Arc::new(EchoHandler)));

        let mut stream = TcpStream::connect(actual_addr).await.unwrap();
        let msg = Message::Fetch(FetchRequest::new("g", Bytes::from_static(b"k")));
        for _ in 0..2 {
            write_message(&mut stream, &msg).await.unwrap();
            assert_eq!(read_message(&mut stream).await.unwrap(), Some(msg.clone()));
        }

        shutdown_tx.send(()).await.unwrap();
        server_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_group_service_unknown_group() {
        let service = GroupService::new(Arc::new(GroupRegistry::new()), PeerId::new("me:1"));

        let response = service
            .handle(Message::Fetch(FetchRequest::new("nope", Bytes::new())))
            .await;
        match response {
            Some(Message::Response(resp)) => {
                assert!(matches!(resp.into_result(), Err(Error::Remote(_))));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_group_service_ping() {
        let service = GroupService::new(Arc::new(GroupRegistry::new()), PeerId::new("me:1"));

        let response = service.handle(Message::Ping(PingRequest { from: None })).await;
        assert_eq!(
            response,
            Some(Message::Pong(PongResponse {
                addr: "me:1".into(),
                groups: Vec::new(),
            }))
        );
    }
}

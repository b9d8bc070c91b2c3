//! Network communication layer.

pub mod client;
pub mod rpc;
pub mod server;

pub use client::{PeerClient, PeerFetcher};
pub use rpc::{FetchRequest, FetchResponse, Message, PingRequest, PongResponse, Status};
pub use server::{GroupService, PeerServer, RequestHandler};

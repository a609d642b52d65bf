//! RPC layer between the signaling server and media nodes.
//!
//! # Modules
//!
//! - [`transport`] - `Connector` seam and the WebSocket implementation
//! - [`connection`] - `RpcConnection`: request/notify, handshake, load samples
//! - [`handler`] - ordered inbound handler pipeline

pub mod connection;
pub mod handler;
pub mod transport;

pub use connection::{
    ReadyState, RpcConnection, RpcSettings, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use handler::{HandlerId, HandlerOutcome, InboundHandler, InboundMessage, MessageKind};
pub use transport::{ConnectTarget, Connector, Socket, WebSocketConnector};

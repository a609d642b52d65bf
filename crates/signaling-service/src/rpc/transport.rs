//! Socket seam between `RpcConnection` and the network.
//!
//! A [`Connector`] turns a [`ConnectTarget`] into a [`Socket`]: a pair of
//! frame channels. Dropping the outbound sender closes the socket; the
//! inbound receiver yielding `None` means the remote side disconnected.
//!
//! [`WebSocketConnector`] is the production implementation. Tests plug an
//! in-process media node in through the same trait.

use crate::errors::SsError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use futures::{SinkExt, StreamExt};
use media_protocol::{decode_frame, encode_frame, Frame};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

/// Frame channels of one established socket.
#[derive(Debug)]
pub struct Socket {
    /// Frames to the remote side.
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Frames from the remote side.
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

impl Socket {
    /// Create two in-memory sockets wired to each other.
    #[must_use]
    pub fn pair() -> (Socket, Socket) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Socket {
                outbound: a_tx,
                inbound: b_rx,
            },
            Socket {
                outbound: b_tx,
                inbound: a_rx,
            },
        )
    }
}

/// Where a room connection goes, and what it presents in the handshake.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    /// Media node identifier (for logging).
    pub media_node_id: String,
    /// Media node hostname.
    pub hostname: String,
    /// Media node port.
    pub port: u16,
    /// Room served over this connection.
    pub room_id: String,
    /// Shared secret authenticating the signaling server.
    pub secret: SecretString,
    /// Use `wss` instead of `ws`.
    pub secure: bool,
}

impl ConnectTarget {
    /// Connection URL with room id and secret in the query string.
    ///
    /// The result contains the secret; never log it.
    ///
    /// # Errors
    ///
    /// Returns `SsError::Config` if hostname/port do not form a valid URL.
    pub fn url(&self) -> Result<Url, SsError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}/", self.hostname, self.port))
            .map_err(|e| SsError::Config(format!("Invalid media node address: {e}")))?;
        url.query_pairs_mut()
            .append_pair("roomId", &self.room_id)
            .append_pair("secret", self.secret.expose_secret());
        Ok(url)
    }
}

/// Opens sockets to media nodes.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a socket to `target`.
    async fn connect(&self, target: &ConnectTarget) -> Result<Socket, SsError>;
}

/// WebSocket connector exchanging JSON text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Socket, SsError> {
        let url = target.url()?;

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            warn!(
                target: "ss.rpc.transport",
                media_node_id = %target.media_node_id,
                hostname = %target.hostname,
                port = target.port,
                error = %e,
                "WebSocket connect failed"
            );
            SsError::Transport(format!("Failed to connect: {e}"))
        })?;

        debug!(
            target: "ss.rpc.transport",
            media_node_id = %target.media_node_id,
            room_id = %target.room_id,
            "WebSocket connected"
        );

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<Frame>();

        let media_node_id = target.media_node_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match encode_frame(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            target: "ss.rpc.transport",
                            media_node_id = %media_node_id,
                            error = %e,
                            "Dropping unencodable frame"
                        );
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    debug!(
                        target: "ss.rpc.transport",
                        media_node_id = %media_node_id,
                        error = %e,
                        "WebSocket send failed"
                    );
                    break;
                }
            }
            let _ = write.close().await;
        });

        let media_node_id = target.media_node_id.clone();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match decode_frame(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                target: "ss.rpc.transport",
                                media_node_id = %media_node_id,
                                error = %e,
                                "Ignoring malformed frame"
                            );
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(
                            target: "ss.rpc.transport",
                            media_node_id = %media_node_id,
                            error = %e,
                            "WebSocket receive failed"
                        );
                        break;
                    }
                }
            }
        });

        Ok(Socket { outbound, inbound })
    }
}

//! `MediaNode` - handle to one media node.
//!
//! A node is reached through one RPC connection per room. Connections are
//! opened on first use, embed the room id and shared secret in the
//! handshake, and are dropped from the node once they close. Routers ride
//! on their room's connection and close (remotely) with it.
//!
//! Provisioning failures (handshake timeout, drain, request error) reject
//! only the current [`MediaNode::get_router`] call. The node itself closes
//! solely through [`MediaNode::close`].

use super::messages::{decode, RouterDescriptor};
use super::observer::CloseSignal;
use super::router::{Router, RouterOptions};
use crate::errors::SsError;
use crate::observability::set_media_node_load;
use crate::rpc::{
    ConnectTarget, Connector, HandlerOutcome, InboundMessage, MessageKind, RpcConnection,
    RpcSettings,
};

use common::secret::SecretString;
use common::types::GeoPosition;
use media_protocol::methods;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Static description of a media node plus the means to reach it.
#[derive(Clone)]
pub struct MediaNodeOptions {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub secret: SecretString,
    pub secure: bool,
    pub position: GeoPosition,
    pub connector: Arc<dyn Connector>,
    pub settings: RpcSettings,
}

struct MediaNodeInner {
    id: String,
    hostname: String,
    port: u16,
    secret: SecretString,
    secure: bool,
    position: GeoPosition,
    connector: Arc<dyn Connector>,
    settings: RpcSettings,
    /// Last load sample, as `f64` bits.
    load: AtomicU64,
    connections: Mutex<HashMap<String, RpcConnection>>,
    routers: Mutex<HashMap<String, Router>>,
    close: CloseSignal,
}

/// Handle to one media node. Cheap to clone.
#[derive(Clone)]
pub struct MediaNode {
    inner: Arc<MediaNodeInner>,
}

impl fmt::Debug for MediaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaNode")
            .field("id", &self.inner.id)
            .field("hostname", &self.inner.hostname)
            .field("port", &self.inner.port)
            .field("secret", &"[REDACTED]")
            .field("load", &self.load())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MediaNode {
    #[must_use]
    pub fn new(options: MediaNodeOptions) -> Self {
        Self {
            inner: Arc::new(MediaNodeInner {
                id: options.id,
                hostname: options.hostname,
                port: options.port,
                secret: options.secret,
                secure: options.secure,
                position: options.position,
                connector: options.connector,
                settings: options.settings,
                load: AtomicU64::new(0.0_f64.to_bits()),
                connections: Mutex::new(HashMap::new()),
                routers: Mutex::new(HashMap::new()),
                close: CloseSignal::new(),
            }),
        }
    }

    fn from_weak(weak: &Weak<MediaNodeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    #[must_use]
    pub fn position(&self) -> GeoPosition {
        self.inner.position
    }

    /// Last load sample reported by the node (0.0 until one arrives).
    #[must_use]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.inner.load.load(Ordering::Relaxed))
    }

    pub(crate) fn set_load(&self, load: f64) {
        self.inner.load.store(load.to_bits(), Ordering::Relaxed);
        set_media_node_load(&self.inner.id, load);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    /// Whether a live connection for `room_id` exists.
    #[must_use]
    pub fn has_room(&self, room_id: &str) -> bool {
        self.inner
            .connections
            .lock()
            .get(room_id)
            .is_some_and(|connection| !connection.is_closed())
    }

    /// Routers currently tracked on this node.
    #[must_use]
    pub fn routers(&self) -> Vec<Router> {
        self.inner.routers.lock().values().cloned().collect()
    }

    /// Get (or create) the router serving `room_id` on this node.
    ///
    /// # Errors
    ///
    /// - `SsError::Closed` if the node is closed
    /// - `SsError::HandshakeTimeout` / `SsError::Draining` /
    ///   `SsError::ConnectionClosed` if the handshake fails; the room
    ///   connection is closed so the next call starts afresh
    /// - Any `getRouter` request error
    #[instrument(skip_all, fields(media_node_id = %self.inner.id, room_id = %room_id))]
    pub async fn get_router(&self, room_id: &str) -> Result<Router, SsError> {
        if self.is_closed() {
            return Err(SsError::Closed("Media node"));
        }

        let connection = self.connection_for(room_id);

        if let Err(e) = connection.ready().await {
            warn!(
                target: "ss.media.node",
                media_node_id = %self.inner.id,
                room_id = %room_id,
                error = %e,
                "Media node handshake failed"
            );
            connection.close();
            return Err(e);
        }
        if let Some(load) = connection.load() {
            self.set_load(load);
        }

        let response = connection
            .request(methods::GET_ROUTER, json!({ "roomId": room_id }))
            .await?;
        let descriptor: RouterDescriptor = decode(methods::GET_ROUTER, response)?;
        self.track_router(room_id, &connection, descriptor)
    }

    fn connect_target(&self, room_id: &str) -> ConnectTarget {
        ConnectTarget {
            media_node_id: self.inner.id.clone(),
            hostname: self.inner.hostname.clone(),
            port: self.inner.port,
            room_id: room_id.to_string(),
            secret: self.inner.secret.clone(),
            secure: self.inner.secure,
        }
    }

    fn connection_for(&self, room_id: &str) -> RpcConnection {
        let connection = {
            let mut connections = self.inner.connections.lock();
            match connections.get(room_id) {
                Some(connection) if !connection.is_closed() => return connection.clone(),
                _ => {
                    let connection = RpcConnection::open(
                        Arc::clone(&self.inner.connector),
                        self.connect_target(room_id),
                        self.inner.settings,
                    );
                    connections.insert(room_id.to_string(), connection.clone());
                    connection
                }
            }
        };

        debug!(
            target: "ss.media.node",
            media_node_id = %self.inner.id,
            room_id = %room_id,
            "Opening room connection"
        );

        self.attach_new_router_handler(room_id, &connection);
        self.watch_connection(room_id, &connection);
        connection
    }

    /// Turn `newRouter` notifications into tracked routers.
    fn attach_new_router_handler(&self, room_id: &str, connection: &RpcConnection) {
        let weak = Arc::downgrade(&self.inner);
        let room_id = room_id.to_string();
        connection.add_handler(move |message: &InboundMessage<'_>| {
            if message.kind != MessageKind::Notification || message.method != methods::NEW_ROUTER {
                return HandlerOutcome::Pass;
            }
            let Some(node) = MediaNode::from_weak(&weak) else {
                return HandlerOutcome::Pass;
            };
            let descriptor: RouterDescriptor =
                match decode(methods::NEW_ROUTER, message.data.clone()) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!(
                            target: "ss.media.node",
                            media_node_id = %node.inner.id,
                            error = %e,
                            "Malformed newRouter notification"
                        );
                        return HandlerOutcome::Pass;
                    }
                };
            // Resolved through the map so the handler holds no connection.
            let Some(connection) = node.inner.connections.lock().get(&room_id).cloned() else {
                return HandlerOutcome::Pass;
            };
            match node.track_router(&room_id, &connection, descriptor) {
                Ok(_) => HandlerOutcome::Handled,
                Err(_) => HandlerOutcome::Pass,
            }
        });
    }

    fn watch_connection(&self, room_id: &str, connection: &RpcConnection) {
        let weak = Arc::downgrade(&self.inner);
        let room = room_id.to_string();
        connection.on_close(move |remote| {
            if let Some(node) = MediaNode::from_weak(&weak) {
                node.connection_closed(&room, remote);
            }
        });

        let mut load_rx = connection.subscribe_load();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while load_rx.changed().await.is_ok() {
                let Some(load) = *load_rx.borrow_and_update() else {
                    continue;
                };
                let Some(node) = MediaNode::from_weak(&weak) else {
                    break;
                };
                node.set_load(load);
            }
        });
    }

    fn connection_closed(&self, room_id: &str, remote: bool) {
        {
            let mut connections = self.inner.connections.lock();
            if connections.get(room_id).is_some_and(RpcConnection::is_closed) {
                connections.remove(room_id);
            }
        }

        let orphaned: Vec<Router> = self
            .inner
            .routers
            .lock()
            .values()
            .filter(|router| router.room_id() == room_id && router.connection().is_closed())
            .cloned()
            .collect();

        info!(
            target: "ss.media.node",
            media_node_id = %self.inner.id,
            room_id = %room_id,
            remote,
            routers = orphaned.len(),
            "Room connection closed"
        );

        for router in orphaned {
            router.close_with(true);
        }
    }

    fn track_router(
        &self,
        room_id: &str,
        connection: &RpcConnection,
        descriptor: RouterDescriptor,
    ) -> Result<Router, SsError> {
        let router = {
            let mut routers = self.inner.routers.lock();
            if self.is_closed() {
                return Err(SsError::Closed("Media node"));
            }
            match routers.get(&descriptor.id) {
                Some(router) if !router.is_closed() => return Ok(router.clone()),
                _ => {
                    let router = Router::new(RouterOptions {
                        id: descriptor.id,
                        media_node_id: self.inner.id.clone(),
                        room_id: room_id.to_string(),
                        rtp_capabilities: descriptor.rtp_capabilities,
                        connection: connection.clone(),
                    });
                    routers.insert(router.id().to_string(), router.clone());
                    router
                }
            }
        };

        info!(
            target: "ss.media.node",
            media_node_id = %self.inner.id,
            room_id = %room_id,
            router_id = %router.id(),
            "Router tracked"
        );

        let weak = Arc::downgrade(&self.inner);
        let router_id = router.id().to_string();
        router.on_close(move |()| {
            if let Some(inner) = weak.upgrade() {
                let mut routers = inner.routers.lock();
                if routers.get(&router_id).is_some_and(Router::is_closed) {
                    routers.remove(&router_id);
                }
            }
        });

        Ok(router)
    }

    /// Close every router and connection. Idempotent.
    pub fn close(&self) {
        let Some(pending) = self.inner.close.close() else {
            return;
        };

        info!(
            target: "ss.media.node",
            media_node_id = %self.inner.id,
            "Media node closed"
        );

        let routers: Vec<Router> = self.inner.routers.lock().drain().map(|(_, r)| r).collect();
        for router in routers {
            router.close();
        }
        let connections: Vec<RpcConnection> = self
            .inner
            .connections
            .lock()
            .drain()
            .map(|(_, c)| c)
            .collect();
        for connection in connections {
            connection.close();
        }

        pending.notify();
    }

    pub fn on_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.close.subscribe(callback);
    }
}

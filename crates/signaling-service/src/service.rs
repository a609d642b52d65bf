//! `MediaService` - router provisioning across the media node pool.
//!
//! # Provisioning flow
//!
//! ```text
//! get_router(room, peer)
//!   ├── room closed? ───────────────────> RoomClosed
//!   ├── candidates (sticky → geo → load)
//!   │     └── empty → open pool → empty? > NoMediaNodes
//!   └── for each candidate: node.get_router(room.id)
//!         ├── ok   → room.add_router → Ok(router)
//!         └── err  → log, next candidate (last error surfaces)
//! ```

use crate::config::Config;
use crate::errors::SsError;
use crate::load_balancer::{LoadBalancer, StaticGeoLocator};
use crate::media::{MediaNode, MediaNodeOptions, Router};
use crate::observability::record_router_provisioning;
use crate::room::{MediaSession, Peer};
use crate::rpc::Connector;

use common::types::GeoPosition;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Entry point of the media control plane.
#[derive(Debug)]
pub struct MediaService {
    nodes: Vec<MediaNode>,
    load_balancer: LoadBalancer,
}

impl MediaService {
    #[must_use]
    pub fn new(nodes: Vec<MediaNode>, load_balancer: LoadBalancer) -> Self {
        Self {
            nodes,
            load_balancer,
        }
    }

    /// Build the node pool and selection chain from configuration.
    ///
    /// # Errors
    ///
    /// Returns `SsError::Config` if a media node position is invalid.
    pub fn from_config(config: &Config, connector: Arc<dyn Connector>) -> Result<Self, SsError> {
        let settings = config.rpc_settings();
        let nodes = config
            .media_nodes
            .iter()
            .map(|node| {
                let position = GeoPosition::new(node.latitude, node.longitude)
                    .map_err(|e| SsError::Config(format!("media node {}: {e}", node.id)))?;
                Ok(MediaNode::new(MediaNodeOptions {
                    id: node.id.clone(),
                    hostname: node.hostname.clone(),
                    port: node.port,
                    secret: node.secret.clone(),
                    secure: config.media_node_secure,
                    position,
                    connector: Arc::clone(&connector),
                    settings,
                }))
            })
            .collect::<Result<Vec<_>, SsError>>()?;

        let locator = StaticGeoLocator::new(config.geoip_table.clone());
        let load_balancer = LoadBalancer::new(config.load_balancer_settings(), Arc::new(locator));

        Ok(Self::new(nodes, load_balancer))
    }

    #[must_use]
    pub fn media_nodes(&self) -> &[MediaNode] {
        &self.nodes
    }

    #[must_use]
    pub fn media_node(&self, id: &str) -> Option<&MediaNode> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Provision (or reuse) a router for `peer` joining `room`.
    ///
    /// # Errors
    ///
    /// - `SsError::RoomClosed` if the room is closed, before or after
    ///   provisioning
    /// - `SsError::NoMediaNodes` if no open media node exists
    /// - The last node's error if every candidate failed
    #[instrument(skip_all, fields(room_id = %room.id(), peer_id = %peer.id))]
    pub async fn get_router(
        &self,
        room: &dyn MediaSession,
        peer: &Peer,
    ) -> Result<Router, SsError> {
        let result = self.provision(room, peer).await;
        match &result {
            Ok(_) => record_router_provisioning("success"),
            Err(e) => record_router_provisioning(e.kind()),
        }
        result
    }

    async fn provision(&self, room: &dyn MediaSession, peer: &Peer) -> Result<Router, SsError> {
        if room.is_closed() {
            return Err(SsError::RoomClosed);
        }

        let mut candidates = self.load_balancer.candidates(&self.nodes, room, peer);
        if candidates.is_empty() {
            candidates = self
                .nodes
                .iter()
                .filter(|node| !node.is_closed())
                .map(|node| node.id().to_string())
                .collect();
        }
        if candidates.is_empty() {
            warn!(
                target: "ss.media.service",
                room_id = %room.id(),
                "No media nodes available"
            );
            return Err(SsError::NoMediaNodes);
        }

        let mut last_error = SsError::NoMediaNodes;
        for node_id in &candidates {
            let Some(node) = self.media_node(node_id) else {
                continue;
            };

            match node.get_router(room.id()).await {
                Ok(router) => {
                    if room.is_closed() {
                        debug!(
                            target: "ss.media.service",
                            room_id = %room.id(),
                            router_id = %router.id(),
                            "Room closed during provisioning, closing router"
                        );
                        router.close();
                        return Err(SsError::RoomClosed);
                    }
                    room.add_router(&router);
                    info!(
                        target: "ss.media.service",
                        room_id = %room.id(),
                        media_node_id = %node_id,
                        router_id = %router.id(),
                        "Router provisioned"
                    );
                    return Ok(router);
                }
                Err(e) => {
                    warn!(
                        target: "ss.media.service",
                        room_id = %room.id(),
                        media_node_id = %node_id,
                        error = %e,
                        "Media node failed to provide a router, trying next"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Close every media node.
    pub fn close(&self) {
        for node in &self.nodes {
            node.close();
        }
    }
}

//! Pre-configured fixtures wired to [`MockMediaNode`]s.
//!
//! Provides:
//! - Media nodes and a `MediaService` over mock nodes
//! - Peers with an address or forwarded-for header
//! - Routers already provisioned for a room
//! - Producers on a fresh client transport

use crate::mock_media_node::MockMediaNode;
use common::secret::SecretString;
use common::types::GeoPosition;
use serde_json::json;
use signaling_service::load_balancer::{LoadBalancer, LoadBalancerSettings, StaticGeoLocator};
use signaling_service::media::{
    DataProducer, MediaNode, MediaNodeOptions, ProduceDataOptions, ProduceOptions, Producer,
    Router,
};
use signaling_service::room::Peer;
use signaling_service::rpc::RpcSettings;
use signaling_service::MediaService;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Short timeouts so failing paths finish quickly under paused time too.
#[must_use]
pub fn rpc_settings() -> RpcSettings {
    RpcSettings {
        request_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(500),
    }
}

/// A media node at `(latitude, longitude)` served by `mock`.
#[must_use]
pub fn media_node(mock: &MockMediaNode, latitude: f64, longitude: f64) -> MediaNode {
    MediaNode::new(MediaNodeOptions {
        id: mock.id().to_string(),
        hostname: format!("{}.test", mock.id()),
        port: 4443,
        secret: SecretString::from("test-secret"),
        secure: false,
        position: GeoPosition::new(latitude, longitude).unwrap(),
        connector: Arc::new(mock.clone()),
        settings: rpc_settings(),
    })
}

/// A service over `nodes` with default selection settings and no geo data.
#[must_use]
pub fn service(nodes: &[(&MockMediaNode, f64, f64)]) -> MediaService {
    service_with(nodes, LoadBalancerSettings::default(), StaticGeoLocator::default())
}

/// A service over `nodes` with explicit selection settings and geo table.
#[must_use]
pub fn service_with(
    nodes: &[(&MockMediaNode, f64, f64)],
    settings: LoadBalancerSettings,
    locator: StaticGeoLocator,
) -> MediaService {
    let nodes = nodes
        .iter()
        .map(|(mock, latitude, longitude)| media_node(mock, *latitude, *longitude))
        .collect();
    MediaService::new(nodes, LoadBalancer::new(settings, Arc::new(locator)))
}

/// Router for `room_id` on `node`, panicking on failure.
pub async fn router(node: &MediaNode, room_id: &str) -> Router {
    node.get_router(room_id)
        .await
        .unwrap_or_else(|e| panic!("getRouter on {} failed: {e}", node.id()))
}

/// A producer of `kind` on a fresh client transport of `router`.
pub async fn producer(router: &Router, kind: &str, paused: bool) -> Producer {
    let transport = router.create_webrtc_transport(json!({})).await.unwrap();
    transport
        .produce(ProduceOptions {
            kind: kind.to_string(),
            rtp_parameters: json!({ "codecs": [], "encodings": [{ "ssrc": 1111 }] }),
            paused,
        })
        .await
        .unwrap()
}

/// A data producer on a fresh client transport of `router`.
pub async fn data_producer(router: &Router, label: &str) -> DataProducer {
    let transport = router.create_webrtc_transport(json!({})).await.unwrap();
    transport
        .produce_data(ProduceDataOptions {
            sctp_stream_parameters: json!({ "streamId": 1 }),
            label: label.to_string(),
            protocol: String::new(),
        })
        .await
        .unwrap()
}

/// Poll `condition` until it holds, panicking after two seconds.
///
/// Notifications travel through spawned connection tasks, so their effects
/// on the mock (or on entities reacting to mock events) are not immediate.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Test peer fixture.
#[derive(Debug, Clone)]
pub struct TestPeer {
    id: String,
    address: Option<IpAddr>,
    forwarded_for: Option<String>,
}

impl TestPeer {
    /// Create a peer with the given ID and no address.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: None,
            forwarded_for: None,
        }
    }

    /// Set the socket address, e.g. `"203.0.113.7"`.
    #[must_use]
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.parse().unwrap());
        self
    }

    /// Set the `X-Forwarded-For` header value.
    #[must_use]
    pub fn with_forwarded_for(mut self, header: impl Into<String>) -> Self {
        self.forwarded_for = Some(header.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Peer {
        let mut peer = Peer::new(self.id);
        if let Some(address) = self.address {
            peer = peer.with_address(address);
        }
        if let Some(header) = self.forwarded_for {
            peer = peer.with_forwarded_for(header);
        }
        peer
    }
}

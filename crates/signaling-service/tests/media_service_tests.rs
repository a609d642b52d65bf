//! Router provisioning through `MediaService::get_router` against mock
//! media nodes: reuse, sticky and geographic selection, failover, and the
//! lifecycle of routers when rooms, nodes or connections go away.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{GeoPosition, IpNetwork};
use media_protocol::methods;
use serde_json::json;
use signaling_service::load_balancer::{LoadBalancerSettings, StaticGeoLocator};
use signaling_service::room::{MediaSession, Room};
use signaling_service::SsError;
use signaling_test_utils::fixtures::{self, eventually};
use signaling_test_utils::{Handshake, MockMediaNode, TestPeer};
use std::time::Duration;

const BERLIN: (f64, f64) = (52.52, 13.40);
const NEW_YORK: (f64, f64) = (40.71, -74.01);

#[tokio::test]
async fn test_get_router_reuses_router_for_room() {
    let mock = MockMediaNode::new("mn-1");
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let room = Room::new("room-1");

    let first = service
        .get_router(&room, &TestPeer::new("alice").build())
        .await
        .unwrap();
    let second = service
        .get_router(&room, &TestPeer::new("bob").build())
        .await
        .unwrap();

    assert_eq!(first.id(), mock.router_id("room-1"));
    assert_eq!(first.id(), second.id());
    assert_eq!(first.room_id(), "room-1");
    assert_eq!(first.media_node_id(), "mn-1");
    assert_eq!(room.routers().len(), 1);
    assert_eq!(mock.connect_attempts(), 1);

    let requests = mock.requests(methods::GET_ROUTER);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["roomId"], "room-1");
}

#[tokio::test]
async fn test_each_room_gets_its_own_connection() {
    let mock = MockMediaNode::new("mn-1");
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let peer = TestPeer::new("alice").build();

    let r1 = service.get_router(&Room::new("room-1"), &peer).await.unwrap();
    let r2 = service.get_router(&Room::new("room-2"), &peer).await.unwrap();

    assert_ne!(r1.id(), r2.id());
    assert_eq!(mock.connect_attempts(), 2);
    assert_eq!(mock.connection_count(), 2);
    let node = service.media_node("mn-1").unwrap();
    assert!(node.has_room("room-1"));
    assert!(node.has_room("room-2"));
    assert_eq!(node.routers().len(), 2);
}

#[tokio::test]
async fn test_sticky_node_wins_over_less_loaded_node() {
    let busy = MockMediaNode::builder().id("mn-busy").with_load(0.6).build();
    let idle = MockMediaNode::builder().id("mn-idle").with_load(0.1).build();
    let service = fixtures::service(&[
        (&busy, BERLIN.0, BERLIN.1),
        (&idle, BERLIN.0, BERLIN.1),
    ]);
    let room = Room::new("room-1");

    let existing = fixtures::router(service.media_node("mn-busy").unwrap(), "room-1").await;
    room.add_router(&existing);

    let router = service
        .get_router(&room, &TestPeer::new("alice").build())
        .await
        .unwrap();

    assert_eq!(router.media_node_id(), "mn-busy");
    assert_eq!(router.id(), existing.id());
    assert_eq!(idle.connect_attempts(), 0);
}

#[tokio::test]
async fn test_geo_prefers_node_near_peer() {
    let berlin = MockMediaNode::new("mn-berlin");
    let new_york = MockMediaNode::new("mn-nyc");
    let locator = StaticGeoLocator::new(vec![
        (
            "203.0.113.0/24".parse::<IpNetwork>().unwrap(),
            GeoPosition::new(BERLIN.0, BERLIN.1).unwrap(),
        ),
        (
            "198.51.100.0/24".parse::<IpNetwork>().unwrap(),
            GeoPosition::new(NEW_YORK.0, NEW_YORK.1).unwrap(),
        ),
    ]);
    let service = fixtures::service_with(
        &[
            (&new_york, NEW_YORK.0, NEW_YORK.1),
            (&berlin, BERLIN.0, BERLIN.1),
        ],
        LoadBalancerSettings::default(),
        locator,
    );

    let near_berlin = TestPeer::new("alice").with_address("203.0.113.7").build();
    let router = service
        .get_router(&Room::new("room-eu"), &near_berlin)
        .await
        .unwrap();
    assert_eq!(router.media_node_id(), "mn-berlin");

    // Behind a proxy the forwarded-for client address is used.
    let proxied = TestPeer::new("bob")
        .with_address("10.0.0.1")
        .with_forwarded_for("198.51.100.20, 10.0.0.1")
        .build();
    let router = service
        .get_router(&Room::new("room-us"), &proxied)
        .await
        .unwrap();
    assert_eq!(router.media_node_id(), "mn-nyc");
}

#[tokio::test]
async fn test_failover_to_next_node() {
    let refusing = MockMediaNode::builder()
        .id("mn-down")
        .refuse_connections()
        .build();
    let healthy = MockMediaNode::new("mn-up");
    let service = fixtures::service(&[
        (&refusing, BERLIN.0, BERLIN.1),
        (&healthy, BERLIN.0, BERLIN.1),
    ]);
    let room = Room::new("room-1");

    let router = service
        .get_router(&room, &TestPeer::new("alice").build())
        .await
        .unwrap();

    assert_eq!(router.media_node_id(), "mn-up");
    assert!(refusing.connect_attempts() <= 1);
    assert_eq!(room.routers().len(), 1);
}

#[tokio::test]
async fn test_draining_node_is_skipped() {
    let draining = MockMediaNode::builder().id("mn-drain").draining().build();
    let healthy = MockMediaNode::new("mn-up");
    let service = fixtures::service(&[
        (&draining, BERLIN.0, BERLIN.1),
        (&healthy, BERLIN.0, BERLIN.1),
    ]);

    let router = service
        .get_router(&Room::new("room-1"), &TestPeer::new("alice").build())
        .await
        .unwrap();

    assert_eq!(router.media_node_id(), "mn-up");
    assert_eq!(draining.request_count(methods::GET_ROUTER), 0);
}

#[tokio::test]
async fn test_all_nodes_failing_surfaces_last_error() {
    let a = MockMediaNode::builder().id("mn-a").draining().build();
    let b = MockMediaNode::builder().id("mn-b").draining().build();
    let service = fixtures::service(&[(&a, BERLIN.0, BERLIN.1), (&b, BERLIN.0, BERLIN.1)]);
    let room = Room::new("room-1");

    let err = service
        .get_router(&room, &TestPeer::new("alice").build())
        .await
        .unwrap_err();

    assert_eq!(err, SsError::Draining);
    assert_eq!(a.connect_attempts(), 1);
    assert_eq!(b.connect_attempts(), 1);
    assert!(room.routers().is_empty());
}

#[tokio::test]
async fn test_node_recovers_after_drain() {
    let mock = MockMediaNode::builder().id("mn-1").draining().build();
    let node = fixtures::media_node(&mock, BERLIN.0, BERLIN.1);

    assert_eq!(node.get_router("room-1").await.unwrap_err(), SsError::Draining);
    assert!(!node.has_room("room-1"));

    mock.set_handshake(Handshake::Ready);
    let router = node.get_router("room-1").await.unwrap();
    assert_eq!(router.id(), mock.router_id("room-1"));
    assert_eq!(mock.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_silent_node_times_out_handshake() {
    let mock = MockMediaNode::builder().id("mn-1").silent().build();
    let node = fixtures::media_node(&mock, BERLIN.0, BERLIN.1);

    let err = node.get_router("room-1").await.unwrap_err();

    assert_eq!(err, SsError::HandshakeTimeout);
    assert!(err.is_timeout());
    assert_eq!(mock.request_count(methods::GET_ROUTER), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_get_router_times_out() {
    let mock = MockMediaNode::builder()
        .id("mn-1")
        .silent_method(methods::GET_ROUTER)
        .build();
    let node = fixtures::media_node(&mock, BERLIN.0, BERLIN.1);

    let err = node.get_router("room-1").await.unwrap_err();

    assert_eq!(
        err,
        SsError::RequestTimeout {
            method: methods::GET_ROUTER.to_string()
        }
    );
    assert!(node.routers().is_empty());
}

#[tokio::test]
async fn test_ready_load_sample_updates_node() {
    let mock = MockMediaNode::builder().id("mn-1").with_load(0.7).build();
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);

    service
        .get_router(&Room::new("room-1"), &TestPeer::new("alice").build())
        .await
        .unwrap();
    let node = service.media_node("mn-1").unwrap();
    assert!((node.load() - 0.7).abs() < f64::EPSILON);

    // Any later frame may carry a fresh sample.
    mock.notify_all(methods::PRODUCER_SCORE, json!({ "load": 0.2 }));
    eventually("load sample applied", || (node.load() - 0.2).abs() < f64::EPSILON).await;
}

#[tokio::test]
async fn test_router_closed_by_node_is_replaced() {
    let mock = MockMediaNode::new("mn-1");
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let room = Room::new("room-1");
    let peer = TestPeer::new("alice").build();

    let router = service.get_router(&room, &peer).await.unwrap();
    mock.notify_room("room-1", methods::ROUTER_CLOSED, json!({ "routerId": router.id() }));

    eventually("router closed", || router.is_closed()).await;
    assert!(room.routers().is_empty());
    assert!(mock.notifications(methods::CLOSE_ROUTER).is_empty());

    let replacement = service.get_router(&room, &peer).await.unwrap();
    assert!(!replacement.is_closed());
    assert_eq!(room.routers().len(), 1);
    // The room connection survives its router.
    assert_eq!(mock.connect_attempts(), 1);
}

#[tokio::test]
async fn test_node_announced_router_is_tracked() {
    let mock = MockMediaNode::new("mn-1");
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let room = Room::new("room-1");
    service
        .get_router(&room, &TestPeer::new("alice").build())
        .await
        .unwrap();

    mock.notify_room(
        "room-1",
        methods::NEW_ROUTER,
        json!({ "id": "mn-1-router-extra", "rtpCapabilities": {} }),
    );

    let node = service.media_node("mn-1").unwrap();
    eventually("announced router tracked", || node.routers().len() == 2).await;
}

#[tokio::test]
async fn test_lost_connection_closes_routers_and_reconnects() {
    let mock = MockMediaNode::new("mn-1");
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let room = Room::new("room-1");
    let peer = TestPeer::new("alice").build();

    let router = service.get_router(&room, &peer).await.unwrap();
    let producer = fixtures::producer(&router, "audio", false).await;

    mock.disconnect_room("room-1");

    eventually("router closed", || router.is_closed()).await;
    assert!(producer.is_closed());
    assert!(room.routers().is_empty());

    let replacement = service.get_router(&room, &peer).await.unwrap();
    assert!(!replacement.is_closed());
    assert_eq!(mock.connect_attempts(), 2);
}

#[tokio::test]
async fn test_room_close_closes_routers() {
    let mock = MockMediaNode::new("mn-1");
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let room = Room::new("room-1");
    let peer = TestPeer::new("alice").build();

    let router = service.get_router(&room, &peer).await.unwrap();
    room.close();

    assert!(router.is_closed());
    eventually("closeRouter sent", || {
        mock.notifications(methods::CLOSE_ROUTER).len() == 1
    })
    .await;

    let err = service.get_router(&room, &peer).await.unwrap_err();
    assert_eq!(err, SsError::RoomClosed);
    assert_eq!(mock.request_count(methods::GET_ROUTER), 1);
}

#[tokio::test]
async fn test_room_closed_during_provisioning_closes_new_router() {
    let mock = MockMediaNode::builder()
        .id("mn-1")
        .delay_method(methods::GET_ROUTER, Duration::from_millis(100))
        .build();
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let room = Room::new("room-1");
    let peer = TestPeer::new("alice").build();

    let (result, ()) = tokio::join!(service.get_router(&room, &peer), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        room.close();
    });

    assert_eq!(result.unwrap_err(), SsError::RoomClosed);
    assert!(room.routers().is_empty());
    let node = service.media_node("mn-1").unwrap();
    assert!(node.routers().is_empty());
    eventually("closeRouter sent", || {
        mock.notifications(methods::CLOSE_ROUTER).len() == 1
    })
    .await;
    let close = &mock.notifications(methods::CLOSE_ROUTER)[0];
    assert_eq!(close["routerId"], mock.router_id("room-1"));
}

#[tokio::test]
async fn test_service_close_closes_everything() {
    let mock = MockMediaNode::new("mn-1");
    let service = fixtures::service(&[(&mock, BERLIN.0, BERLIN.1)]);
    let peer = TestPeer::new("alice").build();

    let router = service.get_router(&Room::new("room-1"), &peer).await.unwrap();
    service.close();

    assert!(router.is_closed());
    assert!(service.media_node("mn-1").unwrap().is_closed());
    eventually("connection dropped", || mock.connection_count() == 0).await;

    let err = service
        .get_router(&Room::new("room-2"), &peer)
        .await
        .unwrap_err();
    assert_eq!(err, SsError::NoMediaNodes);
}

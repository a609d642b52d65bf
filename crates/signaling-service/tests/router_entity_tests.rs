//! Client-facing router operations against a mock media node: transports,
//! producers, consumers and data channels, and how node-reported events
//! flow back into them.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use media_protocol::methods;
use serde_json::json;
use signaling_service::media::{ConsumeOptions, ProduceOptions, Router};
use signaling_service::SsError;
use signaling_test_utils::fixtures::{self, eventually};
use signaling_test_utils::MockMediaNode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn router(mock: &MockMediaNode) -> Router {
    let node = fixtures::media_node(mock, 52.52, 13.40);
    fixtures::router(&node, "room-1").await
}

#[tokio::test]
async fn test_transport_lifecycle() {
    let mock = MockMediaNode::new("mn-1");
    let router = router(&mock).await;

    let transport = router
        .create_webrtc_transport(json!({ "enableUdp": true }))
        .await
        .unwrap();
    assert_eq!(transport.router_id(), router.id());
    assert!(router.webrtc_transport(transport.id()).is_some());

    let request = &mock.requests(methods::CREATE_WEBRTC_TRANSPORT)[0];
    assert_eq!(request["enableUdp"], true);
    assert_eq!(request["routerId"], router.id());

    transport.connect(json!({ "role": "client" })).await.unwrap();
    let before = transport.ice_parameters();
    let restarted = transport.restart_ice().await.unwrap();
    assert_ne!(before, restarted);
    assert_eq!(transport.ice_parameters(), restarted);
    transport.set_max_incoming_bitrate(1_500_000).await.unwrap();

    transport.close();
    assert!(transport.is_closed());
    assert!(router.webrtc_transport(transport.id()).is_none());
    eventually("closeWebRtcTransport sent", || {
        mock.notifications(methods::CLOSE_WEBRTC_TRANSPORT).len() == 1
    })
    .await;

    let err = transport.connect(json!({})).await.unwrap_err();
    assert!(matches!(err, SsError::Closed(_)));
}

#[tokio::test]
async fn test_consume_and_can_consume() {
    let mock = MockMediaNode::new("mn-1");
    let router = router(&mock).await;
    let producer = fixtures::producer(&router, "video", true).await;

    assert!(router.can_consume(producer.id(), &json!({})).await.unwrap());
    assert!(!router.can_consume("unknown", &json!({})).await.unwrap());

    let transport = router.create_webrtc_transport(json!({})).await.unwrap();
    let consumer = transport
        .consume(ConsumeOptions {
            producer_id: producer.id().to_string(),
            rtp_capabilities: json!({}),
            paused: false,
        })
        .await
        .unwrap();

    assert_eq!(consumer.kind(), "video");
    assert_eq!(consumer.producer_id(), producer.id());
    assert!(consumer.producer_paused());
    assert!(consumer.paused());
    assert!(router.consumer(consumer.id()).is_some());
}

#[tokio::test]
async fn test_node_events_reach_entities() {
    let mock = MockMediaNode::new("mn-1");
    let router = router(&mock).await;
    let producer = fixtures::producer(&router, "audio", false).await;

    let pauses = Arc::new(AtomicUsize::new(0));
    {
        let pauses = Arc::clone(&pauses);
        producer.on_pause(move |()| {
            pauses.fetch_add(1, Ordering::SeqCst);
        });
    }

    mock.notify_room(
        "room-1",
        methods::PRODUCER_PAUSED,
        json!({ "routerId": router.id(), "producerId": producer.id() }),
    );
    eventually("producer paused", || producer.paused()).await;
    assert_eq!(pauses.load(Ordering::SeqCst), 1);
    // Node-reported state is not echoed back.
    assert!(mock.notifications(methods::PAUSE_PRODUCER).is_empty());

    // Events for another router are ignored.
    mock.notify_room(
        "room-1",
        methods::PRODUCER_CLOSED,
        json!({ "routerId": "other-router", "producerId": producer.id() }),
    );
    mock.notify_room(
        "room-1",
        methods::PRODUCER_CLOSED,
        json!({ "routerId": router.id(), "producerId": producer.id() }),
    );
    eventually("producer closed", || producer.is_closed()).await;
    assert!(router.producer(producer.id()).is_none());
    assert!(mock.notifications(methods::CLOSE_PRODUCER).is_empty());
}

#[tokio::test]
async fn test_producer_close_closes_its_consumers() {
    let mock = MockMediaNode::new("mn-1");
    let router = router(&mock).await;
    let producer = fixtures::producer(&router, "audio", false).await;
    let transport = router.create_webrtc_transport(json!({})).await.unwrap();
    let consumer = transport
        .consume(ConsumeOptions {
            producer_id: producer.id().to_string(),
            rtp_capabilities: json!({}),
            paused: false,
        })
        .await
        .unwrap();

    producer.close();

    assert!(consumer.is_closed());
    assert!(router.consumer(consumer.id()).is_none());
    eventually("closeProducer sent", || {
        mock.notifications(methods::CLOSE_PRODUCER).len() == 1
    })
    .await;
    // The node closes consumers with their producer.
    assert!(mock.notifications(methods::CLOSE_CONSUMER).is_empty());
}

#[tokio::test]
async fn test_transport_closed_by_node_closes_its_entities() {
    let mock = MockMediaNode::new("mn-1");
    let router = router(&mock).await;
    let transport = router.create_webrtc_transport(json!({})).await.unwrap();
    let producer = transport
        .produce(ProduceOptions {
            kind: "audio".to_string(),
            rtp_parameters: json!({}),
            paused: false,
        })
        .await
        .unwrap();
    let data_producer = fixtures::data_producer(&router, "chat").await;

    mock.notify_room(
        "room-1",
        methods::WEBRTC_TRANSPORT_CLOSED,
        json!({ "routerId": router.id(), "transportId": transport.id() }),
    );

    eventually("transport closed", || transport.is_closed()).await;
    assert!(producer.is_closed());
    // Entities of other transports are untouched.
    assert!(!data_producer.is_closed());
    assert!(!router.is_closed());
}

#[tokio::test]
async fn test_request_errors_propagate() {
    let mock = MockMediaNode::builder()
        .id("mn-1")
        .fail_method(methods::PRODUCE, "bad rtp parameters")
        .build();
    let router = router(&mock).await;
    let transport = router.create_webrtc_transport(json!({})).await.unwrap();

    let err = transport
        .produce(ProduceOptions {
            kind: "video".to_string(),
            rtp_parameters: json!({}),
            paused: false,
        })
        .await
        .unwrap_err();

    assert_eq!(err, SsError::Remote("bad rtp parameters".to_string()));
    // Node error text stays server-side.
    assert_eq!(err.client_message(), "An internal error occurred");
}

#[tokio::test]
async fn test_closed_router_rejects_operations() {
    let mock = MockMediaNode::new("mn-1");
    let router = router(&mock).await;
    let transport = router.create_webrtc_transport(json!({})).await.unwrap();

    router.close();

    assert!(transport.is_closed());
    assert_eq!(
        router.create_webrtc_transport(json!({})).await.unwrap_err(),
        SsError::Closed("Router")
    );
    assert_eq!(
        router.can_consume("p", &json!({})).await.unwrap_err(),
        SsError::Closed("Router")
    );
    eventually("closeRouter sent", || {
        mock.notifications(methods::CLOSE_ROUTER).len() == 1
    })
    .await;
    // Entities are dropped with the router, not closed one by one.
    assert!(mock.notifications(methods::CLOSE_WEBRTC_TRANSPORT).is_empty());
}

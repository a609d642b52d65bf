//! Inter-router piping against mock media nodes.
//!
//! Covers pipe transport pair sharing under concurrency, pause mirroring,
//! close cascades and eviction of failed or closed pairs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::future::join_all;
use media_protocol::methods;
use signaling_service::media::{
    Consumer, PipeToRouterOptions, PipeToRouterResult, Producer, Router,
};
use signaling_service::SsError;
use signaling_test_utils::fixtures::{self, eventually};
use signaling_test_utils::{MethodBehavior, MockMediaNode};
use std::time::Duration;

struct TwoNodes {
    mock_a: MockMediaNode,
    mock_b: MockMediaNode,
    a: Router,
    b: Router,
}

async fn two_routers() -> TwoNodes {
    let mock_a = MockMediaNode::new("mn-a");
    let mock_b = MockMediaNode::new("mn-b");
    let node_a = fixtures::media_node(&mock_a, 52.52, 13.40);
    let node_b = fixtures::media_node(&mock_b, 48.85, 2.35);
    let a = fixtures::router(&node_a, "room-1").await;
    let b = fixtures::router(&node_b, "room-1").await;
    TwoNodes {
        mock_a,
        mock_b,
        a,
        b,
    }
}

fn media_pipe(producer_id: &str, router: &Router) -> PipeToRouterOptions {
    PipeToRouterOptions {
        producer_id: Some(producer_id.to_string()),
        data_producer_id: None,
        router: router.clone(),
    }
}

fn unwrap_media(result: PipeToRouterResult) -> (Consumer, Producer) {
    match result {
        PipeToRouterResult::Media {
            pipe_consumer,
            pipe_producer,
        } => (pipe_consumer, pipe_producer),
        PipeToRouterResult::Data { .. } => panic!("expected a media pipe"),
    }
}

#[tokio::test]
async fn test_concurrent_pipes_in_both_directions_share_one_pair() {
    let t = two_routers().await;

    let mut from_a = Vec::new();
    let mut from_b = Vec::new();
    for _ in 0..5 {
        from_a.push(fixtures::producer(&t.a, "audio", false).await);
        from_b.push(fixtures::producer(&t.b, "video", false).await);
    }

    let pipes = from_a
        .iter()
        .map(|p| t.a.pipe_to_router(media_pipe(p.id(), &t.b)))
        .chain(
            from_b
                .iter()
                .map(|p| t.b.pipe_to_router(media_pipe(p.id(), &t.a))),
        );
    let results = join_all(pipes).await;

    for result in results {
        let (pipe_consumer, pipe_producer) = unwrap_media(result.unwrap());
        assert!(!pipe_consumer.is_closed());
        assert!(!pipe_producer.is_closed());
    }

    assert_eq!(t.mock_a.request_count(methods::CREATE_PIPE_TRANSPORT), 1);
    assert_eq!(t.mock_b.request_count(methods::CREATE_PIPE_TRANSPORT), 1);
    assert_eq!(t.mock_a.request_count(methods::CONNECT_PIPE_TRANSPORT), 1);
    assert_eq!(t.mock_b.request_count(methods::CONNECT_PIPE_TRANSPORT), 1);
    assert_eq!(t.a.pipe_transports().len(), 1);
    assert_eq!(t.b.pipe_transports().len(), 1);
    assert!(t.a.has_pipe_pair(t.b.id()));
    assert!(t.b.has_pipe_pair(t.a.id()));

    // Cross-node pipes are not internal.
    for request in t.mock_a.requests(methods::CREATE_PIPE_TRANSPORT) {
        assert_eq!(request["internal"], false);
        assert_eq!(request["remoteRouterId"], t.b.id());
    }
}

#[tokio::test]
async fn test_pipe_producer_keeps_producer_id_and_mirrors_pause() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;

    let (pipe_consumer, pipe_producer) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());

    assert_eq!(pipe_producer.id(), producer.id());
    assert!(pipe_producer.is_pipe());
    assert!(pipe_consumer.is_pipe());
    assert_eq!(pipe_consumer.producer_id(), producer.id());
    assert!(t.b.producer(producer.id()).is_some());
    assert!(t.b.pipe_producer(producer.id()).is_some());
    assert_eq!(t.a.pipe_consumers().len(), 1);

    producer.pause();
    assert!(pipe_producer.paused());
    eventually("pipe producer paused on mn-b", || {
        t.mock_b.producer_paused(t.b.id(), producer.id()) == Some(true)
    })
    .await;

    producer.resume();
    assert!(!pipe_producer.paused());
    eventually("pipe producer resumed on mn-b", || {
        t.mock_b.producer_paused(t.b.id(), producer.id()) == Some(false)
    })
    .await;
}

#[tokio::test]
async fn test_paused_producer_is_piped_paused() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "video", true).await;

    let (pipe_consumer, pipe_producer) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());

    assert!(pipe_consumer.producer_paused());
    assert!(pipe_producer.paused());
    assert_eq!(
        t.mock_b.producer_paused(t.b.id(), producer.id()),
        Some(true)
    );
}

#[tokio::test]
async fn test_pause_during_pipe_is_reconciled() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "video", false).await;
    t.mock_b.set_method_behavior(
        methods::CREATE_PIPE_PRODUCER,
        MethodBehavior::Delay(Duration::from_millis(100)),
    );

    let (result, ()) = tokio::join!(
        t.a.pipe_to_router(media_pipe(producer.id(), &t.b)),
        async {
            eventually("createPipeProducer in flight", || {
                t.mock_b.request_count(methods::CREATE_PIPE_PRODUCER) == 1
            })
            .await;
            producer.pause();
        }
    );
    let (_, pipe_producer) = unwrap_media(result.unwrap());

    // Created unpaused, then paused once wired.
    assert_eq!(
        t.mock_b.requests(methods::CREATE_PIPE_PRODUCER)[0]["paused"],
        false
    );
    assert!(producer.paused());
    assert!(pipe_producer.paused());
    eventually("pipe producer paused on mn-b", || {
        t.mock_b.producer_paused(t.b.id(), producer.id()) == Some(true)
    })
    .await;
}

#[tokio::test]
async fn test_source_closed_during_pipe_unwinds() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;
    t.mock_b.set_method_behavior(
        methods::CREATE_PIPE_PRODUCER,
        MethodBehavior::Delay(Duration::from_millis(100)),
    );

    let (result, ()) = tokio::join!(
        t.a.pipe_to_router(media_pipe(producer.id(), &t.b)),
        async {
            eventually("createPipeProducer in flight", || {
                t.mock_b.request_count(methods::CREATE_PIPE_PRODUCER) == 1
            })
            .await;
            producer.close();
        }
    );

    assert_eq!(
        result.unwrap_err(),
        SsError::ProducerNotFound(producer.id().to_string())
    );
    assert!(t.a.pipe_consumers().is_empty());
    assert!(t.b.producer(producer.id()).is_none());
    assert!(t.b.pipe_producer(producer.id()).is_none());
    eventually("closePipeProducer on mn-b", || {
        t.mock_b.notifications(methods::CLOSE_PIPE_PRODUCER).len() == 1
    })
    .await;
}

#[tokio::test]
async fn test_closing_source_producer_closes_pipe() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;
    let (pipe_consumer, pipe_producer) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());

    producer.close();

    assert!(pipe_consumer.is_closed());
    assert!(pipe_producer.is_closed());
    assert!(t.a.pipe_consumers().is_empty());
    assert!(t.b.producer(producer.id()).is_none());
    eventually("closePipeProducer on mn-b", || {
        t.mock_b.notifications(methods::CLOSE_PIPE_PRODUCER).len() == 1
    })
    .await;

    // The pair itself survives.
    assert!(t.a.has_pipe_pair(t.b.id()));
}

#[tokio::test]
async fn test_remote_pipe_producer_close_closes_pipe_consumer() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;
    let (pipe_consumer, pipe_producer) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());

    t.mock_b.notify_room(
        "room-1",
        methods::PIPE_PRODUCER_CLOSED,
        serde_json::json!({ "routerId": t.b.id(), "pipeProducerId": producer.id() }),
    );

    eventually("pipe producer closed", || pipe_producer.is_closed()).await;
    assert!(pipe_consumer.is_closed());
    assert!(!producer.is_closed());
    eventually("closePipeConsumer on mn-a", || {
        t.mock_a.notifications(methods::CLOSE_PIPE_CONSUMER).len() == 1
    })
    .await;
    // Node-reported closes are not echoed back.
    assert!(t.mock_b.notifications(methods::CLOSE_PIPE_PRODUCER).is_empty());
}

#[tokio::test]
async fn test_closed_pipe_transport_evicts_pair() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;
    let (pipe_consumer, pipe_producer) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());

    let local = t.a.pipe_transports().pop().unwrap();
    local.close();

    assert!(t.b.pipe_transports().is_empty());
    assert!(!t.a.has_pipe_pair(t.b.id()));
    assert!(!t.b.has_pipe_pair(t.a.id()));
    assert!(pipe_consumer.is_closed());
    assert!(pipe_producer.is_closed());

    // The next pipe builds a fresh pair.
    let (_, repiped) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());
    assert!(!repiped.is_closed());
    assert_eq!(t.mock_a.request_count(methods::CREATE_PIPE_TRANSPORT), 2);
    assert_eq!(t.mock_b.request_count(methods::CREATE_PIPE_TRANSPORT), 2);
}

#[tokio::test]
async fn test_failed_pairing_is_evicted_and_retried() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;
    t.mock_b.set_method_behavior(
        methods::CREATE_PIPE_TRANSPORT,
        MethodBehavior::Fail("no ports left".to_string()),
    );

    let err = t
        .a
        .pipe_to_router(media_pipe(producer.id(), &t.b))
        .await
        .unwrap_err();
    assert_eq!(err, SsError::Remote("no ports left".to_string()));
    assert!(!t.a.has_pipe_pair(t.b.id()));
    assert!(t.a.pipe_transports().is_empty());
    eventually("orphaned pipe transport closed on mn-a", || {
        t.mock_a.notifications(methods::CLOSE_PIPE_TRANSPORT).len() == 1
    })
    .await;

    t.mock_b.clear_method_behavior(methods::CREATE_PIPE_TRANSPORT);
    let (_, pipe_producer) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());
    assert_eq!(pipe_producer.id(), producer.id());
    assert!(t.a.has_pipe_pair(t.b.id()));
}

#[tokio::test]
async fn test_failed_pipe_producer_closes_pipe_consumer() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;
    t.mock_b.set_method_behavior(
        methods::CREATE_PIPE_PRODUCER,
        MethodBehavior::Fail("unsupported codec".to_string()),
    );

    let err = t
        .a
        .pipe_to_router(media_pipe(producer.id(), &t.b))
        .await
        .unwrap_err();
    assert_eq!(err, SsError::Remote("unsupported codec".to_string()));
    assert!(t.a.pipe_consumers().is_empty());
    eventually("closePipeConsumer on mn-a", || {
        t.mock_a.notifications(methods::CLOSE_PIPE_CONSUMER).len() == 1
    })
    .await;
    // The pair stays usable.
    assert!(t.a.has_pipe_pair(t.b.id()));
}

#[tokio::test]
async fn test_pipe_preconditions_fail_without_network_calls() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;

    let both = t
        .a
        .pipe_to_router(PipeToRouterOptions {
            producer_id: Some(producer.id().to_string()),
            data_producer_id: Some("dp-1".to_string()),
            router: t.b.clone(),
        })
        .await;
    assert!(matches!(both, Err(SsError::InvalidPipeRequest(_))));

    let neither = t
        .a
        .pipe_to_router(PipeToRouterOptions {
            producer_id: None,
            data_producer_id: None,
            router: t.b.clone(),
        })
        .await;
    assert!(matches!(neither, Err(SsError::InvalidPipeRequest(_))));

    let itself = t.a.pipe_to_router(media_pipe(producer.id(), &t.a)).await;
    assert!(matches!(itself, Err(SsError::InvalidPipeRequest(_))));

    let unknown = t.a.pipe_to_router(media_pipe("no-such-producer", &t.b)).await;
    assert_eq!(
        unknown.unwrap_err(),
        SsError::ProducerNotFound("no-such-producer".to_string())
    );

    t.b.close();
    let closed = t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await;
    assert_eq!(closed.unwrap_err(), SsError::Closed("Router"));

    assert_eq!(t.mock_a.request_count(methods::CREATE_PIPE_TRANSPORT), 0);
    assert_eq!(t.mock_b.request_count(methods::CREATE_PIPE_TRANSPORT), 0);
}

#[tokio::test]
async fn test_data_producer_pipe() {
    let t = two_routers().await;
    let data_producer = fixtures::data_producer(&t.a, "chat").await;

    let result = t
        .a
        .pipe_to_router(PipeToRouterOptions {
            producer_id: None,
            data_producer_id: Some(data_producer.id().to_string()),
            router: t.b.clone(),
        })
        .await
        .unwrap();
    let PipeToRouterResult::Data {
        pipe_data_consumer,
        pipe_data_producer,
    } = result
    else {
        panic!("expected a data pipe");
    };

    assert_eq!(pipe_data_producer.id(), data_producer.id());
    assert!(pipe_data_producer.is_pipe());
    assert_eq!(pipe_data_producer.label(), "chat");
    assert!(t.b.pipe_data_producer(data_producer.id()).is_some());

    data_producer.close();
    assert!(pipe_data_consumer.is_closed());
    assert!(pipe_data_producer.is_closed());
    assert!(t.b.pipe_data_producer(data_producer.id()).is_none());

    let unknown = t
        .a
        .pipe_to_router(PipeToRouterOptions {
            producer_id: None,
            data_producer_id: Some(data_producer.id().to_string()),
            router: t.b.clone(),
        })
        .await;
    assert_eq!(
        unknown.unwrap_err(),
        SsError::DataProducerNotFound(data_producer.id().to_string())
    );
}

#[tokio::test]
async fn test_routers_on_one_node_use_internal_pipe_transports() {
    let mock = MockMediaNode::new("mn-a");
    let node = fixtures::media_node(&mock, 52.52, 13.40);
    let a = fixtures::router(&node, "room-1").await;
    let b = fixtures::router(&node, "room-2").await;
    let producer = fixtures::producer(&a, "audio", false).await;

    a.pipe_to_router(media_pipe(producer.id(), &b)).await.unwrap();

    let requests = mock.requests(methods::CREATE_PIPE_TRANSPORT);
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r["internal"] == true));
}

#[tokio::test]
async fn test_closing_router_closes_pipe_on_peer() {
    let t = two_routers().await;
    let producer = fixtures::producer(&t.a, "audio", false).await;
    let (_, pipe_producer) =
        unwrap_media(t.a.pipe_to_router(media_pipe(producer.id(), &t.b)).await.unwrap());

    t.a.close();

    assert!(producer.is_closed());
    assert!(t.b.pipe_transports().is_empty());
    assert!(pipe_producer.is_closed());
    assert!(!t.b.has_pipe_pair(t.a.id()));
    assert!(!t.b.is_closed());
    eventually("closeRouter on mn-a", || {
        t.mock_a.notifications(methods::CLOSE_ROUTER).len() == 1
    })
    .await;
}

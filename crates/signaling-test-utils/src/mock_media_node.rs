//! Mock media node for control plane testing.
//!
//! `MockMediaNode` is a [`Connector`]: every `connect` opens an in-memory
//! socket served by a task that speaks the media node protocol. It can be
//! configured to:
//! - Signal ready (with a load sample), drain, or stay silent on connect
//! - Refuse connections outright
//! - Fail, delay or ignore specific request methods
//!
//! It records every request and notification, tracks producer pause state
//! per router, and can push notifications or drop connections on demand.
//!
//! # Example
//!
//! ```rust,ignore
//! use signaling_test_utils::MockMediaNode;
//!
//! let mock = MockMediaNode::builder()
//!     .id("mn-1")
//!     .with_load(0.3)
//!     .delay_method("createPipeTransport", Duration::from_millis(50))
//!     .build();
//!
//! let node = fixtures::media_node(&mock, 52.52, 13.40);
//! ```

use async_trait::async_trait;
use media_protocol::{methods, Frame, Notification, Request, Response};
use parking_lot::Mutex;
use serde_json::{json, Value};
use signaling_service::rpc::{ConnectTarget, Connector, Socket};
use signaling_service::SsError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the mock says right after a connection opens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Handshake {
    /// `mediaNodeReady` with the configured load.
    Ready,
    /// `mediaNodeDrain`.
    Drain,
    /// Nothing; the client's handshake times out.
    Silent,
}

/// Per-method override of the default answer.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodBehavior {
    /// Answer with this error.
    Fail(String),
    /// Never answer.
    Silent,
    /// Answer normally after a delay.
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct ProducerRecord {
    kind: String,
    rtp_parameters: Value,
    paused: bool,
}

struct ServerConnection {
    room_id: String,
    outbound: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct MockState {
    handshake: Option<Handshake>,
    load: f64,
    refuse: bool,
    behaviors: HashMap<String, MethodBehavior>,
    connections: Vec<ServerConnection>,
    connect_attempts: usize,
    requests: Vec<(String, Value)>,
    notifications: Vec<(String, Value)>,
    /// Keyed by `<routerId>/<producerId>`.
    producers: HashMap<String, ProducerRecord>,
}

struct MockInner {
    id: String,
    next_id: AtomicU64,
    state: Mutex<MockState>,
}

/// Scriptable in-process media node. Cheap to clone.
#[derive(Clone)]
pub struct MockMediaNode {
    inner: Arc<MockInner>,
}

impl std::fmt::Debug for MockMediaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMediaNode")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

fn str_field<'a>(data: &'a Value, field: &str) -> &'a str {
    data.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn producer_key(data: &Value, field: &str) -> String {
    format!("{}/{}", str_field(data, "routerId"), str_field(data, field))
}

impl MockMediaNode {
    /// Create a new MockMediaNode builder.
    #[must_use]
    pub fn builder() -> MockMediaNodeBuilder {
        MockMediaNodeBuilder::default()
    }

    /// A ready mock with default behavior.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::builder().id(id).build()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Router id this mock hands out for `room_id`.
    #[must_use]
    pub fn router_id(&self, room_id: &str) -> String {
        format!("{}-router-{room_id}", self.inner.id)
    }

    fn new_id(&self, prefix: &str) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{prefix}-{n}", self.inner.id)
    }

    // ------------------------------------------------------------------
    // Runtime reconfiguration
    // ------------------------------------------------------------------

    pub fn set_handshake(&self, handshake: Handshake) {
        self.inner.state.lock().handshake = Some(handshake);
    }

    pub fn set_load(&self, load: f64) {
        self.inner.state.lock().load = load;
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.state.lock().refuse = refuse;
    }

    pub fn set_method_behavior(&self, method: &str, behavior: MethodBehavior) {
        self.inner
            .state
            .lock()
            .behaviors
            .insert(method.to_string(), behavior);
    }

    pub fn clear_method_behavior(&self, method: &str) {
        self.inner.state.lock().behaviors.remove(method);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.state.lock().connect_attempts
    }

    /// Live connections (rooms) currently served.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .connections
            .iter()
            .filter(|c| !c.cancel.is_cancelled() && !c.outbound.is_closed())
            .count()
    }

    #[must_use]
    pub fn request_count(&self, method: &str) -> usize {
        self.inner
            .state
            .lock()
            .requests
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Payloads of received requests for `method`, in arrival order.
    #[must_use]
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.inner
            .state
            .lock()
            .requests
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Payloads of received notifications for `method`, in arrival order.
    #[must_use]
    pub fn notifications(&self, method: &str) -> Vec<Value> {
        self.inner
            .state
            .lock()
            .notifications
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Pause state of a producer or pipe producer as this node sees it.
    #[must_use]
    pub fn producer_paused(&self, router_id: &str, producer_id: &str) -> Option<bool> {
        self.inner
            .state
            .lock()
            .producers
            .get(&format!("{router_id}/{producer_id}"))
            .map(|p| p.paused)
    }

    // ------------------------------------------------------------------
    // Server-initiated traffic
    // ------------------------------------------------------------------

    /// Send a notification on every live connection.
    pub fn notify_all(&self, method: &str, data: Value) {
        let state = self.inner.state.lock();
        for connection in &state.connections {
            let _ = connection
                .outbound
                .send(Frame::Notification(Notification::new(method, data.clone())));
        }
    }

    /// Send a notification on the connections serving `room_id`.
    pub fn notify_room(&self, room_id: &str, method: &str, data: Value) {
        let state = self.inner.state.lock();
        for connection in state.connections.iter().filter(|c| c.room_id == room_id) {
            let _ = connection
                .outbound
                .send(Frame::Notification(Notification::new(method, data.clone())));
        }
    }

    /// Drop the connections serving `room_id`, as a crashed node would.
    pub fn disconnect_room(&self, room_id: &str) {
        let mut state = self.inner.state.lock();
        state.connections.retain(|c| {
            if c.room_id == room_id {
                c.cancel.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Drop every connection.
    pub fn disconnect_all(&self) {
        let mut state = self.inner.state.lock();
        for connection in state.connections.drain(..) {
            connection.cancel.cancel();
        }
    }

    // ------------------------------------------------------------------
    // Protocol
    // ------------------------------------------------------------------

    fn record_notification(&self, notification: &Notification) {
        let mut state = self.inner.state.lock();
        let data = &notification.data;
        let paused = match notification.method.as_str() {
            methods::PAUSE_PRODUCER => Some((producer_key(data, "producerId"), true)),
            methods::RESUME_PRODUCER => Some((producer_key(data, "producerId"), false)),
            methods::PAUSE_PIPE_PRODUCER => Some((producer_key(data, "pipeProducerId"), true)),
            methods::RESUME_PIPE_PRODUCER => Some((producer_key(data, "pipeProducerId"), false)),
            _ => None,
        };
        if let Some((key, paused)) = paused {
            if let Some(producer) = state.producers.get_mut(&key) {
                producer.paused = paused;
            }
        }
        state
            .notifications
            .push((notification.method.clone(), notification.data.clone()));
    }

    /// Record the request and compute its answer at arrival time.
    fn answer(&self, request: &Request) -> Option<(Response, Option<Duration>)> {
        let behavior = {
            let mut state = self.inner.state.lock();
            state
                .requests
                .push((request.method.clone(), request.data.clone()));
            state.behaviors.get(&request.method).cloned()
        };

        let delay = match behavior {
            Some(MethodBehavior::Fail(error)) => {
                return Some((Response::error(request.id, error), None));
            }
            Some(MethodBehavior::Silent) => return None,
            Some(MethodBehavior::Delay(delay)) => Some(delay),
            None => None,
        };

        let response = match self.result_for(&request.method, &request.data) {
            Ok(data) => Response::ok(request.id, data),
            Err(error) => Response::error(request.id, error),
        };
        Some((response, delay))
    }

    fn result_for(&self, method: &str, data: &Value) -> Result<Value, String> {
        match method {
            methods::GET_ROUTER => Ok(json!({
                "id": self.router_id(str_field(data, "roomId")),
                "rtpCapabilities": { "codecs": [] },
            })),
            methods::CAN_CONSUME => {
                let key = producer_key(data, "producerId");
                let known = self.inner.state.lock().producers.contains_key(&key);
                Ok(json!({ "canConsume": known }))
            }
            methods::CREATE_WEBRTC_TRANSPORT => Ok(json!({
                "id": self.new_id("transport"),
                "iceParameters": { "usernameFragment": self.new_id("ufrag") },
                "iceCandidates": [],
                "dtlsParameters": { "role": "auto" },
            })),
            methods::RESTART_ICE => Ok(json!({
                "iceParameters": { "usernameFragment": self.new_id("ufrag") },
            })),
            methods::CONNECT_WEBRTC_TRANSPORT
            | methods::SET_MAX_INCOMING_BITRATE
            | methods::CONNECT_PIPE_TRANSPORT
            | methods::SET_CONSUMER_PREFERRED_LAYERS => Ok(json!({})),
            methods::PRODUCE => {
                let id = self.new_id("producer");
                self.track_producer(data, &id);
                Ok(json!({ "id": id }))
            }
            methods::CREATE_PIPE_PRODUCER => {
                // Pipe producers keep the original producer id.
                let id = str_field(data, "producerId").to_string();
                self.track_producer(data, &id);
                Ok(json!({ "id": id }))
            }
            methods::CONSUME | methods::CREATE_PIPE_CONSUMER => {
                let key = producer_key(data, "producerId");
                let producer = self.inner.state.lock().producers.get(&key).cloned();
                let producer = producer.ok_or_else(|| format!("producer {key} not found"))?;
                Ok(json!({
                    "id": self.new_id("consumer"),
                    "kind": producer.kind,
                    "rtpParameters": producer.rtp_parameters,
                    "producerPaused": producer.paused,
                }))
            }
            methods::CREATE_PIPE_TRANSPORT => {
                let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                Ok(json!({
                    "id": self.new_id("pipe-transport"),
                    "ip": "10.0.0.1",
                    "port": 40000 + (n % 20000),
                }))
            }
            methods::PRODUCE_DATA => Ok(json!({ "id": self.new_id("data-producer") })),
            methods::CREATE_PIPE_DATA_PRODUCER => {
                Ok(json!({ "id": str_field(data, "dataProducerId") }))
            }
            methods::CONSUME_DATA | methods::CREATE_PIPE_DATA_CONSUMER => Ok(json!({
                "id": self.new_id("data-consumer"),
                "sctpStreamParameters": { "streamId": 0 },
                "label": "chat",
                "protocol": "",
            })),
            other => Err(format!("unknown method {other}")),
        }
    }

    fn track_producer(&self, data: &Value, id: &str) {
        let key = format!("{}/{id}", str_field(data, "routerId"));
        let record = ProducerRecord {
            kind: str_field(data, "kind").to_string(),
            rtp_parameters: data.get("rtpParameters").cloned().unwrap_or(Value::Null),
            paused: data.get("paused").and_then(Value::as_bool).unwrap_or(false),
        };
        self.inner.state.lock().producers.insert(key, record);
    }

    async fn serve(self, socket: Socket, cancel: CancellationToken) {
        let Socket {
            outbound,
            mut inbound,
        } = socket;

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            match frame {
                Frame::Request(request) => match self.answer(&request) {
                    Some((response, None)) => {
                        let _ = outbound.send(Frame::Response(response));
                    }
                    Some((response, Some(delay))) => {
                        let outbound = outbound.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = outbound.send(Frame::Response(response));
                        });
                    }
                    None => {}
                },
                Frame::Notification(notification) => self.record_notification(&notification),
                Frame::Response(_) => {}
            }
        }
    }
}

#[async_trait]
impl Connector for MockMediaNode {
    async fn connect(&self, target: &ConnectTarget) -> Result<Socket, SsError> {
        let (client, server) = Socket::pair();
        let cancel = CancellationToken::new();

        let greeting = {
            let mut state = self.inner.state.lock();
            state.connect_attempts += 1;
            if state.refuse {
                return Err(SsError::Transport(format!(
                    "{} refused connection",
                    self.inner.id
                )));
            }
            state.connections.push(ServerConnection {
                room_id: target.room_id.clone(),
                outbound: server.outbound.clone(),
                cancel: cancel.clone(),
            });
            match state.handshake.unwrap_or(Handshake::Ready) {
                Handshake::Ready => Some(Notification::new(
                    methods::MEDIA_NODE_READY,
                    json!({ "load": state.load }),
                )),
                Handshake::Drain => Some(Notification::new(methods::MEDIA_NODE_DRAIN, json!({}))),
                Handshake::Silent => None,
            }
        };

        if let Some(greeting) = greeting {
            let _ = server.outbound.send(Frame::Notification(greeting));
        }
        tokio::spawn(self.clone().serve(server, cancel));
        Ok(client)
    }
}

/// Builder for MockMediaNode configuration.
#[derive(Debug, Default)]
pub struct MockMediaNodeBuilder {
    id: Option<String>,
    handshake: Option<Handshake>,
    load: f64,
    refuse: bool,
    behaviors: HashMap<String, MethodBehavior>,
}

impl MockMediaNodeBuilder {
    /// Set the node ID.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Load reported in `mediaNodeReady`.
    #[must_use]
    pub fn with_load(mut self, load: f64) -> Self {
        self.load = load;
        self
    }

    #[must_use]
    pub fn draining(mut self) -> Self {
        self.handshake = Some(Handshake::Drain);
        self
    }

    #[must_use]
    pub fn silent(mut self) -> Self {
        self.handshake = Some(Handshake::Silent);
        self
    }

    #[must_use]
    pub fn refuse_connections(mut self) -> Self {
        self.refuse = true;
        self
    }

    #[must_use]
    pub fn fail_method(mut self, method: &str, error: impl Into<String>) -> Self {
        self.behaviors
            .insert(method.to_string(), MethodBehavior::Fail(error.into()));
        self
    }

    #[must_use]
    pub fn silent_method(mut self, method: &str) -> Self {
        self.behaviors
            .insert(method.to_string(), MethodBehavior::Silent);
        self
    }

    #[must_use]
    pub fn delay_method(mut self, method: &str, delay: Duration) -> Self {
        self.behaviors
            .insert(method.to_string(), MethodBehavior::Delay(delay));
        self
    }

    /// Build the MockMediaNode.
    #[must_use]
    pub fn build(self) -> MockMediaNode {
        MockMediaNode {
            inner: Arc::new(MockInner {
                id: self.id.unwrap_or_else(|| "mn-test-default".to_string()),
                next_id: AtomicU64::new(1),
                state: Mutex::new(MockState {
                    handshake: self.handshake,
                    load: self.load,
                    refuse: self.refuse,
                    behaviors: self.behaviors,
                    ..MockState::default()
                }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(room_id: &str) -> ConnectTarget {
        ConnectTarget {
            media_node_id: "mn-1".to_string(),
            hostname: "localhost".to_string(),
            port: 4443,
            room_id: room_id.to_string(),
            secret: common::secret::SecretString::from("secret"),
            secure: false,
        }
    }

    #[tokio::test]
    async fn test_greets_with_ready_and_load() {
        let mock = MockMediaNode::builder().id("mn-1").with_load(0.25).build();
        let mut socket = mock.connect(&target("room-1")).await.unwrap();

        match socket.inbound.recv().await.unwrap() {
            Frame::Notification(n) => {
                assert_eq!(n.method, methods::MEDIA_NODE_READY);
                assert_eq!(n.data, json!({ "load": 0.25 }));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(mock.connect_attempts(), 1);
        assert_eq!(mock.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_answers_get_router_and_tracks_pause() {
        let mock = MockMediaNode::new("mn-1");
        let mut socket = mock.connect(&target("room-1")).await.unwrap();
        let _ready = socket.inbound.recv().await.unwrap();

        socket
            .outbound
            .send(Frame::Request(Request::new(
                1,
                methods::GET_ROUTER,
                json!({ "roomId": "room-1" }),
            )))
            .unwrap();
        match socket.inbound.recv().await.unwrap() {
            Frame::Response(r) => {
                assert_eq!(r.id, 1);
                assert_eq!(r.data.unwrap()["id"], "mn-1-router-room-1");
            }
            other => panic!("unexpected frame {other:?}"),
        }

        socket
            .outbound
            .send(Frame::Request(Request::new(
                2,
                methods::PRODUCE,
                json!({ "routerId": "r1", "kind": "audio", "paused": false }),
            )))
            .unwrap();
        let producer_id = match socket.inbound.recv().await.unwrap() {
            Frame::Response(r) => r.data.unwrap()["id"].as_str().unwrap().to_string(),
            other => panic!("unexpected frame {other:?}"),
        };
        socket
            .outbound
            .send(Frame::Notification(Notification::new(
                methods::PAUSE_PRODUCER,
                json!({ "routerId": "r1", "producerId": producer_id }),
            )))
            .unwrap();

        // A request round trip orders after the notification.
        socket
            .outbound
            .send(Frame::Request(Request::new(
                3,
                methods::CAN_CONSUME,
                json!({ "routerId": "r1", "producerId": producer_id }),
            )))
            .unwrap();
        let _ = socket.inbound.recv().await.unwrap();

        assert_eq!(mock.producer_paused("r1", &producer_id), Some(true));
        assert_eq!(mock.notifications(methods::PAUSE_PRODUCER).len(), 1);
    }

    #[tokio::test]
    async fn test_refuse_and_disconnect() {
        let mock = MockMediaNode::builder().refuse_connections().build();
        assert!(mock.connect(&target("room-1")).await.is_err());
        assert_eq!(mock.connect_attempts(), 1);

        mock.set_refuse_connections(false);
        let mut socket = mock.connect(&target("room-1")).await.unwrap();
        let _ready = socket.inbound.recv().await.unwrap();
        mock.disconnect_room("room-1");
        assert!(socket.inbound.recv().await.is_none());
    }
}

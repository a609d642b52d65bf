//! `Router` - per-room routing context on one media node.
//!
//! A router owns the transports and media entities created inside it, in
//! one map per entity family:
//!
//! ```text
//! Router
//! ├── webrtc_transports / pipe_transports
//! ├── producers / pipe_producers
//! ├── consumers / pipe_consumers
//! ├── data_producers / pipe_data_producers
//! ├── data_consumers / pipe_data_consumers
//! └── pipe_pairs (remote router id -> shared pipe transport pair future)
//! ```
//!
//! A single inbound handler per router dispatches media node events to the
//! entity whose id matches, and only when `routerId` matches this router.
//!
//! # Closing
//!
//! Closing cascades to every owned entity with the remote flag set: the
//! media node tears them down together with the router, so only
//! `closeRouter` is sent. Closing a producer closes the consumers of that
//! producer in the same way.

use super::consumer::{Consumer, DataConsumer};
use super::messages::{
    CanConsumeResult, PipeTransportCreated, RouterChannel, WebRtcTransportCreated,
};
use super::observer::CloseSignal;
use super::pipe::PairEntry;
use super::producer::{DataProducer, Producer};
use super::transport::{PipeTransport, WebRtcTransport};
use crate::errors::SsError;
use crate::rpc::{HandlerId, HandlerOutcome, InboundMessage, MessageKind, RpcConnection};

use media_protocol::methods;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::info;

type EntityMap<T> = Mutex<HashMap<String, T>>;

/// What a router needs to exist.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub id: String,
    pub media_node_id: String,
    pub room_id: String,
    pub rtp_capabilities: Value,
    pub connection: RpcConnection,
}

pub(crate) struct RouterInner {
    pub(crate) id: String,
    pub(crate) media_node_id: String,
    pub(crate) room_id: String,
    pub(crate) rtp_capabilities: Value,
    pub(crate) channel: RouterChannel,
    pub(crate) handler_id: Mutex<Option<HandlerId>>,
    pub(crate) close: CloseSignal,
    pub(crate) webrtc_transports: EntityMap<WebRtcTransport>,
    pub(crate) pipe_transports: EntityMap<PipeTransport>,
    pub(crate) producers: EntityMap<Producer>,
    pub(crate) pipe_producers: EntityMap<Producer>,
    pub(crate) consumers: EntityMap<Consumer>,
    pub(crate) pipe_consumers: EntityMap<Consumer>,
    pub(crate) data_producers: EntityMap<DataProducer>,
    pub(crate) pipe_data_producers: EntityMap<DataProducer>,
    pub(crate) data_consumers: EntityMap<DataConsumer>,
    pub(crate) pipe_data_consumers: EntityMap<DataConsumer>,
    pub(crate) pipe_pairs: Mutex<HashMap<String, PairEntry>>,
}

/// Routing context for one room on one media node. Cheap to clone.
#[derive(Clone)]
pub struct Router {
    pub(crate) inner: Arc<RouterInner>,
}

/// Non-owning router reference held by transports and observers.
#[derive(Clone)]
pub(crate) struct WeakRouter(Weak<RouterInner>);

impl WeakRouter {
    pub(crate) fn upgrade(&self) -> Option<Router> {
        self.0.upgrade().map(|inner| Router { inner })
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("media_node_id", &self.inner.media_node_id)
            .field("room_id", &self.inner.room_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Entity kinds a router tracks in its maps.
pub(crate) trait RouterEntity: Clone + Send + Sync + 'static {
    fn entity_id(&self) -> &str;
    /// Transport the entity was created on; `None` for transports.
    fn owner_transport_id(&self) -> Option<&str>;
    fn subscribe_close(&self, callback: impl Fn(&()) + Send + Sync + 'static);
    fn close_remote(&self);
}

macro_rules! router_entity {
    ($ty:ty, transport) => {
        impl RouterEntity for $ty {
            fn entity_id(&self) -> &str {
                self.id()
            }
            fn owner_transport_id(&self) -> Option<&str> {
                None
            }
            fn subscribe_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
                self.on_close(callback);
            }
            fn close_remote(&self) {
                self.close_with(true);
            }
        }
    };
    ($ty:ty) => {
        impl RouterEntity for $ty {
            fn entity_id(&self) -> &str {
                self.id()
            }
            fn owner_transport_id(&self) -> Option<&str> {
                Some(self.transport_id())
            }
            fn subscribe_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
                self.on_close(callback);
            }
            fn close_remote(&self) {
                self.close_with(true);
            }
        }
    };
}

router_entity!(WebRtcTransport, transport);
router_entity!(PipeTransport, transport);
router_entity!(Producer);
router_entity!(Consumer);
router_entity!(DataProducer);
router_entity!(DataConsumer);

fn drain<T>(map: &EntityMap<T>) -> Vec<T> {
    map.lock().drain().map(|(_, entity)| entity).collect()
}

fn lookup<T: Clone>(map: &EntityMap<T>, id: &str) -> Option<T> {
    map.lock().get(id).cloned()
}

fn on_transport<T: RouterEntity>(map: &EntityMap<T>, transport_id: &str) -> Vec<T> {
    map.lock()
        .values()
        .filter(|entity| entity.owner_transport_id() == Some(transport_id))
        .cloned()
        .collect()
}

/// Run `action` on the entity named by `field`, if this router owns it.
fn dispatch_to<T: Clone>(
    map: &EntityMap<T>,
    message: &InboundMessage<'_>,
    field: &str,
    action: impl FnOnce(&T),
) -> HandlerOutcome {
    let Some(id) = message.str_field(field) else {
        return HandlerOutcome::Pass;
    };
    match lookup(map, id) {
        Some(entity) => {
            action(&entity);
            HandlerOutcome::Handled
        }
        None => HandlerOutcome::Pass,
    }
}

impl Router {
    /// Create a router and attach its inbound handler to the connection.
    #[must_use]
    pub fn new(options: RouterOptions) -> Self {
        let router = Self {
            inner: Arc::new(RouterInner {
                channel: RouterChannel::new(options.id.clone(), options.connection),
                id: options.id,
                media_node_id: options.media_node_id,
                room_id: options.room_id,
                rtp_capabilities: options.rtp_capabilities,
                handler_id: Mutex::new(None),
                close: CloseSignal::new(),
                webrtc_transports: Mutex::new(HashMap::new()),
                pipe_transports: Mutex::new(HashMap::new()),
                producers: Mutex::new(HashMap::new()),
                pipe_producers: Mutex::new(HashMap::new()),
                consumers: Mutex::new(HashMap::new()),
                pipe_consumers: Mutex::new(HashMap::new()),
                data_producers: Mutex::new(HashMap::new()),
                pipe_data_producers: Mutex::new(HashMap::new()),
                data_consumers: Mutex::new(HashMap::new()),
                pipe_data_consumers: Mutex::new(HashMap::new()),
                pipe_pairs: Mutex::new(HashMap::new()),
            }),
        };

        let weak = router.downgrade();
        let handler_id = router
            .connection()
            .add_handler(move |message: &InboundMessage<'_>| match weak.upgrade() {
                Some(router) => router.handle_message(message),
                None => HandlerOutcome::Pass,
            });
        *router.inner.handler_id.lock() = Some(handler_id);

        router
    }

    pub(crate) fn downgrade(&self) -> WeakRouter {
        WeakRouter(Arc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn media_node_id(&self) -> &str {
        &self.inner.media_node_id
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    /// Negotiated RTP capabilities, forwarded verbatim to clients.
    #[must_use]
    pub fn rtp_capabilities(&self) -> &Value {
        &self.inner.rtp_capabilities
    }

    #[must_use]
    pub fn connection(&self) -> &RpcConnection {
        self.inner.channel.connection()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SsError> {
        if self.is_closed() {
            Err(SsError::Closed("Router"))
        } else {
            Ok(())
        }
    }

    /// Producer or pipe producer by id.
    #[must_use]
    pub fn producer(&self, id: &str) -> Option<Producer> {
        lookup(&self.inner.producers, id).or_else(|| lookup(&self.inner.pipe_producers, id))
    }

    /// Pipe producer by (original producer) id.
    #[must_use]
    pub fn pipe_producer(&self, id: &str) -> Option<Producer> {
        lookup(&self.inner.pipe_producers, id)
    }

    #[must_use]
    pub fn consumer(&self, id: &str) -> Option<Consumer> {
        lookup(&self.inner.consumers, id).or_else(|| lookup(&self.inner.pipe_consumers, id))
    }

    #[must_use]
    pub fn pipe_consumers(&self) -> Vec<Consumer> {
        self.inner.pipe_consumers.lock().values().cloned().collect()
    }

    /// Data producer or pipe data producer by id.
    #[must_use]
    pub fn data_producer(&self, id: &str) -> Option<DataProducer> {
        lookup(&self.inner.data_producers, id)
            .or_else(|| lookup(&self.inner.pipe_data_producers, id))
    }

    #[must_use]
    pub fn pipe_data_producer(&self, id: &str) -> Option<DataProducer> {
        lookup(&self.inner.pipe_data_producers, id)
    }

    #[must_use]
    pub fn webrtc_transport(&self, id: &str) -> Option<WebRtcTransport> {
        lookup(&self.inner.webrtc_transports, id)
    }

    #[must_use]
    pub fn pipe_transports(&self) -> Vec<PipeTransport> {
        self.inner.pipe_transports.lock().values().cloned().collect()
    }

    /// Whether a pipe transport pair toward `remote_router_id` is cached.
    #[must_use]
    pub fn has_pipe_pair(&self, remote_router_id: &str) -> bool {
        self.inner.pipe_pairs.lock().contains_key(remote_router_id)
    }

    /// Ask the media node whether a client with `rtp_capabilities` can
    /// consume `producer_id`.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if the router is closed, or the request error.
    pub async fn can_consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &Value,
    ) -> Result<bool, SsError> {
        self.ensure_open()?;
        let result: CanConsumeResult = self
            .inner
            .channel
            .request(
                methods::CAN_CONSUME,
                json!({ "producerId": producer_id, "rtpCapabilities": rtp_capabilities }),
            )
            .await?;
        Ok(result.can_consume)
    }

    /// Create a client-facing transport. `options` (listen addresses, SCTP,
    /// ...) are forwarded to the media node verbatim.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if the router is closed, or the request error.
    pub async fn create_webrtc_transport(
        &self,
        options: Value,
    ) -> Result<WebRtcTransport, SsError> {
        self.ensure_open()?;
        let created: WebRtcTransportCreated = self
            .inner
            .channel
            .request(methods::CREATE_WEBRTC_TRANSPORT, options)
            .await?;
        let transport = WebRtcTransport::new(created, self.inner.channel.clone(), self.downgrade());
        self.insert(|inner| &inner.webrtc_transports, transport)
    }

    pub(crate) async fn create_pipe_transport(
        &self,
        remote_router_id: &str,
        internal: bool,
    ) -> Result<PipeTransport, SsError> {
        self.ensure_open()?;
        let created: PipeTransportCreated = self
            .inner
            .channel
            .request(
                methods::CREATE_PIPE_TRANSPORT,
                json!({ "remoteRouterId": remote_router_id, "internal": internal }),
            )
            .await?;
        let transport = PipeTransport::new(
            created,
            remote_router_id.to_string(),
            internal,
            self.inner.channel.clone(),
            self.downgrade(),
        );
        self.insert(|inner| &inner.pipe_transports, transport)
    }

    /// Track `entity` until it closes. A router that closed meanwhile
    /// closes the entity instead.
    fn insert<T: RouterEntity>(
        &self,
        select: fn(&RouterInner) -> &EntityMap<T>,
        entity: T,
    ) -> Result<T, SsError> {
        {
            let mut map = select(&self.inner).lock();
            if !self.is_closed() {
                map.insert(entity.entity_id().to_string(), entity.clone());
            } else {
                drop(map);
                entity.close_remote();
                return Err(SsError::Closed("Router"));
            }
        }

        let weak = self.downgrade();
        let id = entity.entity_id().to_string();
        entity.subscribe_close(move |()| {
            if let Some(router) = weak.upgrade() {
                select(&router.inner).lock().remove(&id);
            }
        });
        Ok(entity)
    }

    pub(crate) fn insert_producer(&self, producer: Producer) -> Result<Producer, SsError> {
        let producer = if producer.is_pipe() {
            self.insert(|inner| &inner.pipe_producers, producer)?
        } else {
            self.insert(|inner| &inner.producers, producer)?
        };

        // The media node closes consumers along with their producer.
        let weak = self.downgrade();
        let producer_id = producer.id().to_string();
        producer.on_close(move |()| {
            if let Some(router) = weak.upgrade() {
                router.close_consumers_of(&producer_id);
            }
        });
        Ok(producer)
    }

    pub(crate) fn insert_consumer(&self, consumer: Consumer) -> Result<Consumer, SsError> {
        if consumer.is_pipe() {
            self.insert(|inner| &inner.pipe_consumers, consumer)
        } else {
            self.insert(|inner| &inner.consumers, consumer)
        }
    }

    pub(crate) fn insert_data_producer(
        &self,
        data_producer: DataProducer,
    ) -> Result<DataProducer, SsError> {
        let data_producer = if data_producer.is_pipe() {
            self.insert(|inner| &inner.pipe_data_producers, data_producer)?
        } else {
            self.insert(|inner| &inner.data_producers, data_producer)?
        };

        let weak = self.downgrade();
        let data_producer_id = data_producer.id().to_string();
        data_producer.on_close(move |()| {
            if let Some(router) = weak.upgrade() {
                router.close_data_consumers_of(&data_producer_id);
            }
        });
        Ok(data_producer)
    }

    pub(crate) fn insert_data_consumer(
        &self,
        data_consumer: DataConsumer,
    ) -> Result<DataConsumer, SsError> {
        if data_consumer.is_pipe() {
            self.insert(|inner| &inner.pipe_data_consumers, data_consumer)
        } else {
            self.insert(|inner| &inner.data_consumers, data_consumer)
        }
    }

    fn close_consumers_of(&self, producer_id: &str) {
        let matching: Vec<Consumer> = [&self.inner.consumers, &self.inner.pipe_consumers]
            .into_iter()
            .flat_map(|map| {
                map.lock()
                    .values()
                    .filter(|consumer| consumer.producer_id() == producer_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        for consumer in matching {
            consumer.close_with(true);
        }
    }

    fn close_data_consumers_of(&self, data_producer_id: &str) {
        let matching: Vec<DataConsumer> = [
            &self.inner.data_consumers,
            &self.inner.pipe_data_consumers,
        ]
        .into_iter()
        .flat_map(|map| {
            map.lock()
                .values()
                .filter(|consumer| consumer.data_producer_id() == data_producer_id)
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect();
        for data_consumer in matching {
            data_consumer.close_with(true);
        }
    }

    /// Close every entity created on `transport_id`.
    pub(crate) fn close_transport_entities(&self, transport_id: &str) {
        let inner = &self.inner;
        for producer in on_transport(&inner.producers, transport_id)
            .into_iter()
            .chain(on_transport(&inner.pipe_producers, transport_id))
        {
            producer.close_with(true);
        }
        for consumer in on_transport(&inner.consumers, transport_id)
            .into_iter()
            .chain(on_transport(&inner.pipe_consumers, transport_id))
        {
            consumer.close_with(true);
        }
        for data_producer in on_transport(&inner.data_producers, transport_id)
            .into_iter()
            .chain(on_transport(&inner.pipe_data_producers, transport_id))
        {
            data_producer.close_with(true);
        }
        for data_consumer in on_transport(&inner.data_consumers, transport_id)
            .into_iter()
            .chain(on_transport(&inner.pipe_data_consumers, transport_id))
        {
            data_consumer.close_with(true);
        }
    }

    fn handle_message(&self, message: &InboundMessage<'_>) -> HandlerOutcome {
        if message.kind != MessageKind::Notification
            || message.str_field("routerId") != Some(self.id())
        {
            return HandlerOutcome::Pass;
        }

        let inner = &self.inner;
        let score = message.data.get("score").unwrap_or(&Value::Null);
        let layers = message.data.get("layers").unwrap_or(&Value::Null);

        match message.method {
            methods::ROUTER_CLOSED => {
                self.close_with(true);
                HandlerOutcome::Handled
            }
            methods::WEBRTC_TRANSPORT_CLOSED => {
                dispatch_to(&inner.webrtc_transports, message, "transportId", |t| {
                    t.close_with(true);
                })
            }
            methods::PIPE_TRANSPORT_CLOSED => {
                dispatch_to(&inner.pipe_transports, message, "pipeTransportId", |t| {
                    t.close_with(true);
                })
            }
            methods::PRODUCER_CLOSED => {
                dispatch_to(&inner.producers, message, "producerId", |p| p.close_with(true))
            }
            methods::PRODUCER_PAUSED => {
                dispatch_to(&inner.producers, message, "producerId", Producer::remote_paused)
            }
            methods::PRODUCER_RESUMED => {
                dispatch_to(&inner.producers, message, "producerId", Producer::remote_resumed)
            }
            methods::PRODUCER_SCORE => dispatch_to(&inner.producers, message, "producerId", |p| {
                p.remote_score(score);
            }),
            methods::PIPE_PRODUCER_CLOSED => {
                dispatch_to(&inner.pipe_producers, message, "pipeProducerId", |p| {
                    p.close_with(true);
                })
            }
            methods::PIPE_PRODUCER_PAUSED => dispatch_to(
                &inner.pipe_producers,
                message,
                "pipeProducerId",
                Producer::remote_paused,
            ),
            methods::PIPE_PRODUCER_RESUMED => dispatch_to(
                &inner.pipe_producers,
                message,
                "pipeProducerId",
                Producer::remote_resumed,
            ),
            methods::CONSUMER_CLOSED => {
                dispatch_to(&inner.consumers, message, "consumerId", |c| c.close_with(true))
            }
            methods::CONSUMER_PAUSED => {
                dispatch_to(&inner.consumers, message, "consumerId", Consumer::remote_paused)
            }
            methods::CONSUMER_RESUMED => {
                dispatch_to(&inner.consumers, message, "consumerId", Consumer::remote_resumed)
            }
            methods::CONSUMER_SCORE => dispatch_to(&inner.consumers, message, "consumerId", |c| {
                c.remote_score(score);
            }),
            methods::CONSUMER_LAYERS_CHANGED => {
                dispatch_to(&inner.consumers, message, "consumerId", |c| {
                    c.remote_layers_changed(layers);
                })
            }
            methods::PIPE_CONSUMER_CLOSED => {
                dispatch_to(&inner.pipe_consumers, message, "pipeConsumerId", |c| {
                    c.close_with(true);
                })
            }
            methods::PIPE_CONSUMER_PAUSED => dispatch_to(
                &inner.pipe_consumers,
                message,
                "pipeConsumerId",
                Consumer::remote_paused,
            ),
            methods::PIPE_CONSUMER_RESUMED => dispatch_to(
                &inner.pipe_consumers,
                message,
                "pipeConsumerId",
                Consumer::remote_resumed,
            ),
            methods::DATA_PRODUCER_CLOSED => {
                dispatch_to(&inner.data_producers, message, "dataProducerId", |p| {
                    p.close_with(true);
                })
            }
            methods::PIPE_DATA_PRODUCER_CLOSED => {
                dispatch_to(&inner.pipe_data_producers, message, "pipeDataProducerId", |p| {
                    p.close_with(true);
                })
            }
            methods::DATA_CONSUMER_CLOSED => {
                dispatch_to(&inner.data_consumers, message, "dataConsumerId", |c| {
                    c.close_with(true);
                })
            }
            methods::PIPE_DATA_CONSUMER_CLOSED => {
                dispatch_to(&inner.pipe_data_consumers, message, "pipeDataConsumerId", |c| {
                    c.close_with(true);
                })
            }
            _ => HandlerOutcome::Pass,
        }
    }

    pub fn close(&self) {
        self.close_with(false);
    }

    /// Close; `remote` means the media node already closed the router (or
    /// its connection is gone) and `closeRouter` is not sent.
    pub(crate) fn close_with(&self, remote: bool) {
        let Some(pending) = self.inner.close.close() else {
            return;
        };

        info!(
            target: "ss.media.router",
            router_id = %self.inner.id,
            media_node_id = %self.inner.media_node_id,
            room_id = %self.inner.room_id,
            remote,
            "Router closed"
        );

        if let Some(handler_id) = self.inner.handler_id.lock().take() {
            self.connection().remove_handler(handler_id);
        }
        if !remote {
            self.inner.channel.notify(methods::CLOSE_ROUTER, json!({}));
        }

        let inner = &self.inner;
        for transport in drain(&inner.webrtc_transports) {
            transport.close_with(true);
        }
        // Each pipe transport closes its peer on the remote router.
        for transport in drain(&inner.pipe_transports) {
            transport.close_with(true);
        }
        for producer in drain(&inner.producers).into_iter().chain(drain(&inner.pipe_producers)) {
            producer.close_with(true);
        }
        for consumer in drain(&inner.consumers).into_iter().chain(drain(&inner.pipe_consumers)) {
            consumer.close_with(true);
        }
        for data_producer in drain(&inner.data_producers)
            .into_iter()
            .chain(drain(&inner.pipe_data_producers))
        {
            data_producer.close_with(true);
        }
        for data_consumer in drain(&inner.data_consumers)
            .into_iter()
            .chain(drain(&inner.pipe_data_consumers))
        {
            data_consumer.close_with(true);
        }
        inner.pipe_pairs.lock().clear();

        pending.notify();
    }

    pub fn on_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.close.subscribe(callback);
    }
}

//! Client-facing WebRTC transports and inter-router pipe transports.
//!
//! Transports reach back into their router (weakly) to register the
//! entities they create. Closing a transport closes every entity created
//! on it without further notifications: the media node tears those down
//! together with the transport.

use super::consumer::{Consumer, ConsumerOptions, DataConsumer, DataConsumerOptions};
use super::messages::{
    ConsumerCreated, DataEntityCreated, EntityCreated, IceRestarted, PipeTransportCreated,
    RouterChannel, WebRtcTransportCreated,
};
use super::observer::CloseSignal;
use super::producer::{DataProducer, DataProducerOptions, Producer, ProducerOptions};
use super::router::{Router, WeakRouter};
use crate::errors::SsError;
use media_protocol::methods;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Parameters for [`WebRtcTransport::produce`].
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub kind: String,
    pub rtp_parameters: Value,
    pub paused: bool,
}

/// Parameters for [`WebRtcTransport::consume`].
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub producer_id: String,
    pub rtp_capabilities: Value,
    pub paused: bool,
}

/// Parameters for [`WebRtcTransport::produce_data`].
#[derive(Debug, Clone)]
pub struct ProduceDataOptions {
    pub sctp_stream_parameters: Value,
    pub label: String,
    pub protocol: String,
}

struct WebRtcTransportInner {
    id: String,
    ice_parameters: Mutex<Value>,
    ice_candidates: Value,
    dtls_parameters: Value,
    sctp_parameters: Option<Value>,
    channel: RouterChannel,
    router: WeakRouter,
    close: CloseSignal,
}

/// Client-facing transport.
#[derive(Clone)]
pub struct WebRtcTransport {
    inner: Arc<WebRtcTransportInner>,
}

impl fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("id", &self.inner.id)
            .field("router_id", &self.inner.channel.router_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl WebRtcTransport {
    pub(crate) fn new(
        created: WebRtcTransportCreated,
        channel: RouterChannel,
        router: WeakRouter,
    ) -> Self {
        Self {
            inner: Arc::new(WebRtcTransportInner {
                id: created.id,
                ice_parameters: Mutex::new(created.ice_parameters),
                ice_candidates: created.ice_candidates,
                dtls_parameters: created.dtls_parameters,
                sctp_parameters: created.sctp_parameters,
                channel,
                router,
                close: CloseSignal::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn router_id(&self) -> &str {
        self.inner.channel.router_id()
    }

    /// Current ICE parameters (replaced by [`Self::restart_ice`]).
    #[must_use]
    pub fn ice_parameters(&self) -> Value {
        self.inner.ice_parameters.lock().clone()
    }

    #[must_use]
    pub fn ice_candidates(&self) -> &Value {
        &self.inner.ice_candidates
    }

    #[must_use]
    pub fn dtls_parameters(&self) -> &Value {
        &self.inner.dtls_parameters
    }

    #[must_use]
    pub fn sctp_parameters(&self) -> Option<&Value> {
        self.inner.sctp_parameters.as_ref()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    fn ensure_open(&self) -> Result<Router, SsError> {
        if self.is_closed() {
            return Err(SsError::Closed("Transport"));
        }
        self.inner.router.upgrade().ok_or(SsError::Closed("Router"))
    }

    /// Complete the DTLS handshake parameters exchange.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if closed, or the request error.
    pub async fn connect(&self, dtls_parameters: Value) -> Result<(), SsError> {
        self.ensure_open()?;
        self.inner
            .channel
            .request::<Value>(
                methods::CONNECT_WEBRTC_TRANSPORT,
                json!({ "transportId": self.inner.id, "dtlsParameters": dtls_parameters }),
            )
            .await?;
        Ok(())
    }

    /// Restart ICE and return the new ICE parameters.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if closed, or the request error.
    pub async fn restart_ice(&self) -> Result<Value, SsError> {
        self.ensure_open()?;
        let restarted: IceRestarted = self
            .inner
            .channel
            .request(methods::RESTART_ICE, json!({ "transportId": self.inner.id }))
            .await?;
        *self.inner.ice_parameters.lock() = restarted.ice_parameters.clone();
        Ok(restarted.ice_parameters)
    }

    /// Cap the bitrate the client may send on this transport.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if closed, or the request error.
    pub async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), SsError> {
        self.ensure_open()?;
        self.inner
            .channel
            .request::<Value>(
                methods::SET_MAX_INCOMING_BITRATE,
                json!({ "transportId": self.inner.id, "bitrate": bitrate }),
            )
            .await?;
        Ok(())
    }

    /// Create a producer for media the client sends.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if the transport or router closed, or the request error.
    pub async fn produce(&self, options: ProduceOptions) -> Result<Producer, SsError> {
        self.ensure_open()?;
        let created: EntityCreated = self
            .inner
            .channel
            .request(
                methods::PRODUCE,
                json!({
                    "transportId": self.inner.id,
                    "kind": options.kind,
                    "rtpParameters": options.rtp_parameters,
                    "paused": options.paused,
                }),
            )
            .await?;

        let producer = Producer::new(
            ProducerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                kind: options.kind,
                rtp_parameters: options.rtp_parameters,
                paused: options.paused,
                pipe: false,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_producer(producer)
    }

    /// Create a consumer of a producer in the same router.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if the transport or router closed, or the request error.
    pub async fn consume(&self, options: ConsumeOptions) -> Result<Consumer, SsError> {
        self.ensure_open()?;
        let created: ConsumerCreated = self
            .inner
            .channel
            .request(
                methods::CONSUME,
                json!({
                    "transportId": self.inner.id,
                    "producerId": options.producer_id,
                    "rtpCapabilities": options.rtp_capabilities,
                    "paused": options.paused,
                }),
            )
            .await?;

        let consumer = Consumer::new(
            ConsumerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                producer_id: options.producer_id,
                kind: created.kind,
                rtp_parameters: created.rtp_parameters,
                paused: options.paused || created.producer_paused,
                producer_paused: created.producer_paused,
                pipe: false,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_consumer(consumer)
    }

    /// Create a data producer for a client data channel.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if the transport or router closed, or the request error.
    pub async fn produce_data(&self, options: ProduceDataOptions) -> Result<DataProducer, SsError> {
        self.ensure_open()?;
        let created: DataEntityCreated = self
            .inner
            .channel
            .request(
                methods::PRODUCE_DATA,
                json!({
                    "transportId": self.inner.id,
                    "sctpStreamParameters": options.sctp_stream_parameters,
                    "label": options.label,
                    "protocol": options.protocol,
                }),
            )
            .await?;

        let data_producer = DataProducer::new(
            DataProducerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                sctp_stream_parameters: options.sctp_stream_parameters,
                label: options.label,
                protocol: options.protocol,
                pipe: false,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_data_producer(data_producer)
    }

    /// Create a data consumer of a data producer in the same router.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if the transport or router closed, or the request error.
    pub async fn consume_data(&self, data_producer_id: &str) -> Result<DataConsumer, SsError> {
        self.ensure_open()?;
        let created: DataEntityCreated = self
            .inner
            .channel
            .request(
                methods::CONSUME_DATA,
                json!({ "transportId": self.inner.id, "dataProducerId": data_producer_id }),
            )
            .await?;

        let data_consumer = DataConsumer::new(
            DataConsumerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                data_producer_id: data_producer_id.to_string(),
                sctp_stream_parameters: created.sctp_stream_parameters,
                label: created.label,
                protocol: created.protocol,
                pipe: false,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_data_consumer(data_consumer)
    }

    pub fn close(&self) {
        self.close_with(false);
    }

    pub(crate) fn close_with(&self, remote: bool) {
        let Some(pending) = self.inner.close.close() else {
            return;
        };

        debug!(
            target: "ss.media.router",
            router_id = %self.router_id(),
            transport_id = %self.inner.id,
            remote,
            "WebRTC transport closed"
        );

        if !remote {
            self.inner.channel.notify(
                methods::CLOSE_WEBRTC_TRANSPORT,
                json!({ "transportId": self.inner.id }),
            );
        }
        if let Some(router) = self.inner.router.upgrade() {
            router.close_transport_entities(&self.inner.id);
        }
        pending.notify();
    }

    pub fn on_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.close.subscribe(callback);
    }
}

struct PipeTransportInner {
    id: String,
    ip: String,
    port: u16,
    srtp_parameters: Option<Value>,
    remote_router_id: String,
    internal: bool,
    channel: RouterChannel,
    router: WeakRouter,
    close: CloseSignal,
}

/// One side of a pipe transport pair linking two routers.
#[derive(Clone)]
pub struct PipeTransport {
    inner: Arc<PipeTransportInner>,
}

impl fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeTransport")
            .field("id", &self.inner.id)
            .field("router_id", &self.inner.channel.router_id())
            .field("remote_router_id", &self.inner.remote_router_id)
            .field("internal", &self.inner.internal)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PipeTransport {
    pub(crate) fn new(
        created: PipeTransportCreated,
        remote_router_id: String,
        internal: bool,
        channel: RouterChannel,
        router: WeakRouter,
    ) -> Self {
        Self {
            inner: Arc::new(PipeTransportInner {
                id: created.id,
                ip: created.ip,
                port: created.port,
                srtp_parameters: created.srtp_parameters,
                remote_router_id,
                internal,
                channel,
                router,
                close: CloseSignal::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn router_id(&self) -> &str {
        self.inner.channel.router_id()
    }

    /// Router at the other end of the pair.
    #[must_use]
    pub fn remote_router_id(&self) -> &str {
        &self.inner.remote_router_id
    }

    /// Whether both ends live on the same media node.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.inner.internal
    }

    /// Local address the peer transport connects to.
    #[must_use]
    pub fn tuple(&self) -> (&str, u16) {
        (&self.inner.ip, self.inner.port)
    }

    #[must_use]
    pub fn srtp_parameters(&self) -> Option<&Value> {
        self.inner.srtp_parameters.as_ref()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    fn ensure_open(&self) -> Result<Router, SsError> {
        if self.is_closed() {
            return Err(SsError::Closed("Pipe transport"));
        }
        self.inner.router.upgrade().ok_or(SsError::Closed("Router"))
    }

    /// Connect this side to `peer`'s local tuple.
    pub(crate) async fn connect_to(&self, peer: &PipeTransport) -> Result<(), SsError> {
        self.ensure_open()?;
        let (ip, port) = peer.tuple();
        self.inner
            .channel
            .request::<Value>(
                methods::CONNECT_PIPE_TRANSPORT,
                json!({
                    "pipeTransportId": self.inner.id,
                    "ip": ip,
                    "port": port,
                    "srtpParameters": peer.srtp_parameters(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Consume `producer` (of this transport's router) into the pipe.
    pub(crate) async fn consume(&self, producer: &Producer) -> Result<Consumer, SsError> {
        self.ensure_open()?;
        let created: ConsumerCreated = self
            .inner
            .channel
            .request(
                methods::CREATE_PIPE_CONSUMER,
                json!({ "pipeTransportId": self.inner.id, "producerId": producer.id() }),
            )
            .await?;

        let consumer = Consumer::new(
            ConsumerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                producer_id: producer.id().to_string(),
                kind: created.kind,
                rtp_parameters: created.rtp_parameters,
                paused: created.producer_paused,
                producer_paused: created.producer_paused,
                pipe: true,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_consumer(consumer)
    }

    /// Produce what the peer's pipe consumer sends, under the original
    /// producer id.
    pub(crate) async fn produce(
        &self,
        producer_id: &str,
        pipe_consumer: &Consumer,
    ) -> Result<Producer, SsError> {
        self.ensure_open()?;
        let paused = pipe_consumer.producer_paused();
        let created: EntityCreated = self
            .inner
            .channel
            .request(
                methods::CREATE_PIPE_PRODUCER,
                json!({
                    "pipeTransportId": self.inner.id,
                    "producerId": producer_id,
                    "kind": pipe_consumer.kind(),
                    "rtpParameters": pipe_consumer.rtp_parameters(),
                    "paused": paused,
                }),
            )
            .await?;

        let producer = Producer::new(
            ProducerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                kind: pipe_consumer.kind().to_string(),
                rtp_parameters: pipe_consumer.rtp_parameters().clone(),
                paused,
                pipe: true,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_producer(producer)
    }

    /// Consume `data_producer` (of this transport's router) into the pipe.
    pub(crate) async fn consume_data(
        &self,
        data_producer: &DataProducer,
    ) -> Result<DataConsumer, SsError> {
        self.ensure_open()?;
        let created: DataEntityCreated = self
            .inner
            .channel
            .request(
                methods::CREATE_PIPE_DATA_CONSUMER,
                json!({ "pipeTransportId": self.inner.id, "dataProducerId": data_producer.id() }),
            )
            .await?;

        let data_consumer = DataConsumer::new(
            DataConsumerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                data_producer_id: data_producer.id().to_string(),
                sctp_stream_parameters: created.sctp_stream_parameters,
                label: created.label,
                protocol: created.protocol,
                pipe: true,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_data_consumer(data_consumer)
    }

    /// Produce what the peer's pipe data consumer sends.
    pub(crate) async fn produce_data(
        &self,
        data_producer_id: &str,
        pipe_data_consumer: &DataConsumer,
    ) -> Result<DataProducer, SsError> {
        self.ensure_open()?;
        let created: EntityCreated = self
            .inner
            .channel
            .request(
                methods::CREATE_PIPE_DATA_PRODUCER,
                json!({
                    "pipeTransportId": self.inner.id,
                    "dataProducerId": data_producer_id,
                    "sctpStreamParameters": pipe_data_consumer.sctp_stream_parameters(),
                    "label": pipe_data_consumer.label(),
                    "protocol": pipe_data_consumer.protocol(),
                }),
            )
            .await?;

        let data_producer = DataProducer::new(
            DataProducerOptions {
                id: created.id,
                transport_id: self.inner.id.clone(),
                sctp_stream_parameters: pipe_data_consumer.sctp_stream_parameters().clone(),
                label: pipe_data_consumer.label().to_string(),
                protocol: pipe_data_consumer.protocol().to_string(),
                pipe: true,
            },
            self.inner.channel.clone(),
        );
        self.ensure_open()?.insert_data_producer(data_producer)
    }

    pub fn close(&self) {
        self.close_with(false);
    }

    pub(crate) fn close_with(&self, remote: bool) {
        let Some(pending) = self.inner.close.close() else {
            return;
        };

        debug!(
            target: "ss.media.pipe",
            router_id = %self.router_id(),
            pipe_transport_id = %self.inner.id,
            remote_router_id = %self.inner.remote_router_id,
            remote,
            "Pipe transport closed"
        );

        if !remote {
            self.inner.channel.notify(
                methods::CLOSE_PIPE_TRANSPORT,
                json!({ "pipeTransportId": self.inner.id }),
            );
        }
        if let Some(router) = self.inner.router.upgrade() {
            router.close_transport_entities(&self.inner.id);
        }
        pending.notify();
    }

    pub fn on_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.close.subscribe(callback);
    }
}

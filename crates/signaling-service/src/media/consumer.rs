//! Consumers and data consumers.
//!
//! Pipe consumers live on the sending router's pipe transport and follow
//! their producer: their pause state only changes through media node
//! notifications.

use super::messages::RouterChannel;
use super::observer::{CloseSignal, Observers};
use crate::errors::SsError;
use media_protocol::methods;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ConsumerOptions {
    pub id: String,
    pub transport_id: String,
    pub producer_id: String,
    pub kind: String,
    pub rtp_parameters: Value,
    pub paused: bool,
    pub producer_paused: bool,
    pub pipe: bool,
}

struct ConsumerInner {
    id: String,
    transport_id: String,
    producer_id: String,
    kind: String,
    rtp_parameters: Value,
    pipe: bool,
    paused: AtomicBool,
    producer_paused: AtomicBool,
    channel: RouterChannel,
    close: CloseSignal,
    pause_observers: Observers<()>,
    resume_observers: Observers<()>,
    score_observers: Observers<Value>,
    layers_observers: Observers<Value>,
}

/// Media consumer inside a router.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("pipe", &self.inner.pipe)
            .field("paused", &self.paused())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Consumer {
    pub(crate) fn new(options: ConsumerOptions, channel: RouterChannel) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                id: options.id,
                transport_id: options.transport_id,
                producer_id: options.producer_id,
                kind: options.kind,
                rtp_parameters: options.rtp_parameters,
                pipe: options.pipe,
                paused: AtomicBool::new(options.paused),
                producer_paused: AtomicBool::new(options.producer_paused),
                channel,
                close: CloseSignal::new(),
                pause_observers: Observers::new(),
                resume_observers: Observers::new(),
                score_observers: Observers::new(),
                layers_observers: Observers::new(),
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

    #[must_use]
    pub fn transport_id(&self) -> &str {
        &self.inner.transport_id
    }

    /// Producer this consumer receives from.
    #[must_use]
    pub fn producer_id(&self) -> &str {
        &self.inner.producer_id
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    #[must_use]
    pub fn rtp_parameters(&self) -> &Value {
        &self.inner.rtp_parameters
    }

    #[must_use]
    pub fn is_pipe(&self) -> bool {
        self.inner.pipe
    }

    /// Paused by the media node (follows the producer for pipe consumers).
    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Producer pause state as last reported.
    #[must_use]
    pub fn producer_paused(&self) -> bool {
        self.inner.producer_paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    pub(crate) fn id_field(&self) -> &'static str {
        if self.inner.pipe {
            "pipeConsumerId"
        } else {
            "consumerId"
        }
    }

    /// Pause. No-op for pipe consumers, closed consumers, or if already paused.
    pub fn pause(&self) {
        if self.inner.pipe || self.is_closed() || self.inner.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .channel
            .notify(methods::PAUSE_CONSUMER, json!({ "consumerId": self.inner.id }));
        self.inner.pause_observers.emit(&());
    }

    /// Resume. No-op for pipe consumers, closed consumers, or if not paused.
    pub fn resume(&self) {
        if self.inner.pipe || self.is_closed() || !self.inner.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner
            .channel
            .notify(methods::RESUME_CONSUMER, json!({ "consumerId": self.inner.id }));
        self.inner.resume_observers.emit(&());
    }

    /// Ask the media node to forward the given simulcast/SVC layers.
    ///
    /// # Errors
    ///
    /// `SsError::Closed` if the consumer is closed, otherwise the request error.
    pub async fn set_preferred_layers(
        &self,
        spatial_layer: u8,
        temporal_layer: Option<u8>,
    ) -> Result<(), SsError> {
        if self.is_closed() {
            return Err(SsError::Closed("Consumer"));
        }
        self.inner
            .channel
            .request::<Value>(
                methods::SET_CONSUMER_PREFERRED_LAYERS,
                json!({
                    "consumerId": self.inner.id,
                    "spatialLayer": spatial_layer,
                    "temporalLayer": temporal_layer,
                }),
            )
            .await?;
        Ok(())
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
            consumer_id = %self.inner.id,
            pipe = self.inner.pipe,
            remote,
            "Consumer closed"
        );

        if !remote {
            let method = if self.inner.pipe {
                methods::CLOSE_PIPE_CONSUMER
            } else {
                methods::CLOSE_CONSUMER
            };
            self.inner
                .channel
                .notify(method, json!({ self.id_field(): self.inner.id }));
        }

        self.inner.pause_observers.clear();
        self.inner.resume_observers.clear();
        self.inner.score_observers.clear();
        self.inner.layers_observers.clear();
        pending.notify();
    }

    pub(crate) fn remote_paused(&self) {
        self.inner.producer_paused.store(true, Ordering::SeqCst);
        if self.is_closed() || self.inner.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.pause_observers.emit(&());
    }

    pub(crate) fn remote_resumed(&self) {
        self.inner.producer_paused.store(false, Ordering::SeqCst);
        if self.is_closed() || !self.inner.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.resume_observers.emit(&());
    }

    pub(crate) fn remote_score(&self, score: &Value) {
        if !self.is_closed() {
            self.inner.score_observers.emit(score);
        }
    }

    pub(crate) fn remote_layers_changed(&self, layers: &Value) {
        if !self.is_closed() {
            self.inner.layers_observers.emit(layers);
        }
    }

    pub fn on_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.close.subscribe(callback);
    }

    pub fn on_pause(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.pause_observers.add(callback);
    }

    pub fn on_resume(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.resume_observers.add(callback);
    }

    pub fn on_score(&self, callback: impl Fn(&Value) + Send + Sync + 'static) {
        self.inner.score_observers.add(callback);
    }

    pub fn on_layers_change(&self, callback: impl Fn(&Value) + Send + Sync + 'static) {
        self.inner.layers_observers.add(callback);
    }
}

pub(crate) struct DataConsumerOptions {
    pub id: String,
    pub transport_id: String,
    pub data_producer_id: String,
    pub sctp_stream_parameters: Value,
    pub label: String,
    pub protocol: String,
    pub pipe: bool,
}

struct DataConsumerInner {
    id: String,
    transport_id: String,
    data_producer_id: String,
    sctp_stream_parameters: Value,
    label: String,
    protocol: String,
    pipe: bool,
    channel: RouterChannel,
    close: CloseSignal,
}

/// Data channel consumer inside a router.
#[derive(Clone)]
pub struct DataConsumer {
    inner: Arc<DataConsumerInner>,
}

impl fmt::Debug for DataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConsumer")
            .field("id", &self.inner.id)
            .field("data_producer_id", &self.inner.data_producer_id)
            .field("pipe", &self.inner.pipe)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl DataConsumer {
    pub(crate) fn new(options: DataConsumerOptions, channel: RouterChannel) -> Self {
        Self {
            inner: Arc::new(DataConsumerInner {
                id: options.id,
                transport_id: options.transport_id,
                data_producer_id: options.data_producer_id,
                sctp_stream_parameters: options.sctp_stream_parameters,
                label: options.label,
                protocol: options.protocol,
                pipe: options.pipe,
                channel,
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

    #[must_use]
    pub fn transport_id(&self) -> &str {
        &self.inner.transport_id
    }

    #[must_use]
    pub fn data_producer_id(&self) -> &str {
        &self.inner.data_producer_id
    }

    #[must_use]
    pub fn sctp_stream_parameters(&self) -> &Value {
        &self.inner.sctp_stream_parameters
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    #[must_use]
    pub fn is_pipe(&self) -> bool {
        self.inner.pipe
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    pub(crate) fn id_field(&self) -> &'static str {
        if self.inner.pipe {
            "pipeDataConsumerId"
        } else {
            "dataConsumerId"
        }
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
            data_consumer_id = %self.inner.id,
            pipe = self.inner.pipe,
            remote,
            "Data consumer closed"
        );

        if !remote {
            let method = if self.inner.pipe {
                methods::CLOSE_PIPE_DATA_CONSUMER
            } else {
                methods::CLOSE_DATA_CONSUMER
            };
            self.inner
                .channel
                .notify(method, json!({ self.id_field(): self.inner.id }));
        }
        pending.notify();
    }

    pub fn on_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.close.subscribe(callback);
    }
}

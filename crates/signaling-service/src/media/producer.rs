//! Producers and data producers.
//!
//! A pipe producer mirrors a producer of another router; it carries the
//! original producer's id and uses the `*PipeProducer` method family.

use super::messages::RouterChannel;
use super::observer::{CloseSignal, Observers};
use media_protocol::methods;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ProducerOptions {
    pub id: String,
    pub transport_id: String,
    pub kind: String,
    pub rtp_parameters: Value,
    pub paused: bool,
    pub pipe: bool,
}

struct ProducerInner {
    id: String,
    transport_id: String,
    kind: String,
    rtp_parameters: Value,
    pipe: bool,
    paused: AtomicBool,
    channel: RouterChannel,
    close: CloseSignal,
    pause_observers: Observers<()>,
    resume_observers: Observers<()>,
    score_observers: Observers<Value>,
}

/// Media producer inside a router.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("pipe", &self.inner.pipe)
            .field("paused", &self.paused())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Producer {
    pub(crate) fn new(options: ProducerOptions, channel: RouterChannel) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                id: options.id,
                transport_id: options.transport_id,
                kind: options.kind,
                rtp_parameters: options.rtp_parameters,
                pipe: options.pipe,
                paused: AtomicBool::new(options.paused),
                channel,
                close: CloseSignal::new(),
                pause_observers: Observers::new(),
                resume_observers: Observers::new(),
                score_observers: Observers::new(),
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

    /// Transport this producer was created on.
    #[must_use]
    pub fn transport_id(&self) -> &str {
        &self.inner.transport_id
    }

    /// `audio` or `video`.
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

    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    pub(crate) fn id_field(&self) -> &'static str {
        if self.inner.pipe {
            "pipeProducerId"
        } else {
            "producerId"
        }
    }

    /// Pause. No-op if closed or already paused.
    pub fn pause(&self) {
        if self.is_closed() || self.inner.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        let method = if self.inner.pipe {
            methods::PAUSE_PIPE_PRODUCER
        } else {
            methods::PAUSE_PRODUCER
        };
        self.inner
            .channel
            .notify(method, json!({ self.id_field(): self.inner.id }));
        self.inner.pause_observers.emit(&());
    }

    /// Resume. No-op if closed or not paused.
    pub fn resume(&self) {
        if self.is_closed() || !self.inner.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        let method = if self.inner.pipe {
            methods::RESUME_PIPE_PRODUCER
        } else {
            methods::RESUME_PRODUCER
        };
        self.inner
            .channel
            .notify(method, json!({ self.id_field(): self.inner.id }));
        self.inner.resume_observers.emit(&());
    }

    pub fn close(&self) {
        self.close_with(false);
    }

    /// Close; `remote` means the media node already knows and no close
    /// notification is sent.
    pub(crate) fn close_with(&self, remote: bool) {
        let Some(pending) = self.inner.close.close() else {
            return;
        };

        debug!(
            target: "ss.media.router",
            router_id = %self.router_id(),
            producer_id = %self.inner.id,
            pipe = self.inner.pipe,
            remote,
            "Producer closed"
        );

        if !remote {
            let method = if self.inner.pipe {
                methods::CLOSE_PIPE_PRODUCER
            } else {
                methods::CLOSE_PRODUCER
            };
            self.inner
                .channel
                .notify(method, json!({ self.id_field(): self.inner.id }));
        }

        self.inner.pause_observers.clear();
        self.inner.resume_observers.clear();
        self.inner.score_observers.clear();
        pending.notify();
    }

    pub(crate) fn remote_paused(&self) {
        if self.is_closed() || self.inner.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.pause_observers.emit(&());
    }

    pub(crate) fn remote_resumed(&self) {
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
}

pub(crate) struct DataProducerOptions {
    pub id: String,
    pub transport_id: String,
    pub sctp_stream_parameters: Value,
    pub label: String,
    pub protocol: String,
    pub pipe: bool,
}

struct DataProducerInner {
    id: String,
    transport_id: String,
    sctp_stream_parameters: Value,
    label: String,
    protocol: String,
    pipe: bool,
    channel: RouterChannel,
    close: CloseSignal,
}

/// Data channel producer inside a router.
#[derive(Clone)]
pub struct DataProducer {
    inner: Arc<DataProducerInner>,
}

impl fmt::Debug for DataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProducer")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("pipe", &self.inner.pipe)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl DataProducer {
    pub(crate) fn new(options: DataProducerOptions, channel: RouterChannel) -> Self {
        Self {
            inner: Arc::new(DataProducerInner {
                id: options.id,
                transport_id: options.transport_id,
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
            "pipeDataProducerId"
        } else {
            "dataProducerId"
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
            data_producer_id = %self.inner.id,
            pipe = self.inner.pipe,
            remote,
            "Data producer closed"
        );

        if !remote {
            let method = if self.inner.pipe {
                methods::CLOSE_PIPE_DATA_PRODUCER
            } else {
                methods::CLOSE_DATA_PRODUCER
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::rpc::{RpcConnection, RpcSettings, Socket};
    use media_protocol::Frame;
    use std::sync::atomic::AtomicUsize;

    fn producer(pipe: bool) -> (Producer, Socket) {
        let (local, remote) = Socket::pair();
        let connection = RpcConnection::with_socket("mn-1/room-1", local, RpcSettings::default());
        let channel = RouterChannel::new("r1".to_string(), connection);
        let producer = Producer::new(
            ProducerOptions {
                id: "p1".to_string(),
                transport_id: "t1".to_string(),
                kind: "video".to_string(),
                rtp_parameters: json!({}),
                paused: false,
                pipe,
            },
            channel,
        );
        (producer, remote)
    }

    async fn next_notification(remote: &mut Socket) -> (String, Value) {
        match remote.inbound.recv().await {
            Some(Frame::Notification(n)) => (n.method, n.data),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pause_resume_notify_once_and_emit() {
        let (producer, mut remote) = producer(false);
        let pauses = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&pauses);
        producer.on_pause(move |()| {
            p.fetch_add(1, Ordering::SeqCst);
        });

        producer.pause();
        producer.pause();
        assert!(producer.paused());
        assert_eq!(pauses.load(Ordering::SeqCst), 1);

        let (method, data) = next_notification(&mut remote).await;
        assert_eq!(method, methods::PAUSE_PRODUCER);
        assert_eq!(data, json!({ "routerId": "r1", "producerId": "p1" }));

        producer.resume();
        let (method, _) = next_notification(&mut remote).await;
        assert_eq!(method, methods::RESUME_PRODUCER);
        assert!(!producer.paused());
    }

    #[tokio::test]
    async fn test_pipe_producer_uses_pipe_methods() {
        let (producer, mut remote) = producer(true);
        producer.pause();
        let (method, data) = next_notification(&mut remote).await;
        assert_eq!(method, methods::PAUSE_PIPE_PRODUCER);
        assert_eq!(data, json!({ "routerId": "r1", "pipeProducerId": "p1" }));

        producer.close();
        let (method, _) = next_notification(&mut remote).await;
        assert_eq!(method, methods::CLOSE_PIPE_PRODUCER);
    }

    #[tokio::test]
    async fn test_closed_producer_ignores_mutations() {
        let (producer, mut remote) = producer(false);
        let closes = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&closes);
        producer.on_close(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        producer.close_with(true);
        producer.close();
        producer.pause();
        assert!(!producer.paused());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // A remote close sends nothing; the socket just goes away.
        drop(producer);
        assert!(remote.inbound.recv().await.is_none());
    }
}

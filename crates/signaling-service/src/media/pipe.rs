//! Inter-router piping (`pipe_to_router`).
//!
//! Two routers exchange media over one pipe transport pair. The pair is
//! created at most once per router pair: concurrent callers, in either
//! direction, share the same in-flight pairing future, which is cached on
//! both routers under the peer's id.
//!
//! ```text
//!   router A                               router B
//!  producer ──> pipe consumer ══ pair ══> pipe producer ──> consumers
//! ```
//!
//! # Pair lifecycle
//!
//! - Both caches are locked in router id order, so A->B and B->A callers
//!   observe one entry.
//! - Closing either transport of a pair closes its peer and evicts the
//!   entry from both caches. Eviction matches on the pair id, so a newer
//!   pair installed meanwhile survives.
//! - A failed pairing evicts itself; the next caller retries.

use super::consumer::{Consumer, DataConsumer};
use super::producer::{DataProducer, Producer};
use super::router::{Router, WeakRouter};
use super::transport::PipeTransport;
use crate::errors::SsError;
use crate::observability::record_pipe_transport_pair_created;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

static NEXT_PAIR_ID: AtomicU64 = AtomicU64::new(1);

type PairFuture = Shared<BoxFuture<'static, Result<PipeTransportPair, SsError>>>;

/// Cached pairing toward one remote router.
#[derive(Clone)]
pub(crate) struct PairEntry {
    pair_id: u64,
    future: PairFuture,
}

/// Connected pipe transports, one per router.
#[derive(Debug, Clone)]
pub struct PipeTransportPair {
    pub local: PipeTransport,
    pub remote: PipeTransport,
}

impl PipeTransportPair {
    /// Orient the pair so `local` belongs to `local_router_id`.
    fn oriented(self, local_router_id: &str) -> Self {
        if self.local.router_id() == local_router_id {
            self
        } else {
            Self {
                local: self.remote,
                remote: self.local,
            }
        }
    }
}

/// What to pipe, and where. Exactly one of the ids must be set.
#[derive(Debug, Clone)]
pub struct PipeToRouterOptions {
    pub producer_id: Option<String>,
    pub data_producer_id: Option<String>,
    pub router: Router,
}

/// Entities created by a successful pipe.
#[derive(Debug, Clone)]
pub enum PipeToRouterResult {
    Media {
        pipe_consumer: Consumer,
        pipe_producer: Producer,
    },
    Data {
        pipe_data_consumer: DataConsumer,
        pipe_data_producer: DataProducer,
    },
}

impl Router {
    /// Make a producer (or data producer) of this router available in
    /// `options.router` under the same id.
    ///
    /// # Errors
    ///
    /// - `SsError::InvalidPipeRequest` unless exactly one id is given, or
    ///   when piping a router to itself
    /// - `SsError::Closed` if either router is closed
    /// - `SsError::ProducerNotFound` / `SsError::DataProducerNotFound` if
    ///   the source is unknown or closed before the pipe completes
    /// - Any media node request error
    #[instrument(skip_all, fields(router_id = %self.id(), remote_router_id = %options.router.id()))]
    pub async fn pipe_to_router(
        &self,
        options: PipeToRouterOptions,
    ) -> Result<PipeToRouterResult, SsError> {
        let PipeToRouterOptions {
            producer_id,
            data_producer_id,
            router: remote,
        } = options;

        match (producer_id, data_producer_id) {
            (Some(producer_id), None) => {
                let (pipe_consumer, pipe_producer) =
                    self.pipe_producer_to(&producer_id, &remote).await?;
                Ok(PipeToRouterResult::Media {
                    pipe_consumer,
                    pipe_producer,
                })
            }
            (None, Some(data_producer_id)) => {
                let (pipe_data_consumer, pipe_data_producer) =
                    self.pipe_data_producer_to(&data_producer_id, &remote).await?;
                Ok(PipeToRouterResult::Data {
                    pipe_data_consumer,
                    pipe_data_producer,
                })
            }
            _ => Err(SsError::InvalidPipeRequest(
                "exactly one of producerId and dataProducerId is required".to_string(),
            )),
        }
    }

    fn check_pipe_target(&self, remote: &Router) -> Result<(), SsError> {
        if self.id() == remote.id() {
            return Err(SsError::InvalidPipeRequest(
                "cannot pipe a router to itself".to_string(),
            ));
        }
        self.ensure_open()?;
        remote.ensure_open()
    }

    async fn pipe_producer_to(
        &self,
        producer_id: &str,
        remote: &Router,
    ) -> Result<(Consumer, Producer), SsError> {
        self.check_pipe_target(remote)?;
        let producer = self
            .producer(producer_id)
            .filter(|producer| !producer.is_closed())
            .ok_or_else(|| SsError::ProducerNotFound(producer_id.to_string()))?;

        let pair = self.pipe_transport_pair(remote).await?;

        let pipe_consumer = pair.local.consume(&producer).await?;
        let pipe_producer = match pair.remote.produce(producer_id, &pipe_consumer).await {
            Ok(pipe_producer) => pipe_producer,
            Err(e) => {
                pipe_consumer.close();
                return Err(e);
            }
        };

        if producer.is_closed() {
            pipe_consumer.close();
            pipe_producer.close();
            return Err(SsError::ProducerNotFound(producer_id.to_string()));
        }

        {
            let pipe_producer = pipe_producer.clone();
            pipe_consumer.on_close(move |()| pipe_producer.close());
        }
        {
            let pipe_consumer = pipe_consumer.clone();
            pipe_producer.on_close(move |()| pipe_consumer.close());
        }
        {
            let pipe_producer = pipe_producer.clone();
            pipe_consumer.on_pause(move |()| pipe_producer.pause());
        }
        {
            let pipe_producer = pipe_producer.clone();
            pipe_consumer.on_resume(move |()| pipe_producer.resume());
        }
        {
            let pipe_producer = pipe_producer.clone();
            producer.on_pause(move |()| pipe_producer.pause());
        }
        {
            let pipe_producer = pipe_producer.clone();
            producer.on_resume(move |()| pipe_producer.resume());
        }

        // Wiring precedes reconciliation so no pause is lost in between.
        if producer.paused() != pipe_producer.paused() {
            if producer.paused() {
                pipe_producer.pause();
            } else {
                pipe_producer.resume();
            }
        }

        debug!(
            target: "ss.media.pipe",
            producer_id = %producer_id,
            pipe_consumer_id = %pipe_consumer.id(),
            paused = pipe_producer.paused(),
            "Producer piped"
        );

        Ok((pipe_consumer, pipe_producer))
    }

    async fn pipe_data_producer_to(
        &self,
        data_producer_id: &str,
        remote: &Router,
    ) -> Result<(DataConsumer, DataProducer), SsError> {
        self.check_pipe_target(remote)?;
        let data_producer = self
            .data_producer(data_producer_id)
            .filter(|data_producer| !data_producer.is_closed())
            .ok_or_else(|| SsError::DataProducerNotFound(data_producer_id.to_string()))?;

        let pair = self.pipe_transport_pair(remote).await?;

        let pipe_data_consumer = pair.local.consume_data(&data_producer).await?;
        let pipe_data_producer = match pair
            .remote
            .produce_data(data_producer_id, &pipe_data_consumer)
            .await
        {
            Ok(pipe_data_producer) => pipe_data_producer,
            Err(e) => {
                pipe_data_consumer.close();
                return Err(e);
            }
        };

        if data_producer.is_closed() {
            pipe_data_consumer.close();
            pipe_data_producer.close();
            return Err(SsError::DataProducerNotFound(data_producer_id.to_string()));
        }

        {
            let pipe_data_producer = pipe_data_producer.clone();
            pipe_data_consumer.on_close(move |()| pipe_data_producer.close());
        }
        {
            let pipe_data_consumer = pipe_data_consumer.clone();
            pipe_data_producer.on_close(move |()| pipe_data_consumer.close());
        }

        debug!(
            target: "ss.media.pipe",
            data_producer_id = %data_producer_id,
            pipe_data_consumer_id = %pipe_data_consumer.id(),
            "Data producer piped"
        );

        Ok((pipe_data_consumer, pipe_data_producer))
    }

    /// Shared pipe transport pair toward `remote`, oriented from this router.
    async fn pipe_transport_pair(&self, remote: &Router) -> Result<PipeTransportPair, SsError> {
        let entry = self.pair_entry(remote);
        let pair = entry.future.await?;
        Ok(pair.oriented(self.id()))
    }

    fn pair_entry(&self, remote: &Router) -> PairEntry {
        let self_first = self.id() < remote.id();
        let (first, second) = if self_first { (self, remote) } else { (remote, self) };
        let mut first_pairs = first.inner.pipe_pairs.lock();
        let mut second_pairs = second.inner.pipe_pairs.lock();
        let (local_pairs, remote_pairs) = if self_first {
            (&mut *first_pairs, &mut *second_pairs)
        } else {
            (&mut *second_pairs, &mut *first_pairs)
        };

        if let Some(entry) = local_pairs.get(remote.id()) {
            return entry.clone();
        }

        let pair_id = NEXT_PAIR_ID.fetch_add(1, Ordering::Relaxed);
        // Spawned so the pairing completes even if every caller goes away.
        let task = tokio::spawn(create_pair(self.clone(), remote.clone(), pair_id));
        let future = async move {
            task.await
                .map_err(|e| SsError::Internal(format!("pipe transport pairing task failed: {e}")))?
        }
        .boxed()
        .shared();

        let entry = PairEntry { pair_id, future };
        local_pairs.insert(remote.id().to_string(), entry.clone());
        remote_pairs.insert(self.id().to_string(), entry.clone());
        entry
    }
}

async fn create_pair(
    local: Router,
    remote: Router,
    pair_id: u64,
) -> Result<PipeTransportPair, SsError> {
    let internal = local.media_node_id() == remote.media_node_id();
    let (local_weak, remote_weak) = (local.downgrade(), remote.downgrade());

    let (local_created, remote_created) = tokio::join!(
        local.create_pipe_transport(remote.id(), internal),
        remote.create_pipe_transport(local.id(), internal),
    );
    let (local_transport, remote_transport) = match (local_created, remote_created) {
        (Ok(local_transport), Ok(remote_transport)) => (local_transport, remote_transport),
        (Ok(created), Err(e)) | (Err(e), Ok(created)) => {
            created.close();
            evict_pair(&local_weak, &remote_weak, pair_id);
            return Err(e);
        }
        (Err(e), Err(_)) => {
            evict_pair(&local_weak, &remote_weak, pair_id);
            return Err(e);
        }
    };

    if let Err(e) = tokio::try_join!(
        local_transport.connect_to(&remote_transport),
        remote_transport.connect_to(&local_transport),
    ) {
        warn!(
            target: "ss.media.pipe",
            router_id = %local.id(),
            remote_router_id = %remote.id(),
            error = %e,
            "Pipe transport connect failed"
        );
        local_transport.close();
        remote_transport.close();
        evict_pair(&local_weak, &remote_weak, pair_id);
        return Err(e);
    }

    for (transport, peer) in [
        (&local_transport, &remote_transport),
        (&remote_transport, &local_transport),
    ] {
        let peer = peer.clone();
        let (local_weak, remote_weak) = (local_weak.clone(), remote_weak.clone());
        transport.on_close(move |()| {
            peer.close();
            evict_pair(&local_weak, &remote_weak, pair_id);
        });
    }

    // A router that closed while pairing has already dropped its entities.
    if local_transport.is_closed() || remote_transport.is_closed() {
        local_transport.close();
        remote_transport.close();
        return Err(SsError::Closed("Router"));
    }

    record_pipe_transport_pair_created();
    info!(
        target: "ss.media.pipe",
        router_id = %local.id(),
        remote_router_id = %remote.id(),
        internal,
        "Pipe transport pair created"
    );

    Ok(PipeTransportPair {
        local: local_transport,
        remote: remote_transport,
    })
}

/// Drop pair `pair_id` from both routers' caches.
fn evict_pair(a: &WeakRouter, b: &WeakRouter, pair_id: u64) {
    match (a.upgrade(), b.upgrade()) {
        (Some(a), Some(b)) => {
            let (first, second) = if a.id() < b.id() { (&a, &b) } else { (&b, &a) };
            let mut first_pairs = first.inner.pipe_pairs.lock();
            let mut second_pairs = second.inner.pipe_pairs.lock();
            first_pairs.retain(|_, entry| entry.pair_id != pair_id);
            second_pairs.retain(|_, entry| entry.pair_id != pair_id);
        }
        (Some(router), None) | (None, Some(router)) => {
            router
                .inner
                .pipe_pairs
                .lock()
                .retain(|_, entry| entry.pair_id != pair_id);
        }
        (None, None) => {}
    }
}

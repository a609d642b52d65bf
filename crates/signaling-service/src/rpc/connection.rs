//! `RpcConnection` - duplex request/notify channel to one media node room.
//!
//! Each connection:
//! - Is created synchronously; a driver task connects, then pumps frames.
//!   Frames sent before the socket is up are queued.
//! - Correlates responses to outstanding requests by request id, so any
//!   number of requests are multiplexed concurrently.
//! - Exposes a readiness handshake: [`RpcConnection::ready`] resolves on
//!   `mediaNodeReady` and rejects on `mediaNodeDrain`, handshake timeout or
//!   close.
//! - Tracks the last `load` sample piggybacked on any inbound frame.
//!
//! # Lifecycle
//!
//! Close is idempotent and terminal. Local close, socket disconnect and
//! connect failure all run the same path; the close observers learn which
//! one happened through the `remote` flag. Closing fails every outstanding
//! request with `SsError::ConnectionClosed`.

use super::handler::{HandlerId, HandlerOutcome, InboundHandler, InboundMessage, MessageKind};
use super::transport::{ConnectTarget, Connector, Socket};
use crate::errors::SsError;
use crate::observability::record_rpc_request;

use media_protocol::{methods, Frame, Notification, Request, RequestId, Response};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default acknowledgement window for requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Default window for the media node to signal readiness.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcSettings {
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Readiness handshake state.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyState {
    Pending,
    Ready,
    Rejected(SsError),
}

type PendingRequests = HashMap<RequestId, oneshot::Sender<Result<Value, SsError>>>;
type CloseObserver = Box<dyn FnOnce(bool) + Send>;

struct ConnectionInner {
    label: String,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Mutex<PendingRequests>,
    next_request_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, Arc<dyn InboundHandler>)>>,
    next_handler_id: AtomicU64,
    ready: watch::Sender<ReadyState>,
    load: watch::Sender<Option<f64>>,
    /// Guards the closed transition so observers fire exactly once.
    close_observers: Mutex<Vec<CloseObserver>>,
    closed: AtomicBool,
    closed_remotely: AtomicBool,
    cancel_token: CancellationToken,
    settings: RpcSettings,
}

/// Handle to a media node connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("label", &self.inner.label)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    /// Open a connection to `target` through `connector`.
    ///
    /// Returns immediately; the socket is established in the background.
    pub fn open(
        connector: Arc<dyn Connector>,
        target: ConnectTarget,
        settings: RpcSettings,
    ) -> Self {
        let label = format!("{}/{}", target.media_node_id, target.room_id);
        Self::spawn(label, settings, async move { connector.connect(&target).await })
    }

    /// Wrap an already established socket.
    pub fn with_socket(label: impl Into<String>, socket: Socket, settings: RpcSettings) -> Self {
        Self::spawn(label.into(), settings, async move { Ok(socket) })
    }

    fn spawn<F>(label: String, settings: RpcSettings, connect: F) -> Self
    where
        F: Future<Output = Result<Socket, SsError>> + Send + 'static,
    {
        let (outbound, queue) = mpsc::unbounded_channel();
        let (ready, _) = watch::channel(ReadyState::Pending);
        let (load, _) = watch::channel(None);
        let cancel_token = CancellationToken::new();

        let inner = Arc::new(ConnectionInner {
            label,
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            ready,
            load,
            close_observers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closed_remotely: AtomicBool::new(false),
            cancel_token: cancel_token.clone(),
            settings,
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(drive(weak.clone(), connect, queue, cancel_token.clone()));
        tokio::spawn(handshake_deadline(
            weak,
            settings.handshake_timeout,
            cancel_token,
        ));

        Self { inner }
    }

    /// Connection label (`<media node>/<room>`).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Current handshake state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready.borrow().clone()
    }

    /// Last load sample reported by the remote side.
    #[must_use]
    pub fn load(&self) -> Option<f64> {
        *self.inner.load.borrow()
    }

    /// Subscribe to load samples.
    #[must_use]
    pub fn subscribe_load(&self) -> watch::Receiver<Option<f64>> {
        self.inner.load.subscribe()
    }

    /// Wait for the readiness handshake.
    ///
    /// # Errors
    ///
    /// - `SsError::Draining` if the node announced draining
    /// - `SsError::HandshakeTimeout` if the handshake window elapsed
    /// - `SsError::ConnectionClosed` if the connection closed first
    pub async fn ready(&self) -> Result<(), SsError> {
        let mut rx = self.inner.ready.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, ReadyState::Pending))
            .await
            .map_err(|_| SsError::ConnectionClosed)?
            .clone();

        match state {
            ReadyState::Ready => Ok(()),
            ReadyState::Rejected(e) => Err(e),
            ReadyState::Pending => Err(SsError::Internal("handshake still pending".to_string())),
        }
    }

    /// Fire-and-forget message. No-op once closed.
    pub fn notify(&self, method: &str, data: Value) {
        if self.is_closed() {
            debug!(
                target: "ss.rpc.connection",
                connection = %self.inner.label,
                method = %method,
                "Dropping notification on closed connection"
            );
            return;
        }

        self.send_frame(Frame::Notification(Notification::new(method, data)));
    }

    /// Send a request and wait for the correlated response.
    ///
    /// # Errors
    ///
    /// - `SsError::ConnectionClosed` if the connection is or becomes closed
    /// - `SsError::RequestTimeout` if no response arrives in time
    /// - `SsError::Remote` with the remote error message
    #[instrument(skip_all, fields(connection = %self.inner.label, method = %method))]
    pub async fn request(&self, method: &str, data: Value) -> Result<Value, SsError> {
        if self.is_closed() {
            return Err(SsError::ConnectionClosed);
        }

        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        // Close may have drained the pending map before the insert above.
        if self.is_closed() {
            self.inner.pending.lock().remove(&id);
            return Err(SsError::ConnectionClosed);
        }

        let start = Instant::now();
        self.send_frame(Frame::Request(Request::new(id, method, data)));

        let result = match tokio::time::timeout(self.inner.settings.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SsError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                warn!(
                    target: "ss.rpc.connection",
                    connection = %self.inner.label,
                    method = %method,
                    request_id = id,
                    "Request timed out"
                );
                Err(SsError::RequestTimeout {
                    method: method.to_string(),
                })
            }
        };

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        record_rpc_request(method, status, start.elapsed());

        result
    }

    /// Append a handler to the inbound pipeline.
    pub fn add_handler(&self, handler: impl InboundHandler + 'static) -> HandlerId {
        let id = HandlerId(self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed));
        if !self.is_closed() {
            self.inner.handlers.lock().push((id, Arc::new(handler)));
        }
        id
    }

    /// Remove a handler. Unknown ids are ignored.
    pub fn remove_handler(&self, id: HandlerId) {
        self.inner
            .handlers
            .lock()
            .retain(|(handler_id, _)| *handler_id != id);
    }

    /// Register a close observer. Called once with the remote flag; called
    /// immediately if the connection is already closed.
    pub fn on_close(&self, observer: impl FnOnce(bool) + Send + 'static) {
        {
            let mut observers = self.inner.close_observers.lock();
            if !self.inner.closed.load(Ordering::SeqCst) {
                observers.push(Box::new(observer));
                return;
            }
        }
        observer(self.inner.closed_remotely.load(Ordering::SeqCst));
    }

    /// Close the connection locally.
    pub fn close(&self) {
        self.shutdown(false);
    }

    fn shutdown(&self, remote: bool) {
        let observers = {
            let mut observers = self.inner.close_observers.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.inner.closed_remotely.store(remote, Ordering::SeqCst);
            std::mem::take(&mut *observers)
        };

        info!(
            target: "ss.rpc.connection",
            connection = %self.inner.label,
            remote,
            "Connection closed"
        );

        self.inner.cancel_token.cancel();
        self.reject_ready(SsError::ConnectionClosed);

        let pending: Vec<_> = self.inner.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(SsError::ConnectionClosed));
        }

        self.inner.handlers.lock().clear();

        for observer in observers {
            observer(remote);
        }
    }

    fn reject_ready(&self, error: SsError) -> bool {
        self.inner.ready.send_if_modified(|state| {
            if matches!(state, ReadyState::Pending) {
                *state = ReadyState::Rejected(error);
                true
            } else {
                false
            }
        })
    }

    fn send_frame(&self, frame: Frame) {
        if self.inner.outbound.send(frame).is_err() {
            debug!(
                target: "ss.rpc.connection",
                connection = %self.inner.label,
                "Outbound queue closed"
            );
        }
    }

    fn dispatch(&self, frame: Frame) {
        if let Some(load) = frame.load() {
            self.inner.load.send_replace(Some(load));
        }

        match frame {
            Frame::Response(response) => self.resolve(response),
            Frame::Notification(Notification { method, data }) => match method.as_str() {
                methods::MEDIA_NODE_READY => {
                    let became_ready = self.inner.ready.send_if_modified(|state| {
                        if matches!(state, ReadyState::Pending) {
                            *state = ReadyState::Ready;
                            true
                        } else {
                            false
                        }
                    });
                    if became_ready {
                        debug!(
                            target: "ss.rpc.connection",
                            connection = %self.inner.label,
                            "Media node ready"
                        );
                    }
                }
                methods::MEDIA_NODE_DRAIN => {
                    info!(
                        target: "ss.rpc.connection",
                        connection = %self.inner.label,
                        "Media node draining"
                    );
                    self.reject_ready(SsError::Draining);
                }
                _ => {
                    let message = InboundMessage {
                        kind: MessageKind::Notification,
                        method: &method,
                        data: &data,
                    };
                    if self.run_handlers(&message) == HandlerOutcome::Pass {
                        debug!(
                            target: "ss.rpc.connection",
                            connection = %self.inner.label,
                            method = %method,
                            "Unhandled notification"
                        );
                    }
                }
            },
            Frame::Request(Request { id, method, data }) => {
                let message = InboundMessage {
                    kind: MessageKind::Request,
                    method: &method,
                    data: &data,
                };
                let response = match self.run_handlers(&message) {
                    HandlerOutcome::Pass => {
                        warn!(
                            target: "ss.rpc.connection",
                            connection = %self.inner.label,
                            method = %method,
                            "Unhandled request"
                        );
                        Response::error(id, methods::SERVER_ERROR)
                    }
                    HandlerOutcome::Handled => Response::ok(id, json!({})),
                    HandlerOutcome::Respond(Ok(data)) => Response::ok(id, data),
                    HandlerOutcome::Respond(Err(error)) => Response::error(id, error),
                };
                self.send_frame(Frame::Response(response));
            }
        }
    }

    fn resolve(&self, response: Response) {
        let id = response.id;
        let Some(tx) = self.inner.pending.lock().remove(&id) else {
            debug!(
                target: "ss.rpc.connection",
                connection = %self.inner.label,
                request_id = id,
                "Response for unknown request"
            );
            return;
        };
        let _ = tx.send(response.into_result().map_err(SsError::Remote));
    }

    fn run_handlers(&self, message: &InboundMessage<'_>) -> HandlerOutcome {
        // Snapshot so handlers may add or remove handlers while running.
        let handlers: Vec<Arc<dyn InboundHandler>> = self
            .inner
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            let outcome = handler.handle(message);
            if outcome != HandlerOutcome::Pass {
                return outcome;
            }
        }
        HandlerOutcome::Pass
    }
}

async fn drive<F>(
    weak: Weak<ConnectionInner>,
    connect: F,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    cancel_token: CancellationToken,
) where
    F: Future<Output = Result<Socket, SsError>> + Send + 'static,
{
    let result = tokio::select! {
        () = cancel_token.cancelled() => return,
        result = connect => result,
    };

    let Socket {
        outbound,
        mut inbound,
    } = match result {
        Ok(socket) => socket,
        Err(e) => {
            if let Some(inner) = weak.upgrade() {
                warn!(
                    target: "ss.rpc.connection",
                    connection = %inner.label,
                    error = %e,
                    "Connect failed"
                );
                RpcConnection { inner }.shutdown(true);
            }
            return;
        }
    };

    let remote = loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                // Flush what was queued before the close (e.g. closeRouter).
                while let Ok(frame) = queue.try_recv() {
                    let _ = outbound.send(frame);
                }
                break false;
            }

            frame = queue.recv() => match frame {
                Some(frame) => {
                    if outbound.send(frame).is_err() {
                        break true;
                    }
                }
                None => break false,
            },

            frame = inbound.recv() => match frame {
                Some(frame) => match weak.upgrade() {
                    Some(inner) => RpcConnection { inner }.dispatch(frame),
                    None => break false,
                },
                None => break true,
            },
        }
    };

    if let Some(inner) = weak.upgrade() {
        RpcConnection { inner }.shutdown(remote);
    }
}

async fn handshake_deadline(
    weak: Weak<ConnectionInner>,
    timeout: Duration,
    cancel_token: CancellationToken,
) {
    tokio::select! {
        () = cancel_token.cancelled() => {}
        () = tokio::time::sleep(timeout) => {
            if let Some(inner) = weak.upgrade() {
                let connection = RpcConnection { inner };
                if connection.reject_ready(SsError::HandshakeTimeout) {
                    warn!(
                        target: "ss.rpc.connection",
                        connection = %connection.label(),
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Handshake timed out"
                    );
                }
            }
        }
    }
}

//! Rooms and peers as seen by the media control plane.
//!
//! The signaling layer owns the real session objects; the control plane only
//! needs what [`MediaSession`] exposes: an id, whether it closed, and the
//! routers serving it. [`Room`] is the in-process implementation.

use crate::media::observer::CloseSignal;
use crate::media::Router;

use parking_lot::Mutex;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Parent session of the routers provisioned for it.
pub trait MediaSession: Send + Sync {
    fn id(&self) -> &str;

    fn is_closed(&self) -> bool;

    /// Routers currently serving the session.
    fn routers(&self) -> Vec<Router>;

    /// Register `router`. Registering the same router twice is a no-op.
    fn add_router(&self, router: &Router);
}

struct RoomInner {
    id: String,
    routers: Mutex<Vec<Router>>,
    close: CloseSignal,
}

/// A room. Cheap to clone.
#[derive(Clone)]
pub struct Room {
    inner: Arc<RoomInner>,
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.inner.id)
            .field("routers", &self.inner.routers.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Room {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RoomInner {
                id: id.into(),
                routers: Mutex::new(Vec::new()),
                close: CloseSignal::new(),
            }),
        }
    }

    /// Close the room and every router serving it. Idempotent.
    pub fn close(&self) {
        let Some(pending) = self.inner.close.close() else {
            return;
        };
        let routers = std::mem::take(&mut *self.inner.routers.lock());
        debug!(
            target: "ss.media.service",
            room_id = %self.inner.id,
            routers = routers.len(),
            "Room closed"
        );
        for router in routers {
            router.close();
        }
        pending.notify();
    }

    pub fn on_close(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.close.subscribe(callback);
    }
}

impl MediaSession for Room {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    fn routers(&self) -> Vec<Router> {
        self.inner.routers.lock().clone()
    }

    fn add_router(&self, router: &Router) {
        {
            let mut routers = self.inner.routers.lock();
            if self.is_closed() || routers.iter().any(|r| r.id() == router.id()) {
                return;
            }
            routers.push(router.clone());
        }

        let weak = Arc::downgrade(&self.inner);
        let router_id = router.id().to_string();
        router.on_close(move |()| {
            if let Some(inner) = weak.upgrade() {
                inner.routers.lock().retain(|r| r.id() != router_id);
            }
        });
    }
}

/// A participant joining a room; only its network origin matters here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    /// Address of the peer's socket.
    pub address: Option<IpAddr>,
    /// Raw `X-Forwarded-For` header, when behind a proxy.
    pub forwarded_for: Option<String>,
}

impl Peer {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: None,
            forwarded_for: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    #[must_use]
    pub fn with_forwarded_for(mut self, header: impl Into<String>) -> Self {
        self.forwarded_for = Some(header.into());
        self
    }

    /// First (client-most) address of the forwarded-for header.
    #[must_use]
    pub fn forwarded_address(&self) -> Option<IpAddr> {
        self.forwarded_for
            .as_deref()?
            .split(',')
            .next()
            .and_then(|first| first.trim().parse().ok())
    }
}

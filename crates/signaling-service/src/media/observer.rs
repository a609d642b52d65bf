//! Typed observer lists for media entities.
//!
//! Each entity exposes one list per event (`on_close`, `on_pause`, ...).
//! Observers are called synchronously, outside the list lock, so an
//! observer may close or pause other entities (cross-wiring) without
//! deadlocking.
//!
//! Observers commonly hold strong handles to peer entities. Owners clear
//! their lists once closed, which breaks those reference cycles.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Observer list for events carrying a `T`.
pub struct Observers<T> {
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.callbacks.lock().len())
            .finish()
    }
}

impl<T> Observers<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) {
        self.callbacks.lock().push(Arc::new(callback));
    }

    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self.callbacks.lock().iter().map(Arc::clone).collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closed flag plus the close observers, switched under one lock so an
/// observer registered concurrently with `close` is never lost.
#[derive(Default)]
pub struct CloseSignal {
    state: Mutex<CloseState>,
}

#[derive(Default)]
struct CloseState {
    closed: bool,
    callbacks: Vec<Callback<()>>,
}

/// Observers detached by [`CloseSignal::close`], to be notified once the
/// owner has finished tearing down.
#[must_use]
pub struct PendingClose(Vec<Callback<()>>);

impl PendingClose {
    pub fn notify(self) {
        for callback in self.0 {
            callback(&());
        }
    }
}

impl fmt::Debug for CloseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseSignal")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CloseSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Register a close observer; runs immediately if already closed.
    pub fn subscribe(&self, callback: impl Fn(&()) + Send + Sync + 'static) {
        {
            let mut state = self.state.lock();
            if !state.closed {
                state.callbacks.push(Arc::new(callback));
                return;
            }
        }
        callback(&());
    }

    /// Flip to closed. `None` if it already was.
    pub fn close(&self) -> Option<PendingClose> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        Some(PendingClose(std::mem::take(&mut state.callbacks)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_every_observer() {
        let observers = Observers::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let t = Arc::clone(&total);
            observers.add(move |v| {
                t.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }
        observers.emit(&5);
        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_observer_may_register_more_observers_while_emitting() {
        let observers = Arc::new(Observers::<()>::new());
        let inner = Arc::clone(&observers);
        observers.add(move |()| {
            inner.add(|()| {});
        });

        observers.emit(&());
        assert_eq!(observers.len(), 2);

        observers.clear();
        assert!(observers.is_empty());
    }

    #[test]
    fn test_close_signal_fires_once_and_late_subscribers_immediately() {
        let signal = CloseSignal::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        signal.subscribe(move |()| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        signal.close().unwrap().notify();
        assert!(signal.close().is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let f = Arc::clone(&fired);
        signal.subscribe(move |()| {
            f.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 11);
        assert!(signal.is_closed());
    }
}

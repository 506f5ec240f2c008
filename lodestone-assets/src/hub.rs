//! Readiness hub: run-once callbacks keyed by asset name, the all-assets
//! marker or the document-ready signal.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Key a callback can wait on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadyKey {
    /// A single asset, by registry name
    Asset(String),
    /// Every known asset loaded and the document ready
    All,
    /// The host's document-ready signal
    Document,
}

/// A callback that runs at most once.
///
/// The run-once marker lives on the callback value itself: clones share it,
/// so the same instance stays spent no matter how many keys it was registered
/// under or how often a drain reaches it.
#[derive(Clone)]
pub struct OnceCallback {
    inner: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl OnceCallback {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    /// Run the callback if it has not run yet; a no-op afterwards.
    pub fn invoke(&self) {
        let callback = self.inner.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Whether the callback has already run.
    pub fn has_run(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for OnceCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceCallback")
            .field("has_run", &self.has_run())
            .finish()
    }
}

/// Pending callbacks per key, fired in registration order.
#[derive(Debug, Default)]
pub struct ReadyHub {
    pending: Mutex<FxHashMap<ReadyKey, Vec<OnceCallback>>>,
}

impl ReadyHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to the pending list for `key`.
    pub fn register(&self, key: ReadyKey, callback: OnceCallback) {
        trace!(?key, "registered readiness callback");
        self.pending.lock().entry(key).or_default().push(callback);
    }

    /// Take every callback pending for `key` and run them in registration
    /// order. Callbacks run outside the hub lock.
    pub fn drain(&self, key: &ReadyKey) {
        let callbacks = self.pending.lock().remove(key).unwrap_or_default();
        for callback in callbacks {
            callback.invoke();
        }
    }

    /// Number of callbacks currently pending for `key`.
    pub fn pending_count(&self, key: &ReadyKey) -> usize {
        self.pending.lock().get(key).map_or(0, Vec::len)
    }
}

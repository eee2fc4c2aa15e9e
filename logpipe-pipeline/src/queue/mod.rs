//! Per-flusher sender queues and the limiters that regulate them.

mod item;
mod limiter;
mod sender;

pub use item::{RawDataType, SenderQueueItem, SendingStatus};
pub use limiter::{ConcurrencyLimiter, LimiterRegistry, RateLimiter};
pub use sender::SenderQueue;

use std::collections::HashMap;
use std::sync::Mutex;

/// Identity of a sender queue, derived from destination identity (for SLS,
/// `project#logstore`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey(pub u64);

/// Upstream throttle notification: fired when a queue transitions from full
/// back to accepting pushes.
pub trait QueueFeedback: Send + Sync {
    fn feedback(&self, key: QueueKey);
}

/// Allocates queue keys and remembers their names for diagnostics.
#[derive(Debug, Default)]
pub struct QueueKeyManager {
    inner: Mutex<QueueKeyInner>,
}

#[derive(Debug, Default)]
struct QueueKeyInner {
    keys: HashMap<String, QueueKey>,
    names: HashMap<QueueKey, String>,
    next: u64,
}

impl QueueKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `name`, allocating one on first sight. Key zero is never
    /// handed out so it can double as "no queue".
    pub fn get_key(&self, name: &str) -> QueueKey {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = inner.keys.get(name) {
            return *key;
        }
        inner.next += 1;
        let key = QueueKey(inner.next);
        inner.keys.insert(name.to_owned(), key);
        inner.names.insert(key, name.to_owned());
        key
    }

    pub fn get_name(&self, key: QueueKey) -> String {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .names
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }
}

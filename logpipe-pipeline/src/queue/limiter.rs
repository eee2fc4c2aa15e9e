//! Rate and concurrency limiters shared across sender queues.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

/// Token bucket over payload bytes.
///
/// The bucket holds at most one second's allowance, so short bursts ride on
/// accumulated tokens while any 10-second window stays within ~1.1x the
/// configured rate.
pub struct RateLimiter {
    max_bytes_per_sec: u32,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(max_bytes_per_sec: u32) -> Self {
        RateLimiter {
            max_bytes_per_sec,
            state: Mutex::new(BucketState {
                tokens: max_bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn max_bytes_per_sec(&self) -> u32 {
        self.max_bytes_per_sec
    }

    pub fn is_valid_to_pop(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let refill = now.duration_since(state.last_refill).as_secs_f64() * self.max_bytes_per_sec as f64;
        state.tokens = (state.tokens + refill).min(self.max_bytes_per_sec as f64);
        state.last_refill = now;
        state.tokens > 0.0
    }

    pub fn post_pop(&self, size: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tokens -= size as f64;
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_bytes_per_sec", &self.max_bytes_per_sec)
            .finish()
    }
}

/// Caps in-flight sends toward one destination scope (project, region or
/// logstore). Shared by every queue targeting that scope.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    description: String,
    max_concurrency: u32,
    in_sending: AtomicU32,
}

impl ConcurrencyLimiter {
    pub fn new(description: impl Into<String>, max_concurrency: u32) -> Self {
        ConcurrencyLimiter {
            description: description.into(),
            max_concurrency,
            in_sending: AtomicU32::new(0),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_valid_to_pop(&self) -> bool {
        self.in_sending.load(Ordering::Acquire) < self.max_concurrency
    }

    pub fn post_pop(&self) {
        self.in_sending.fetch_add(1, Ordering::AcqRel);
    }

    /// Called when a send completes, successfully or not.
    pub fn on_send_done(&self) {
        let _ = self
            .in_sending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    }

    pub fn in_sending(&self) -> u32 {
        self.in_sending.load(Ordering::Acquire)
    }
}

const DEFAULT_PROJECT_CONCURRENCY: u32 = 80;
const DEFAULT_REGION_CONCURRENCY: u32 = 40;
const DEFAULT_LOGSTORE_CONCURRENCY: u32 = 20;

/// Weak-map registries handing out limiters shared across pipelines for the
/// same project, region or logstore; stale entries are swept on access.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    project: Mutex<HashMap<String, Weak<ConcurrencyLimiter>>>,
    region: Mutex<HashMap<String, Weak<ConcurrencyLimiter>>>,
    logstore: Mutex<HashMap<String, Weak<ConcurrencyLimiter>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_project_limiter(&self, project: &str) -> Arc<ConcurrencyLimiter> {
        Self::get_or_create(&self.project, project, DEFAULT_PROJECT_CONCURRENCY)
    }

    pub fn get_region_limiter(&self, region: &str) -> Arc<ConcurrencyLimiter> {
        Self::get_or_create(&self.region, region, DEFAULT_REGION_CONCURRENCY)
    }

    pub fn get_logstore_limiter(&self, logstore: &str) -> Arc<ConcurrencyLimiter> {
        Self::get_or_create(&self.logstore, logstore, DEFAULT_LOGSTORE_CONCURRENCY)
    }

    fn get_or_create(
        map: &Mutex<HashMap<String, Weak<ConcurrencyLimiter>>>,
        name: &str,
        max_concurrency: u32,
    ) -> Arc<ConcurrencyLimiter> {
        let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, weak| weak.strong_count() > 0);
        if let Some(limiter) = map.get(name).and_then(Weak::upgrade) {
            return limiter;
        }
        let limiter = Arc::new(ConcurrencyLimiter::new(name, max_concurrency));
        map.insert(name.to_owned(), Arc::downgrade(&limiter));
        limiter
    }

    pub fn project_limiter_count(&self) -> usize {
        let mut map = self.project.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, weak| weak.strong_count() > 0);
        map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_limiter_exhausts_and_refills() {
        let limiter = RateLimiter::new(1000);
        assert!(limiter.is_valid_to_pop());
        limiter.post_pop(1000);
        assert!(!limiter.is_valid_to_pop());
        std::thread::sleep(Duration::from_millis(50));
        // ~50ms at 1000 B/s refills ~50 tokens.
        assert!(limiter.is_valid_to_pop());
    }

    #[test]
    fn concurrency_limiter_counts_in_flight() {
        let limiter = ConcurrencyLimiter::new("project", 2);
        assert!(limiter.is_valid_to_pop());
        limiter.post_pop();
        limiter.post_pop();
        assert!(!limiter.is_valid_to_pop());
        limiter.on_send_done();
        assert!(limiter.is_valid_to_pop());
        // Never underflows.
        limiter.on_send_done();
        limiter.on_send_done();
        assert_eq!(limiter.in_sending(), 0);
    }

    #[test]
    fn registry_shares_and_sweeps() {
        let registry = LimiterRegistry::new();
        let a = registry.get_project_limiter("proj");
        let b = registry.get_project_limiter("proj");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.project_limiter_count(), 1);
        drop(a);
        drop(b);
        assert_eq!(registry.project_limiter_count(), 0);
    }
}

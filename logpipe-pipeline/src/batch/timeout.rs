//! Scheduled eviction of stale batches.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use logpipe::{pipe_debug, pipe_warn};

use crate::flusher::Flusher;

const MAX_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    config_name: String,
    flusher_node: usize,
    batch_key: u64,
}

struct TimeoutRecord {
    deadline: Instant,
    batch_key: u64,
    flusher: Weak<dyn Flusher>,
}

struct State {
    records: HashMap<RecordKey, TimeoutRecord>,
    stopped: bool,
}

/// One global timer thread that calls `flusher.flush(key)` on batches whose
/// flush deadline has passed.
///
/// Records are keyed `(config, flusher node, batch key)`;
/// [`update_record`](TimeoutFlushManager::update_record) is idempotent and
/// replaces any prior deadline for the key. A fired record is removed; the
/// batcher re-registers it when the batch next becomes non-empty.
pub struct TimeoutFlushManager {
    state: Mutex<State>,
    cv: Condvar,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimeoutFlushManager {
    pub fn new() -> Arc<Self> {
        let manager = Arc::new(TimeoutFlushManager {
            state: Mutex::new(State {
                records: HashMap::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
            handle: Mutex::new(None),
        });

        let worker = Arc::downgrade(&manager);
        let handle = thread::Builder::new()
            .name("logpipe.TimeoutFlush".to_owned())
            .spawn(move || run(worker))
            .expect("failed to spawn timeout flush thread");
        *manager.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        manager
    }

    pub fn update_record(
        &self,
        config_name: &str,
        flusher_node: usize,
        batch_key: u64,
        timeout_secs: u32,
        flusher: Weak<dyn Flusher>,
    ) {
        let key = RecordKey {
            config_name: config_name.to_owned(),
            flusher_node,
            batch_key,
        };
        let record = TimeoutRecord {
            deadline: Instant::now() + Duration::from_secs(timeout_secs as u64),
            batch_key,
            flusher,
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.insert(key, record);
        drop(state);
        self.cv.notify_one();
    }

    /// Drop every record of a pipeline, called on pipeline stop.
    pub fn clear_records(&self, config_name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.records.retain(|k, _| k.config_name != config_name);
    }

    pub fn record_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .len()
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.stopped = true;
        }
        self.cv.notify_all();
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            if handle.join().is_err() {
                pipe_warn!(name: "TimeoutFlushManager.ThreadPanicked");
            }
        }
    }
}

impl fmt::Debug for TimeoutFlushManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutFlushManager")
            .field("records", &self.record_count())
            .finish()
    }
}

fn run(manager: Weak<TimeoutFlushManager>) {
    pipe_debug!(name: "TimeoutFlushManager.ThreadStarted");
    loop {
        let Some(manager) = manager.upgrade() else {
            break;
        };

        // Collect expired records under the lock, flush outside it: a flush
        // may re-enter update_record through the batcher.
        let mut expired: Vec<(u64, Weak<dyn Flusher>)> = Vec::new();
        {
            let mut state = manager.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.stopped {
                break;
            }
            let now = Instant::now();
            state.records.retain(|_, record| {
                if record.deadline <= now {
                    expired.push((record.batch_key, record.flusher.clone()));
                    false
                } else {
                    true
                }
            });
            if expired.is_empty() {
                let wait = state
                    .records
                    .values()
                    .map(|r| r.deadline.saturating_duration_since(now))
                    .min()
                    .unwrap_or(MAX_WAIT)
                    .min(MAX_WAIT);
                let (guard, _) = manager
                    .cv
                    .wait_timeout(state, wait)
                    .unwrap_or_else(|e| e.into_inner());
                if guard.stopped {
                    break;
                }
                continue;
            }
        }

        for (batch_key, flusher) in expired {
            if let Some(flusher) = flusher.upgrade() {
                pipe_debug!(
                    name: "TimeoutFlushManager.FlushingDueToTimeout",
                    flusher = flusher.name(),
                    key = batch_key,
                );
                if let Err(err) = flusher.flush(batch_key) {
                    pipe_warn!(
                        name: "TimeoutFlushManager.FlushFailed",
                        flusher = flusher.name(),
                        error = err.to_string(),
                    );
                }
            }
        }
    }
    pipe_debug!(name: "TimeoutFlushManager.ThreadStopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::PipelineContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingFlusher {
        ctx: PipelineContext,
        flushed: AtomicUsize,
    }

    impl Flusher for RecordingFlusher {
        fn name(&self) -> &'static str {
            "flusher_mock"
        }

        fn context(&self) -> &PipelineContext {
            &self.ctx
        }

        fn send(&self, _group: logpipe::EventGroup) -> crate::error::FlushResult {
            Ok(())
        }

        fn flush(&self, _key: u64) -> crate::error::FlushResult {
            self.flushed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn flush_all(&self) -> crate::error::FlushResult {
            Ok(())
        }
    }

    #[test]
    fn expired_record_fires_flush_once() {
        let manager = TimeoutFlushManager::new();
        let flusher = Arc::new(RecordingFlusher {
            ctx: PipelineContext::default(),
            flushed: AtomicUsize::new(0),
        });
        let flusher_dyn: Arc<dyn Flusher> = flusher.clone();
        let weak: Weak<dyn Flusher> = Arc::downgrade(&flusher_dyn);
        manager.update_record("config", 0, 7, 0, weak);

        let deadline = Instant::now() + Duration::from_secs(5);
        while flusher.flushed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(flusher.flushed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.record_count(), 0);
        manager.stop();
    }

    #[test]
    fn update_record_replaces_deadline() {
        let manager = TimeoutFlushManager::new();
        let flusher = Arc::new(RecordingFlusher {
            ctx: PipelineContext::default(),
            flushed: AtomicUsize::new(0),
        });
        let flusher_dyn: Arc<dyn Flusher> = flusher.clone();
        let weak: Weak<dyn Flusher> = Arc::downgrade(&flusher_dyn);
        manager.update_record("config", 0, 7, 3600, weak.clone());
        manager.update_record("config", 0, 7, 3600, weak);
        assert_eq!(manager.record_count(), 1);
        manager.stop();
    }

    #[test]
    fn clear_records_cancels_a_pipeline() {
        let manager = TimeoutFlushManager::new();
        let flusher = Arc::new(RecordingFlusher {
            ctx: PipelineContext::default(),
            flushed: AtomicUsize::new(0),
        });
        let flusher_dyn: Arc<dyn Flusher> = flusher.clone();
        let weak: Weak<dyn Flusher> = Arc::downgrade(&flusher_dyn);
        manager.update_record("a", 0, 1, 3600, weak.clone());
        manager.update_record("b", 0, 1, 3600, weak);
        manager.clear_records("a");
        assert_eq!(manager.record_count(), 1);
        manager.stop();
    }
}

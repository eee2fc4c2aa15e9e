//! The flusher runner: drains sender queues into the HTTP sink.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use logpipe::metrics::{
    Counter, Gauge, MetricsRecord, MetricsRegistry, METRIC_RUNNER_IN_ITEMS_TOTAL,
    METRIC_RUNNER_LAST_RUN_TIME,
};
use logpipe::{pipe_info, pipe_warn, unix_now};
use logpipe_pipeline::queue::{SenderQueue, SenderQueueItem};

use crate::sink::HttpSink;

const IDLE_SLEEP: Duration = Duration::from_millis(10);

struct RunnerMetrics {
    _record: Arc<MetricsRecord>,
    in_items_total: Arc<Counter>,
    last_run_time: Arc<Gauge>,
}

/// Dedicated dispatch thread: polls every registered sender queue for
/// limiter-approved idle items, turns them into HTTP requests via the owning
/// flusher, and feeds the sink.
pub struct FlusherRunner {
    sink: Arc<HttpSink>,
    queues: Mutex<Vec<Arc<SenderQueue>>>,
    stopped: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    metrics: Arc<RunnerMetrics>,
}

impl FlusherRunner {
    pub fn new(registry: &MetricsRegistry, sink: Arc<HttpSink>) -> Arc<Self> {
        let record = registry.register(vec![(
            "runner_name".to_owned(),
            "flusher_runner".to_owned(),
        )]);
        Arc::new(FlusherRunner {
            sink,
            queues: Mutex::new(Vec::new()),
            stopped: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            metrics: Arc::new(RunnerMetrics {
                in_items_total: record.counter(METRIC_RUNNER_IN_ITEMS_TOTAL),
                last_run_time: record.gauge(METRIC_RUNNER_LAST_RUN_TIME),
                _record: record,
            }),
        })
    }

    pub fn register_queue(&self, queue: Arc<SenderQueue>) {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(queue);
    }

    pub fn start(self: &Arc<Self>) {
        let runner = self.clone();
        let handle = thread::Builder::new()
            .name("logpipe.FlusherRunner".to_owned())
            .spawn(move || runner.run())
            .expect("failed to spawn flusher runner thread");
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        pipe_info!(name: "FlusherRunner.Started");
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        pipe_info!(name: "FlusherRunner.Stopped");
    }

    /// One pass over every queue; exposed for tests, driven by `run` in
    /// production.
    pub fn dispatch_once(&self) -> usize {
        self.metrics.last_run_time.set(unix_now() as i64);
        let queues: Vec<Arc<SenderQueue>> = self
            .queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut dispatched = 0;
        for queue in queues {
            let mut items: Vec<Arc<SenderQueueItem>> = Vec::new();
            queue.get_all_available(&mut items, true);
            for item in items {
                self.metrics.in_items_total.add(1);
                if self.dispatch(&queue, item) {
                    dispatched += 1;
                }
            }
        }
        dispatched
    }

    fn dispatch(&self, queue: &Arc<SenderQueue>, item: Arc<SenderQueueItem>) -> bool {
        let Some(flusher) = item.flusher.upgrade() else {
            // Owner is gone; nothing can confirm this item anymore.
            queue.remove(&item);
            return false;
        };
        match flusher.build_request(&item) {
            Ok(request) => {
                if self.sink.add_request(request, item.clone()) {
                    true
                } else {
                    queue.set_idle(&item);
                    false
                }
            }
            Err(err) => {
                pipe_warn!(
                    name: "FlusherRunner.BuildRequestFailed",
                    flusher = flusher.name(),
                    error = err.to_string(),
                );
                queue.remove(&item);
                false
            }
        }
    }

    fn run(&self) {
        while !self.stopped.load(Ordering::Acquire) {
            if self.dispatch_once() == 0 {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
}

impl fmt::Debug for FlusherRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlusherRunner")
            .field(
                "queues",
                &self.queues.lock().unwrap_or_else(|e| e.into_inner()).len(),
            )
            .finish()
    }
}

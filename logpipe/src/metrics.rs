//! Self-observability counters and gauges.
//!
//! Every component registers a record carrying constant labels (project,
//! pipeline, component name) and creates named counters/gauges on it.
//! Writers touch atomics only; a periodic snapshot clones current values
//! and sweeps records whose owners have gone away, so the read side never
//! blocks a hot path.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

// Component metric names.
pub const METRIC_COMPONENT_IN_EVENTS_TOTAL: &str = "component_in_events_total";
pub const METRIC_COMPONENT_IN_SIZE_BYTES: &str = "component_in_size_bytes";
pub const METRIC_COMPONENT_IN_ITEMS_TOTAL: &str = "component_in_items_total";
pub const METRIC_COMPONENT_OUT_EVENTS_TOTAL: &str = "component_out_events_total";
pub const METRIC_COMPONENT_OUT_ITEMS_TOTAL: &str = "component_out_items_total";
pub const METRIC_COMPONENT_OUT_SIZE_BYTES: &str = "component_out_size_bytes";
pub const METRIC_COMPONENT_TOTAL_DELAY_MS: &str = "component_total_delay_ms";
pub const METRIC_COMPONENT_TOTAL_PROCESS_TIME_MS: &str = "component_total_process_time_ms";
pub const METRIC_COMPONENT_DISCARDED_ITEMS_TOTAL: &str = "component_discarded_items_total";
pub const METRIC_COMPONENT_DISCARDED_SIZE_BYTES: &str = "component_discarded_size_bytes";
pub const METRIC_COMPONENT_BATCHER_EVENT_BATCHES_TOTAL: &str = "component_event_batches_total";
pub const METRIC_COMPONENT_BATCHER_BUFFERED_GROUPS_TOTAL: &str = "component_buffered_groups_total";
pub const METRIC_COMPONENT_BATCHER_BUFFERED_EVENTS_TOTAL: &str = "component_buffered_events_total";
pub const METRIC_COMPONENT_BATCHER_BUFFERED_SIZE_BYTES: &str = "component_buffered_size_bytes";
pub const METRIC_COMPONENT_QUEUE_EXTRA_BUFFER_SIZE: &str = "component_extra_buffer_size";

// Runner metric names.
pub const METRIC_RUNNER_IN_ITEMS_TOTAL: &str = "runner_in_items_total";
pub const METRIC_RUNNER_LAST_RUN_TIME: &str = "runner_last_run_time";
pub const METRIC_RUNNER_SINK_OUT_SUCCESSFUL_ITEMS_TOTAL: &str =
    "runner_sink_out_successful_items_total";
pub const METRIC_RUNNER_SINK_OUT_FAILED_ITEMS_TOTAL: &str = "runner_sink_out_failed_items_total";
pub const METRIC_RUNNER_SINK_SUCCESSFUL_RESPONSE_TIME_MS: &str =
    "runner_sink_successful_item_total_response_time_ms";
pub const METRIC_RUNNER_SINK_FAILED_RESPONSE_TIME_MS: &str =
    "runner_sink_failed_item_total_response_time_ms";
pub const METRIC_RUNNER_SINK_SENDING_ITEMS_TOTAL: &str = "runner_sink_sending_items_total";

// Common label keys.
pub const METRIC_LABEL_KEY_PROJECT: &str = "project";
pub const METRIC_LABEL_KEY_PIPELINE_NAME: &str = "pipeline_name";
pub const METRIC_LABEL_KEY_COMPONENT_NAME: &str = "component_name";
pub const METRIC_LABEL_KEY_RUNNER_NAME: &str = "runner_name";
pub const METRIC_LABEL_KEY_FLUSHER_NODE_ID: &str = "flusher_node_id";

/// Monotonic counter; `add` from any thread.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Signed gauge with set/add/sub.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn add(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sub(&self, n: i64) {
        self.value.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// One component's metric record: constant labels plus named instruments.
#[derive(Debug, Default)]
pub struct MetricsRecord {
    labels: Vec<(String, String)>,
    counters: Mutex<Vec<(String, Arc<Counter>)>>,
    gauges: Mutex<Vec<(String, Arc<Gauge>)>>,
}

impl MetricsRecord {
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, c)) = counters.iter().find(|(n, _)| n == name) {
            return c.clone();
        }
        let counter = Arc::new(Counter::default());
        counters.push((name.to_owned(), counter.clone()));
        counter
    }

    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        let mut gauges = self.gauges.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, g)) = gauges.iter().find(|(n, _)| n == name) {
            return g.clone();
        }
        let gauge = Arc::new(Gauge::default());
        gauges.push((name.to_owned(), gauge.clone()));
        gauge
    }
}

/// Point-in-time copy of one record's values.
#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub labels: Vec<(String, String)>,
    pub counters: Vec<(String, u64)>,
    pub gauges: Vec<(String, i64)>,
}

/// Process-wide registry of metric records.
///
/// Registration takes the writer mutex; snapshotting clones values and
/// drops entries whose records are no longer referenced anywhere else.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    records: Mutex<Vec<Weak<MetricsRecord>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, labels: Vec<(String, String)>) -> Arc<MetricsRecord> {
        let record = Arc::new(MetricsRecord {
            labels,
            ..Default::default()
        });
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&record));
        record
    }

    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshots = Vec::with_capacity(records.len());
        records.retain(|weak| match weak.upgrade() {
            Some(record) => {
                let counters = record
                    .counters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .iter()
                    .map(|(n, c)| (n.clone(), c.get()))
                    .collect();
                let gauges = record
                    .gauges
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .iter()
                    .map(|(n, g)| (n.clone(), g.get()))
                    .collect();
                snapshots.push(MetricsSnapshot {
                    labels: record.labels.clone(),
                    counters,
                    gauges,
                });
                true
            }
            None => false,
        });
        snapshots
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        for (name, value) in &self.counters {
            write!(f, " {name}={value}")?;
        }
        for (name, value) in &self.gauges {
            write!(f, " {name}={value}")?;
        }
        Ok(())
    }
}

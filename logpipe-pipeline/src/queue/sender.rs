//! The per-flusher sender queue: a fixed-capacity ring plus a bounded
//! overflow FIFO, regulated by rate and concurrency limiters.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use logpipe::metrics::{
    Counter, Gauge, MetricsRecord, METRIC_COMPONENT_DISCARDED_ITEMS_TOTAL,
    METRIC_COMPONENT_QUEUE_EXTRA_BUFFER_SIZE, METRIC_LABEL_KEY_COMPONENT_NAME,
};
use logpipe::{pipe_warn, PipelineContext};

use super::item::{SenderQueueItem, SendingStatus};
use super::limiter::{ConcurrencyLimiter, RateLimiter};
use super::{QueueFeedback, QueueKey};

pub const DEFAULT_CAPACITY: usize = 16;
/// The overflow FIFO is bounded; a full queue plus a full overflow drops new
/// items rather than growing without limit under sustained downstream
/// failure.
pub const DEFAULT_EXTRA_CAPACITY: usize = 1024;

struct Ring {
    slots: Vec<Option<Arc<SenderQueueItem>>>,
    read: usize,
    write: usize,
    size: usize,
    capacity: usize,
    extra: VecDeque<Arc<SenderQueueItem>>,
    extra_capacity: usize,
    valid_to_push: bool,
}

impl Ring {
    fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    fn is_empty(&self) -> bool {
        self.size == 0 && self.extra.is_empty()
    }

    // Place into the first hole of the window, growing the window if none.
    fn place(&mut self, item: Arc<SenderQueueItem>) {
        item.mark_enqueued();
        let mut index = self.read;
        while index < self.write {
            if self.slots[index % self.capacity].is_none() {
                break;
            }
            index += 1;
        }
        self.slots[index % self.capacity] = Some(item);
        if index == self.write {
            self.write += 1;
        }
        self.size += 1;
    }
}

struct Metrics {
    _record: Arc<MetricsRecord>,
    discarded_items_total: Arc<Counter>,
    extra_buffer_size: Arc<Gauge>,
}

/// Bounded multi-producer queue between a flusher and the sink runner.
///
/// Push never blocks: a full ring spills into the overflow FIFO, and only a
/// full overflow discards (counted). Pop hands out idle items while every
/// attached limiter still has budget; completed items are removed by the
/// flusher's send-done path, which also drains the overflow back into the
/// ring and fires upstream feedback on the full-to-available transition.
pub struct SenderQueue {
    key: QueueKey,
    name: String,
    ring: Mutex<Ring>,
    rate_limiter: Option<RateLimiter>,
    concurrency_limiters: Vec<Arc<ConcurrencyLimiter>>,
    feedback: Option<Arc<dyn QueueFeedback>>,
    metrics: Metrics,
}

impl SenderQueue {
    pub fn new(key: QueueKey, name: impl Into<String>, ctx: &PipelineContext) -> Self {
        Self::with_capacity(key, name, ctx, DEFAULT_CAPACITY, DEFAULT_EXTRA_CAPACITY)
    }

    pub fn with_capacity(
        key: QueueKey,
        name: impl Into<String>,
        ctx: &PipelineContext,
        capacity: usize,
        extra_capacity: usize,
    ) -> Self {
        let name = name.into();
        let record = ctx.metrics().register(vec![
            (
                METRIC_LABEL_KEY_COMPONENT_NAME.to_owned(),
                "sender_queue".to_owned(),
            ),
            ("queue_name".to_owned(), name.clone()),
        ]);
        SenderQueue {
            key,
            name,
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                read: 0,
                write: 0,
                size: 0,
                capacity,
                extra: VecDeque::new(),
                extra_capacity,
                valid_to_push: true,
            }),
            rate_limiter: None,
            concurrency_limiters: Vec::new(),
            feedback: None,
            metrics: Metrics {
                discarded_items_total: record.counter(METRIC_COMPONENT_DISCARDED_ITEMS_TOTAL),
                extra_buffer_size: record.gauge(METRIC_COMPONENT_QUEUE_EXTRA_BUFFER_SIZE),
                _record: record,
            },
        }
    }

    pub fn set_rate_limiter(&mut self, limiter: RateLimiter) {
        self.rate_limiter = Some(limiter);
    }

    pub fn add_concurrency_limiter(&mut self, limiter: Arc<ConcurrencyLimiter>) {
        self.concurrency_limiters.push(limiter);
    }

    pub fn set_feedback(&mut self, feedback: Arc<dyn QueueFeedback>) {
        self.feedback = Some(feedback);
    }

    pub fn key(&self) -> QueueKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether upstream should keep pushing; flips false while the ring is
    /// full and back to true once a slot frees up.
    pub fn is_valid_to_push(&self) -> bool {
        self.ring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .valid_to_push
    }

    pub fn size(&self) -> usize {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.size + ring.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Enqueue an item. Returns `false` only when both the ring and the
    /// overflow FIFO are full and the item was discarded.
    pub fn push(&self, item: SenderQueueItem) -> bool {
        let item = Arc::new(item);
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.is_full() {
            if ring.extra.len() >= ring.extra_capacity {
                self.metrics.discarded_items_total.add(1);
                pipe_warn!(
                    name: "SenderQueue.OverflowDiscard",
                    queue = self.name.as_str(),
                    raw_size = item.raw_size,
                );
                return false;
            }
            item.mark_enqueued();
            ring.extra.push_back(item);
            self.metrics.extra_buffer_size.set(ring.extra.len() as i64);
            return true;
        }
        ring.place(item);
        if ring.is_full() {
            ring.valid_to_push = false;
        }
        true
    }

    /// Collect every idle item the limiters allow, marking each `Sending`.
    pub fn get_all_available(&self, items: &mut Vec<Arc<SenderQueueItem>>, with_limits: bool) {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.size == 0 {
            return;
        }
        for index in ring.read..ring.write {
            let Some(item) = ring.slots[index % ring.capacity].as_ref() else {
                continue;
            };
            if with_limits {
                if let Some(rate_limiter) = &self.rate_limiter {
                    if !rate_limiter.is_valid_to_pop() {
                        return;
                    }
                }
                if self
                    .concurrency_limiters
                    .iter()
                    .any(|l| !l.is_valid_to_pop())
                {
                    return;
                }
            }
            if item.try_mark_sending() {
                items.push(item.clone());
                if with_limits {
                    for limiter in &self.concurrency_limiters {
                        limiter.post_pop();
                    }
                    if let Some(rate_limiter) = &self.rate_limiter {
                        rate_limiter.post_pop(item.raw_size);
                    }
                }
            }
        }
    }

    /// Release the limiters held by a dispatched item and mark it idle so a
    /// later pop retries it.
    pub fn set_idle(&self, item: &Arc<SenderQueueItem>) {
        self.release_limiters();
        item.set_status(SendingStatus::Idle);
    }

    /// Remove a completed item, slide the read cursor over the hole, refill
    /// one overflow entry and fire feedback on the full-to-available edge.
    pub fn remove(&self, item: &Arc<SenderQueueItem>) -> bool {
        self.release_limiters();
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = ring.read;
        let mut found = false;
        while index < ring.write {
            let slot_index = index % ring.capacity;
            let slot = &mut ring.slots[slot_index];
            if slot.as_ref().is_some_and(|queued| Arc::ptr_eq(queued, item)) {
                *slot = None;
                found = true;
                break;
            }
            index += 1;
        }
        if !found {
            return false;
        }
        while ring.read < ring.write && ring.slots[ring.read % ring.capacity].is_none() {
            ring.read += 1;
        }
        ring.size -= 1;

        if let Some(next) = ring.extra.pop_front() {
            self.metrics.extra_buffer_size.set(ring.extra.len() as i64);
            ring.place(next);
            return true;
        }
        if !ring.valid_to_push && !ring.is_full() {
            ring.valid_to_push = true;
            drop(ring);
            if let Some(feedback) = &self.feedback {
                feedback.feedback(self.key);
            }
        }
        true
    }

    fn release_limiters(&self) {
        for limiter in &self.concurrency_limiters {
            limiter.on_send_done();
        }
    }
}

impl fmt::Debug for SenderQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderQueue")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("size", &self.size())
            .finish()
    }
}

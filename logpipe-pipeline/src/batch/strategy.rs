//! Flush trigger evaluation, a state-free function of (status, event).

use std::marker::PhantomData;

use logpipe::{unix_now, Event};

use super::status::{BatchStatus, GroupBatchStatus};

/// Flusher-supplied trigger thresholds, overridable per config.
#[derive(Clone, Copy, Debug)]
pub struct DefaultFlushStrategyOptions {
    /// Hard ceiling a batch may never cross.
    pub max_size_bytes: u32,
    /// Size trigger, evaluated after adding an event.
    pub min_size_bytes: u32,
    /// Count trigger, evaluated after adding an event.
    pub min_cnt: u32,
    /// Time trigger, evaluated before adding an event.
    pub timeout_secs: u32,
}

impl Default for DefaultFlushStrategyOptions {
    fn default() -> Self {
        DefaultFlushStrategyOptions {
            max_size_bytes: u32::MAX,
            min_size_bytes: 0,
            min_cnt: 0,
            timeout_secs: 0,
        }
    }
}

/// Event-level triggers, parameterized by the status variant.
#[derive(Debug)]
pub struct EventFlushStrategy<S> {
    max_size_bytes: u32,
    min_size_bytes: u32,
    min_cnt: u32,
    timeout_secs: u32,
    _status: PhantomData<S>,
}

impl<S: BatchStatus> EventFlushStrategy<S> {
    pub fn new(options: DefaultFlushStrategyOptions) -> Self {
        EventFlushStrategy {
            max_size_bytes: options.max_size_bytes,
            min_size_bytes: options.min_size_bytes,
            min_cnt: options.min_cnt,
            timeout_secs: options.timeout_secs,
            _status: PhantomData,
        }
    }

    pub fn set_timeout_secs(&mut self, secs: u32) {
        self.timeout_secs = secs;
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    pub fn min_size_bytes(&self) -> u32 {
        self.min_size_bytes
    }

    pub fn min_cnt(&self) -> u32 {
        self.min_cnt
    }

    /// Call after an event is added.
    pub fn need_flush_by_size(&self, status: &S) -> bool {
        status.size() >= self.min_size_bytes
    }

    /// Call after an event is added.
    pub fn need_flush_by_cnt(&self, status: &S) -> bool {
        status.cnt() == self.min_cnt
    }

    /// Call before an event is added.
    pub fn need_flush_by_time(&self, status: &S, event: &Event) -> bool {
        status.reached_time_limit(self.timeout_secs, event)
    }

    pub fn size_reaching_upper_limit(&self, status: &S) -> bool {
        status.size() >= self.max_size_bytes
    }
}

/// Group-level triggers: size and time only.
#[derive(Debug)]
pub struct GroupFlushStrategy {
    min_size_bytes: u32,
    timeout_secs: u32,
}

impl GroupFlushStrategy {
    pub fn new(min_size_bytes: u32, timeout_secs: u32) -> Self {
        GroupFlushStrategy {
            min_size_bytes,
            timeout_secs,
        }
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Call after a batch is added.
    pub fn need_flush_by_size(&self, status: &GroupBatchStatus) -> bool {
        status.size() >= self.min_size_bytes
    }

    /// Call before a batch is added.
    pub fn need_flush_by_time(&self, status: &GroupBatchStatus) -> bool {
        unix_now().saturating_sub(status.create_time()) >= self.timeout_secs
    }
}

//! The opaque unit a sender queue holds: serialized, compressed payload plus
//! everything needed to ship it and account for the outcome.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use logpipe::{unix_now, RangeCheckpoint};

use super::QueueKey;
use crate::flusher::HttpFlusher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SendingStatus {
    Idle = 0,
    Sending = 1,
}

/// What the payload is, which decides the sink-side framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawDataType {
    /// One serialized (and possibly compressed) event group.
    EventGroup,
    /// A package list wrapping several compressed groups.
    EventGroupList,
}

/// Ownership of an item conceptually transfers to the HTTP sink on dispatch
/// and returns to the queue on retry; concretely the queue keeps the `Arc`
/// and the status flag arbitrates.
pub struct SenderQueueItem {
    pub data: Bytes,
    /// Uncompressed payload size, the unit rate limiting runs on.
    pub raw_size: usize,
    pub flusher: Weak<dyn HttpFlusher>,
    pub queue_key: QueueKey,
    pub data_type: RawDataType,
    pub exactly_once_checkpoint: Option<Arc<RangeCheckpoint>>,
    status: AtomicU8,
    try_cnt: AtomicU32,
    enqueue_time: AtomicU32,
    last_send_time: AtomicU32,
}

impl SenderQueueItem {
    pub fn new(
        data: Bytes,
        raw_size: usize,
        flusher: Weak<dyn HttpFlusher>,
        queue_key: QueueKey,
        data_type: RawDataType,
    ) -> Self {
        SenderQueueItem {
            data,
            raw_size,
            flusher,
            queue_key,
            data_type,
            exactly_once_checkpoint: None,
            status: AtomicU8::new(SendingStatus::Idle as u8),
            try_cnt: AtomicU32::new(0),
            enqueue_time: AtomicU32::new(0),
            last_send_time: AtomicU32::new(0),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Option<Arc<RangeCheckpoint>>) -> Self {
        self.exactly_once_checkpoint = checkpoint;
        self
    }

    pub fn status(&self) -> SendingStatus {
        if self.status.load(Ordering::Acquire) == SendingStatus::Sending as u8 {
            SendingStatus::Sending
        } else {
            SendingStatus::Idle
        }
    }

    pub fn set_status(&self, status: SendingStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Flip Idle → Sending; the winner of this race owns dispatch.
    pub fn try_mark_sending(&self) -> bool {
        self.status
            .compare_exchange(
                SendingStatus::Idle as u8,
                SendingStatus::Sending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn try_cnt(&self) -> u32 {
        self.try_cnt.load(Ordering::Relaxed)
    }

    pub fn increase_try_cnt(&self) -> u32 {
        self.try_cnt.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn mark_enqueued(&self) {
        self.enqueue_time.store(unix_now(), Ordering::Relaxed);
    }

    pub fn enqueue_time(&self) -> u32 {
        self.enqueue_time.load(Ordering::Relaxed)
    }

    pub fn mark_sent(&self) {
        self.last_send_time.store(unix_now(), Ordering::Relaxed);
    }

    pub fn last_send_time(&self) -> u32 {
        self.last_send_time.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SenderQueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderQueueItem")
            .field("raw_size", &self.raw_size)
            .field("queue_key", &self.queue_key)
            .field("data_type", &self.data_type)
            .field("status", &self.status())
            .field("try_cnt", &self.try_cnt())
            .finish()
    }
}

//! In-flight batches and their sealed form.

use std::sync::Arc;

use logpipe::{unix_now_ms, Event, RangeCheckpoint, SizedMap, SourceBuffer, StringView};

use super::status::{BatchStatus, GroupBatchStatus};

/// A sealed, serializable slice of an event group.
///
/// Owns its events and a snapshot of the group tags; keeps handles to every
/// arena its events reference so moving the batch never dangles a view.
#[derive(Clone, Debug, Default)]
pub struct BatchedEvents {
    pub events: Vec<Event>,
    pub tags: SizedMap,
    pub source_buffers: Vec<Arc<SourceBuffer>>,
    pub pack_id_prefix: StringView,
    pub exactly_once_checkpoint: Option<Arc<RangeCheckpoint>>,
    pub size_bytes: usize,
}

pub type BatchedEventsList = Vec<BatchedEvents>;

/// One in-flight batch plus its status, keyed per tag hash.
#[derive(Debug, Default)]
pub struct EventBatchItem<S: BatchStatus> {
    batch: BatchedEvents,
    status: S,
    // Sum of per-event enqueue timestamps; an u64 only overflows past 10^6
    // buffered events, which no sane batch reaches.
    total_enqueue_time_ms: u64,
}

impl<S: BatchStatus> EventBatchItem<S> {
    pub fn add(&mut self, event: Event) {
        self.status.update(&event);
        self.batch.events.push(event);
        self.total_enqueue_time_ms += unix_now_ms();
    }

    /// Re-arm the empty item with the incoming group's shared state.
    ///
    /// Tags are copied, not moved, since one source group may split across
    /// several batches.
    pub fn reset(
        &mut self,
        tags: SizedMap,
        source_buffer: Arc<SourceBuffer>,
        checkpoint: Option<Arc<RangeCheckpoint>>,
        pack_id_prefix: StringView,
    ) {
        self.clear();
        self.batch.tags = tags;
        self.batch.exactly_once_checkpoint = checkpoint;
        self.batch.pack_id_prefix = pack_id_prefix;
        self.add_source_buffer(source_buffer);
    }

    pub fn add_source_buffer(&mut self, source_buffer: Arc<SourceBuffer>) {
        if !self
            .batch
            .source_buffers
            .iter()
            .any(|b| Arc::ptr_eq(b, &source_buffer))
        {
            self.batch.source_buffers.push(source_buffer);
        }
    }

    pub fn flush_into(&mut self, res: &mut BatchedEventsList) {
        if self.batch.events.is_empty() {
            return;
        }
        self.seal();
        res.push(std::mem::take(&mut self.batch));
        self.clear();
    }

    pub fn flush_into_lists(&mut self, res: &mut Vec<BatchedEventsList>) {
        if self.batch.events.is_empty() {
            return;
        }
        self.seal();
        res.push(vec![std::mem::take(&mut self.batch)]);
        self.clear();
    }

    pub fn flush_into_group(&mut self, group: &mut GroupBatchItem) {
        if self.batch.events.is_empty() {
            return;
        }
        self.seal();
        let enqueue_ms = self.total_enqueue_time_ms;
        group.add(std::mem::take(&mut self.batch), enqueue_ms);
        self.clear();
    }

    pub fn status(&self) -> &S {
        &self.status
    }

    pub fn is_empty(&self) -> bool {
        self.batch.events.is_empty()
    }

    pub fn event_size(&self) -> usize {
        self.batch.events.len()
    }

    pub fn data_size(&self) -> usize {
        self.status.size() as usize + self.batch.tags.data_size()
    }

    pub fn total_enqueue_time_ms(&self) -> u64 {
        self.total_enqueue_time_ms
    }

    fn seal(&mut self) {
        if self.batch.exactly_once_checkpoint.is_some() {
            self.update_exactly_once_log_position();
        }
        self.batch.size_bytes = self.data_size();
    }

    // Checkpoint covers [first.offset, last.offset + last.len).
    fn update_exactly_once_log_position(&mut self) {
        let positions: Option<((u64, u64), (u64, u64))> = match (
            self.batch.events.first().and_then(Event::as_log),
            self.batch.events.last().and_then(Event::as_log),
        ) {
            (Some(first), Some(last)) => first.position().zip(last.position()),
            _ => None,
        };
        if let (Some(((first_offset, _), (last_offset, last_len))), Some(checkpoint)) =
            (positions, self.batch.exactly_once_checkpoint.as_ref())
        {
            checkpoint.set_range(first_offset, last_offset + last_len - first_offset);
        }
    }

    fn clear(&mut self) {
        self.batch = BatchedEvents::default();
        self.status.reset();
        self.total_enqueue_time_ms = 0;
    }
}

/// The optional second-level buffer of already-sealed batches sharing one
/// flusher.
#[derive(Debug, Default)]
pub struct GroupBatchItem {
    groups: Vec<BatchedEvents>,
    status: GroupBatchStatus,
    events_cnt: usize,
    total_enqueue_time_ms: u64,
}

impl GroupBatchItem {
    pub fn add(&mut self, group: BatchedEvents, total_enqueue_time_ms: u64) {
        self.events_cnt += group.events.len();
        self.total_enqueue_time_ms += total_enqueue_time_ms;
        self.status.update(&group);
        self.groups.push(group);
    }

    pub fn flush_into(&mut self, res: &mut BatchedEventsList) {
        if self.groups.is_empty() {
            return;
        }
        res.append(&mut self.groups);
        self.clear();
    }

    pub fn flush_into_lists(&mut self, res: &mut Vec<BatchedEventsList>) {
        if self.groups.is_empty() {
            return;
        }
        res.push(std::mem::take(&mut self.groups));
        self.clear();
    }

    pub fn status(&self) -> &GroupBatchStatus {
        &self.status
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_size(&self) -> usize {
        self.groups.len()
    }

    pub fn event_size(&self) -> usize {
        self.events_cnt
    }

    pub fn data_size(&self) -> usize {
        self.status.size() as usize
    }

    pub fn total_enqueue_time_ms(&self) -> u64 {
        self.total_enqueue_time_ms
    }

    fn clear(&mut self) {
        self.groups.clear();
        self.status.reset();
        self.events_cnt = 0;
        self.total_enqueue_time_ms = 0;
    }
}

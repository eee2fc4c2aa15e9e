//! Event groups: the unit of work handed from inputs to flushers.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::{SourceBuffer, StringView};
use crate::event::Event;

/// Group tag promoted to the SLS log group `topic` field.
pub const LOG_RESERVED_KEY_TOPIC: &str = "__topic__";
/// Group tag promoted to the SLS log group `source` field.
pub const LOG_RESERVED_KEY_SOURCE: &str = "__source__";
/// Group tag promoted to the SLS log group `machine_uuid` field.
pub const LOG_RESERVED_KEY_MACHINE_UUID: &str = "__machine_uuid__";
/// Correlates batches split from one source; prefix plus monotonic suffix.
pub const LOG_RESERVED_KEY_PACKAGE_ID: &str = "__pack_id__";
/// Content key used when shipping raw events.
pub const DEFAULT_CONTENT_KEY: &str = "content";

/// Ordered tag map with incrementally tracked data size.
///
/// Keeping the byte total up to date on every mutation makes batch size
/// accounting O(1) at flush time.
#[derive(Clone, Debug, Default)]
pub struct SizedMap {
    inner: BTreeMap<StringView, StringView>,
    data_size: usize,
}

impl SizedMap {
    pub fn insert(&mut self, key: StringView, value: StringView) {
        match self.inner.insert(key.clone(), value.clone()) {
            Some(old) => {
                self.data_size = self.data_size + value.len() - old.len();
            }
            None => {
                self.data_size += key.len() + value.len();
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&StringView> {
        self.inner.get(key.as_bytes())
    }

    pub fn remove(&mut self, key: &str) {
        if let Some((key, value)) = self.inner.remove_entry(key.as_bytes()) {
            self.data_size -= key.len() + value.len();
        }
    }

    /// Tags in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&StringView, &StringView)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }
}

/// Metadata attached to a group by its input, invisible to serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventGroupMetaKey {
    /// Identity of the producing source, used as the pack-id prefix.
    SourceId,
    /// Path of the tailed file, when the group came from the file input.
    LogFilePath,
}

/// Byte range of a tailed file covered by a batch, for exactly-once replay.
///
/// The range is stamped during batch flush from the first and last events'
/// positions. Shipping confirmation advances the persisted read position;
/// a fatal send releases the range for re-read on restart.
#[derive(Debug, Default)]
pub struct RangeCheckpoint {
    read_offset: AtomicU64,
    read_length: AtomicU64,
    committed: AtomicBool,
}

impl RangeCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_range(&self, offset: u64, length: u64) {
        self.read_offset.store(offset, Ordering::Relaxed);
        self.read_length.store(length, Ordering::Relaxed);
    }

    pub fn range(&self) -> (u64, u64) {
        (
            self.read_offset.load(Ordering::Relaxed),
            self.read_length.load(Ordering::Relaxed),
        )
    }

    /// Mark the range as shipped; the reader may advance past it.
    pub fn confirm(&self) {
        self.committed.store(true, Ordering::Release);
    }

    /// Hand the range back for re-read after a fatal send.
    pub fn release(&self) {
        self.committed.store(false, Ordering::Release);
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }
}

/// An ordered sequence of events plus the context they share: tags, source
/// metadata, the arena their strings live in and an optional exactly-once
/// checkpoint.
#[derive(Clone, Debug, Default)]
pub struct EventGroup {
    source_buffer: Arc<SourceBuffer>,
    tags: SizedMap,
    events: Vec<Event>,
    metadata: BTreeMap<EventGroupMetaKey, StringView>,
    exactly_once_checkpoint: Option<Arc<RangeCheckpoint>>,
}

impl EventGroup {
    pub fn new(source_buffer: Arc<SourceBuffer>) -> Self {
        EventGroup {
            source_buffer,
            ..Default::default()
        }
    }

    pub fn source_buffer(&self) -> &Arc<SourceBuffer> {
        &self.source_buffer
    }

    /// Copy `s` into this group's arena.
    pub fn copy_string(&self, s: &str) -> StringView {
        self.source_buffer.copy_string(s)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut Vec<Event> {
        &mut self.events
    }

    pub fn push_event(&mut self, event: impl Into<Event>) {
        self.events.push(event.into());
    }

    pub fn tags(&self) -> &SizedMap {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&StringView> {
        self.tags.get(key)
    }

    pub fn set_tag(&mut self, key: StringView, value: StringView) {
        self.tags.insert(key, value);
    }

    pub fn metadata(&self, key: EventGroupMetaKey) -> Option<&StringView> {
        self.metadata.get(&key)
    }

    pub fn set_metadata(&mut self, key: EventGroupMetaKey, value: StringView) {
        self.metadata.insert(key, value);
    }

    pub fn exactly_once_checkpoint(&self) -> Option<&Arc<RangeCheckpoint>> {
        self.exactly_once_checkpoint.as_ref()
    }

    pub fn set_exactly_once_checkpoint(&mut self, checkpoint: Arc<RangeCheckpoint>) {
        self.exactly_once_checkpoint = Some(checkpoint);
    }

    /// Total payload bytes: events plus tags.
    pub fn data_size(&self) -> usize {
        self.tags.data_size() + self.events.iter().map(Event::data_size).sum::<usize>()
    }

    /// Deterministic hash over the sorted `(key, value)` tag pairs; the
    /// batcher keys per-tag batches on it.
    pub fn tags_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (key, value) in self.tags.iter() {
            key.as_bytes().hash(&mut hasher);
            value.as_bytes().hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogEvent;

    fn view(s: &str) -> StringView {
        StringView::from(s)
    }

    #[test]
    fn sized_map_tracks_data_size() {
        let mut tags = SizedMap::default();
        tags.insert(view("key"), view("value"));
        assert_eq!(tags.data_size(), 8);

        // Replacing a value adjusts by the length delta only.
        tags.insert(view("key"), view("v2"));
        assert_eq!(tags.data_size(), 5);

        tags.insert(view("other"), view("x"));
        assert_eq!(tags.data_size(), 11);

        tags.remove("key");
        assert_eq!(tags.data_size(), 6);
        tags.remove("missing");
        assert_eq!(tags.data_size(), 6);
    }

    #[test]
    fn tags_hash_is_order_insensitive() {
        let mut a = EventGroup::default();
        a.set_tag(view("k1"), view("v1"));
        a.set_tag(view("k2"), view("v2"));

        let mut b = EventGroup::default();
        b.set_tag(view("k2"), view("v2"));
        b.set_tag(view("k1"), view("v1"));

        assert_eq!(a.tags_hash(), b.tags_hash());

        b.set_tag(view("k2"), view("other"));
        assert_ne!(a.tags_hash(), b.tags_hash());
    }

    #[test]
    fn group_data_size_sums_events_and_tags() {
        let mut group = EventGroup::default();
        group.set_tag(view("topic"), view("t"));
        let mut log = LogEvent::new(1_234_567_890);
        log.add_content(view("key"), view("value"));
        group.push_event(log);

        assert_eq!(group.data_size(), 6 + 8);
    }

    #[test]
    fn checkpoint_confirm_and_release() {
        let cp = RangeCheckpoint::new();
        cp.set_range(100, 50);
        assert_eq!(cp.range(), (100, 50));
        assert!(!cp.is_committed());
        cp.confirm();
        assert!(cp.is_committed());
        cp.release();
        assert!(!cp.is_committed());
    }
}

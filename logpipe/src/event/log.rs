use crate::buffer::StringView;

/// A log record: an ordered list of key/value content pairs.
///
/// Content order is preserved from ingestion through serialization. The
/// optional file position feeds the exactly-once checkpoint stitched onto a
/// batch at flush time.
#[derive(Clone, Debug, Default)]
pub struct LogEvent {
    pub timestamp: u32,
    pub timestamp_nanos: Option<u32>,
    contents: Vec<(StringView, StringView)>,
    /// `(offset, length)` of the source line in its file, when tailed.
    position: Option<(u64, u64)>,
}

impl LogEvent {
    pub fn new(timestamp: u32) -> Self {
        LogEvent {
            timestamp,
            ..Default::default()
        }
    }

    pub fn add_content(&mut self, key: StringView, value: StringView) {
        self.contents.push((key, value));
    }

    pub fn contents(&self) -> impl Iterator<Item = (&StringView, &StringView)> {
        self.contents.iter().map(|(k, v)| (k, v))
    }

    pub fn content_len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn set_position(&mut self, offset: u64, length: u64) {
        self.position = Some((offset, length));
    }

    pub fn position(&self) -> Option<(u64, u64)> {
        self.position
    }

    pub fn data_size(&self) -> usize {
        self.contents
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
    }
}

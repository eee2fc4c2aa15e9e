use crate::buffer::StringView;

/// An unparsed payload, shipped as a single `content` field.
#[derive(Clone, Debug, Default)]
pub struct RawEvent {
    pub timestamp: u32,
    pub timestamp_nanos: Option<u32>,
    content: StringView,
}

impl RawEvent {
    pub fn new(timestamp: u32, content: StringView) -> Self {
        RawEvent {
            timestamp,
            timestamp_nanos: None,
            content,
        }
    }

    pub fn content(&self) -> &StringView {
        &self.content
    }

    pub fn data_size(&self) -> usize {
        self.content.len()
    }
}

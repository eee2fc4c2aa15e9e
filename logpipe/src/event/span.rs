use std::collections::BTreeMap;

use crate::buffer::StringView;

/// Relationship of a span to its parent, mirroring the OpenTelemetry kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "unspecified",
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "UNSET",
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
        }
    }
}

/// A causal link to another span.
#[derive(Clone, Debug, Default)]
pub struct SpanLink {
    pub trace_id: StringView,
    pub span_id: StringView,
    pub trace_state: StringView,
    pub tags: BTreeMap<StringView, StringView>,
}

/// A point-in-time event recorded inside a span.
#[derive(Clone, Debug, Default)]
pub struct SpanInnerEvent {
    pub name: StringView,
    pub timestamp_nanos: u64,
    pub tags: BTreeMap<StringView, StringView>,
}

/// A trace span.
#[derive(Clone, Debug, Default)]
pub struct SpanEvent {
    pub trace_id: StringView,
    pub span_id: StringView,
    pub parent_span_id: StringView,
    pub name: StringView,
    pub kind: SpanKind,
    pub status: SpanStatus,
    pub trace_state: StringView,
    pub start_time_nanos: u64,
    pub end_time_nanos: u64,
    pub tags: BTreeMap<StringView, StringView>,
    pub scope_tags: BTreeMap<StringView, StringView>,
    pub links: Vec<SpanLink>,
    pub events: Vec<SpanInnerEvent>,
}

impl SpanEvent {
    /// Span time in whole seconds, derived from the start timestamp.
    pub fn timestamp(&self) -> u32 {
        (self.start_time_nanos / 1_000_000_000) as u32
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_time_nanos.saturating_sub(self.start_time_nanos)
    }

    pub fn set_tag(&mut self, key: StringView, value: StringView) {
        self.tags.insert(key, value);
    }

    pub fn data_size(&self) -> usize {
        fn tags_size(tags: &BTreeMap<StringView, StringView>) -> usize {
            tags.iter().map(|(k, v)| k.len() + v.len()).sum()
        }

        self.trace_id.len()
            + self.span_id.len()
            + self.parent_span_id.len()
            + self.name.len()
            + self.trace_state.len()
            + 2 * std::mem::size_of::<u64>()
            + tags_size(&self.tags)
            + tags_size(&self.scope_tags)
            + self
                .links
                .iter()
                .map(|l| {
                    l.trace_id.len() + l.span_id.len() + l.trace_state.len() + tags_size(&l.tags)
                })
                .sum::<usize>()
            + self
                .events
                .iter()
                .map(|e| e.name.len() + std::mem::size_of::<u64>() + tags_size(&e.tags))
                .sum::<usize>()
    }
}

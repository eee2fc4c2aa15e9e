//! The tagged event model.
//!
//! Pipelines move four kinds of telemetry: log records, metric samples,
//! trace spans and raw byte payloads. They share a timestamp and a
//! data-size accessor (used to bound serialized length) and are otherwise
//! matched exhaustively wherever the distinction matters.

mod log;
mod metric;
mod raw;
mod span;

pub use log::LogEvent;
pub use metric::{MetricEvent, MetricValue};
pub use raw::RawEvent;
pub use span::{SpanEvent, SpanInnerEvent, SpanKind, SpanLink, SpanStatus};

/// Discriminant of an [`Event`], used by routing conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Log,
    Metric,
    Span,
    Raw,
}

/// A single telemetry record flowing through the pipeline.
///
/// All string payloads are [`crate::StringView`]s into the owning group's
/// [`crate::SourceBuffer`], so cloning an event is cheap and never copies
/// payload bytes.
#[derive(Clone, Debug)]
pub enum Event {
    Log(LogEvent),
    Metric(MetricEvent),
    Span(SpanEvent),
    Raw(RawEvent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Log(_) => EventType::Log,
            Event::Metric(_) => EventType::Metric,
            Event::Span(_) => EventType::Span,
            Event::Raw(_) => EventType::Raw,
        }
    }

    /// Event time in seconds since the unix epoch.
    pub fn timestamp(&self) -> u32 {
        match self {
            Event::Log(e) => e.timestamp,
            Event::Metric(e) => e.timestamp,
            Event::Span(e) => e.timestamp(),
            Event::Raw(e) => e.timestamp,
        }
    }

    /// Optional sub-second part of the event time.
    pub fn timestamp_nanos(&self) -> Option<u32> {
        match self {
            Event::Log(e) => e.timestamp_nanos,
            Event::Metric(e) => e.timestamp_nanos,
            Event::Span(_) => None,
            Event::Raw(e) => e.timestamp_nanos,
        }
    }

    /// Approximate in-memory payload size, the unit batch accounting runs on.
    pub fn data_size(&self) -> usize {
        match self {
            Event::Log(e) => e.data_size(),
            Event::Metric(e) => e.data_size(),
            Event::Span(e) => e.data_size(),
            Event::Raw(e) => e.data_size(),
        }
    }

    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            Event::Log(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricEvent> {
        match self {
            Event::Metric(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_metric_mut(&mut self) -> Option<&mut MetricEvent> {
        match self {
            Event::Metric(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_span(&self) -> Option<&SpanEvent> {
        match self {
            Event::Span(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LogEvent> for Event {
    fn from(e: LogEvent) -> Self {
        Event::Log(e)
    }
}

impl From<MetricEvent> for Event {
    fn from(e: MetricEvent) -> Self {
        Event::Metric(e)
    }
}

impl From<SpanEvent> for Event {
    fn from(e: SpanEvent) -> Self {
        Event::Span(e)
    }
}

impl From<RawEvent> for Event {
    fn from(e: RawEvent) -> Self {
        Event::Raw(e)
    }
}

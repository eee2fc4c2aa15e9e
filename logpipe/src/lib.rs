//! Core data model and shared services for the logpipe telemetry agent.
//!
//! This crate carries everything the pipeline and export layers agree on:
//! the event model ([`event::Event`] and its variants), the arena-backed
//! [`buffer::SourceBuffer`] every string view points into, the
//! [`group::EventGroup`] unit handed from inputs to flushers, metric label
//! handling with Prometheus-style relabeling, typed JSON configuration
//! extraction with warn/error/ignore policies, and the process-wide alarm
//! and self-metrics registries.
//!
//! ```ascii
//!   +--------+    +------------+    +---------+    +----------+
//!   | inputs +----> EventGroup +----> batcher +----> flushers |
//!   +--------+    +------------+    +---------+    +----------+
//! ```
//!
//! Higher layers live in `logpipe-pipeline` (batching, queues, routing) and
//! `logpipe-export` (serializers, compressors, sinks).

#![warn(missing_debug_implementations, unreachable_pub)]

pub mod alarm;
pub mod buffer;
pub mod config;
pub mod context;
pub mod event;
pub mod group;
pub mod labels;
pub mod metrics;

mod macros;

pub use buffer::{SourceBuffer, StringView};
pub use context::PipelineContext;
pub use event::Event;
pub use group::{EventGroup, EventGroupMetaKey, RangeCheckpoint, SizedMap};

/// Seconds since the unix epoch, the timestamp currency of the data plane.
pub fn unix_now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

/// Milliseconds since the unix epoch, used for latency accounting.
pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

//! Sinks shipping queued items out of the process.

mod http;

pub use http::{HttpSink, SinkRequest};

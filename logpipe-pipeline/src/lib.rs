//! Batching, queueing and routing: the middle of the logpipe data plane.
//!
//! Event groups enter through [`pipeline::Pipeline`], are grouped per tag
//! hash by the two-level [`batch::Batcher`], sealed into
//! [`batch::BatchedEvents`] on size/count/time triggers (with the
//! [`batch::TimeoutFlushManager`] sweeping stale batches), and queued as
//! opaque [`queue::SenderQueueItem`]s in per-flusher [`queue::SenderQueue`]s
//! regulated by shared rate and concurrency limiters. The HTTP sink in
//! `logpipe-export` drains those queues through the [`flusher::HttpFlusher`]
//! contract.

#![warn(missing_debug_implementations, unreachable_pub)]

pub mod batch;
pub mod error;
pub mod flusher;
pub mod http;
pub mod pipeline;
pub mod queue;
pub mod route;

pub use error::FlushError;
pub use flusher::{Flusher, HttpFlusher};
pub use http::{HttpRequest, HttpResponse};

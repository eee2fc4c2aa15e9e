//! The egress half of the logpipe telemetry agent.
//!
//! Sealed batches coming out of `logpipe-pipeline` are serialized to their
//! destination wire format ([`serializer`]), compressed ([`compression`]),
//! queued by the destination [`flusher`]s, and shipped by the
//! [`runner::FlusherRunner`] through the dedicated-thread [`sink::HttpSink`].
//! [`runtime::AgentRuntime`] wires the process-wide services together.

#![warn(missing_debug_implementations, unreachable_pub)]

pub mod compression;
pub mod flusher;
pub mod runner;
pub mod runtime;
pub mod serializer;
pub mod sink;

pub use compression::{CompressType, Compressor, CompressorFactory};
pub use runtime::AgentRuntime;

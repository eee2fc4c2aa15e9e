//! Wire formats spoken by the logpipe telemetry agent.
//!
//! The SLS log group format is emitted by a hand-rolled two-pass writer
//! ([`loggroup::LogGroupWriter`]) so the hot path never materializes an
//! intermediate message tree; the [`sls`] module carries prost mirrors of
//! the same schema for package-list serialization and for decoding writer
//! output in tests. [`remote_write`] and [`arms`] are plain prost message
//! sets for the Prometheus RemoteWrite and Arms span endpoints.

#![warn(missing_debug_implementations, unreachable_pub)]

pub mod arms;
pub mod loggroup;
pub mod remote_write;
pub mod sls;

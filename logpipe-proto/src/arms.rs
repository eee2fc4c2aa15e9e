//! Arms span upload messages.
//!
//! A batch carries resource-level common labels (host, ip, app id, cluster,
//! SDK name/version) plus the spans that share them.

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpanBatch {
    /// Resource labels shared by every span in the batch.
    #[prost(map = "string, string", tag = "1")]
    pub resource: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(message, repeated, tag = "2")]
    pub spans: ::prost::alloc::vec::Vec<Span>,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Span {
    #[prost(string, tag = "1")]
    pub trace_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub span_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub parent_span_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub kind: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub status_code: ::prost::alloc::string::String,
    #[prost(uint64, tag = "7")]
    pub start_time_ns: u64,
    #[prost(uint64, tag = "8")]
    pub end_time_ns: u64,
    #[prost(map = "string, string", tag = "9")]
    pub attributes: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
}

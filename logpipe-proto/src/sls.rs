//! Prost mirror of the SLS `sls_logs.proto` schema.
//!
//! Production encoding of log groups goes through
//! [`crate::loggroup::LogGroupWriter`]; these types serialize the package
//! list envelope and give tests a decoder for writer output.

/// A single log entry.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Log {
    #[prost(uint32, required, tag = "1")]
    pub time: u32,
    #[prost(message, repeated, tag = "2")]
    pub contents: ::prost::alloc::vec::Vec<LogContent>,
    /// Sub-second part of `time`, only present in nanosecond mode.
    #[prost(fixed32, optional, tag = "4")]
    pub time_ns: ::core::option::Option<u32>,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogContent {
    #[prost(string, required, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, required, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogTag {
    #[prost(string, required, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, required, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogGroup {
    #[prost(message, repeated, tag = "1")]
    pub logs: ::prost::alloc::vec::Vec<Log>,
    /// Deprecated; never set by the agent.
    #[prost(string, optional, tag = "2")]
    pub category: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "3")]
    pub topic: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "4")]
    pub source: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "5")]
    pub machine_uuid: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "6")]
    pub log_tags: ::prost::alloc::vec::Vec<LogTag>,
}

/// One compressed log group inside a package list.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SlsLogPackage {
    #[prost(bytes = "vec", required, tag = "1")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(int32, required, tag = "2")]
    pub uncompress_size: i32,
    #[prost(enumeration = "SlsCompressType", optional, tag = "3")]
    pub compress_type: ::core::option::Option<i32>,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SlsLogPackageList {
    #[prost(message, repeated, tag = "1")]
    pub packages: ::prost::alloc::vec::Vec<SlsLogPackage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SlsCompressType {
    SlsCmpNone = 1,
    SlsCmpLz4 = 2,
    SlsCmpDeflate = 3,
    SlsCmpZstd = 4,
}

impl SlsCompressType {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            SlsCompressType::SlsCmpNone => "SLS_CMP_NONE",
            SlsCompressType::SlsCmpLz4 => "SLS_CMP_LZ4",
            SlsCompressType::SlsCmpDeflate => "SLS_CMP_DEFLATE",
            SlsCompressType::SlsCmpZstd => "SLS_CMP_ZSTD",
        }
    }
}

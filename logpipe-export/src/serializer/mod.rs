//! Destination wire-format serialization.
//!
//! Every serializer wraps its format-specific `do_serialize` with the same
//! instrumentation: items/bytes in, items/bytes out, discards and process
//! time. Inputs are sealed batches (or, for package lists, already
//! compressed chunks).

mod arms;
mod json;
mod push_gateway;
mod remote_write;
mod sls;

pub use arms::{ArmsResource, ArmsSpanEventGroupListSerializer};
pub use json::JsonEventGroupSerializer;
pub use push_gateway::PushGatewayEventGroupSerializer;
pub use remote_write::RemoteWriteEventGroupSerializer;
pub use sls::{SlsEventGroupListSerializer, SlsEventGroupSerializer, DEFAULT_MAX_SEND_GROUP_SIZE};

use std::sync::Arc;
use std::time::Instant;

use logpipe::metrics::{
    Counter, MetricsRecord, METRIC_COMPONENT_DISCARDED_ITEMS_TOTAL,
    METRIC_COMPONENT_DISCARDED_SIZE_BYTES, METRIC_COMPONENT_IN_ITEMS_TOTAL,
    METRIC_COMPONENT_IN_SIZE_BYTES, METRIC_COMPONENT_OUT_ITEMS_TOTAL,
    METRIC_COMPONENT_OUT_SIZE_BYTES, METRIC_COMPONENT_TOTAL_PROCESS_TIME_MS,
    METRIC_LABEL_KEY_COMPONENT_NAME, METRIC_LABEL_KEY_PIPELINE_NAME, METRIC_LABEL_KEY_PROJECT,
};
use logpipe::PipelineContext;
use logpipe_pipeline::batch::{BatchedEvents, BatchedEventsList};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("empty event group")]
    EmptyGroup,

    #[error("all empty logs")]
    AllEmptyEvents,

    #[error("unsupported event type in event group")]
    UnsupportedEventType,

    #[error("log group exceeds size limit, group size: {size}, size limit: {limit}")]
    SizeLimitExceeded { size: usize, limit: usize },

    #[error("serialization failed: {0}")]
    Internal(String),
}

/// One compressed log group awaiting package-list framing.
#[derive(Clone, Debug)]
pub struct CompressedLogGroup {
    pub data: Vec<u8>,
    pub raw_size: usize,
}

/// Anything a serializer accepts; the size feeds discard accounting.
pub trait SerializerInput {
    fn input_size(&self) -> usize;
}

impl SerializerInput for BatchedEvents {
    fn input_size(&self) -> usize {
        self.size_bytes
    }
}

impl SerializerInput for BatchedEventsList {
    fn input_size(&self) -> usize {
        self.iter().map(|b| b.size_bytes).sum()
    }
}

impl SerializerInput for Vec<CompressedLogGroup> {
    fn input_size(&self) -> usize {
        self.iter().map(|c| c.data.len()).sum()
    }
}

#[derive(Debug)]
pub struct SerializerMetrics {
    _record: Arc<MetricsRecord>,
    in_items_total: Arc<Counter>,
    in_size_bytes: Arc<Counter>,
    out_items_total: Arc<Counter>,
    out_size_bytes: Arc<Counter>,
    discarded_items_total: Arc<Counter>,
    discarded_size_bytes: Arc<Counter>,
    total_process_time_ms: Arc<Counter>,
}

impl SerializerMetrics {
    pub fn new(ctx: &PipelineContext, flusher_node: usize) -> Self {
        let record = ctx.metrics().register(vec![
            (METRIC_LABEL_KEY_PROJECT.to_owned(), ctx.project().to_owned()),
            (
                METRIC_LABEL_KEY_PIPELINE_NAME.to_owned(),
                ctx.config_name().to_owned(),
            ),
            (
                METRIC_LABEL_KEY_COMPONENT_NAME.to_owned(),
                "serializer".to_owned(),
            ),
            ("flusher_node_id".to_owned(), flusher_node.to_string()),
        ]);
        SerializerMetrics {
            in_items_total: record.counter(METRIC_COMPONENT_IN_ITEMS_TOTAL),
            in_size_bytes: record.counter(METRIC_COMPONENT_IN_SIZE_BYTES),
            out_items_total: record.counter(METRIC_COMPONENT_OUT_ITEMS_TOTAL),
            out_size_bytes: record.counter(METRIC_COMPONENT_OUT_SIZE_BYTES),
            discarded_items_total: record.counter(METRIC_COMPONENT_DISCARDED_ITEMS_TOTAL),
            discarded_size_bytes: record.counter(METRIC_COMPONENT_DISCARDED_SIZE_BYTES),
            total_process_time_ms: record.counter(METRIC_COMPONENT_TOTAL_PROCESS_TIME_MS),
            _record: record,
        }
    }

    pub fn discarded_items(&self) -> u64 {
        self.discarded_items_total.get()
    }

    pub fn out_items(&self) -> u64 {
        self.out_items_total.get()
    }
}

/// Format-specific serializers implement `do_serialize`; callers go through
/// [`Serializer::serialize`] for the instrumentation.
pub trait Serializer: Send + Sync {
    type Input: SerializerInput;

    fn metrics(&self) -> &SerializerMetrics;

    fn do_serialize(&self, input: Self::Input) -> Result<Vec<u8>, SerializeError>;

    fn serialize(&self, input: Self::Input) -> Result<Vec<u8>, SerializeError> {
        let metrics = self.metrics();
        let input_size = input.input_size();
        metrics.in_items_total.add(1);
        metrics.in_size_bytes.add(input_size as u64);

        let before = Instant::now();
        let res = self.do_serialize(input);
        metrics
            .total_process_time_ms
            .add(before.elapsed().as_millis() as u64);

        match &res {
            Ok(output) => {
                metrics.out_items_total.add(1);
                metrics.out_size_bytes.add(output.len() as u64);
            }
            Err(_) => {
                metrics.discarded_items_total.add(1);
                metrics.discarded_size_bytes.add(input_size as u64);
            }
        }
        res
    }
}

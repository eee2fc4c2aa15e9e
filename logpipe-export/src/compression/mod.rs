//! Payload compression between serialization and the sender queue.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use logpipe::config::{get_optional_string_param, param_warning_default};
use logpipe::metrics::{
    Counter, MetricsRecord, METRIC_COMPONENT_DISCARDED_ITEMS_TOTAL,
    METRIC_COMPONENT_DISCARDED_SIZE_BYTES, METRIC_COMPONENT_IN_ITEMS_TOTAL,
    METRIC_COMPONENT_IN_SIZE_BYTES, METRIC_COMPONENT_OUT_ITEMS_TOTAL,
    METRIC_COMPONENT_OUT_SIZE_BYTES, METRIC_COMPONENT_TOTAL_DELAY_MS,
    METRIC_LABEL_KEY_COMPONENT_NAME, METRIC_LABEL_KEY_PIPELINE_NAME, METRIC_LABEL_KEY_PROJECT,
};
use logpipe::PipelineContext;
use serde_json::Value;
use thiserror::Error;

const DEFAULT_ZSTD_LEVEL: i32 = 1;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("lz4 compression failed: {0}")]
    Lz4(String),
    #[error("zstd compression failed: {0}")]
    Zstd(String),
    #[error("snappy compression failed: {0}")]
    Snappy(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressType {
    #[default]
    Lz4,
    Zstd,
    Snappy,
    None,
}

impl CompressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressType::Lz4 => "lz4",
            CompressType::Zstd => "zstd",
            CompressType::Snappy => "snappy",
            CompressType::None => "none",
        }
    }
}

#[derive(Debug)]
enum Codec {
    Lz4,
    Zstd { level: i32 },
    Snappy,
}

impl Codec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressError> {
        match self {
            // SLS expects the raw LZ4 block format, not the frame format.
            Codec::Lz4 => Ok(lz4_flex::block::compress(input)),
            Codec::Zstd { level } => zstd::bulk::compress(input, *level)
                .map_err(|e| CompressError::Zstd(e.to_string())),
            Codec::Snappy => snap::raw::Encoder::new()
                .compress_vec(input)
                .map_err(|e| CompressError::Snappy(e.to_string())),
        }
    }
}

struct CompressorMetrics {
    _record: Arc<MetricsRecord>,
    in_items_total: Arc<Counter>,
    in_size_bytes: Arc<Counter>,
    out_items_total: Arc<Counter>,
    out_size_bytes: Arc<Counter>,
    discarded_items_total: Arc<Counter>,
    discarded_size_bytes: Arc<Counter>,
    total_delay_ms: Arc<Counter>,
}

/// Stateless, thread-safe `compress(in) -> out`, instrumented.
pub struct Compressor {
    compress_type: CompressType,
    codec: Codec,
    metrics: Option<CompressorMetrics>,
}

impl Compressor {
    fn new(compress_type: CompressType) -> Option<Self> {
        let codec = match compress_type {
            CompressType::Lz4 => Codec::Lz4,
            CompressType::Zstd => Codec::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            },
            CompressType::Snappy => Codec::Snappy,
            CompressType::None => return None,
        };
        Some(Compressor {
            compress_type,
            codec,
            metrics: None,
        })
    }

    pub fn compress_type(&self) -> CompressType {
        self.compress_type
    }

    pub fn set_metrics(&mut self, ctx: &PipelineContext, flusher_node: usize) {
        let record = ctx.metrics().register(vec![
            (METRIC_LABEL_KEY_PROJECT.to_owned(), ctx.project().to_owned()),
            (
                METRIC_LABEL_KEY_PIPELINE_NAME.to_owned(),
                ctx.config_name().to_owned(),
            ),
            (
                METRIC_LABEL_KEY_COMPONENT_NAME.to_owned(),
                "compressor".to_owned(),
            ),
            ("flusher_node_id".to_owned(), flusher_node.to_string()),
        ]);
        self.metrics = Some(CompressorMetrics {
            in_items_total: record.counter(METRIC_COMPONENT_IN_ITEMS_TOTAL),
            in_size_bytes: record.counter(METRIC_COMPONENT_IN_SIZE_BYTES),
            out_items_total: record.counter(METRIC_COMPONENT_OUT_ITEMS_TOTAL),
            out_size_bytes: record.counter(METRIC_COMPONENT_OUT_SIZE_BYTES),
            discarded_items_total: record.counter(METRIC_COMPONENT_DISCARDED_ITEMS_TOTAL),
            discarded_size_bytes: record.counter(METRIC_COMPONENT_DISCARDED_SIZE_BYTES),
            total_delay_ms: record.counter(METRIC_COMPONENT_TOTAL_DELAY_MS),
            _record: record,
        });
    }

    /// Instrumented entry point.
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressError> {
        if let Some(metrics) = &self.metrics {
            metrics.in_items_total.add(1);
            metrics.in_size_bytes.add(input.len() as u64);
        }
        let before = Instant::now();
        let res = self.codec.compress(input);
        if let Some(metrics) = &self.metrics {
            metrics.total_delay_ms.add(before.elapsed().as_millis() as u64);
            match &res {
                Ok(output) => {
                    metrics.out_items_total.add(1);
                    metrics.out_size_bytes.add(output.len() as u64);
                }
                Err(_) => {
                    metrics.discarded_items_total.add(1);
                    metrics.discarded_size_bytes.add(input.len() as u64);
                }
            }
        }
        res
    }
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("compress_type", &self.compress_type)
            .finish()
    }
}

/// Builds a compressor from the plugin config's `CompressType`; an unknown
/// value warns and falls back to the caller-supplied default. `None` means
/// "ship uncompressed".
#[derive(Debug)]
pub struct CompressorFactory;

impl CompressorFactory {
    pub fn create(
        config: &Value,
        ctx: &PipelineContext,
        plugin_type: &str,
        flusher_node: usize,
        default_type: CompressType,
    ) -> Option<Compressor> {
        let compress_type = match get_optional_string_param(config, "CompressType") {
            Ok(None) => default_type,
            Ok(Some(value)) => match value.as_str() {
                "lz4" => CompressType::Lz4,
                "zstd" => CompressType::Zstd,
                "snappy" => CompressType::Snappy,
                "none" => return None,
                _ => {
                    param_warning_default(
                        ctx,
                        plugin_type,
                        "string param CompressType is not valid",
                        default_type.as_str(),
                    );
                    default_type
                }
            },
            Err(err) => {
                param_warning_default(ctx, plugin_type, err, default_type.as_str());
                default_type
            }
        };
        let mut compressor = Compressor::new(compress_type)?;
        compressor.set_metrics(ctx, flusher_node);
        Some(compressor)
    }

    pub fn create_raw(compress_type: CompressType) -> Option<Compressor> {
        Compressor::new(compress_type)
    }
}

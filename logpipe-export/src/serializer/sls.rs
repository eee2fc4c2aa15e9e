//! SLS log group serialization.
//!
//! The serializer computes the exact output size in a first pass (caching
//! per-event derived strings along the way), allocates once, then emits the
//! length-delimited protobuf in a second pass through
//! [`logpipe_proto::loggroup::LogGroupWriter`].

use logpipe::event::{Event, EventType, MetricEvent, MetricValue, SpanEvent};
use logpipe::group::{
    DEFAULT_CONTENT_KEY, LOG_RESERVED_KEY_MACHINE_UUID, LOG_RESERVED_KEY_SOURCE,
    LOG_RESERVED_KEY_TOPIC,
};
use logpipe::{pipe_error, PipelineContext};
use logpipe_pipeline::batch::BatchedEvents;
use logpipe_proto::loggroup::{
    log_content_size, log_size, log_tag_size, string_field_size, LogGroupWriter,
};
use logpipe_proto::sls::{SlsCompressType, SlsLogPackage, SlsLogPackageList};
use prost::Message;

use super::{CompressedLogGroup, SerializeError, Serializer, SerializerMetrics};
use crate::compression::CompressType;

/// Upper bound on one serialized log group (10 MiB), matching the service
/// side limit.
pub const DEFAULT_MAX_SEND_GROUP_SIZE: usize = 10 * 1024 * 1024;

const METRIC_RESERVED_KEY_NAME: &str = "__name__";
const METRIC_RESERVED_KEY_LABELS: &str = "__labels__";
const METRIC_RESERVED_KEY_VALUE: &str = "__value__";
const METRIC_RESERVED_KEY_TIME_NANO: &str = "__time_nano__";

const METRIC_LABELS_SEPARATOR: &str = "|";
const METRIC_LABELS_KEY_VALUE_SEPARATOR: &str = "#$#";

const TRACE_TAG_TRACE_ID: &str = "traceId";
const TRACE_TAG_SPAN_ID: &str = "spanId";
const TRACE_TAG_PARENT_ID: &str = "parentSpanId";
const TRACE_TAG_SPAN_NAME: &str = "spanName";
const TRACE_TAG_SPAN_KIND: &str = "kind";
const TRACE_TAG_STATUS_CODE: &str = "statusCode";
const TRACE_TAG_TRACE_STATE: &str = "traceState";
const TRACE_TAG_ATTRIBUTES: &str = "attributes";
const TRACE_TAG_LINKS: &str = "links";
const TRACE_TAG_EVENTS: &str = "events";
const TRACE_TAG_START_TIME_NANO: &str = "startTime";
const TRACE_TAG_END_TIME_NANO: &str = "endTime";
const TRACE_TAG_DURATION: &str = "duration";

/// Emits one SLS `LogGroup` per batch.
#[derive(Debug)]
pub struct SlsEventGroupSerializer {
    ctx: PipelineContext,
    max_group_size: usize,
    metrics: SerializerMetrics,
}

impl SlsEventGroupSerializer {
    pub fn new(ctx: PipelineContext, flusher_node: usize) -> Self {
        let metrics = SerializerMetrics::new(&ctx, flusher_node);
        SlsEventGroupSerializer {
            ctx,
            max_group_size: DEFAULT_MAX_SEND_GROUP_SIZE,
            metrics,
        }
    }

    #[cfg(test)]
    fn with_max_group_size(mut self, max: usize) -> Self {
        self.max_group_size = max;
        self
    }
}

// `seconds` rendered as decimal, optionally suffixed with zero-padded
// nine-digit nanoseconds. The seconds part of any current timestamp is ten
// digits, which the size pass relies on.
fn time_nano_value_size(has_nanos: bool) -> usize {
    if has_nanos {
        19
    } else {
        10
    }
}

fn metric_labels_value_size(event: &MetricEvent) -> usize {
    let tags_len = event.tags_len();
    if tags_len == 0 {
        return 0;
    }
    event
        .tags()
        .map(|(k, v)| k.len() + v.len())
        .sum::<usize>()
        + tags_len * METRIC_LABELS_KEY_VALUE_SEPARATOR.len()
        + (tags_len - 1) * METRIC_LABELS_SEPARATOR.len()
}

fn write_metric_labels(event: &MetricEvent, buf: &mut Vec<u8>) {
    let mut has_prev = false;
    for (key, value) in event.tags() {
        if has_prev {
            buf.extend_from_slice(METRIC_LABELS_SEPARATOR.as_bytes());
        }
        has_prev = true;
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(METRIC_LABELS_KEY_VALUE_SEPARATOR.as_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
}

fn write_time_nano(timestamp: u32, timestamp_nanos: Option<u32>, buf: &mut Vec<u8>) {
    buf.extend_from_slice(timestamp.to_string().as_bytes());
    if let Some(nanos) = timestamp_nanos {
        buf.extend_from_slice(format!("{nanos:09}").as_bytes());
    }
}

fn span_attributes_json(event: &SpanEvent) -> String {
    let mut map = serde_json::Map::new();
    for (key, value) in event.tags.iter().chain(event.scope_tags.iter()) {
        map.insert(
            key.as_str().to_owned(),
            serde_json::Value::String(value.as_str().to_owned()),
        );
    }
    serde_json::Value::Object(map).to_string()
}

fn span_links_json(event: &SpanEvent) -> String {
    if event.links.is_empty() {
        return String::new();
    }
    let links: Vec<serde_json::Value> = event
        .links
        .iter()
        .map(|link| {
            let mut map = serde_json::Map::new();
            map.insert("traceId".to_owned(), link.trace_id.as_str().into());
            map.insert("spanId".to_owned(), link.span_id.as_str().into());
            map.insert("traceState".to_owned(), link.trace_state.as_str().into());
            let attributes: serde_json::Map<String, serde_json::Value> = link
                .tags
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), v.as_str().into()))
                .collect();
            map.insert("attributes".to_owned(), attributes.into());
            serde_json::Value::Object(map)
        })
        .collect();
    serde_json::Value::Array(links).to_string()
}

fn span_events_json(event: &SpanEvent) -> String {
    if event.events.is_empty() {
        return String::new();
    }
    let events: Vec<serde_json::Value> = event
        .events
        .iter()
        .map(|inner| {
            let mut map = serde_json::Map::new();
            map.insert("name".to_owned(), inner.name.as_str().into());
            map.insert("timestamp".to_owned(), inner.timestamp_nanos.into());
            let attributes: serde_json::Map<String, serde_json::Value> = inner
                .tags
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), v.as_str().into()))
                .collect();
            map.insert("attributes".to_owned(), attributes.into());
            serde_json::Value::Object(map)
        })
        .collect();
    serde_json::Value::Array(events).to_string()
}

// Derived strings cached between the size pass and the emit pass.
#[derive(Default)]
struct MetricCache {
    value: String,
    labels_size: usize,
}

#[derive(Default)]
struct SpanCache {
    attributes: String,
    links: String,
    events: String,
    start: String,
    end: String,
    duration: String,
}

impl Serializer for SlsEventGroupSerializer {
    type Input = BatchedEvents;

    fn metrics(&self) -> &SerializerMetrics {
        &self.metrics
    }

    fn do_serialize(&self, group: BatchedEvents) -> Result<Vec<u8>, SerializeError> {
        if group.events.is_empty() {
            return Err(SerializeError::EmptyGroup);
        }
        let event_type = group.events[0].event_type();
        let enable_ns = self.ctx.enable_timestamp_nanosecond();

        // First pass: exact output size, with derived values cached.
        let mut log_bodies = vec![0usize; group.events.len()];
        let mut metric_cache: Vec<MetricCache> = Vec::new();
        let mut span_cache: Vec<SpanCache> = Vec::new();
        let mut group_size = 0usize;

        match event_type {
            EventType::Log => {
                for (i, event) in group.events.iter().enumerate() {
                    let Some(e) = event.as_log() else { continue };
                    if e.is_empty() {
                        continue;
                    }
                    let content_size: usize = e
                        .contents()
                        .map(|(k, v)| log_content_size(k.len(), v.len()))
                        .sum();
                    let has_ns = enable_ns && e.timestamp_nanos.is_some();
                    let (total, body) = log_size(content_size, has_ns);
                    log_bodies[i] = body;
                    group_size += total;
                }
            }
            EventType::Metric => {
                metric_cache = group.events.iter().map(|_| MetricCache::default()).collect();
                for (i, event) in group.events.iter().enumerate() {
                    let Some(e) = event.as_metric() else { continue };
                    let value = match e.value() {
                        MetricValue::SingleValue(v) => format!("{v:.6}"),
                        MetricValue::MultiValue(_) => {
                            pipe_error!(
                                name: "SlsSerializer.UnsupportedMetricValue",
                                config = self.ctx.config_name(),
                            );
                            continue;
                        }
                    };
                    let labels_size = metric_labels_value_size(e);
                    let mut content_size = 0usize;
                    content_size +=
                        log_content_size(METRIC_RESERVED_KEY_NAME.len(), e.name().len());
                    content_size += log_content_size(METRIC_RESERVED_KEY_VALUE.len(), value.len());
                    content_size += log_content_size(
                        METRIC_RESERVED_KEY_TIME_NANO.len(),
                        time_nano_value_size(e.timestamp_nanos.is_some()),
                    );
                    content_size += log_content_size(METRIC_RESERVED_KEY_LABELS.len(), labels_size);
                    let (total, body) = log_size(content_size, false);
                    log_bodies[i] = body;
                    group_size += total;
                    metric_cache[i] = MetricCache { value, labels_size };
                }
            }
            EventType::Span => {
                span_cache = group.events.iter().map(|_| SpanCache::default()).collect();
                for (i, event) in group.events.iter().enumerate() {
                    let Some(e) = event.as_span() else { continue };
                    let cache = SpanCache {
                        attributes: span_attributes_json(e),
                        links: span_links_json(e),
                        events: span_events_json(e),
                        start: e.start_time_nanos.to_string(),
                        end: e.end_time_nanos.to_string(),
                        duration: e.duration_nanos().to_string(),
                    };
                    let mut content_size = 0usize;
                    content_size += log_content_size(TRACE_TAG_TRACE_ID.len(), e.trace_id.len());
                    content_size += log_content_size(TRACE_TAG_SPAN_ID.len(), e.span_id.len());
                    content_size +=
                        log_content_size(TRACE_TAG_PARENT_ID.len(), e.parent_span_id.len());
                    content_size += log_content_size(TRACE_TAG_SPAN_NAME.len(), e.name.len());
                    content_size +=
                        log_content_size(TRACE_TAG_SPAN_KIND.len(), e.kind.as_str().len());
                    content_size +=
                        log_content_size(TRACE_TAG_STATUS_CODE.len(), e.status.as_str().len());
                    content_size +=
                        log_content_size(TRACE_TAG_TRACE_STATE.len(), e.trace_state.len());
                    content_size +=
                        log_content_size(TRACE_TAG_ATTRIBUTES.len(), cache.attributes.len());
                    content_size += log_content_size(TRACE_TAG_LINKS.len(), cache.links.len());
                    content_size += log_content_size(TRACE_TAG_EVENTS.len(), cache.events.len());
                    content_size +=
                        log_content_size(TRACE_TAG_START_TIME_NANO.len(), cache.start.len());
                    content_size += log_content_size(TRACE_TAG_END_TIME_NANO.len(), cache.end.len());
                    content_size += log_content_size(TRACE_TAG_DURATION.len(), cache.duration.len());
                    let (total, body) = log_size(content_size, false);
                    log_bodies[i] = body;
                    group_size += total;
                    span_cache[i] = cache;
                }
            }
            EventType::Raw => {
                for (i, event) in group.events.iter().enumerate() {
                    let Event::Raw(e) = event else { continue };
                    if e.content().is_empty() {
                        continue;
                    }
                    let content_size =
                        log_content_size(DEFAULT_CONTENT_KEY.len(), e.content().len());
                    let has_ns = enable_ns && e.timestamp_nanos.is_some();
                    let (total, body) = log_size(content_size, has_ns);
                    log_bodies[i] = body;
                    group_size += total;
                }
            }
        }

        if group_size == 0 {
            return Err(SerializeError::AllEmptyEvents);
        }

        for (key, value) in group.tags.iter() {
            if key.as_str() == LOG_RESERVED_KEY_TOPIC
                || key.as_str() == LOG_RESERVED_KEY_SOURCE
                || key.as_str() == LOG_RESERVED_KEY_MACHINE_UUID
            {
                group_size += string_field_size(value.len());
            } else {
                group_size += log_tag_size(key.len(), value.len());
            }
        }

        if group_size > self.max_group_size {
            return Err(SerializeError::SizeLimitExceeded {
                size: group_size,
                limit: self.max_group_size,
            });
        }

        // Second pass: emit.
        let mut writer = LogGroupWriter::new();
        writer.prepare(group_size);
        match event_type {
            EventType::Log => {
                for (i, event) in group.events.iter().enumerate() {
                    let Some(e) = event.as_log() else { continue };
                    if log_bodies[i] == 0 {
                        continue;
                    }
                    writer.start_log(log_bodies[i]);
                    writer.add_time(e.timestamp);
                    for (key, value) in e.contents() {
                        writer.add_content(key.as_str(), value.as_str());
                    }
                    if enable_ns {
                        if let Some(nanos) = e.timestamp_nanos {
                            writer.add_time_ns(nanos);
                        }
                    }
                }
            }
            EventType::Metric => {
                for (i, event) in group.events.iter().enumerate() {
                    let Some(e) = event.as_metric() else { continue };
                    if log_bodies[i] == 0 {
                        continue;
                    }
                    writer.start_log(log_bodies[i]);
                    writer.add_time(e.timestamp);
                    writer.add_content_with(
                        METRIC_RESERVED_KEY_LABELS,
                        metric_cache[i].labels_size,
                        |buf| write_metric_labels(e, buf),
                    );
                    writer.add_content_with(
                        METRIC_RESERVED_KEY_TIME_NANO,
                        time_nano_value_size(e.timestamp_nanos.is_some()),
                        |buf| write_time_nano(e.timestamp, e.timestamp_nanos, buf),
                    );
                    writer.add_content(METRIC_RESERVED_KEY_VALUE, &metric_cache[i].value);
                    writer.add_content(METRIC_RESERVED_KEY_NAME, e.name().as_str());
                }
            }
            EventType::Span => {
                for (i, event) in group.events.iter().enumerate() {
                    let Some(e) = event.as_span() else { continue };
                    if log_bodies[i] == 0 {
                        continue;
                    }
                    let cache = &span_cache[i];
                    writer.start_log(log_bodies[i]);
                    writer.add_time(e.timestamp());
                    writer.add_content(TRACE_TAG_TRACE_ID, e.trace_id.as_str());
                    writer.add_content(TRACE_TAG_SPAN_ID, e.span_id.as_str());
                    writer.add_content(TRACE_TAG_PARENT_ID, e.parent_span_id.as_str());
                    writer.add_content(TRACE_TAG_SPAN_NAME, e.name.as_str());
                    writer.add_content(TRACE_TAG_SPAN_KIND, e.kind.as_str());
                    writer.add_content(TRACE_TAG_STATUS_CODE, e.status.as_str());
                    writer.add_content(TRACE_TAG_TRACE_STATE, e.trace_state.as_str());
                    writer.add_content(TRACE_TAG_ATTRIBUTES, &cache.attributes);
                    writer.add_content(TRACE_TAG_LINKS, &cache.links);
                    writer.add_content(TRACE_TAG_EVENTS, &cache.events);
                    writer.add_content(TRACE_TAG_START_TIME_NANO, &cache.start);
                    writer.add_content(TRACE_TAG_END_TIME_NANO, &cache.end);
                    writer.add_content(TRACE_TAG_DURATION, &cache.duration);
                }
            }
            EventType::Raw => {
                for (i, event) in group.events.iter().enumerate() {
                    let Event::Raw(e) = event else { continue };
                    if log_bodies[i] == 0 {
                        continue;
                    }
                    writer.start_log(log_bodies[i]);
                    writer.add_time(e.timestamp);
                    writer.add_content(DEFAULT_CONTENT_KEY, e.content().as_str());
                    if enable_ns {
                        if let Some(nanos) = e.timestamp_nanos {
                            writer.add_time_ns(nanos);
                        }
                    }
                }
            }
        }

        for (key, value) in group.tags.iter() {
            match key.as_str() {
                LOG_RESERVED_KEY_TOPIC => writer.add_topic(value.as_str()),
                LOG_RESERVED_KEY_SOURCE => writer.add_source(value.as_str()),
                LOG_RESERVED_KEY_MACHINE_UUID => writer.add_machine_uuid(value.as_str()),
                _ => writer.add_log_tag(key.as_str(), value.as_str()),
            }
        }

        debug_assert_eq!(writer.len(), group_size);
        Ok(writer.take())
    }
}

/// Wraps already-compressed groups into an SLS `SlsLogPackageList`.
#[derive(Debug)]
pub struct SlsEventGroupListSerializer {
    compress_type: CompressType,
    metrics: SerializerMetrics,
}

impl SlsEventGroupListSerializer {
    pub fn new(ctx: &PipelineContext, flusher_node: usize, compress_type: CompressType) -> Self {
        SlsEventGroupListSerializer {
            compress_type,
            metrics: SerializerMetrics::new(ctx, flusher_node),
        }
    }
}

impl Serializer for SlsEventGroupListSerializer {
    type Input = Vec<CompressedLogGroup>;

    fn metrics(&self) -> &SerializerMetrics {
        &self.metrics
    }

    fn do_serialize(&self, chunks: Vec<CompressedLogGroup>) -> Result<Vec<u8>, SerializeError> {
        let compress_type = match self.compress_type {
            CompressType::None => SlsCompressType::SlsCmpNone,
            CompressType::Zstd => SlsCompressType::SlsCmpZstd,
            _ => SlsCompressType::SlsCmpLz4,
        };
        let list = SlsLogPackageList {
            packages: chunks
                .into_iter()
                .map(|chunk| SlsLogPackage {
                    data: chunk.data,
                    uncompress_size: chunk.raw_size as i32,
                    compress_type: Some(compress_type as i32),
                })
                .collect(),
        };
        Ok(list.encode_to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::{
        LogEvent, RawEvent, SpanInnerEvent, SpanKind, SpanLink, SpanStatus,
    };
    use logpipe::group::LOG_RESERVED_KEY_PACKAGE_ID;
    use logpipe::{SizedMap, StringView};
    use logpipe_proto::sls::LogGroup;

    fn view(s: &str) -> StringView {
        StringView::from(s)
    }

    fn ctx(enable_ns: bool) -> PipelineContext {
        PipelineContext::builder()
            .with_config_name("test_config")
            .with_timestamp_nanosecond(enable_ns)
            .build()
    }

    fn standard_tags() -> SizedMap {
        let mut tags = SizedMap::default();
        tags.insert(view(LOG_RESERVED_KEY_TOPIC), view("topic"));
        tags.insert(view(LOG_RESERVED_KEY_SOURCE), view("source"));
        tags.insert(view(LOG_RESERVED_KEY_MACHINE_UUID), view("machine_uuid"));
        tags.insert(view(LOG_RESERVED_KEY_PACKAGE_ID), view("pack_id"));
        tags
    }

    fn batched_log_events(with_nanos: bool, empty_content: bool) -> BatchedEvents {
        let mut e = LogEvent::new(1_234_567_890);
        if with_nanos {
            e.timestamp_nanos = Some(1);
        }
        if !empty_content {
            e.add_content(view("key"), view("value"));
        }
        BatchedEvents {
            events: vec![e.into()],
            tags: standard_tags(),
            ..Default::default()
        }
    }

    fn batched_metric_events(with_nanos: bool, only_one_tag: bool) -> BatchedEvents {
        let mut e = MetricEvent::new(view("test_gauge"), 1_234_567_890, 0.1);
        if with_nanos {
            e.timestamp_nanos = Some(1);
        }
        e.set_tag(view("key1"), view("value1"));
        if !only_one_tag {
            e.set_tag(view("key2"), view("value2"));
        }
        BatchedEvents {
            events: vec![e.into()],
            tags: standard_tags(),
            ..Default::default()
        }
    }

    #[test]
    fn single_log_round_trip() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        let bytes = serializer.serialize(batched_log_events(false, false)).unwrap();

        let decoded = LogGroup::decode(bytes.as_slice()).expect("valid protobuf");
        assert_eq!(decoded.logs.len(), 1);
        assert_eq!(decoded.logs[0].time, 1_234_567_890);
        assert_eq!(decoded.logs[0].time_ns, None);
        assert_eq!(decoded.logs[0].contents.len(), 1);
        assert_eq!(decoded.logs[0].contents[0].key, "key");
        assert_eq!(decoded.logs[0].contents[0].value, "value");
        assert_eq!(decoded.topic.as_deref(), Some("topic"));
        assert_eq!(decoded.source.as_deref(), Some("source"));
        assert_eq!(decoded.machine_uuid.as_deref(), Some("machine_uuid"));
        assert_eq!(decoded.log_tags.len(), 1);
        assert_eq!(decoded.log_tags[0].key, LOG_RESERVED_KEY_PACKAGE_ID);
        assert_eq!(decoded.log_tags[0].value, "pack_id");
    }

    #[test]
    fn nanoseconds_require_config_and_event_value() {
        // Enabled and set.
        let serializer = SlsEventGroupSerializer::new(ctx(true), 0);
        let bytes = serializer.serialize(batched_log_events(true, false)).unwrap();
        let decoded = LogGroup::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.logs[0].time_ns, Some(1));

        // Enabled but not set on the event.
        let bytes = serializer.serialize(batched_log_events(false, false)).unwrap();
        let decoded = LogGroup::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.logs[0].time_ns, None);

        // Set on the event but disabled globally.
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        let bytes = serializer.serialize(batched_log_events(true, false)).unwrap();
        let decoded = LogGroup::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.logs[0].time_ns, None);
    }

    #[test]
    fn empty_groups_are_rejected() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        assert!(matches!(
            serializer.serialize(BatchedEvents::default()),
            Err(SerializeError::EmptyGroup)
        ));
        assert!(matches!(
            serializer.serialize(batched_log_events(false, true)),
            Err(SerializeError::AllEmptyEvents)
        ));
        assert_eq!(serializer.metrics().discarded_items(), 2);
    }

    #[test]
    fn metric_events_emit_fixed_content_schema() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        let bytes = serializer
            .serialize(batched_metric_events(false, true))
            .unwrap();
        let decoded = LogGroup::decode(bytes.as_slice()).unwrap();

        assert_eq!(decoded.logs.len(), 1);
        assert_eq!(decoded.logs[0].time, 1_234_567_890);
        let contents = &decoded.logs[0].contents;
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[0].key, "__labels__");
        assert_eq!(contents[0].value, "key1#$#value1");
        assert_eq!(contents[1].key, "__time_nano__");
        assert_eq!(contents[1].value, "1234567890");
        assert_eq!(contents[2].key, "__value__");
        assert_eq!(contents[2].value, "0.100000");
        assert_eq!(contents[3].key, "__name__");
        assert_eq!(contents[3].value, "test_gauge");
    }

    #[test]
    fn metric_labels_join_sorted_tags() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        let bytes = serializer
            .serialize(batched_metric_events(true, false))
            .unwrap();
        let decoded = LogGroup::decode(bytes.as_slice()).unwrap();
        let contents = &decoded.logs[0].contents;
        assert_eq!(contents[0].value, "key1#$#value1|key2#$#value2");
        // Nanoseconds ride in __time_nano__, zero padded to nine digits.
        assert_eq!(contents[1].value, "1234567890000000001");
    }

    #[test]
    fn multi_value_metrics_are_skipped() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        let mut e = MetricEvent::new(view("multi"), 1_234_567_890, 0.0);
        e.set_value(MetricValue::MultiValue(Default::default()));
        let batch = BatchedEvents {
            events: vec![e.into()],
            tags: standard_tags(),
            ..Default::default()
        };
        assert!(matches!(
            serializer.serialize(batch),
            Err(SerializeError::AllEmptyEvents)
        ));
    }

    #[test]
    fn span_events_emit_thirteen_entries() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        let mut span = SpanEvent {
            trace_id: view("trace-1-2-3"),
            span_id: view("span-1-2-3"),
            parent_span_id: view("parent-1-2-3"),
            name: view("/oneagent/qianlu/local"),
            kind: SpanKind::Client,
            status: SpanStatus::Ok,
            trace_state: view("normal"),
            start_time_nanos: 1_717_398_001_000_000_000,
            end_time_nanos: 1_717_398_007_000_000_000,
            ..Default::default()
        };
        span.set_tag(view("rpc.type"), view("http"));
        span.links.push(SpanLink {
            trace_id: view("inner-link-trace"),
            span_id: view("inner-link-span"),
            trace_state: view("inner-link-state"),
            ..Default::default()
        });
        span.events.push(SpanInnerEvent {
            name: view("inner-event"),
            timestamp_nanos: 1_000,
            ..Default::default()
        });

        let batch = BatchedEvents {
            events: vec![span.into()],
            tags: SizedMap::default(),
            ..Default::default()
        };
        let bytes = serializer.serialize(batch).unwrap();
        let decoded = LogGroup::decode(bytes.as_slice()).unwrap();

        assert_eq!(decoded.logs.len(), 1);
        assert_eq!(decoded.logs[0].time, 1_717_398_001);
        let contents = &decoded.logs[0].contents;
        let keys: Vec<&str> = contents.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "traceId",
                "spanId",
                "parentSpanId",
                "spanName",
                "kind",
                "statusCode",
                "traceState",
                "attributes",
                "links",
                "events",
                "startTime",
                "endTime",
                "duration",
            ]
        );
        assert_eq!(contents[4].value, "client");
        assert_eq!(contents[5].value, "OK");
        assert_eq!(contents[7].value, r#"{"rpc.type":"http"}"#);
        assert!(contents[8].value.contains("inner-link-trace"));
        assert!(contents[9].value.contains("inner-event"));
        assert_eq!(contents[12].value, "6000000000");
    }

    #[test]
    fn raw_events_emit_single_content() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0);
        let batch = BatchedEvents {
            events: vec![RawEvent::new(1_234_567_890, view("raw payload")).into()],
            tags: standard_tags(),
            ..Default::default()
        };
        let bytes = serializer.serialize(batch).unwrap();
        let decoded = LogGroup::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.logs[0].contents.len(), 1);
        assert_eq!(decoded.logs[0].contents[0].key, "content");
        assert_eq!(decoded.logs[0].contents[0].value, "raw payload");
    }

    #[test]
    fn oversize_groups_are_rejected_without_writing() {
        let serializer = SlsEventGroupSerializer::new(ctx(false), 0).with_max_group_size(16);
        assert!(matches!(
            serializer.serialize(batched_log_events(false, false)),
            Err(SerializeError::SizeLimitExceeded { .. })
        ));
    }

    #[test]
    fn size_prediction_matches_output_length() {
        // Boundary-day timestamps, empty tag sets, nanosecond combinations.
        for (timestamp, with_nanos, tags) in [
            (0u32, false, SizedMap::default()),
            (u32::MAX, false, standard_tags()),
            (1_234_567_890, true, standard_tags()),
            (1_717_398_001, false, SizedMap::default()),
        ] {
            let mut e = LogEvent::new(timestamp);
            if with_nanos {
                e.timestamp_nanos = Some(999_999_999);
            }
            e.add_content(view("k"), view("v"));
            e.add_content(view("another_key"), view(""));
            let batch = BatchedEvents {
                events: vec![e.into()],
                tags,
                ..Default::default()
            };
            let serializer = SlsEventGroupSerializer::new(ctx(true), 0);
            let bytes = serializer.serialize(batch).unwrap();
            // The debug assertion inside do_serialize verifies prediction ==
            // emission; decoding proves the bytes are well-formed.
            assert!(LogGroup::decode(bytes.as_slice()).is_ok());
        }
    }

    #[test]
    fn package_list_wraps_compressed_chunks() {
        let ctx = ctx(false);
        let serializer = SlsEventGroupListSerializer::new(&ctx, 0, CompressType::Zstd);
        let bytes = serializer
            .serialize(vec![
                CompressedLogGroup {
                    data: vec![1, 2, 3],
                    raw_size: 100,
                },
                CompressedLogGroup {
                    data: vec![4, 5],
                    raw_size: 50,
                },
            ])
            .unwrap();

        let decoded = SlsLogPackageList::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.packages.len(), 2);
        assert_eq!(decoded.packages[0].data, vec![1, 2, 3]);
        assert_eq!(decoded.packages[0].uncompress_size, 100);
        assert_eq!(
            decoded.packages[0].compress_type,
            Some(SlsCompressType::SlsCmpZstd as i32)
        );
        assert_eq!(decoded.packages[1].uncompress_size, 50);
    }
}

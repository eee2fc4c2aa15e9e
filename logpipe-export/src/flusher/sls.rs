//! The SLS flusher: batches per tag hash (minute aligned), serializes to the
//! SLS log group format, compresses, and ships through the shared sender
//! queue machinery with project/region/logstore limiters.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::Method;
use logpipe::alarm::{Alarm, AlarmCategory};
use logpipe::config::{
    get_optional_int_param, get_optional_string_list_param, get_optional_string_param,
    get_optional_uint_param, get_mandatory_string_param, init_error, param_warning_default,
    param_warning_ignore, InitError,
};
use logpipe::{pipe_debug, pipe_warn, EventGroup, PipelineContext, StringView};
use logpipe_pipeline::batch::{
    Batcher, DefaultFlushStrategyOptions, SlsEventBatchStatus,
};
use logpipe_pipeline::error::FlushResult;
use logpipe_pipeline::flusher::{Flusher, HttpFlusher};
use logpipe_pipeline::queue::{
    RateLimiter, RawDataType, SenderQueue, SenderQueueItem,
};
use logpipe_pipeline::{FlushError, HttpRequest, HttpResponse};
use serde_json::Value;

use crate::compression::{CompressType, CompressorFactory, Compressor};
use crate::runtime::AgentRuntime;
use crate::serializer::{
    CompressedLogGroup, SlsEventGroupListSerializer, SlsEventGroupSerializer, Serializer,
};

const DEFAULT_SEND_INTERVAL_SECS: u32 = 3;
const BATCH_MIN_SIZE_BYTES: u32 = 256 * 1024;
const BATCH_MIN_CNT: u32 = 4000;
const BATCH_MAX_SIZE_BYTES: u32 = 10 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlsTelemetryType {
    #[default]
    Logs,
    Metrics,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlsMergeType {
    #[default]
    Topic,
    Logstore,
}

#[derive(Clone, Debug)]
struct SlsOptions {
    project: String,
    logstore: String,
    region: String,
    endpoint_host: String,
    use_https: bool,
    aliuid: String,
    telemetry_type: SlsTelemetryType,
    flow_control_expire_time: u32,
    max_send_rate: i64,
    merge_type: SlsMergeType,
    send_interval_secs: u32,
    shard_hash_keys: Vec<String>,
}

fn parse_options(config: &Value, ctx: &PipelineContext) -> Result<SlsOptions, InitError> {
    const NAME: &str = FlusherSls::NAME;

    let project = get_mandatory_string_param(config, "Project")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let logstore = get_mandatory_string_param(config, "Logstore")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let endpoint = get_mandatory_string_param(config, "Endpoint")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let endpoint = endpoint.trim();
    let (use_https, endpoint_host) = match endpoint.split_once("://") {
        Some(("https", host)) => (true, host.to_owned()),
        Some(("http", host)) => (false, host.to_owned()),
        Some(_) => return Err(init_error(ctx, NAME, "param Endpoint is not valid")),
        None => (true, endpoint.to_owned()),
    };

    let region = match get_optional_string_param(config, "Region") {
        Ok(Some(v)) => v,
        Ok(None) => ctx.region().to_owned(),
        Err(err) => {
            param_warning_default(ctx, NAME, err, ctx.region());
            ctx.region().to_owned()
        }
    };

    let aliuid = match get_optional_string_param(config, "Aliuid") {
        Ok(v) => v.unwrap_or_default(),
        Err(err) => {
            param_warning_ignore(ctx, NAME, err);
            String::new()
        }
    };

    let telemetry_type = match get_optional_string_param(config, "TelemetryType") {
        Ok(None) => SlsTelemetryType::Logs,
        Ok(Some(v)) if v == "logs" => SlsTelemetryType::Logs,
        Ok(Some(v)) if v == "metrics" => SlsTelemetryType::Metrics,
        Ok(Some(_)) => {
            param_warning_default(ctx, NAME, "param TelemetryType is not valid", "logs");
            SlsTelemetryType::Logs
        }
        Err(err) => {
            param_warning_default(ctx, NAME, err, "logs");
            SlsTelemetryType::Logs
        }
    };

    let flow_control_expire_time = match get_optional_uint_param(config, "FlowControlExpireTime") {
        Ok(v) => v.unwrap_or(0),
        Err(err) => {
            param_warning_default(ctx, NAME, err, 0);
            0
        }
    };

    let max_send_rate = match get_optional_int_param(config, "MaxSendRate") {
        Ok(v) => v.unwrap_or(-1),
        Err(err) => {
            param_warning_default(ctx, NAME, err, -1);
            -1
        }
    };

    let mut merge_type = SlsMergeType::Topic;
    let mut send_interval_secs = DEFAULT_SEND_INTERVAL_SECS;
    let mut shard_hash_keys = Vec::new();
    if let Some(batch) = config.get("Batch") {
        if !batch.is_object() {
            param_warning_ignore(ctx, NAME, "param Batch is not of type object");
        } else {
            match get_optional_string_param(batch, "Batch.MergeType") {
                Ok(None) => {}
                Ok(Some(v)) if v == "logstore" => merge_type = SlsMergeType::Logstore,
                Ok(Some(v)) if v == "topic" => {}
                Ok(Some(_)) => param_warning_default(
                    ctx,
                    NAME,
                    "param Batch.MergeType is not valid",
                    "topic",
                ),
                Err(err) => param_warning_default(ctx, NAME, err, "topic"),
            }
            match get_optional_uint_param(batch, "Batch.SendIntervalSecs") {
                Ok(Some(v)) => send_interval_secs = v,
                Ok(None) => {}
                Err(err) => param_warning_default(ctx, NAME, err, DEFAULT_SEND_INTERVAL_SECS),
            }
            match get_optional_string_list_param(batch, "Batch.ShardHashKeys") {
                Ok(Some(v)) => shard_hash_keys = v,
                Ok(None) => {}
                Err(err) => param_warning_ignore(ctx, NAME, err),
            }
        }
    }

    Ok(SlsOptions {
        project,
        logstore,
        region,
        endpoint_host,
        use_https,
        aliuid,
        telemetry_type,
        flow_control_expire_time,
        max_send_rate,
        merge_type,
        send_interval_secs,
        shard_hash_keys,
    })
}

/// Ships log groups to an SLS endpoint.
pub struct FlusherSls {
    ctx: PipelineContext,
    node_id: usize,
    weak_self: Weak<FlusherSls>,
    options: SlsOptions,
    compress_type: CompressType,
    compressor: Option<Compressor>,
    batcher: Batcher<SlsEventBatchStatus>,
    group_serializer: SlsEventGroupSerializer,
    list_serializer: SlsEventGroupListSerializer,
    queue: Arc<SenderQueue>,
    pack_id_seq: AtomicU64,
}

impl FlusherSls {
    pub const NAME: &'static str = "flusher_sls";

    pub fn new(
        config: &Value,
        ctx: PipelineContext,
        node_id: usize,
        runtime: &AgentRuntime,
    ) -> Result<Arc<Self>, InitError> {
        let options = parse_options(config, &ctx)?;

        let compressor =
            CompressorFactory::create(config, &ctx, Self::NAME, node_id, CompressType::Lz4);
        let compress_type = compressor
            .as_ref()
            .map(|c| c.compress_type())
            .unwrap_or(CompressType::None);

        let queue_name = format!("{}#{}", options.project, options.logstore);
        let queue_key = runtime.queue_keys().get_key(&queue_name);
        let mut queue = SenderQueue::new(queue_key, queue_name.clone(), &ctx);
        queue.add_concurrency_limiter(runtime.limiters().get_region_limiter(&options.region));
        queue.add_concurrency_limiter(runtime.limiters().get_project_limiter(&options.project));
        queue.add_concurrency_limiter(runtime.limiters().get_logstore_limiter(&queue_name));
        if options.max_send_rate > 0 {
            queue.set_rate_limiter(RateLimiter::new(options.max_send_rate as u32));
        }
        let queue = Arc::new(queue);
        runtime.runner().register_queue(queue.clone());

        let strategy = DefaultFlushStrategyOptions {
            max_size_bytes: BATCH_MAX_SIZE_BYTES,
            min_size_bytes: BATCH_MIN_SIZE_BYTES,
            min_cnt: BATCH_MIN_CNT,
            timeout_secs: options.send_interval_secs,
        };
        // Merging across groups only makes sense when batches are not keyed
        // by topic.
        let enable_group_batch = options.merge_type == SlsMergeType::Logstore;

        let batch_config = config.get("Batch").cloned().unwrap_or(Value::Null);
        let timeout_manager = runtime.timeout_manager().clone();

        Ok(Arc::new_cyclic(|weak: &Weak<FlusherSls>| {
            let flusher_weak: Weak<dyn Flusher> = weak.clone();
            let batcher = Batcher::init(
                &batch_config,
                &ctx,
                Self::NAME,
                node_id,
                flusher_weak,
                strategy,
                enable_group_batch,
                timeout_manager,
            );
            FlusherSls {
                group_serializer: SlsEventGroupSerializer::new(ctx.clone(), node_id),
                list_serializer: SlsEventGroupListSerializer::new(&ctx, node_id, compress_type),
                ctx,
                node_id,
                weak_self: weak.clone(),
                options,
                compress_type,
                compressor,
                batcher,
                queue,
                pack_id_seq: AtomicU64::new(0),
            }
        }))
    }

    pub fn project(&self) -> &str {
        &self.options.project
    }

    pub fn logstore(&self) -> &str {
        &self.options.logstore
    }

    pub fn telemetry_type(&self) -> SlsTelemetryType {
        self.options.telemetry_type
    }

    pub fn merge_type(&self) -> SlsMergeType {
        self.options.merge_type
    }

    pub fn shard_hash_keys(&self) -> &[String] {
        &self.options.shard_hash_keys
    }

    pub fn flow_control_expire_time(&self) -> u32 {
        self.options.flow_control_expire_time
    }

    pub fn aliuid(&self) -> &str {
        &self.options.aliuid
    }

    fn next_pack_id(&self, prefix: &StringView) -> String {
        let mut hasher = DefaultHasher::new();
        prefix.as_bytes().hash(&mut hasher);
        let seq = self.pack_id_seq.fetch_add(1, Ordering::Relaxed);
        format!("{:X}-{:X}", hasher.finish(), seq)
    }

    fn discard_alarm(&self, message: String) {
        self.ctx.alarm().send_alarm(Alarm {
            category: AlarmCategory::Discard,
            message,
            project: self.options.project.clone(),
            logstore: self.options.logstore.clone(),
            region: self.options.region.clone(),
            module: Self::NAME.to_owned(),
            config_name: self.ctx.config_name().to_owned(),
        });
    }

    fn serialize_and_push_lists(
        &self,
        lists: Vec<logpipe_pipeline::batch::BatchedEventsList>,
    ) -> FlushResult {
        for list in lists {
            self.serialize_and_push(list)?;
        }
        Ok(())
    }

    fn serialize_and_push(
        &self,
        mut list: logpipe_pipeline::batch::BatchedEventsList,
    ) -> FlushResult {
        match list.len() {
            0 => Ok(()),
            1 => {
                let batch = list.remove(0);
                self.push_group(batch)
            }
            _ => self.push_group_list(list),
        }
    }

    fn push_group(&self, mut batch: logpipe_pipeline::batch::BatchedEvents) -> FlushResult {
        let checkpoint = batch.exactly_once_checkpoint.clone();
        if !batch.pack_id_prefix.is_empty() {
            let pack_id = self.next_pack_id(&batch.pack_id_prefix);
            batch.tags.insert(
                StringView::from_static(logpipe::group::LOG_RESERVED_KEY_PACKAGE_ID),
                StringView::from(pack_id),
            );
        }

        let serialized = match self.group_serializer.serialize(batch) {
            Ok(data) => data,
            Err(err) => {
                self.discard_alarm(format!("failed to serialize event group: {err}"));
                return Ok(());
            }
        };
        let raw_size = serialized.len();
        let data = match &self.compressor {
            Some(compressor) => match compressor.compress(&serialized) {
                Ok(data) => data,
                Err(err) => {
                    self.discard_alarm(format!("failed to compress event group: {err}"));
                    return Ok(());
                }
            },
            None => serialized,
        };

        let flusher: Weak<dyn HttpFlusher> = self.weak_self.clone();
        let item = SenderQueueItem::new(
            Bytes::from(data),
            raw_size,
            flusher,
            self.queue.key(),
            RawDataType::EventGroup,
        )
        .with_checkpoint(checkpoint);
        if !self.queue.push(item) {
            self.discard_alarm("sender queue overflow, item discarded".to_owned());
        }
        Ok(())
    }

    fn push_group_list(
        &self,
        list: logpipe_pipeline::batch::BatchedEventsList,
    ) -> FlushResult {
        let mut chunks = Vec::with_capacity(list.len());
        let mut total_raw_size = 0usize;
        for mut batch in list {
            if !batch.pack_id_prefix.is_empty() {
                let pack_id = self.next_pack_id(&batch.pack_id_prefix);
                batch.tags.insert(
                    StringView::from_static(logpipe::group::LOG_RESERVED_KEY_PACKAGE_ID),
                    StringView::from(pack_id),
                );
            }
            let serialized = match self.group_serializer.serialize(batch) {
                Ok(data) => data,
                Err(err) => {
                    self.discard_alarm(format!("failed to serialize event group: {err}"));
                    continue;
                }
            };
            let raw_size = serialized.len();
            let data = match &self.compressor {
                Some(compressor) => match compressor.compress(&serialized) {
                    Ok(data) => data,
                    Err(err) => {
                        self.discard_alarm(format!("failed to compress event group: {err}"));
                        continue;
                    }
                },
                None => serialized,
            };
            total_raw_size += raw_size;
            chunks.push(CompressedLogGroup { data, raw_size });
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let data = match self.list_serializer.serialize(chunks) {
            Ok(data) => data,
            Err(err) => {
                self.discard_alarm(format!("failed to serialize package list: {err}"));
                return Ok(());
            }
        };
        let flusher: Weak<dyn HttpFlusher> = self.weak_self.clone();
        let item = SenderQueueItem::new(
            Bytes::from(data),
            total_raw_size,
            flusher,
            self.queue.key(),
            RawDataType::EventGroupList,
        );
        if !self.queue.push(item) {
            self.discard_alarm("sender queue overflow, item discarded".to_owned());
        }
        Ok(())
    }
}

impl Flusher for FlusherSls {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    fn node_id(&self) -> usize {
        self.node_id
    }

    fn send(&self, group: EventGroup) -> FlushResult {
        let mut lists = Vec::new();
        self.batcher.add(group, &mut lists);
        self.serialize_and_push_lists(lists)
    }

    fn flush(&self, key: u64) -> FlushResult {
        let mut list = Vec::new();
        self.batcher.flush_queue(key, &mut list);
        self.serialize_and_push(list)
    }

    fn flush_all(&self) -> FlushResult {
        let mut lists = Vec::new();
        self.batcher.flush_all(&mut lists);
        self.serialize_and_push_lists(lists)
    }

    fn sender_queue(&self) -> Option<Arc<SenderQueue>> {
        Some(self.queue.clone())
    }
}

impl HttpFlusher for FlusherSls {
    fn build_request(&self, item: &Arc<SenderQueueItem>) -> Result<HttpRequest, FlushError> {
        let mut request = HttpRequest::new(Method::POST, self.options.endpoint_host.clone());
        request.use_https = self.options.use_https;
        request.port = if self.options.use_https { 443 } else { 80 };
        request.path = format!("/logstores/{}/shards/lb", self.options.logstore);
        request.headers = vec![
            ("Host".to_owned(), self.options.endpoint_host.clone()),
            ("Content-Type".to_owned(), "application/x-protobuf".to_owned()),
            ("x-log-apiversion".to_owned(), "0.6.0".to_owned()),
            ("x-log-signaturemethod".to_owned(), "hmac-sha1".to_owned()),
            ("x-log-bodyrawsize".to_owned(), item.raw_size.to_string()),
        ];
        if self.compress_type != CompressType::None {
            request.headers.push((
                "x-log-compresstype".to_owned(),
                self.compress_type.as_str().to_owned(),
            ));
        }
        if item.data_type == RawDataType::EventGroupList {
            request
                .headers
                .push(("x-log-mode".to_owned(), "batch_group".to_owned()));
        }
        request.body = item.data.clone();
        Ok(request)
    }

    fn on_send_done(&self, response: &HttpResponse, item: &Arc<SenderQueueItem>) {
        let status = response.status_code;
        if (200..300).contains(&status) {
            if let Some(checkpoint) = &item.exactly_once_checkpoint {
                checkpoint.confirm();
            }
            self.queue.remove(item);
            pipe_debug!(
                name: "FlusherSls.SendSucceeded",
                project = self.options.project.as_str(),
                logstore = self.options.logstore.as_str(),
            );
        } else if (400..500).contains(&status) && status != 429 {
            // Client errors never heal on retry; drop and release the range
            // for re-read.
            if let Some(checkpoint) = &item.exactly_once_checkpoint {
                checkpoint.release();
            }
            self.queue.remove(item);
            self.discard_alarm(format!("data rejected by server, status: {status}"));
        } else {
            // Transport exhaustion (0), throttling and server errors are
            // retried from the queue.
            if let Some(checkpoint) = &item.exactly_once_checkpoint {
                checkpoint.release();
            }
            self.queue.set_idle(item);
            pipe_warn!(
                name: "FlusherSls.SendFailedWillRetry",
                status = status,
                project = self.options.project.as_str(),
            );
        }
    }
}

impl fmt::Debug for FlusherSls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlusherSls")
            .field("project", &self.options.project)
            .field("logstore", &self.options.logstore)
            .field("region", &self.options.region)
            .field("compress_type", &self.compress_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::LogEvent;
    use logpipe_proto::sls::LogGroup;
    use prost::Message;
    use serde_json::json;

    fn ctx() -> PipelineContext {
        PipelineContext::builder()
            .with_config_name("test_config")
            .with_project("demo-project")
            .build()
    }

    fn sls_config() -> Value {
        json!({
            "Project": "demo-project",
            "Logstore": "demo-logstore",
            "Region": "cn-test",
            "Endpoint": "cn-test.log.example.com",
            "CompressType": "lz4",
        })
    }

    #[test]
    fn init_requires_mandatory_params() {
        let runtime = AgentRuntime::new();
        assert!(FlusherSls::new(&json!({}), ctx(), 0, &runtime).is_err());
        assert!(FlusherSls::new(
            &json!({"Project": "p", "Logstore": "l"}),
            ctx(),
            0,
            &runtime
        )
        .is_err());
        let flusher = FlusherSls::new(&sls_config(), ctx(), 0, &runtime).unwrap();
        assert_eq!(flusher.project(), "demo-project");
        assert_eq!(flusher.logstore(), "demo-logstore");
        assert_eq!(flusher.merge_type(), SlsMergeType::Topic);
        runtime.stop();
    }

    #[test]
    fn batch_options_are_parsed() {
        let runtime = AgentRuntime::new();
        let config = json!({
            "Project": "p",
            "Logstore": "l",
            "Endpoint": "e.example.com",
            "TelemetryType": "metrics",
            "MaxSendRate": 1024,
            "Batch": {"MergeType": "logstore", "SendIntervalSecs": 6, "ShardHashKeys": ["__source__"]},
        });
        let flusher = FlusherSls::new(&config, ctx(), 0, &runtime).unwrap();
        assert_eq!(flusher.telemetry_type(), SlsTelemetryType::Metrics);
        assert_eq!(flusher.merge_type(), SlsMergeType::Logstore);
        assert_eq!(flusher.shard_hash_keys(), ["__source__"]);
        // Group batching halves the event timeout.
        assert_eq!(flusher.batcher.event_strategy().timeout_secs(), 3);
        runtime.stop();
    }

    #[test]
    fn flush_all_pushes_compressed_batches() {
        let runtime = AgentRuntime::new();
        let flusher = FlusherSls::new(&sls_config(), ctx(), 0, &runtime).unwrap();

        let mut group = EventGroup::default();
        group.set_metadata(
            logpipe::EventGroupMetaKey::SourceId,
            StringView::from("test-source"),
        );
        let mut e = LogEvent::new(1_234_567_890);
        e.add_content(group.copy_string("key"), group.copy_string("value"));
        group.push_event(e);

        flusher.send(group).unwrap();
        flusher.flush_all().unwrap();

        let queue = flusher.sender_queue().unwrap();
        let mut items = Vec::new();
        queue.get_all_available(&mut items, false);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.data_type, RawDataType::EventGroup);
        assert!(item.raw_size > 0);

        // The payload is LZ4-block compressed SLS protobuf carrying a pack id.
        let decompressed =
            lz4_flex::block::decompress(&item.data, item.raw_size).expect("lz4 payload");
        let decoded = LogGroup::decode(decompressed.as_slice()).expect("sls protobuf");
        assert_eq!(decoded.logs.len(), 1);
        assert_eq!(decoded.log_tags.len(), 1);
        assert_eq!(decoded.log_tags[0].key, "__pack_id__");
        assert!(decoded.log_tags[0].value.contains('-'));
        runtime.stop();
    }

    #[test]
    fn build_request_carries_sls_headers() {
        let runtime = AgentRuntime::new();
        let flusher = FlusherSls::new(&sls_config(), ctx(), 0, &runtime).unwrap();
        let flusher_dyn: Arc<dyn HttpFlusher> = flusher.clone();
        let weak: Weak<dyn HttpFlusher> = Arc::downgrade(&flusher_dyn);
        let item = Arc::new(SenderQueueItem::new(
            Bytes::from_static(b"payload"),
            7,
            weak,
            flusher.queue.key(),
            RawDataType::EventGroup,
        ));
        let request = flusher.build_request(&item).unwrap();
        assert_eq!(request.method, Method::POST);
        assert!(request.use_https);
        assert_eq!(request.path, "/logstores/demo-logstore/shards/lb");
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "x-log-compresstype" && v == "lz4"));
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "x-log-bodyrawsize" && v == "7"));
        runtime.stop();
    }

    #[test]
    fn send_done_confirms_checkpoint_and_frees_slot() {
        let runtime = AgentRuntime::new();
        let flusher = FlusherSls::new(&sls_config(), ctx(), 0, &runtime).unwrap();

        let checkpoint = Arc::new(logpipe::RangeCheckpoint::new());
        checkpoint.set_range(100, 50);
        let flusher_dyn: Arc<dyn HttpFlusher> = flusher.clone();
        let weak: Weak<dyn HttpFlusher> = Arc::downgrade(&flusher_dyn);
        let item = SenderQueueItem::new(
            Bytes::from_static(b"payload"),
            7,
            weak,
            flusher.queue.key(),
            RawDataType::EventGroup,
        )
        .with_checkpoint(Some(checkpoint.clone()));
        assert!(flusher.queue.push(item));

        let mut items = Vec::new();
        flusher.queue.get_all_available(&mut items, false);
        assert_eq!(items.len(), 1);

        let ok = HttpResponse {
            status_code: 200,
            ..Default::default()
        };
        flusher.on_send_done(&ok, &items[0]);
        assert!(checkpoint.is_committed());
        assert!(flusher.queue.is_empty());
        runtime.stop();
    }

    #[test]
    fn server_errors_requeue_the_item() {
        let runtime = AgentRuntime::new();
        let flusher = FlusherSls::new(&sls_config(), ctx(), 0, &runtime).unwrap();

        let flusher_dyn: Arc<dyn HttpFlusher> = flusher.clone();
        let weak: Weak<dyn HttpFlusher> = Arc::downgrade(&flusher_dyn);
        let item = SenderQueueItem::new(
            Bytes::from_static(b"payload"),
            7,
            weak,
            flusher.queue.key(),
            RawDataType::EventGroup,
        );
        assert!(flusher.queue.push(item));
        let mut items = Vec::new();
        flusher.queue.get_all_available(&mut items, false);

        let unavailable = HttpResponse {
            status_code: 503,
            ..Default::default()
        };
        flusher.on_send_done(&unavailable, &items[0]);
        // Back to idle: poppable again.
        let mut again = Vec::new();
        flusher.queue.get_all_available(&mut again, false);
        assert_eq!(again.len(), 1);

        let rejected = HttpResponse {
            status_code: 400,
            ..Default::default()
        };
        flusher.on_send_done(&rejected, &again[0]);
        assert!(flusher.queue.is_empty());
        assert!(flusher.ctx.alarm().len() > 0);
        runtime.stop();
    }
}

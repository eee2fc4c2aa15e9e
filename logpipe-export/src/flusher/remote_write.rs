//! Prometheus RemoteWrite flusher.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::Method;
use logpipe::alarm::{Alarm, AlarmCategory};
use logpipe::config::{get_mandatory_string_param, init_error, InitError};
use logpipe::{pipe_warn, EventGroup, PipelineContext};
use logpipe_pipeline::batch::{Batcher, DefaultFlushStrategyOptions, EventBatchStatus};
use logpipe_pipeline::error::FlushResult;
use logpipe_pipeline::flusher::{Flusher, HttpFlusher};
use logpipe_pipeline::queue::{RawDataType, SenderQueue, SenderQueueItem};
use logpipe_pipeline::{FlushError, HttpRequest, HttpResponse};
use serde_json::Value;

use crate::compression::{CompressType, CompressorFactory, Compressor};
use crate::runtime::AgentRuntime;
use crate::serializer::{RemoteWriteEventGroupSerializer, Serializer};

const BATCH_MAX_SIZE_BYTES: u32 = 1024 * 1024;
const BATCH_MIN_SIZE_BYTES: u32 = 5000;
const BATCH_MIN_CNT: u32 = 1000;
const BATCH_TIMEOUT_SECS: u32 = 3;

#[derive(Clone, Debug)]
struct RemoteWriteOptions {
    endpoint: String,
    use_https: bool,
    user_id: String,
    cluster_id: String,
    region: String,
    path: String,
}

fn parse_options(config: &Value, ctx: &PipelineContext) -> Result<RemoteWriteOptions, InitError> {
    const NAME: &str = FlusherRemoteWrite::NAME;

    let endpoint = get_mandatory_string_param(config, "Endpoint")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let scheme = get_mandatory_string_param(config, "Scheme")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let user_id = get_mandatory_string_param(config, "UserId")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let cluster_id = get_mandatory_string_param(config, "ClusterId")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let region = get_mandatory_string_param(config, "Region")
        .map_err(|err| init_error(ctx, NAME, err))?;
    let use_https = match scheme.as_str() {
        "https" => true,
        "http" => false,
        _ => return Err(init_error(ctx, NAME, "param Scheme is not valid")),
    };
    let path = format!("/prometheus/{user_id}/{cluster_id}/{region}/api/v2/write");
    Ok(RemoteWriteOptions {
        endpoint,
        use_https,
        user_id,
        cluster_id,
        region,
        path,
    })
}

/// Ships metric samples as Snappy-compressed RemoteWrite v0.1.0 requests.
pub struct FlusherRemoteWrite {
    ctx: PipelineContext,
    node_id: usize,
    weak_self: Weak<FlusherRemoteWrite>,
    options: RemoteWriteOptions,
    compressor: Compressor,
    batcher: Batcher<EventBatchStatus>,
    serializer: RemoteWriteEventGroupSerializer,
    queue: Arc<SenderQueue>,
}

impl FlusherRemoteWrite {
    pub const NAME: &'static str = "flusher_remote_write";

    pub fn new(
        config: &Value,
        ctx: PipelineContext,
        node_id: usize,
        runtime: &AgentRuntime,
    ) -> Result<Arc<Self>, InitError> {
        let options = parse_options(config, &ctx)?;

        // RemoteWrite is always Snappy; the content encoding is part of the
        // protocol, not a tunable.
        let compressor = CompressorFactory::create_raw(CompressType::Snappy)
            .ok_or_else(|| init_error(&ctx, Self::NAME, "failed to create snappy compressor"))?;

        let queue_name = format!("{}#{}", options.cluster_id, options.region);
        let queue_key = runtime.queue_keys().get_key(&queue_name);
        let mut queue = SenderQueue::new(queue_key, queue_name, &ctx);
        queue.add_concurrency_limiter(runtime.limiters().get_region_limiter(&options.region));
        let queue = Arc::new(queue);
        runtime.runner().register_queue(queue.clone());

        let strategy = DefaultFlushStrategyOptions {
            max_size_bytes: BATCH_MAX_SIZE_BYTES,
            min_size_bytes: BATCH_MIN_SIZE_BYTES,
            min_cnt: BATCH_MIN_CNT,
            timeout_secs: BATCH_TIMEOUT_SECS,
        };
        let timeout_manager = runtime.timeout_manager().clone();

        Ok(Arc::new_cyclic(|weak: &Weak<FlusherRemoteWrite>| {
            let flusher_weak: Weak<dyn Flusher> = weak.clone();
            let batcher = Batcher::init(
                &Value::Null,
                &ctx,
                Self::NAME,
                node_id,
                flusher_weak,
                strategy,
                false,
                timeout_manager,
            );
            FlusherRemoteWrite {
                serializer: RemoteWriteEventGroupSerializer::new(&ctx, node_id),
                ctx,
                node_id,
                weak_self: weak.clone(),
                options,
                compressor,
                batcher,
                queue,
            }
        }))
    }

    pub fn remote_write_path(&self) -> &str {
        &self.options.path
    }

    pub fn user_id(&self) -> &str {
        &self.options.user_id
    }

    fn serialize_and_push(
        &self,
        lists: Vec<logpipe_pipeline::batch::BatchedEventsList>,
    ) -> FlushResult {
        for list in lists {
            for batch in list {
                let serialized = match self.serializer.serialize(batch) {
                    Ok(data) => data,
                    Err(err) => {
                        pipe_warn!(
                            name: "FlusherRemoteWrite.SerializeFailed",
                            error = err.to_string(),
                        );
                        continue;
                    }
                };
                let raw_size = serialized.len();
                let data = match self.compressor.compress(&serialized) {
                    Ok(data) => data,
                    Err(err) => {
                        self.ctx.alarm().send_alarm(Alarm {
                            category: AlarmCategory::Compress,
                            message: err.to_string(),
                            project: String::new(),
                            logstore: String::new(),
                            region: self.options.region.clone(),
                            module: Self::NAME.to_owned(),
                            config_name: self.ctx.config_name().to_owned(),
                        });
                        continue;
                    }
                };
                let flusher: Weak<dyn HttpFlusher> = self.weak_self.clone();
                let item = SenderQueueItem::new(
                    Bytes::from(data),
                    raw_size,
                    flusher,
                    self.queue.key(),
                    RawDataType::EventGroup,
                );
                if !self.queue.push(item) {
                    pipe_warn!(name: "FlusherRemoteWrite.QueueOverflow");
                }
            }
        }
        Ok(())
    }
}

impl Flusher for FlusherRemoteWrite {
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
        self.serialize_and_push(lists)
    }

    fn flush(&self, key: u64) -> FlushResult {
        let mut list = Vec::new();
        self.batcher.flush_queue(key, &mut list);
        self.serialize_and_push(vec![list])
    }

    fn flush_all(&self) -> FlushResult {
        let mut lists = Vec::new();
        self.batcher.flush_all(&mut lists);
        self.serialize_and_push(lists)
    }

    fn sender_queue(&self) -> Option<Arc<SenderQueue>> {
        Some(self.queue.clone())
    }
}

impl HttpFlusher for FlusherRemoteWrite {
    fn build_request(&self, item: &Arc<SenderQueueItem>) -> Result<HttpRequest, FlushError> {
        let mut request = HttpRequest::new(Method::POST, self.options.endpoint.clone());
        request.use_https = self.options.use_https;
        request.port = if self.options.use_https { 443 } else { 80 };
        request.path = self.options.path.clone();
        request.headers = vec![
            ("Content-Encoding".to_owned(), "snappy".to_owned()),
            ("Content-Type".to_owned(), "application/x-protobuf".to_owned()),
            (
                "User-Agent".to_owned(),
                concat!("logpipe/", env!("CARGO_PKG_VERSION")).to_owned(),
            ),
            (
                "X-Prometheus-Remote-Write-Version".to_owned(),
                "0.1.0".to_owned(),
            ),
        ];
        request.body = item.data.clone();
        Ok(request)
    }

    fn on_send_done(&self, response: &HttpResponse, item: &Arc<SenderQueueItem>) {
        if response.is_ok() {
            self.queue.remove(item);
        } else if (400..500).contains(&response.status_code) && response.status_code != 429 {
            self.queue.remove(item);
            pipe_warn!(
                name: "FlusherRemoteWrite.DataRejected",
                status = response.status_code,
            );
        } else {
            self.queue.set_idle(item);
        }
    }
}

impl fmt::Debug for FlusherRemoteWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlusherRemoteWrite")
            .field("endpoint", &self.options.endpoint)
            .field("path", &self.options.path)
            .finish()
    }
}

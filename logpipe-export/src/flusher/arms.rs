//! Arms span flusher: Snappy-compressed span batches with license headers.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::Method;
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
use crate::serializer::{ArmsResource, ArmsSpanEventGroupListSerializer, Serializer};

const BATCH_MAX_SIZE_BYTES: u32 = 4 * 1024 * 1024;
const BATCH_MIN_SIZE_BYTES: u32 = 512 * 1024;
const BATCH_MIN_CNT: u32 = 1024;
const BATCH_TIMEOUT_SECS: u32 = 2;

/// Ships trace spans to an Arms endpoint.
pub struct FlusherArmsSpan {
    ctx: PipelineContext,
    node_id: usize,
    weak_self: Weak<FlusherArmsSpan>,
    endpoint: String,
    license_key: String,
    compressor: Compressor,
    batcher: Batcher<EventBatchStatus>,
    serializer: ArmsSpanEventGroupListSerializer,
    queue: Arc<SenderQueue>,
}

impl FlusherArmsSpan {
    pub const NAME: &'static str = "flusher_arms_span";

    pub fn new(
        config: &Value,
        ctx: PipelineContext,
        node_id: usize,
        runtime: &AgentRuntime,
    ) -> Result<Arc<Self>, InitError> {
        let endpoint = get_mandatory_string_param(config, "Endpoint")
            .map_err(|err| init_error(&ctx, Self::NAME, err))?;
        let license_key = get_mandatory_string_param(config, "LicenseKey")
            .map_err(|err| init_error(&ctx, Self::NAME, err))?;
        let app_id = get_mandatory_string_param(config, "AppId")
            .map_err(|err| init_error(&ctx, Self::NAME, err))?;

        let compressor = CompressorFactory::create_raw(CompressType::Snappy)
            .ok_or_else(|| init_error(&ctx, Self::NAME, "failed to create snappy compressor"))?;

        let queue_key = runtime.queue_keys().get_key(&endpoint);
        let queue = Arc::new(SenderQueue::new(queue_key, endpoint.clone(), &ctx));
        runtime.runner().register_queue(queue.clone());

        let resource = ArmsResource {
            app_id,
            cluster_id: ctx.region().to_owned(),
            host_name: std::env::var("HOSTNAME").unwrap_or_default(),
            ip: String::new(),
        };

        let strategy = DefaultFlushStrategyOptions {
            max_size_bytes: BATCH_MAX_SIZE_BYTES,
            min_size_bytes: BATCH_MIN_SIZE_BYTES,
            min_cnt: BATCH_MIN_CNT,
            timeout_secs: BATCH_TIMEOUT_SECS,
        };
        let timeout_manager = runtime.timeout_manager().clone();

        Ok(Arc::new_cyclic(|weak: &Weak<FlusherArmsSpan>| {
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
            FlusherArmsSpan {
                serializer: ArmsSpanEventGroupListSerializer::new(&ctx, node_id, resource),
                ctx,
                node_id,
                weak_self: weak.clone(),
                endpoint,
                license_key,
                compressor,
                batcher,
                queue,
            }
        }))
    }

    fn serialize_and_push(
        &self,
        lists: Vec<logpipe_pipeline::batch::BatchedEventsList>,
    ) -> FlushResult {
        for list in lists {
            if list.is_empty() {
                continue;
            }
            let serialized = match self.serializer.serialize(list) {
                Ok(data) => data,
                Err(err) => {
                    pipe_warn!(
                        name: "FlusherArmsSpan.SerializeFailed",
                        error = err.to_string(),
                    );
                    continue;
                }
            };
            let raw_size = serialized.len();
            let data = match self.compressor.compress(&serialized) {
                Ok(data) => data,
                Err(err) => {
                    pipe_warn!(
                        name: "FlusherArmsSpan.CompressFailed",
                        error = err.to_string(),
                    );
                    continue;
                }
            };
            let flusher: Weak<dyn HttpFlusher> = self.weak_self.clone();
            let item = SenderQueueItem::new(
                Bytes::from(data),
                raw_size,
                flusher,
                self.queue.key(),
                RawDataType::EventGroupList,
            );
            if !self.queue.push(item) {
                pipe_warn!(name: "FlusherArmsSpan.QueueOverflow");
            }
        }
        Ok(())
    }
}

impl Flusher for FlusherArmsSpan {
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

impl HttpFlusher for FlusherArmsSpan {
    fn build_request(&self, item: &Arc<SenderQueueItem>) -> Result<HttpRequest, FlushError> {
        let mut request = HttpRequest::new(Method::POST, self.endpoint.clone());
        request.use_https = true;
        request.port = 443;
        request.path = "/api/v2/spans".to_owned();
        request.headers = vec![
            ("Content-Type".to_owned(), "application/x-protobuf".to_owned()),
            ("licenseKey".to_owned(), self.license_key.clone()),
            ("content.type".to_owned(), "span".to_owned()),
            ("X-ARMS-Encoding".to_owned(), "snappy".to_owned()),
        ];
        request.body = item.data.clone();
        Ok(request)
    }

    fn on_send_done(&self, response: &HttpResponse, item: &Arc<SenderQueueItem>) {
        if response.is_ok() {
            self.queue.remove(item);
        } else if (400..500).contains(&response.status_code) {
            self.queue.remove(item);
            pipe_warn!(
                name: "FlusherArmsSpan.DataRejected",
                status = response.status_code,
            );
        } else {
            self.queue.set_idle(item);
        }
    }
}

impl fmt::Debug for FlusherArmsSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlusherArmsSpan")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::SpanEvent;
    use logpipe::StringView;
    use serde_json::json;

    #[test]
    fn spans_flush_as_snappy_batches_with_arms_headers() {
        let runtime = AgentRuntime::new();
        let config = json!({
            "Endpoint": "arms.example.com",
            "LicenseKey": "license-123",
            "AppId": "app-1",
        });
        let ctx = PipelineContext::builder().with_config_name("arms").build();
        let flusher = FlusherArmsSpan::new(&config, ctx, 0, &runtime).unwrap();

        let mut group = EventGroup::default();
        group.push_event(SpanEvent {
            trace_id: StringView::from("t1"),
            span_id: StringView::from("s1"),
            start_time_nanos: 1_717_398_001_000_000_000,
            end_time_nanos: 1_717_398_002_000_000_000,
            ..Default::default()
        });
        flusher.send(group).unwrap();
        flusher.flush_all().unwrap();

        let mut items = Vec::new();
        flusher.queue.get_all_available(&mut items, false);
        assert_eq!(items.len(), 1);

        let request = flusher.build_request(&items[0]).unwrap();
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "licenseKey" && v == "license-123"));
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "X-ARMS-Encoding" && v == "snappy"));
        runtime.stop();
    }
}

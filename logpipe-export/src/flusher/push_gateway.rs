//! Prometheus push gateway flusher: text exposition over plain POST.

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

use crate::runtime::AgentRuntime;
use crate::serializer::{PushGatewayEventGroupSerializer, Serializer};

const BATCH_MAX_SIZE_BYTES: u32 = 1024 * 1024;
const BATCH_MIN_SIZE_BYTES: u32 = 5000;
const BATCH_MIN_CNT: u32 = 1000;
const BATCH_TIMEOUT_SECS: u32 = 3;

/// Ships metric samples to a Prometheus push gateway.
pub struct FlusherPushGateway {
    ctx: PipelineContext,
    node_id: usize,
    weak_self: Weak<FlusherPushGateway>,
    scheme_https: bool,
    host: String,
    path: String,
    batcher: Batcher<EventBatchStatus>,
    serializer: PushGatewayEventGroupSerializer,
    queue: Arc<SenderQueue>,
}

impl FlusherPushGateway {
    pub const NAME: &'static str = "flusher_push_gateway";

    pub fn new(
        config: &Value,
        ctx: PipelineContext,
        node_id: usize,
        runtime: &AgentRuntime,
    ) -> Result<Arc<Self>, InitError> {
        let scheme = get_mandatory_string_param(config, "pushGatewayScheme")
            .map_err(|err| init_error(&ctx, Self::NAME, err))?;
        let host = get_mandatory_string_param(config, "pushGatewayHost")
            .map_err(|err| init_error(&ctx, Self::NAME, err))?;
        let path = get_mandatory_string_param(config, "pushGatewayPath")
            .map_err(|err| init_error(&ctx, Self::NAME, err))?;
        let scheme_https = match scheme.as_str() {
            "https" => true,
            "http" => false,
            _ => return Err(init_error(&ctx, Self::NAME, "param pushGatewayScheme is not valid")),
        };

        let queue_key = runtime.queue_keys().get_key(&host);
        let queue = Arc::new(SenderQueue::new(queue_key, host.clone(), &ctx));
        runtime.runner().register_queue(queue.clone());

        let strategy = DefaultFlushStrategyOptions {
            max_size_bytes: BATCH_MAX_SIZE_BYTES,
            min_size_bytes: BATCH_MIN_SIZE_BYTES,
            min_cnt: BATCH_MIN_CNT,
            timeout_secs: BATCH_TIMEOUT_SECS,
        };
        let timeout_manager = runtime.timeout_manager().clone();

        Ok(Arc::new_cyclic(|weak: &Weak<FlusherPushGateway>| {
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
            FlusherPushGateway {
                serializer: PushGatewayEventGroupSerializer::new(&ctx, node_id),
                ctx,
                node_id,
                weak_self: weak.clone(),
                scheme_https,
                host,
                path,
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
            for batch in list {
                let serialized = match self.serializer.serialize(batch) {
                    Ok(data) => data,
                    Err(err) => {
                        pipe_warn!(
                            name: "FlusherPushGateway.SerializeFailed",
                            error = err.to_string(),
                        );
                        continue;
                    }
                };
                let raw_size = serialized.len();
                let flusher: Weak<dyn HttpFlusher> = self.weak_self.clone();
                let item = SenderQueueItem::new(
                    Bytes::from(serialized),
                    raw_size,
                    flusher,
                    self.queue.key(),
                    RawDataType::EventGroup,
                );
                if !self.queue.push(item) {
                    pipe_warn!(name: "FlusherPushGateway.QueueOverflow");
                }
            }
        }
        Ok(())
    }
}

impl Flusher for FlusherPushGateway {
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

impl HttpFlusher for FlusherPushGateway {
    fn build_request(&self, item: &Arc<SenderQueueItem>) -> Result<HttpRequest, FlushError> {
        let mut request = HttpRequest::new(Method::POST, self.host.clone());
        request.use_https = self.scheme_https;
        request.port = if self.scheme_https { 443 } else { 80 };
        request.path = self.path.clone();
        request.headers = vec![(
            "Content-Type".to_owned(),
            "text/plain; version=0.0.4; charset=utf-8".to_owned(),
        )];
        request.body = item.data.clone();
        Ok(request)
    }

    fn on_send_done(&self, response: &HttpResponse, item: &Arc<SenderQueueItem>) {
        if response.is_ok() {
            self.queue.remove(item);
        } else if (400..500).contains(&response.status_code) {
            self.queue.remove(item);
            pipe_warn!(
                name: "FlusherPushGateway.DataRejected",
                status = response.status_code,
            );
        } else {
            self.queue.set_idle(item);
        }
    }
}

impl fmt::Debug for FlusherPushGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlusherPushGateway")
            .field("host", &self.host)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::MetricEvent;
    use logpipe::StringView;
    use serde_json::json;

    #[test]
    fn metrics_flush_as_text_payloads() {
        let runtime = AgentRuntime::new();
        let config = json!({
            "pushGatewayScheme": "http",
            "pushGatewayHost": "gateway.example.com",
            "pushGatewayPath": "/metrics/job/logpipe",
        });
        let ctx = PipelineContext::builder().with_config_name("pg").build();
        let flusher = FlusherPushGateway::new(&config, ctx, 0, &runtime).unwrap();

        let mut group = EventGroup::default();
        group.push_event(MetricEvent::new(StringView::from("up"), 1_234_567_890, 1.0));
        flusher.send(group).unwrap();
        flusher.flush_all().unwrap();

        let mut items = Vec::new();
        flusher.queue.get_all_available(&mut items, false);
        assert_eq!(items.len(), 1);
        let text = std::str::from_utf8(&items[0].data).unwrap();
        assert!(text.starts_with("up "));

        let request = flusher.build_request(&items[0]).unwrap();
        assert_eq!(request.port, 80);
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v.starts_with("text/plain")));
        runtime.stop();
    }

    #[test]
    fn missing_params_abort_init() {
        let runtime = AgentRuntime::new();
        let ctx = PipelineContext::builder().with_config_name("pg").build();
        assert!(FlusherPushGateway::new(&json!({}), ctx, 0, &runtime).is_err());
        runtime.stop();
    }
}

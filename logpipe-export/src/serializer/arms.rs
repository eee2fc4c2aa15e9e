//! Arms span batch serialization: common resource labels plus the spans of
//! a whole batched-events list.

use std::collections::HashMap;

use logpipe::PipelineContext;
use logpipe_pipeline::batch::BatchedEventsList;
use logpipe_proto::arms::{Span, SpanBatch};
use prost::Message;

use super::{SerializeError, Serializer, SerializerMetrics};

/// Resource identity stamped on every batch.
#[derive(Clone, Debug, Default)]
pub struct ArmsResource {
    pub app_id: String,
    pub cluster_id: String,
    pub host_name: String,
    pub ip: String,
}

#[derive(Debug)]
pub struct ArmsSpanEventGroupListSerializer {
    resource: ArmsResource,
    metrics: SerializerMetrics,
}

impl ArmsSpanEventGroupListSerializer {
    pub fn new(ctx: &PipelineContext, flusher_node: usize, resource: ArmsResource) -> Self {
        ArmsSpanEventGroupListSerializer {
            resource,
            metrics: SerializerMetrics::new(ctx, flusher_node),
        }
    }

    fn common_resource(&self) -> HashMap<String, String> {
        HashMap::from([
            ("arms.appId".to_owned(), self.resource.app_id.clone()),
            ("cluster.id".to_owned(), self.resource.cluster_id.clone()),
            ("host.name".to_owned(), self.resource.host_name.clone()),
            ("host.ip".to_owned(), self.resource.ip.clone()),
            ("telemetry.sdk.name".to_owned(), "logpipe".to_owned()),
            (
                "telemetry.sdk.version".to_owned(),
                env!("CARGO_PKG_VERSION").to_owned(),
            ),
        ])
    }
}

impl Serializer for ArmsSpanEventGroupListSerializer {
    type Input = BatchedEventsList;

    fn metrics(&self) -> &SerializerMetrics {
        &self.metrics
    }

    fn do_serialize(&self, groups: BatchedEventsList) -> Result<Vec<u8>, SerializeError> {
        if groups.is_empty() {
            return Err(SerializeError::EmptyGroup);
        }

        let mut batch = SpanBatch {
            resource: self.common_resource(),
            spans: Vec::new(),
        };
        for group in &groups {
            for event in &group.events {
                let Some(span) = event.as_span() else { continue };
                let mut attributes: HashMap<String, String> = span
                    .tags
                    .iter()
                    .map(|(k, v)| (k.as_str().to_owned(), v.as_str().to_owned()))
                    .collect();
                for (k, v) in span.scope_tags.iter() {
                    attributes.insert(k.as_str().to_owned(), v.as_str().to_owned());
                }
                batch.spans.push(Span {
                    trace_id: span.trace_id.as_str().to_owned(),
                    span_id: span.span_id.as_str().to_owned(),
                    parent_span_id: span.parent_span_id.as_str().to_owned(),
                    name: span.name.as_str().to_owned(),
                    kind: span.kind.as_str().to_owned(),
                    status_code: span.status.as_str().to_owned(),
                    start_time_ns: span.start_time_nanos,
                    end_time_ns: span.end_time_nanos,
                    attributes,
                });
            }
        }

        if batch.spans.is_empty() {
            return Err(SerializeError::AllEmptyEvents);
        }
        Ok(batch.encode_to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::SpanEvent;
    use logpipe::StringView;
    use logpipe_pipeline::batch::BatchedEvents;

    #[test]
    fn spans_carry_common_resource_labels() {
        let resource = ArmsResource {
            app_id: "app-1".into(),
            cluster_id: "cluster-1".into(),
            host_name: "host-1".into(),
            ip: "10.0.0.1".into(),
        };
        let serializer =
            ArmsSpanEventGroupListSerializer::new(&PipelineContext::default(), 0, resource);

        let span = SpanEvent {
            trace_id: StringView::from("t1"),
            span_id: StringView::from("s1"),
            start_time_nanos: 1,
            end_time_nanos: 2,
            ..Default::default()
        };
        let batch = BatchedEvents {
            events: vec![span.into()],
            ..Default::default()
        };

        let bytes = serializer.serialize(vec![batch]).unwrap();
        let decoded = SpanBatch::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.spans.len(), 1);
        assert_eq!(decoded.spans[0].trace_id, "t1");
        assert_eq!(decoded.resource.get("arms.appId").map(String::as_str), Some("app-1"));
        assert_eq!(
            decoded.resource.get("telemetry.sdk.name").map(String::as_str),
            Some("logpipe")
        );
    }
}

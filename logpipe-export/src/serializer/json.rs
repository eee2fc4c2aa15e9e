//! Newline-delimited JSON serialization, used by the local-file flusher.
//!
//! One object per event: `{"__time__": ..., "tags": {...}, "contents":
//! {...}}`; metric and span contents mirror the SLS content schema.

use logpipe::event::{Event, EventType, MetricValue};
use logpipe::group::DEFAULT_CONTENT_KEY;
use logpipe::PipelineContext;
use logpipe_pipeline::batch::BatchedEvents;
use serde_json::{json, Map, Value};

use super::{SerializeError, Serializer, SerializerMetrics};

const JSON_KEY_TIME: &str = "__time__";
const JSON_KEY_TAGS: &str = "tags";
const JSON_KEY_CONTENTS: &str = "contents";

#[derive(Debug)]
pub struct JsonEventGroupSerializer {
    metrics: SerializerMetrics,
}

impl JsonEventGroupSerializer {
    pub fn new(ctx: &PipelineContext, flusher_node: usize) -> Self {
        JsonEventGroupSerializer {
            metrics: SerializerMetrics::new(ctx, flusher_node),
        }
    }
}

impl Serializer for JsonEventGroupSerializer {
    type Input = BatchedEvents;

    fn metrics(&self) -> &SerializerMetrics {
        &self.metrics
    }

    fn do_serialize(&self, group: BatchedEvents) -> Result<Vec<u8>, SerializeError> {
        if group.events.is_empty() {
            return Err(SerializeError::EmptyGroup);
        }
        let event_type = group.events[0].event_type();

        let mut group_tags = Map::new();
        for (key, value) in group.tags.iter() {
            group_tags.insert(key.as_str().to_owned(), value.as_str().into());
        }

        let mut out = String::new();
        for event in &group.events {
            let contents = match (event_type, event) {
                (EventType::Log, Event::Log(e)) => {
                    let mut contents = Map::new();
                    for (key, value) in e.contents() {
                        contents.insert(key.as_str().to_owned(), value.as_str().into());
                    }
                    contents
                }
                (EventType::Metric, Event::Metric(e)) => {
                    let mut labels = Map::new();
                    for (key, value) in e.tags() {
                        labels.insert(key.as_str().to_owned(), value.as_str().into());
                    }
                    let mut contents = Map::new();
                    contents.insert("__labels__".to_owned(), labels.into());
                    contents.insert("__name__".to_owned(), e.name().as_str().into());
                    match e.value() {
                        MetricValue::SingleValue(v) => {
                            contents.insert("__value__".to_owned(), json!(v));
                        }
                        MetricValue::MultiValue(values) => {
                            let values: Map<String, Value> =
                                values.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                            contents.insert("__value__".to_owned(), values.into());
                        }
                    }
                    contents
                }
                (EventType::Span, Event::Span(e)) => {
                    let mut attributes = Map::new();
                    for (key, value) in e.tags.iter().chain(e.scope_tags.iter()) {
                        attributes.insert(key.as_str().to_owned(), value.as_str().into());
                    }
                    let mut contents = Map::new();
                    contents.insert("traceId".to_owned(), e.trace_id.as_str().into());
                    contents.insert("spanId".to_owned(), e.span_id.as_str().into());
                    contents.insert("parentSpanId".to_owned(), e.parent_span_id.as_str().into());
                    contents.insert("spanName".to_owned(), e.name.as_str().into());
                    contents.insert("kind".to_owned(), e.kind.as_str().into());
                    contents.insert("statusCode".to_owned(), e.status.as_str().into());
                    contents.insert("traceState".to_owned(), e.trace_state.as_str().into());
                    contents.insert("attributes".to_owned(), attributes.into());
                    contents.insert("startTime".to_owned(), e.start_time_nanos.to_string().into());
                    contents.insert("endTime".to_owned(), e.end_time_nanos.to_string().into());
                    contents.insert("duration".to_owned(), e.duration_nanos().to_string().into());
                    contents
                }
                (EventType::Raw, Event::Raw(e)) => {
                    let mut contents = Map::new();
                    contents.insert(DEFAULT_CONTENT_KEY.to_owned(), e.content().as_str().into());
                    contents
                }
                _ => continue,
            };

            let mut object = Map::new();
            object.insert(JSON_KEY_TIME.to_owned(), event.timestamp().into());
            object.insert(JSON_KEY_TAGS.to_owned(), group_tags.clone().into());
            object.insert(JSON_KEY_CONTENTS.to_owned(), contents.into());
            out.push_str(&Value::Object(object).to_string());
            out.push('\n');
        }

        if out.is_empty() {
            return Err(SerializeError::AllEmptyEvents);
        }
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::{LogEvent, MetricEvent};
    use logpipe::{SizedMap, StringView};

    fn view(s: &str) -> StringView {
        StringView::from(s)
    }

    fn serializer() -> JsonEventGroupSerializer {
        JsonEventGroupSerializer::new(&PipelineContext::default(), 0)
    }

    #[test]
    fn logs_serialize_one_object_per_line() {
        let mut tags = SizedMap::default();
        tags.insert(view("__topic__"), view("t"));

        let mut events = Vec::new();
        for ts in [1_234_567_890u32, 1_234_567_891] {
            let mut e = LogEvent::new(ts);
            e.add_content(view("key"), view("value"));
            events.push(e.into());
        }
        let batch = BatchedEvents {
            events,
            tags,
            ..Default::default()
        };

        let bytes = serializer().serialize(batch).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["__time__"], 1_234_567_890);
        assert_eq!(first["tags"]["__topic__"], "t");
        assert_eq!(first["contents"]["key"], "value");
    }

    #[test]
    fn metrics_mirror_the_sls_schema() {
        let mut e = MetricEvent::new(view("gauge"), 1_234_567_890, 1.5);
        e.set_tag(view("host"), view("h1"));
        let batch = BatchedEvents {
            events: vec![e.into()],
            ..Default::default()
        };

        let bytes = serializer().serialize(batch).unwrap();
        let object: Value = serde_json::from_str(String::from_utf8(bytes).unwrap().trim()).unwrap();
        assert_eq!(object["contents"]["__name__"], "gauge");
        assert_eq!(object["contents"]["__value__"], 1.5);
        assert_eq!(object["contents"]["__labels__"]["host"], "h1");
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(matches!(
            serializer().serialize(BatchedEvents::default()),
            Err(SerializeError::EmptyGroup)
        ));
    }
}

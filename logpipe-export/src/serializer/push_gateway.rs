//! Prometheus text exposition (format 0.0.4) for the push gateway flusher.

use std::fmt::Write;

use logpipe::event::MetricValue;
use logpipe::PipelineContext;
use logpipe_pipeline::batch::BatchedEvents;

use super::{SerializeError, Serializer, SerializerMetrics};

#[derive(Debug)]
pub struct PushGatewayEventGroupSerializer {
    metrics: SerializerMetrics,
}

impl PushGatewayEventGroupSerializer {
    pub fn new(ctx: &PipelineContext, flusher_node: usize) -> Self {
        PushGatewayEventGroupSerializer {
            metrics: SerializerMetrics::new(ctx, flusher_node),
        }
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl Serializer for PushGatewayEventGroupSerializer {
    type Input = BatchedEvents;

    fn metrics(&self) -> &SerializerMetrics {
        &self.metrics
    }

    fn do_serialize(&self, group: BatchedEvents) -> Result<Vec<u8>, SerializeError> {
        if group.events.is_empty() {
            return Err(SerializeError::EmptyGroup);
        }

        let mut out = String::new();
        for event in &group.events {
            let Some(metric) = event.as_metric() else { continue };
            let value = match metric.value() {
                MetricValue::SingleValue(v) => *v,
                MetricValue::MultiValue(_) => continue,
            };

            out.push_str(metric.name().as_str());
            if metric.tags_len() > 0 {
                out.push('{');
                for (i, (key, tag_value)) in metric.tags().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(
                        out,
                        "{}=\"{}\"",
                        key.as_str(),
                        escape_label_value(tag_value.as_str())
                    );
                }
                out.push('}');
            }
            let timestamp_ms = metric.timestamp as i64 * 1_000;
            let _ = writeln!(out, " {value} {timestamp_ms}");
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
    use logpipe::event::MetricEvent;
    use logpipe::StringView;

    fn view(s: &str) -> StringView {
        StringView::from(s)
    }

    #[test]
    fn samples_render_as_text_lines() {
        let mut e = MetricEvent::new(view("http_requests_total"), 1_234_567_890, 42.0);
        e.set_tag(view("method"), view("get"));
        e.set_tag(view("code"), view("200"));
        let batch = BatchedEvents {
            events: vec![e.into()],
            ..Default::default()
        };

        let serializer = PushGatewayEventGroupSerializer::new(&PipelineContext::default(), 0);
        let text = String::from_utf8(serializer.serialize(batch).unwrap()).unwrap();
        assert_eq!(
            text,
            "http_requests_total{code=\"200\",method=\"get\"} 42 1234567890000\n"
        );
    }

    #[test]
    fn label_values_are_escaped() {
        let mut e = MetricEvent::new(view("m"), 0, 1.0);
        e.set_tag(view("path"), view("a\"b\\c"));
        let batch = BatchedEvents {
            events: vec![e.into()],
            ..Default::default()
        };
        let serializer = PushGatewayEventGroupSerializer::new(&PipelineContext::default(), 0);
        let text = String::from_utf8(serializer.serialize(batch).unwrap()).unwrap();
        assert!(text.contains("path=\"a\\\"b\\\\c\""));
    }
}

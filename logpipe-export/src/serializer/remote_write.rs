//! Prometheus RemoteWrite serialization: one `TimeSeries` per metric event.

use logpipe::event::MetricValue;
use logpipe::{pipe_warn, PipelineContext};
use logpipe_pipeline::batch::BatchedEvents;
use logpipe_proto::remote_write::{Label, Sample, TimeSeries, WriteRequest};
use prost::Message;

use super::{SerializeError, Serializer, SerializerMetrics};

const NAME_LABEL: &str = "__name__";

#[derive(Debug)]
pub struct RemoteWriteEventGroupSerializer {
    metrics: SerializerMetrics,
}

impl RemoteWriteEventGroupSerializer {
    pub fn new(ctx: &PipelineContext, flusher_node: usize) -> Self {
        RemoteWriteEventGroupSerializer {
            metrics: SerializerMetrics::new(ctx, flusher_node),
        }
    }
}

impl Serializer for RemoteWriteEventGroupSerializer {
    type Input = BatchedEvents;

    fn metrics(&self) -> &SerializerMetrics {
        &self.metrics
    }

    fn do_serialize(&self, mut group: BatchedEvents) -> Result<Vec<u8>, SerializeError> {
        if group.events.is_empty() {
            return Err(SerializeError::EmptyGroup);
        }

        let mut request = WriteRequest::default();
        for event in group.events.iter_mut() {
            let Some(metric) = event.as_metric_mut() else {
                pipe_warn!(name: "RemoteWriteSerializer.NotAMetricEvent");
                continue;
            };
            let value = match metric.value() {
                MetricValue::SingleValue(v) => *v,
                MetricValue::MultiValue(_) => continue,
            };

            // RemoteWrite carries the metric name as the __name__ label.
            if metric.tag(NAME_LABEL).is_none() {
                let name = metric.name().clone();
                metric.set_tag(NAME_LABEL.into(), name);
            }

            let mut series = TimeSeries::default();
            for (key, tag_value) in metric.tags() {
                series.labels.push(Label {
                    name: key.as_str().to_owned(),
                    value: tag_value.as_str().to_owned(),
                });
            }
            let timestamp_ms = metric.timestamp as i64 * 1_000
                + metric.timestamp_nanos.unwrap_or(0) as i64 / 1_000_000;
            series.samples.push(Sample {
                value,
                timestamp: timestamp_ms,
            });
            request.timeseries.push(series);
        }

        if request.timeseries.is_empty() {
            return Err(SerializeError::AllEmptyEvents);
        }
        Ok(request.encode_to_vec())
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

    fn serializer() -> RemoteWriteEventGroupSerializer {
        RemoteWriteEventGroupSerializer::new(&PipelineContext::default(), 0)
    }

    #[test]
    fn one_time_series_per_event() {
        let mut events = Vec::new();
        for (name, value) in [("up", 1.0), ("cpu_seconds_total", 2.5)] {
            let mut e = MetricEvent::new(view(name), 1_234_567_890, value);
            e.set_tag(view("instance"), view("host:9100"));
            events.push(e.into());
        }
        let batch = BatchedEvents {
            events,
            ..Default::default()
        };

        let bytes = serializer().serialize(batch).unwrap();
        let decoded = WriteRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.timeseries.len(), 2);
        assert_eq!(decoded.timeseries[0].samples.len(), 1);
        assert_eq!(decoded.timeseries[0].samples[0].timestamp, 1_234_567_890_000);
    }

    #[test]
    fn missing_name_label_is_injected() {
        let e = MetricEvent::new(view("up"), 1_234_567_890, 1.0);
        let batch = BatchedEvents {
            events: vec![e.into()],
            ..Default::default()
        };

        let bytes = serializer().serialize(batch).unwrap();
        let decoded = WriteRequest::decode(bytes.as_slice()).unwrap();
        let labels = &decoded.timeseries[0].labels;
        assert!(labels
            .iter()
            .any(|l| l.name == "__name__" && l.value == "up"));
    }

    #[test]
    fn existing_name_label_is_kept() {
        let mut e = MetricEvent::new(view("up"), 1_234_567_890, 1.0);
        e.set_tag(view("__name__"), view("custom_name"));
        let batch = BatchedEvents {
            events: vec![e.into()],
            ..Default::default()
        };

        let bytes = serializer().serialize(batch).unwrap();
        let decoded = WriteRequest::decode(bytes.as_slice()).unwrap();
        let labels = &decoded.timeseries[0].labels;
        assert!(labels
            .iter()
            .any(|l| l.name == "__name__" && l.value == "custom_name"));
    }
}

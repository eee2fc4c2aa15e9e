use std::collections::BTreeMap;

use crate::buffer::StringView;

/// Value payload of a metric sample.
///
/// The single-value form is what every shipping wire format supports today;
/// multi-value samples survive the pipeline but serializers that cannot
/// express them skip the event.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    SingleValue(f64),
    MultiValue(BTreeMap<String, f64>),
}

/// A metric sample: a name, a sorted tag set and a value.
///
/// Tags iterate sorted by key so that derived payloads such as the SLS
/// `__labels__` string are reproducible across runs.
#[derive(Clone, Debug)]
pub struct MetricEvent {
    pub timestamp: u32,
    pub timestamp_nanos: Option<u32>,
    name: StringView,
    tags: BTreeMap<StringView, StringView>,
    value: MetricValue,
}

impl MetricEvent {
    pub fn new(name: StringView, timestamp: u32, value: f64) -> Self {
        MetricEvent {
            timestamp,
            timestamp_nanos: None,
            name,
            tags: BTreeMap::new(),
            value: MetricValue::SingleValue(value),
        }
    }

    pub fn name(&self) -> &StringView {
        &self.name
    }

    pub fn set_name(&mut self, name: StringView) {
        self.name = name;
    }

    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    pub fn set_value(&mut self, value: MetricValue) {
        self.value = value;
    }

    pub fn tag(&self, key: &str) -> Option<&StringView> {
        self.tags.get(key.as_bytes())
    }

    pub fn set_tag(&mut self, key: StringView, value: StringView) {
        self.tags.insert(key, value);
    }

    pub fn del_tag(&mut self, key: &str) {
        self.tags.remove(key.as_bytes());
    }

    /// Tags in sorted key order.
    pub fn tags(&self) -> impl Iterator<Item = (&StringView, &StringView)> {
        self.tags.iter()
    }

    pub fn tags_len(&self) -> usize {
        self.tags.len()
    }

    pub fn data_size(&self) -> usize {
        let value_size = match &self.value {
            MetricValue::SingleValue(_) => std::mem::size_of::<f64>(),
            MetricValue::MultiValue(values) => values
                .iter()
                .map(|(k, _)| k.len() + std::mem::size_of::<f64>())
                .sum(),
        };
        self.name.len()
            + value_size
            + self
                .tags
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

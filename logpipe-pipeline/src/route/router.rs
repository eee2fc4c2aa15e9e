//! Selects which flushers receive each group.

use logpipe::metrics::{
    Counter, MetricsRecord, METRIC_COMPONENT_IN_EVENTS_TOTAL, METRIC_COMPONENT_IN_SIZE_BYTES,
    METRIC_LABEL_KEY_COMPONENT_NAME, METRIC_LABEL_KEY_PIPELINE_NAME, METRIC_LABEL_KEY_PROJECT,
};
use logpipe::config::InitError;
use logpipe::{EventGroup, PipelineContext};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::condition::Condition;

/// Ordered list of `(flusher index, optional match)`; unconditional
/// flushers always receive the group. The group is moved into the last
/// destination and copied to the earlier ones.
pub struct Router {
    conditions: Vec<(usize, Condition)>,
    always_matched: Vec<usize>,
    metrics: RouterMetrics,
}

struct RouterMetrics {
    _record: Arc<MetricsRecord>,
    in_events_total: Arc<Counter>,
    in_group_data_size_bytes: Arc<Counter>,
}

impl Router {
    pub fn init(
        configs: Vec<(usize, Option<&Value>)>,
        ctx: &PipelineContext,
    ) -> Result<Self, InitError> {
        let mut conditions = Vec::new();
        let mut always_matched = Vec::new();
        for (flusher_idx, config) in configs {
            match config {
                Some(config) => conditions.push((flusher_idx, Condition::init(config, ctx)?)),
                None => always_matched.push(flusher_idx),
            }
        }

        let record = ctx.metrics().register(vec![
            (METRIC_LABEL_KEY_PROJECT.to_owned(), ctx.project().to_owned()),
            (
                METRIC_LABEL_KEY_PIPELINE_NAME.to_owned(),
                ctx.config_name().to_owned(),
            ),
            (METRIC_LABEL_KEY_COMPONENT_NAME.to_owned(), "router".to_owned()),
        ]);
        Ok(Router {
            conditions,
            always_matched,
            metrics: RouterMetrics {
                in_events_total: record.counter(METRIC_COMPONENT_IN_EVENTS_TOTAL),
                in_group_data_size_bytes: record.counter(METRIC_COMPONENT_IN_SIZE_BYTES),
                _record: record,
            },
        })
    }

    pub fn route(&self, group: EventGroup) -> Vec<(usize, EventGroup)> {
        self.metrics
            .in_events_total
            .add(group.events().len() as u64);
        self.metrics
            .in_group_data_size_bytes
            .add(group.data_size() as u64);

        let matched: Vec<usize> = self
            .conditions
            .iter()
            .filter(|(_, condition)| condition.check(&group))
            .map(|(idx, _)| *idx)
            .collect();

        let mut remaining = self.always_matched.len() + matched.len();
        let mut res = Vec::with_capacity(remaining);
        let mut group = Some(group);
        for idx in self.always_matched.iter().chain(matched.iter()) {
            remaining -= 1;
            let g = if remaining == 0 {
                group.take()
            } else {
                group.clone()
            };
            if let Some(g) = g {
                res.push((*idx, g));
            }
        }
        res
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("conditions", &self.conditions.len())
            .field("always_matched", &self.always_matched)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::{LogEvent, MetricEvent};
    use logpipe::StringView;
    use serde_json::json;

    fn ctx() -> PipelineContext {
        PipelineContext::builder().with_config_name("test").build()
    }

    fn log_group() -> EventGroup {
        let mut group = EventGroup::default();
        group.push_event(LogEvent::new(0));
        group
    }

    #[test]
    fn unconditional_flushers_always_receive() {
        let router = Router::init(vec![(0, None), (1, None)], &ctx()).unwrap();
        let res = router.route(log_group());
        let indices: Vec<usize> = res.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn conditions_filter_destinations() {
        let log_match = json!({"Type": "event_type", "Value": "log"});
        let metric_match = json!({"Type": "event_type", "Value": "metric"});
        let router = Router::init(
            vec![(0, Some(&log_match)), (1, Some(&metric_match)), (2, None)],
            &ctx(),
        )
        .unwrap();

        let res = router.route(log_group());
        let mut indices: Vec<usize> = res.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 2]);

        let mut metric_group = EventGroup::default();
        metric_group.push_event(MetricEvent::new(StringView::from("m"), 0, 1.0));
        let res = router.route(metric_group);
        let mut indices: Vec<usize> = res.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn no_match_routes_nowhere() {
        let metric_match = json!({"Type": "event_type", "Value": "metric"});
        let router = Router::init(vec![(0, Some(&metric_match))], &ctx()).unwrap();
        assert!(router.route(log_group()).is_empty());
    }
}

//! The two-level batcher: per-tag-hash event batches, with an optional
//! group-level super-batch in front of the sender queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use logpipe::metrics::{
    Counter, Gauge, MetricsRecord, METRIC_COMPONENT_BATCHER_BUFFERED_EVENTS_TOTAL,
    METRIC_COMPONENT_BATCHER_BUFFERED_GROUPS_TOTAL, METRIC_COMPONENT_BATCHER_BUFFERED_SIZE_BYTES,
    METRIC_COMPONENT_BATCHER_EVENT_BATCHES_TOTAL, METRIC_COMPONENT_IN_EVENTS_TOTAL,
    METRIC_COMPONENT_IN_SIZE_BYTES, METRIC_COMPONENT_OUT_EVENTS_TOTAL,
    METRIC_COMPONENT_TOTAL_DELAY_MS, METRIC_LABEL_KEY_COMPONENT_NAME,
    METRIC_LABEL_KEY_FLUSHER_NODE_ID, METRIC_LABEL_KEY_PIPELINE_NAME, METRIC_LABEL_KEY_PROJECT,
};
use logpipe::config::{get_optional_uint_param, param_warning_default};
use logpipe::{unix_now_ms, EventGroup, EventGroupMetaKey, PipelineContext};
use serde_json::Value;

use super::item::{BatchedEventsList, EventBatchItem, GroupBatchItem};
use super::status::BatchStatus;
use super::strategy::{DefaultFlushStrategyOptions, EventFlushStrategy, GroupFlushStrategy};
use super::timeout::TimeoutFlushManager;
use crate::flusher::Flusher;

/// Key addressing the group-level queue in `flush_queue`.
pub const GROUP_BATCH_KEY: u64 = 0;

struct Queues<S: BatchStatus> {
    event_queue_map: HashMap<u64, EventBatchItem<S>>,
    group_queue: Option<GroupBatchItem>,
}

struct BatcherMetrics {
    // Keeps the record registered for snapshots.
    _record: Arc<MetricsRecord>,
    in_events_total: Arc<Counter>,
    in_group_data_size_bytes: Arc<Counter>,
    out_events_total: Arc<Counter>,
    total_delay_ms: Arc<Counter>,
    event_batch_items_total: Arc<Gauge>,
    buffered_groups_total: Arc<Gauge>,
    buffered_events_total: Arc<Gauge>,
    buffered_data_size_bytes: Arc<Gauge>,
}

/// Groups incoming events per tag hash and seals batches on size, count,
/// time or (for SLS) minute-boundary triggers.
///
/// When group batching is enabled, event-level flushes cascade into the
/// group queue, which flushes on its own size/time triggers; the group
/// timeout takes half the configured event timeout so the total wall-clock
/// ceiling is unchanged.
pub struct Batcher<S: BatchStatus> {
    queues: Mutex<Queues<S>>,
    event_strategy: EventFlushStrategy<S>,
    group_strategy: Option<GroupFlushStrategy>,
    flusher: Weak<dyn Flusher>,
    flusher_node: usize,
    config_name: String,
    timeout_manager: Arc<TimeoutFlushManager>,
    metrics: BatcherMetrics,
}

impl<S: BatchStatus> Batcher<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        config: &Value,
        ctx: &PipelineContext,
        flusher_name: &str,
        flusher_node: usize,
        flusher: Weak<dyn Flusher>,
        strategy: DefaultFlushStrategyOptions,
        enable_group_batch: bool,
        timeout_manager: Arc<TimeoutFlushManager>,
    ) -> Self {
        let mut options = strategy;

        match get_optional_uint_param(config, "MinSizeBytes") {
            Ok(Some(v)) => options.min_size_bytes = v,
            Ok(None) => {}
            Err(err) => param_warning_default(ctx, flusher_name, err, options.min_size_bytes),
        }
        match get_optional_uint_param(config, "MinCnt") {
            Ok(Some(v)) => options.min_cnt = v,
            Ok(None) => {}
            Err(err) => param_warning_default(ctx, flusher_name, err, options.min_cnt),
        }
        match get_optional_uint_param(config, "TimeoutSecs") {
            Ok(Some(v)) => options.timeout_secs = v,
            Ok(None) => {}
            Err(err) => param_warning_default(ctx, flusher_name, err, options.timeout_secs),
        }

        let (event_strategy, group_strategy, group_queue) = if enable_group_batch {
            let group_timeout = options.timeout_secs / 2;
            let group_strategy = GroupFlushStrategy::new(options.min_size_bytes, group_timeout);
            let mut event_strategy = EventFlushStrategy::new(options);
            event_strategy.set_timeout_secs(options.timeout_secs - group_timeout);
            (event_strategy, Some(group_strategy), Some(GroupBatchItem::default()))
        } else {
            (EventFlushStrategy::new(options), None, None)
        };

        let record = ctx.metrics().register(vec![
            (METRIC_LABEL_KEY_PROJECT.to_owned(), ctx.project().to_owned()),
            (
                METRIC_LABEL_KEY_PIPELINE_NAME.to_owned(),
                ctx.config_name().to_owned(),
            ),
            (METRIC_LABEL_KEY_COMPONENT_NAME.to_owned(), "batcher".to_owned()),
            (
                METRIC_LABEL_KEY_FLUSHER_NODE_ID.to_owned(),
                flusher_node.to_string(),
            ),
            (
                "enable_group_batch".to_owned(),
                enable_group_batch.to_string(),
            ),
        ]);
        let metrics = BatcherMetrics {
            in_events_total: record.counter(METRIC_COMPONENT_IN_EVENTS_TOTAL),
            in_group_data_size_bytes: record.counter(METRIC_COMPONENT_IN_SIZE_BYTES),
            out_events_total: record.counter(METRIC_COMPONENT_OUT_EVENTS_TOTAL),
            total_delay_ms: record.counter(METRIC_COMPONENT_TOTAL_DELAY_MS),
            event_batch_items_total: record.gauge(METRIC_COMPONENT_BATCHER_EVENT_BATCHES_TOTAL),
            buffered_groups_total: record.gauge(METRIC_COMPONENT_BATCHER_BUFFERED_GROUPS_TOTAL),
            buffered_events_total: record.gauge(METRIC_COMPONENT_BATCHER_BUFFERED_EVENTS_TOTAL),
            buffered_data_size_bytes: record.gauge(METRIC_COMPONENT_BATCHER_BUFFERED_SIZE_BYTES),
            _record: record,
        };

        Batcher {
            queues: Mutex::new(Queues {
                event_queue_map: HashMap::new(),
                group_queue,
            }),
            event_strategy,
            group_strategy,
            flusher,
            flusher_node,
            config_name: ctx.config_name().to_owned(),
            timeout_manager,
            metrics,
        }
    }

    pub fn event_strategy(&self) -> &EventFlushStrategy<S> {
        &self.event_strategy
    }

    pub fn group_strategy(&self) -> Option<&GroupFlushStrategy> {
        self.group_strategy.as_ref()
    }

    /// Add a group, appending any batches sealed along the way to `res`.
    ///
    /// Without group batching every sealed batch becomes its own
    /// single-element list; with it, cascaded group flushes emit multi-batch
    /// lists.
    pub fn add(&self, mut group: EventGroup, res: &mut Vec<BatchedEventsList>) {
        let key = group.tags_hash();
        let tags = group.tags().clone();
        let source_buffer = group.source_buffer().clone();
        let checkpoint = group.exactly_once_checkpoint().cloned();
        let pack_id_prefix = group
            .metadata(EventGroupMetaKey::SourceId)
            .cloned()
            .unwrap_or_default();
        let events = std::mem::take(group.events_mut());

        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let Queues {
            event_queue_map,
            group_queue,
        } = &mut *queues;

        self.metrics.in_events_total.add(events.len() as u64);
        self.metrics
            .in_group_data_size_bytes
            .add((tags.data_size() + events.iter().map(|e| e.data_size()).sum::<usize>()) as u64);
        event_queue_map.entry(key).or_default();
        self.metrics
            .event_batch_items_total
            .set(event_queue_map.len() as i64);
        let Some(item) = event_queue_map.get_mut(&key) else {
            return;
        };

        for (i, event) in events.into_iter().enumerate() {
            if !item.is_empty() && self.event_strategy.need_flush_by_time(item.status(), &event) {
                if let (Some(group_queue), Some(group_strategy)) =
                    (group_queue.as_mut(), self.group_strategy.as_ref())
                {
                    if !group_queue.is_empty()
                        && group_strategy.need_flush_by_time(group_queue.status())
                    {
                        self.on_group_queue_flush(group_queue);
                        group_queue.flush_into_lists(res);
                    }
                    if group_queue.is_empty() {
                        self.timeout_manager.update_record(
                            &self.config_name,
                            self.flusher_node,
                            GROUP_BATCH_KEY,
                            group_strategy.timeout_secs(),
                            self.flusher.clone(),
                        );
                    }
                    item.flush_into_group(group_queue);
                    if group_strategy.need_flush_by_size(group_queue.status()) {
                        self.on_group_queue_flush(group_queue);
                        group_queue.flush_into_lists(res);
                    }
                } else {
                    self.on_event_queue_flush(item);
                    item.flush_into_lists(res);
                }
            }
            if item.is_empty() {
                item.reset(
                    tags.clone(),
                    source_buffer.clone(),
                    checkpoint.clone(),
                    pack_id_prefix.clone(),
                );
                self.timeout_manager.update_record(
                    &self.config_name,
                    self.flusher_node,
                    key,
                    self.event_strategy.timeout_secs(),
                    self.flusher.clone(),
                );
                self.metrics.buffered_groups_total.add(1);
                self.metrics
                    .buffered_data_size_bytes
                    .add(item.data_size() as i64);
            } else if i == 0 {
                item.add_source_buffer(source_buffer.clone());
            }
            self.metrics.buffered_events_total.add(1);
            self.metrics
                .buffered_data_size_bytes
                .add(event.data_size() as i64);
            item.add(event);
            if self.event_strategy.need_flush_by_size(item.status())
                || self.event_strategy.need_flush_by_cnt(item.status())
            {
                self.on_event_queue_flush(item);
                item.flush_into_lists(res);
            }
        }
    }

    /// Flush one queue: `key != 0` addresses an event-level batch, `key == 0`
    /// the group-level queue.
    pub fn flush_queue(&self, key: u64, res: &mut BatchedEventsList) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let Queues {
            event_queue_map,
            group_queue,
        } = &mut *queues;

        if key == GROUP_BATCH_KEY {
            if let Some(group_queue) = group_queue.as_mut() {
                self.on_group_queue_flush(group_queue);
                group_queue.flush_into(res);
            }
            return;
        }

        let Some(mut item) = event_queue_map.remove(&key) else {
            return;
        };
        self.metrics
            .event_batch_items_total
            .set(event_queue_map.len() as i64);

        if let (Some(group_queue), Some(group_strategy)) =
            (group_queue.as_mut(), self.group_strategy.as_ref())
        {
            if !group_queue.is_empty() && group_strategy.need_flush_by_time(group_queue.status()) {
                self.on_group_queue_flush(group_queue);
                group_queue.flush_into(res);
            }
            if group_queue.is_empty() {
                self.timeout_manager.update_record(
                    &self.config_name,
                    self.flusher_node,
                    GROUP_BATCH_KEY,
                    group_strategy.timeout_secs(),
                    self.flusher.clone(),
                );
            }
            item.flush_into_group(group_queue);
            if group_strategy.need_flush_by_size(group_queue.status()) {
                self.on_group_queue_flush(group_queue);
                group_queue.flush_into(res);
            }
        } else {
            self.on_event_queue_flush(&item);
            item.flush_into(res);
        }
    }

    /// Drain every event-level queue, then the group queue.
    pub fn flush_all(&self, res: &mut Vec<BatchedEventsList>) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let Queues {
            event_queue_map,
            group_queue,
        } = &mut *queues;

        for (_, mut item) in event_queue_map.drain() {
            if let (Some(group_queue), Some(group_strategy)) =
                (group_queue.as_mut(), self.group_strategy.as_ref())
            {
                if !group_queue.is_empty() && group_strategy.need_flush_by_time(group_queue.status())
                {
                    self.on_group_queue_flush(group_queue);
                    group_queue.flush_into_lists(res);
                }
                item.flush_into_group(group_queue);
                if group_strategy.need_flush_by_size(group_queue.status()) {
                    self.on_group_queue_flush(group_queue);
                    group_queue.flush_into_lists(res);
                }
            } else {
                self.on_event_queue_flush(&item);
                item.flush_into_lists(res);
            }
        }
        if let Some(group_queue) = group_queue.as_mut() {
            self.on_group_queue_flush(group_queue);
            group_queue.flush_into_lists(res);
        }
        self.metrics.event_batch_items_total.set(0);
    }

    fn on_event_queue_flush(&self, item: &EventBatchItem<S>) {
        self.metrics.out_events_total.add(item.event_size() as u64);
        self.metrics.total_delay_ms.add(
            (item.event_size() as u64 * unix_now_ms()).saturating_sub(item.total_enqueue_time_ms()),
        );
        self.metrics.buffered_groups_total.sub(1);
        self.metrics.buffered_events_total.sub(item.event_size() as i64);
        self.metrics.buffered_data_size_bytes.sub(item.data_size() as i64);
    }

    fn on_group_queue_flush(&self, group_queue: &GroupBatchItem) {
        self.metrics.out_events_total.add(group_queue.event_size() as u64);
        self.metrics.total_delay_ms.add(
            (group_queue.event_size() as u64 * unix_now_ms())
                .saturating_sub(group_queue.total_enqueue_time_ms()),
        );
        self.metrics
            .buffered_groups_total
            .sub(group_queue.group_size() as i64);
        self.metrics
            .buffered_events_total
            .sub(group_queue.event_size() as i64);
        self.metrics
            .buffered_data_size_bytes
            .sub(group_queue.data_size() as i64);
    }
}

impl<S: BatchStatus> fmt::Debug for Batcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("config_name", &self.config_name)
            .field("flusher_node", &self.flusher_node)
            .field("group_batch", &self.group_strategy.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::status::{EventBatchStatus, SlsEventBatchStatus};
    use logpipe::event::LogEvent;
    use logpipe::{EventGroup, StringView};
    use serde_json::json;

    struct NoopFlusher {
        ctx: PipelineContext,
    }

    impl Flusher for NoopFlusher {
        fn name(&self) -> &'static str {
            "flusher_mock"
        }

        fn context(&self) -> &PipelineContext {
            &self.ctx
        }

        fn send(&self, _group: EventGroup) -> crate::error::FlushResult {
            Ok(())
        }

        fn flush(&self, _key: u64) -> crate::error::FlushResult {
            Ok(())
        }

        fn flush_all(&self) -> crate::error::FlushResult {
            Ok(())
        }
    }

    fn test_flusher() -> Arc<NoopFlusher> {
        Arc::new(NoopFlusher {
            ctx: PipelineContext::builder().with_config_name("test").build(),
        })
    }

    fn batcher<S: BatchStatus>(
        flusher: &Arc<NoopFlusher>,
        options: DefaultFlushStrategyOptions,
        enable_group_batch: bool,
    ) -> (Batcher<S>, Arc<TimeoutFlushManager>) {
        let manager = TimeoutFlushManager::new();
        let flusher_dyn: Arc<dyn Flusher> = flusher.clone();
        let weak: Weak<dyn Flusher> = Arc::downgrade(&flusher_dyn);
        let batcher = Batcher::init(
            &json!({}),
            flusher.context(),
            "flusher_mock",
            0,
            weak,
            options,
            enable_group_batch,
            manager.clone(),
        );
        (batcher, manager)
    }

    fn group_with_logs(tag: &str, count: usize, content_len: usize) -> EventGroup {
        let mut group = EventGroup::default();
        group.set_tag(StringView::from("tag"), StringView::from(tag));
        let value = "x".repeat(content_len);
        for i in 0..count {
            let mut e = LogEvent::new(1_700_000_000 + i as u32);
            e.add_content(group.copy_string("k"), group.copy_string(&value));
            group.push_event(e);
        }
        group
    }

    #[test]
    fn count_trigger_seals_batches() {
        let flusher = test_flusher();
        let (batcher, manager) = batcher::<EventBatchStatus>(
            &flusher,
            DefaultFlushStrategyOptions {
                min_cnt: 2,
                min_size_bytes: u32::MAX,
                timeout_secs: 3600,
                ..Default::default()
            },
            false,
        );

        let mut res = Vec::new();
        batcher.add(group_with_logs("a", 5, 3), &mut res);
        // 5 events with min_cnt 2: two sealed batches, one event left buffered.
        assert_eq!(res.len(), 2);
        assert!(res.iter().all(|list| list.len() == 1));
        assert!(res.iter().all(|list| list[0].events.len() == 2));

        let mut rest = Vec::new();
        batcher.flush_all(&mut rest);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0][0].events.len(), 1);
        manager.stop();
    }

    #[test]
    fn events_are_keyed_by_tag_hash() {
        let flusher = test_flusher();
        let (batcher, manager) = batcher::<EventBatchStatus>(
            &flusher,
            DefaultFlushStrategyOptions {
                min_cnt: 100,
                min_size_bytes: u32::MAX,
                timeout_secs: 3600,
                ..Default::default()
            },
            false,
        );

        let mut res = Vec::new();
        batcher.add(group_with_logs("a", 2, 3), &mut res);
        batcher.add(group_with_logs("b", 3, 3), &mut res);
        assert!(res.is_empty());

        let mut all = Vec::new();
        batcher.flush_all(&mut all);
        let mut counts: Vec<usize> = all.iter().map(|l| l[0].events.len()).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![2, 3]);
        manager.stop();
    }

    #[test]
    fn add_preserves_event_order_across_seals() {
        let flusher = test_flusher();
        let (batcher, manager) = batcher::<EventBatchStatus>(
            &flusher,
            DefaultFlushStrategyOptions {
                min_cnt: 2,
                min_size_bytes: u32::MAX,
                timeout_secs: 3600,
                ..Default::default()
            },
            false,
        );

        let mut res = Vec::new();
        batcher.add(group_with_logs("a", 6, 3), &mut res);
        let mut rest = Vec::new();
        batcher.flush_all(&mut rest);

        let timestamps: Vec<u32> = res
            .iter()
            .chain(rest.iter())
            .flat_map(|list| list.iter())
            .flat_map(|batch| batch.events.iter())
            .map(|e| e.timestamp())
            .collect();
        let mut sorted = timestamps.clone();
        sorted.sort_unstable();
        assert_eq!(timestamps, sorted);
        assert_eq!(timestamps.len(), 6);
        manager.stop();
    }

    #[test]
    fn minute_boundary_forces_flush() {
        let flusher = test_flusher();
        let (batcher, manager) = batcher::<SlsEventBatchStatus>(
            &flusher,
            DefaultFlushStrategyOptions {
                min_cnt: 100,
                min_size_bytes: u32::MAX,
                timeout_secs: 3600,
                ..Default::default()
            },
            false,
        );

        let mut group = EventGroup::default();
        for ts in [1_717_398_001u32, 1_717_398_071] {
            let mut e = LogEvent::new(ts);
            e.add_content(group.copy_string("k"), group.copy_string("v"));
            group.push_event(e);
        }

        let mut res = Vec::new();
        batcher.add(group, &mut res);
        // The second event crosses the minute boundary of the first.
        assert_eq!(res.len(), 1);
        assert_eq!(res[0][0].events.len(), 1);
        assert_eq!(res[0][0].events[0].timestamp(), 1_717_398_001);

        let mut rest = Vec::new();
        batcher.flush_all(&mut rest);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0][0].events[0].timestamp(), 1_717_398_071);
        manager.stop();
    }

    #[test]
    fn two_level_batch_flush_all_accounting() {
        let flusher = test_flusher();
        let (batcher, manager) = batcher::<EventBatchStatus>(
            &flusher,
            DefaultFlushStrategyOptions {
                min_cnt: u32::MAX,
                min_size_bytes: 1024,
                timeout_secs: 4,
                ..Default::default()
            },
            true,
        );

        // 1000 two-byte events across 3 tag keys.
        let mut pushed_bytes = 0usize;
        for i in 0..10 {
            let key = i % 3;
            let group = group_with_logs(["a", "b", "c"][key], 100, 1);
            pushed_bytes += group.events().iter().map(|e| e.data_size()).sum::<usize>();
            let mut res = Vec::new();
            batcher.add(group, &mut res);
            assert!(res.is_empty(), "no trigger should fire before flush_all");
        }

        let mut out = Vec::new();
        batcher.flush_all(&mut out);
        // Everything drains through the group queue; nothing is left behind.
        let batches: Vec<_> = out.iter().flatten().collect();
        let total_events: usize = batches.iter().map(|b| b.events.len()).sum();
        assert_eq!(total_events, 1000);
        let total_bytes: usize = batches
            .iter()
            .flat_map(|b| b.events.iter())
            .map(|e| e.data_size())
            .sum();
        assert_eq!(total_bytes, pushed_bytes);

        // Per-key batch sizes match the input distribution.
        let mut counts: Vec<usize> = batches.iter().map(|b| b.events.len()).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![300, 300, 400]);
        manager.stop();
    }

    #[test]
    fn group_timeout_is_half_of_event_timeout() {
        let flusher = test_flusher();
        let (batcher, manager) = batcher::<EventBatchStatus>(
            &flusher,
            DefaultFlushStrategyOptions {
                min_cnt: u32::MAX,
                min_size_bytes: u32::MAX,
                timeout_secs: 4,
                ..Default::default()
            },
            true,
        );
        assert_eq!(batcher.event_strategy().timeout_secs(), 2);
        assert_eq!(batcher.group_strategy().map(|s| s.timeout_secs()), Some(2));
        manager.stop();
    }

    #[test]
    fn config_overrides_strategy_defaults() {
        let flusher = test_flusher();
        let manager = TimeoutFlushManager::new();
        let flusher_dyn: Arc<dyn Flusher> = flusher.clone();
        let weak: Weak<dyn Flusher> = Arc::downgrade(&flusher_dyn);
        let batcher: Batcher<EventBatchStatus> = Batcher::init(
            &json!({"MinCnt": 7, "TimeoutSecs": 11}),
            flusher.context(),
            "flusher_mock",
            0,
            weak,
            DefaultFlushStrategyOptions::default(),
            false,
            manager.clone(),
        );
        assert_eq!(batcher.event_strategy().min_cnt(), 7);
        assert_eq!(batcher.event_strategy().timeout_secs(), 11);
        manager.stop();
    }
}

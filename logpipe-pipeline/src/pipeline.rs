//! Pipeline assembly and lifecycle.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use logpipe::{pipe_debug, pipe_info, pipe_warn, EventGroup, PipelineContext};

use crate::batch::TimeoutFlushManager;
use crate::error::{FlushError, FlushResult};
use crate::flusher::Flusher;
use crate::route::Router;

/// How often and how many times `stop` re-checks emptying sender queues.
const STOP_DRAIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);
const STOP_DRAIN_MAX_RETRIES: usize = 500;

/// An event producer. Discovery/tailing internals live outside the data
/// plane; inputs only need a lifecycle.
pub trait Input: Send + Sync {
    fn name(&self) -> &'static str;

    fn start(&self) -> FlushResult {
        Ok(())
    }

    fn stop(&self, is_pipeline_removing: bool) -> FlushResult {
        let _ = is_pipeline_removing;
        Ok(())
    }
}

/// An in-place transformation stage: mutate the groups, optionally split
/// them into more groups.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, groups: &mut Vec<EventGroup>);
}

/// Wires inputs through processors and the router into flushers, and owns
/// their shared lifecycle.
pub struct Pipeline {
    ctx: PipelineContext,
    inputs: Vec<Box<dyn Input>>,
    processors: Vec<Box<dyn Processor>>,
    router: Router,
    flushers: Vec<Arc<dyn Flusher>>,
    timeout_manager: Arc<TimeoutFlushManager>,
}

impl Pipeline {
    pub fn new(
        ctx: PipelineContext,
        inputs: Vec<Box<dyn Input>>,
        processors: Vec<Box<dyn Processor>>,
        router: Router,
        flushers: Vec<Arc<dyn Flusher>>,
        timeout_manager: Arc<TimeoutFlushManager>,
    ) -> Self {
        Pipeline {
            ctx,
            inputs,
            processors,
            router,
            flushers,
            timeout_manager,
        }
    }

    pub fn name(&self) -> &str {
        self.ctx.config_name()
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn flushers(&self) -> &[Arc<dyn Flusher>] {
        &self.flushers
    }

    /// Run a batch of groups through the processors and hand the results to
    /// the matching flushers.
    pub fn process(&self, mut groups: Vec<EventGroup>) -> FlushResult {
        for processor in &self.processors {
            processor.process(&mut groups);
        }
        for group in groups {
            for (flusher_idx, routed) in self.router.route(group) {
                if let Some(flusher) = self.flushers.get(flusher_idx) {
                    flusher.send(routed)?;
                }
            }
        }
        Ok(())
    }

    /// Start flushers before inputs so no event finds a dead end.
    pub fn start(&self) -> FlushResult {
        for flusher in &self.flushers {
            flusher.start()?;
        }
        for input in &self.inputs {
            input.start()?;
        }
        pipe_info!(name: "Pipeline.Started", pipeline = self.ctx.config_name());
        Ok(())
    }

    /// Stop in reverse order: inputs first, then drain batches, wait for the
    /// sender queues to empty (bounded), and finally stop the flushers.
    pub fn stop(&self, is_pipeline_removing: bool) -> FlushResult {
        for input in &self.inputs {
            input.stop(is_pipeline_removing)?;
        }

        for flusher in &self.flushers {
            flusher.flush_all()?;
        }

        let mut retries = 0;
        while retries < STOP_DRAIN_MAX_RETRIES {
            let drained = self
                .flushers
                .iter()
                .filter_map(|f| f.sender_queue())
                .all(|q| q.is_empty());
            if drained {
                break;
            }
            retries += 1;
            thread::sleep(STOP_DRAIN_RETRY_INTERVAL);
        }
        if retries == STOP_DRAIN_MAX_RETRIES {
            pipe_warn!(
                name: "Pipeline.StopDrainTimedOut",
                pipeline = self.ctx.config_name(),
            );
        }

        self.timeout_manager.clear_records(self.ctx.config_name());

        for flusher in &self.flushers {
            flusher.stop(is_pipeline_removing)?;
        }
        pipe_debug!(name: "Pipeline.Stopped", pipeline = self.ctx.config_name());
        Ok(())
    }

    /// Force every flusher to drain its batchers.
    pub fn flush_all(&self) -> FlushResult {
        let mut first_err: Option<FlushError> = None;
        for flusher in &self.flushers {
            if let Err(err) = flusher.flush_all() {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.ctx.config_name())
            .field("inputs", &self.inputs.len())
            .field("processors", &self.processors.len())
            .field("flushers", &self.flushers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::LogEvent;
    use logpipe::StringView;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TagProcessor;

    impl Processor for TagProcessor {
        fn name(&self) -> &'static str {
            "processor_tag"
        }

        fn process(&self, groups: &mut Vec<EventGroup>) {
            for group in groups.iter_mut() {
                group.set_tag(StringView::from("processed"), StringView::from("true"));
            }
        }
    }

    #[derive(Default)]
    struct CapturingFlusher {
        ctx: PipelineContext,
        groups: Mutex<Vec<EventGroup>>,
        flush_all_calls: AtomicUsize,
    }

    impl Flusher for CapturingFlusher {
        fn name(&self) -> &'static str {
            "flusher_capture"
        }

        fn context(&self) -> &PipelineContext {
            &self.ctx
        }

        fn send(&self, group: EventGroup) -> FlushResult {
            self.groups.lock().unwrap().push(group);
            Ok(())
        }

        fn flush(&self, _key: u64) -> FlushResult {
            Ok(())
        }

        fn flush_all(&self) -> FlushResult {
            self.flush_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn process_runs_processors_then_routes() {
        let ctx = PipelineContext::builder().with_config_name("test").build();
        let flusher = Arc::new(CapturingFlusher::default());
        let router = Router::init(vec![(0, None)], &ctx).unwrap();
        let manager = TimeoutFlushManager::new();
        let pipeline = Pipeline::new(
            ctx,
            vec![],
            vec![Box::new(TagProcessor)],
            router,
            vec![flusher.clone()],
            manager.clone(),
        );

        let mut group = EventGroup::default();
        group.push_event(LogEvent::new(1));
        pipeline.process(vec![group]).unwrap();

        let received = flusher.groups.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0].tag("processed").map(|v| v.as_str()),
            Some("true")
        );
        manager.stop();
    }

    #[test]
    fn stop_drains_flushers_and_clears_timeouts() {
        let ctx = PipelineContext::builder().with_config_name("drained").build();
        let flusher = Arc::new(CapturingFlusher::default());
        let router = Router::init(vec![(0, None)], &ctx).unwrap();
        let manager = TimeoutFlushManager::new();
        let pipeline = Pipeline::new(
            ctx,
            vec![],
            vec![],
            router,
            vec![flusher.clone()],
            manager.clone(),
        );

        pipeline.start().unwrap();
        pipeline.stop(false).unwrap();
        assert_eq!(flusher.flush_all_calls.load(Ordering::SeqCst), 1);
        manager.stop();
    }
}

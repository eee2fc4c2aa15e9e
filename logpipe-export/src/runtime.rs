//! Process-wide services, created once at startup and passed into
//! constructors instead of living behind per-type singletons.

use std::fmt;
use std::sync::Arc;

use logpipe::alarm::AlarmManager;
use logpipe::metrics::MetricsRegistry;
use logpipe_pipeline::batch::TimeoutFlushManager;
use logpipe_pipeline::queue::{LimiterRegistry, QueueKeyManager};

use crate::runner::FlusherRunner;
use crate::sink::HttpSink;

/// Everything flushers and pipelines share, in shutdown-friendly order.
pub struct AgentRuntime {
    metrics: Arc<MetricsRegistry>,
    alarm: Arc<AlarmManager>,
    timeout_manager: Arc<TimeoutFlushManager>,
    queue_keys: Arc<QueueKeyManager>,
    limiters: Arc<LimiterRegistry>,
    sink: Arc<HttpSink>,
    runner: Arc<FlusherRunner>,
}

impl AgentRuntime {
    pub fn new() -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let alarm = Arc::new(AlarmManager::new());
        let timeout_manager = TimeoutFlushManager::new();
        let queue_keys = Arc::new(QueueKeyManager::new());
        let limiters = Arc::new(LimiterRegistry::new());
        let sink = HttpSink::new(&metrics);
        let runner = FlusherRunner::new(&metrics, sink.clone());
        AgentRuntime {
            metrics,
            alarm,
            timeout_manager,
            queue_keys,
            limiters,
            sink,
            runner,
        }
    }

    pub fn start(&self) {
        self.sink.start();
        self.runner.start();
    }

    /// Stop in dependency order: dispatch first, then the sink, then the
    /// timer.
    pub fn stop(&self) {
        self.runner.stop();
        self.sink.stop();
        self.timeout_manager.stop();
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn alarm(&self) -> &Arc<AlarmManager> {
        &self.alarm
    }

    pub fn timeout_manager(&self) -> &Arc<TimeoutFlushManager> {
        &self.timeout_manager
    }

    pub fn queue_keys(&self) -> &Arc<QueueKeyManager> {
        &self.queue_keys
    }

    pub fn limiters(&self) -> &Arc<LimiterRegistry> {
        &self.limiters
    }

    pub fn sink(&self) -> &Arc<HttpSink> {
        &self.sink
    }

    pub fn runner(&self) -> &Arc<FlusherRunner> {
        &self.runner
    }
}

impl Default for AgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRuntime").finish_non_exhaustive()
    }
}

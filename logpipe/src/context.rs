//! Per-pipeline context shared by every component of a pipeline.

use std::sync::Arc;

use crate::alarm::AlarmManager;
use crate::metrics::MetricsRegistry;

/// Identity and shared services of the pipeline a component belongs to.
///
/// Cheap to clone; handed to batchers, serializers, compressors and
/// flushers at init so diagnostics and alarms carry consistent labels.
#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug, Default)]
struct ContextInner {
    config_name: String,
    project: String,
    logstore: String,
    region: String,
    enable_timestamp_nanosecond: bool,
    alarm: Arc<AlarmManager>,
    metrics: Arc<MetricsRegistry>,
}

impl PipelineContext {
    pub fn builder() -> PipelineContextBuilder {
        PipelineContextBuilder::default()
    }

    pub fn config_name(&self) -> &str {
        &self.inner.config_name
    }

    pub fn project(&self) -> &str {
        &self.inner.project
    }

    pub fn logstore(&self) -> &str {
        &self.inner.logstore
    }

    pub fn region(&self) -> &str {
        &self.inner.region
    }

    /// Global switch for emitting sub-second timestamps on the wire.
    pub fn enable_timestamp_nanosecond(&self) -> bool {
        self.inner.enable_timestamp_nanosecond
    }

    pub fn alarm(&self) -> &Arc<AlarmManager> {
        &self.inner.alarm
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }
}

#[derive(Debug, Default)]
pub struct PipelineContextBuilder {
    config_name: String,
    project: String,
    logstore: String,
    region: String,
    enable_timestamp_nanosecond: bool,
    alarm: Option<Arc<AlarmManager>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl PipelineContextBuilder {
    pub fn with_config_name(mut self, name: impl Into<String>) -> Self {
        self.config_name = name.into();
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_logstore(mut self, logstore: impl Into<String>) -> Self {
        self.logstore = logstore.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_timestamp_nanosecond(mut self, enable: bool) -> Self {
        self.enable_timestamp_nanosecond = enable;
        self
    }

    pub fn with_alarm(mut self, alarm: Arc<AlarmManager>) -> Self {
        self.alarm = Some(alarm);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> PipelineContext {
        PipelineContext {
            inner: Arc::new(ContextInner {
                config_name: self.config_name,
                project: self.project,
                logstore: self.logstore,
                region: self.region,
                enable_timestamp_nanosecond: self.enable_timestamp_nanosecond,
                alarm: self.alarm.unwrap_or_default(),
                metrics: self.metrics.unwrap_or_default(),
            }),
        }
    }
}

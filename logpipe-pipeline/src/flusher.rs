//! The flusher contracts.
//!
//! A [`Flusher`] is the last pipeline node: it receives routed event
//! groups, batches them, and emits destination payloads. Flushers that ship
//! over HTTP additionally implement [`HttpFlusher`], which the flusher
//! runner and HTTP sink drive: `build_request` turns a queued item into a
//! request, `on_send_done` receives the final response (after retries) and
//! decides between removing the item, requeueing it, or dropping it.

use std::sync::Arc;

use logpipe::{EventGroup, PipelineContext};

use crate::error::FlushResult;
use crate::http::{HttpRequest, HttpResponse};
use crate::queue::{SenderQueue, SenderQueueItem};

pub trait Flusher: Send + Sync {
    /// Plugin type name, e.g. `flusher_sls`.
    fn name(&self) -> &'static str;

    fn context(&self) -> &PipelineContext;

    /// Position of this flusher within its pipeline, used to key timeout
    /// flush records.
    fn node_id(&self) -> usize {
        0
    }

    /// Accept a routed group into the flusher's batcher.
    fn send(&self, group: EventGroup) -> FlushResult;

    /// Flush one batch queue; key `0` addresses the group-level queue.
    fn flush(&self, key: u64) -> FlushResult;

    /// Drain every batch queue.
    fn flush_all(&self) -> FlushResult;

    fn start(&self) -> FlushResult {
        Ok(())
    }

    fn stop(&self, is_pipeline_removing: bool) -> FlushResult {
        let _ = is_pipeline_removing;
        Ok(())
    }

    /// The sender queue feeding this flusher's sink, when it has one.
    fn sender_queue(&self) -> Option<Arc<SenderQueue>> {
        None
    }
}

pub trait HttpFlusher: Flusher {
    /// Describe the HTTP request shipping `item`.
    fn build_request(&self, item: &Arc<SenderQueueItem>) -> Result<HttpRequest, crate::FlushError>;

    /// Completion callback, invoked exactly once per item after the sink has
    /// exhausted transport retries.
    fn on_send_done(&self, response: &HttpResponse, item: &Arc<SenderQueueItem>);
}

//! Two-level batching with size/count/time flush triggers.

mod batcher;
mod item;
mod status;
mod strategy;
mod timeout;

pub use batcher::{Batcher, GROUP_BATCH_KEY};
pub use item::{BatchedEvents, BatchedEventsList, EventBatchItem, GroupBatchItem};
pub use status::{BatchStatus, EventBatchStatus, GroupBatchStatus, SlsEventBatchStatus};
pub use strategy::{DefaultFlushStrategyOptions, EventFlushStrategy, GroupFlushStrategy};
pub use timeout::TimeoutFlushManager;

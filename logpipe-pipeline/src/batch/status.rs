//! Per-batch counters that flush triggers evaluate against.

use logpipe::{unix_now, Event};

use super::item::BatchedEvents;

/// Running counters of one event-level batch.
///
/// `update` is called after appending an event; `create_time` is stamped by
/// the first update after a reset. The time trigger lives here so status
/// variants can refine it (the SLS variant adds the minute bucket).
pub trait BatchStatus: Default + Send {
    fn reset(&mut self);

    fn update(&mut self, event: &Event);

    fn cnt(&self) -> u32;

    fn size(&self) -> u32;

    fn create_time(&self) -> u32;

    /// Time trigger, evaluated *before* adding `event`.
    fn reached_time_limit(&self, timeout_secs: u32, event: &Event) -> bool {
        let _ = event;
        unix_now().saturating_sub(self.create_time()) >= timeout_secs
    }
}

#[derive(Debug, Default)]
pub struct EventBatchStatus {
    pub(crate) cnt: u32,
    pub(crate) size_bytes: u32,
    pub(crate) create_time: u32,
}

impl BatchStatus for EventBatchStatus {
    fn reset(&mut self) {
        self.cnt = 0;
        self.size_bytes = 0;
        self.create_time = 0;
    }

    fn update(&mut self, event: &Event) {
        if self.create_time == 0 {
            self.create_time = unix_now();
        }
        self.size_bytes += event.data_size() as u32;
        self.cnt += 1;
    }

    fn cnt(&self) -> u32 {
        self.cnt
    }

    fn size(&self) -> u32 {
        self.size_bytes
    }

    fn create_time(&self) -> u32 {
        self.create_time
    }
}

/// SLS variant: additionally tracks the minute bucket of the first event so
/// batches never straddle a minute boundary, keeping server-side time
/// indexing clean.
#[derive(Debug, Default)]
pub struct SlsEventBatchStatus {
    pub(crate) cnt: u32,
    pub(crate) size_bytes: u32,
    pub(crate) create_time: u32,
    pub(crate) create_minute: u32,
}

impl BatchStatus for SlsEventBatchStatus {
    fn reset(&mut self) {
        self.cnt = 0;
        self.size_bytes = 0;
        self.create_time = 0;
        self.create_minute = 0;
    }

    fn update(&mut self, event: &Event) {
        if self.create_time == 0 {
            self.create_time = unix_now();
            self.create_minute = event.timestamp() / 60;
        }
        self.size_bytes += event.data_size() as u32;
        self.cnt += 1;
    }

    fn cnt(&self) -> u32 {
        self.cnt
    }

    fn size(&self) -> u32 {
        self.size_bytes
    }

    fn create_time(&self) -> u32 {
        self.create_time
    }

    fn reached_time_limit(&self, timeout_secs: u32, event: &Event) -> bool {
        unix_now().saturating_sub(self.create_time) >= timeout_secs
            || event.timestamp() / 60 != self.create_minute
    }
}

/// Counters of the group-level super-batch.
#[derive(Debug, Default)]
pub struct GroupBatchStatus {
    pub(crate) size_bytes: u32,
    pub(crate) create_time: u32,
}

impl GroupBatchStatus {
    pub fn reset(&mut self) {
        self.size_bytes = 0;
        self.create_time = 0;
    }

    pub fn update(&mut self, group: &BatchedEvents) {
        if self.create_time == 0 {
            self.create_time = unix_now();
        }
        self.size_bytes += group.size_bytes as u32;
    }

    pub fn size(&self) -> u32 {
        self.size_bytes
    }

    pub fn create_time(&self) -> u32 {
        self.create_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe::event::LogEvent;
    use logpipe::StringView;

    fn log_event(timestamp: u32) -> Event {
        let mut e = LogEvent::new(timestamp);
        e.add_content(StringView::from("key"), StringView::from("value"));
        e.into()
    }

    #[test]
    fn status_accumulates_on_update() {
        let mut status = EventBatchStatus::default();
        assert_eq!(status.create_time(), 0);
        status.update(&log_event(1_234_567_890));
        status.update(&log_event(1_234_567_890));
        assert_eq!(status.cnt(), 2);
        assert_eq!(status.size(), 16);
        assert!(status.create_time() > 0);

        status.reset();
        assert_eq!(status.cnt(), 0);
        assert_eq!(status.size(), 0);
        assert_eq!(status.create_time(), 0);
    }

    #[test]
    fn sls_status_tracks_create_minute() {
        let mut status = SlsEventBatchStatus::default();
        status.update(&log_event(1_717_398_001));
        assert_eq!(status.create_minute, 1_717_398_001 / 60);

        // Same minute: no time trigger with a generous timeout.
        assert!(!status.reached_time_limit(3600, &log_event(1_717_398_059)));
        // Next minute: fires regardless of the timeout.
        assert!(status.reached_time_limit(3600, &log_event(1_717_398_071)));
    }

    #[test]
    fn group_status_sums_batch_sizes() {
        let mut status = GroupBatchStatus::default();
        let mut batch = BatchedEvents::default();
        batch.size_bytes = 100;
        status.update(&batch);
        batch.size_bytes = 50;
        status.update(&batch);
        assert_eq!(status.size(), 150);
    }
}

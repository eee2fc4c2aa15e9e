//! Operator-facing alarm records.
//!
//! Components report notable conditions (config problems, discarded data,
//! send failures) as structured records that an exporter ships alongside
//! regular telemetry. The manager keeps a bounded in-memory window; when it
//! overflows, the oldest records are dropped and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmCategory {
    Config,
    Serialize,
    Compress,
    Send,
    Discard,
}

impl AlarmCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmCategory::Config => "CONFIG_ALARM",
            AlarmCategory::Serialize => "SERIALIZE_ALARM",
            AlarmCategory::Compress => "COMPRESS_ALARM",
            AlarmCategory::Send => "SEND_ALARM",
            AlarmCategory::Discard => "DISCARD_DATA_ALARM",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Alarm {
    pub category: AlarmCategory,
    pub message: String,
    pub project: String,
    pub logstore: String,
    pub region: String,
    pub module: String,
    pub config_name: String,
}

#[derive(Debug, Default)]
pub struct AlarmManager {
    alarms: Mutex<VecDeque<Alarm>>,
    dropped: AtomicU64,
}

impl AlarmManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_alarm(&self, alarm: Alarm) {
        let mut alarms = self.alarms.lock().unwrap_or_else(|e| e.into_inner());
        if alarms.len() >= DEFAULT_CAPACITY {
            alarms.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        alarms.push_back(alarm);
    }

    /// Take the buffered records for export.
    pub fn drain(&self) -> Vec<Alarm> {
        let mut alarms = self.alarms.lock().unwrap_or_else(|e| e.into_inner());
        alarms.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.alarms.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarms_are_buffered_and_drained() {
        let manager = AlarmManager::new();
        manager.send_alarm(Alarm {
            category: AlarmCategory::Config,
            message: "bad param".into(),
            project: "p".into(),
            logstore: "l".into(),
            region: "r".into(),
            module: "flusher_sls".into(),
            config_name: "c".into(),
        });
        assert_eq!(manager.len(), 1);
        let drained = manager.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].category, AlarmCategory::Config);
        assert!(manager.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let manager = AlarmManager::new();
        for i in 0..(DEFAULT_CAPACITY + 10) {
            manager.send_alarm(Alarm {
                category: AlarmCategory::Send,
                message: format!("m{i}"),
                project: String::new(),
                logstore: String::new(),
                region: String::new(),
                module: String::new(),
                config_name: String::new(),
            });
        }
        assert_eq!(manager.len(), DEFAULT_CAPACITY);
        assert_eq!(manager.dropped(), 10);
    }
}

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one streaming session.
#[derive(Default)]
pub struct SessionStats {
    opened_ms: AtomicU64,

    frames_received: AtomicU64,
    frames_failed: AtomicU64,
    messages_dispatched: AtomicU64,
    frames_sent: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_opened(&self, now_ms: u64) {
        self.opened_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn inc_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dispatched(&self, n: u64) {
        self.messages_dispatched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, now_ms: u64) -> StatsSnapshot {
        let opened = self.opened_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            up_sec: if opened == 0 { 0 } else { now_ms.saturating_sub(opened) / 1000 },
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub up_sec: u64,
    pub frames_received: u64,
    pub frames_failed: u64,
    pub messages_dispatched: u64,
    pub frames_sent: u64,
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts events and reports their rate over a rolling window.
#[derive(Debug, Clone)]
pub struct RateTracker {
    window: Duration,
    total: u64,
    recent: VecDeque<Instant>,
}

impl RateTracker {
    pub fn new(window: Duration) -> Self {
        Self { window, total: 0, recent: VecDeque::new() }
    }

    pub fn track(&mut self) {
        self.track_at(Instant::now());
    }

    pub fn track_at(&mut self, now: Instant) {
        self.total += 1;
        self.recent.push_back(now);
        self.evict(now);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Events per second over the window ending at `now`.
    pub fn rate_at(&mut self, now: Instant) -> f64 {
        self.evict(now);
        self.recent.len() as f64 / self.window.as_secs_f64()
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.recent.clear();
    }

    fn evict(&mut self, now: Instant) {
        while self
            .recent
            .front()
            .map_or(false, |t| now.saturating_duration_since(*t) > self.window)
        {
            self.recent.pop_front();
        }
    }
}

/// Snapshot of [`crate::VideoFrameQueue`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameQueueStats {
    pub queued_total: u64,
    pub dequeued_total: u64,
    pub dropped_total: u64,
    pub queued_per_sec: f64,
    pub dequeued_per_sec: f64,
    pub dropped_per_sec: f64,
    /// Frames currently waiting.
    pub len: usize,
}

impl std::fmt::Display for FrameQueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "queued {} ({:.1}/s), dequeued {} ({:.1}/s), dropped {} ({:.1}/s), waiting {}",
            self.queued_total,
            self.queued_per_sec,
            self.dequeued_total,
            self.dequeued_per_sec,
            self.dropped_total,
            self.dropped_per_sec,
            self.len
        )
    }
}

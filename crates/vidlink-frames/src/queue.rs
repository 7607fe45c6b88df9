use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;
use vidlink_core::{FrameError, VidLinkError};

use crate::frame::{I420FrameStorage, I420FrameView};
use crate::stats::{FrameQueueStats, RateTracker};

/// Bounded, internally synchronized queue of decoded frames.
///
/// Any thread may [`enqueue`](Self::enqueue); when the queue is full the
/// oldest waiting frame is evicted and counted as dropped, so the consumer
/// always sees the most recent `capacity` frames.
pub struct VideoFrameQueue {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    frames: VecDeque<I420FrameStorage>,
    pool: Vec<I420FrameStorage>,
    queued: RateTracker,
    dequeued: RateTracker,
    dropped: RateTracker,
}

impl VideoFrameQueue {
    pub const DEFAULT_STATS_WINDOW: Duration = Duration::from_secs(1);

    pub fn new(capacity: usize) -> Result<Self, VidLinkError> {
        Self::with_stats_window(capacity, Self::DEFAULT_STATS_WINDOW)
    }

    pub fn with_stats_window(capacity: usize, window: Duration) -> Result<Self, VidLinkError> {
        if capacity == 0 {
            return Err(VidLinkError::ConfigurationInvalid {
                reason: "frame queue capacity must be at least 1".into(),
            });
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                pool: Vec::with_capacity(capacity),
                queued: RateTracker::new(window),
                dequeued: RateTracker::new(window),
                dropped: RateTracker::new(window),
            }),
        })
    }

    /// Copies `view` into a pooled storage and appends it.
    ///
    /// The copy happens outside the lock; an invalid view leaves the queue
    /// untouched.
    pub fn enqueue(&self, view: &I420FrameView<'_>) -> Result<(), FrameError> {
        let mut storage = self.lock().pool.pop().unwrap_or_default();
        if let Err(e) = storage.copy_from(view) {
            self.recycle(storage);
            return Err(e);
        }

        let now = Instant::now();
        let mut inner = self.lock();
        while inner.frames.len() >= self.capacity {
            if let Some(oldest) = inner.frames.pop_front() {
                trace!("Frame queue full, evicting frame ts={}us", oldest.timestamp_us());
                inner.dropped.track_at(now);
                inner.return_to_pool(oldest, self.capacity);
            }
        }
        inner.frames.push_back(storage);
        inner.queued.track_at(now);
        Ok(())
    }

    /// Takes the oldest waiting frame. Hand it back with [`recycle`](Self::recycle)
    /// once rendered.
    pub fn try_dequeue(&self) -> Option<I420FrameStorage> {
        let mut inner = self.lock();
        let frame = inner.frames.pop_front()?;
        inner.dequeued.track();
        Some(frame)
    }

    /// Returns a storage to the pool for reuse by later frames.
    pub fn recycle(&self, storage: I420FrameStorage) {
        self.lock().return_to_pool(storage, self.capacity);
    }

    /// Discards all waiting frames (their storage is kept for reuse).
    pub fn clear(&self) {
        let mut inner = self.lock();
        while let Some(frame) = inner.frames.pop_front() {
            inner.return_to_pool(frame, self.capacity);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Storages currently idle in the pool.
    pub fn pooled(&self) -> usize {
        self.lock().pool.len()
    }

    pub fn stats(&self) -> FrameQueueStats {
        let now = Instant::now();
        let mut inner = self.lock();
        FrameQueueStats {
            queued_total: inner.queued.total(),
            dequeued_total: inner.dequeued.total(),
            dropped_total: inner.dropped.total(),
            queued_per_sec: inner.queued.rate_at(now),
            dequeued_per_sec: inner.dequeued.rate_at(now),
            dropped_per_sec: inner.dropped.rate_at(now),
            len: inner.frames.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Inner holds plain buffers and counters; a panic mid-update cannot
        // leave it in a state worse than a lost frame.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn return_to_pool(&mut self, storage: I420FrameStorage, limit: usize) {
        if self.pool.len() < limit {
            self.pool.push(storage);
        }
    }
}

impl std::fmt::Debug for VideoFrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrameQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use vidlink_core::Resolution;

    const RES: Resolution = Resolution { width: 4, height: 2 };

    /// Enqueues a frame whose planes are filled with `tag`.
    fn push(queue: &VideoFrameQueue, tag: u8) {
        let y = vec![tag; RES.total_pixels() as usize];
        let c = vec![tag; RES.chroma().total_pixels() as usize];
        let view = I420FrameView::packed(RES, &y, &c, &c, tag as u64);
        queue.enqueue(&view).unwrap();
    }

    fn drain_tags(queue: &VideoFrameQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.try_dequeue()).map(|f| f.timestamp_us()).collect()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            VideoFrameQueue::new(0),
            Err(VidLinkError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn fifo_order() {
        let queue = VideoFrameQueue::new(5).unwrap();
        for tag in 1..=3 {
            push(&queue, tag);
        }
        assert_eq!(queue.len(), 3);
        let first = queue.try_dequeue().unwrap();
        assert_eq!(first.y()[0], 1);
        assert_eq!(drain_tags(&queue), vec![2, 3]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let queue = VideoFrameQueue::new(5).unwrap();
        for tag in 1..=7 {
            push(&queue, tag);
        }
        assert_eq!(queue.len(), 5);
        let stats = queue.stats();
        assert_eq!(stats.queued_total, 7);
        assert_eq!(stats.dropped_total, 2);
        assert_eq!(drain_tags(&queue), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn frames_from_two_threads_land_in_delivery_order() {
        let queue = Arc::new(VideoFrameQueue::new(5).unwrap());
        for tag in 1..=4 {
            push(&queue, tag);
        }

        // frame1 then frame2, each from its own background thread
        for tag in [10, 20] {
            let q = Arc::clone(&queue);
            thread::spawn(move || push(&q, tag)).join().unwrap();
        }

        assert_eq!(queue.stats().dropped_total, 1);
        assert_eq!(drain_tags(&queue), vec![2, 3, 4, 10, 20]);
    }

    #[test]
    fn invalid_view_leaves_queue_untouched() {
        let queue = VideoFrameQueue::new(2).unwrap();
        push(&queue, 1);
        let y = [0u8; 2];
        let view = I420FrameView::packed(RES, &y, &y, &y, 0);
        assert!(queue.enqueue(&view).is_err());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().queued_total, 1);
    }

    #[test]
    fn recycled_storage_is_reused() {
        let queue = VideoFrameQueue::new(3).unwrap();
        push(&queue, 1);
        let frame = queue.try_dequeue().unwrap();
        assert_eq!(queue.pooled(), 0);
        queue.recycle(frame);
        assert_eq!(queue.pooled(), 1);

        push(&queue, 2);
        assert_eq!(queue.pooled(), 0);
        assert_eq!(queue.stats().dequeued_total, 1);
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let queue = VideoFrameQueue::new(2).unwrap();
        for _ in 0..5 {
            queue.recycle(I420FrameStorage::new());
        }
        assert_eq!(queue.pooled(), 2);
    }

    #[test]
    fn clear_moves_frames_to_pool() {
        let queue = VideoFrameQueue::new(4).unwrap();
        for tag in 1..=3 {
            push(&queue, tag);
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pooled(), 3);
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(VideoFrameQueue::new(5).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..200 {
                        push(&q, p);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.queued_total, 800);
        assert_eq!(stats.dropped_total, 795);
        assert_eq!(queue.len(), 5);
    }
}

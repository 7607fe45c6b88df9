//! vidlink-frames: decoded frame hand-off
//!
//! Frame-ready callbacks lend an [`I420FrameView`] whose planes are only valid
//! for the duration of the call. [`VideoFrameQueue::enqueue`] copies it into a
//! pooled [`I420FrameStorage`]; the consumer takes storages out with
//! [`VideoFrameQueue::try_dequeue`] and hands them back with
//! [`VideoFrameQueue::recycle`] so steady-state streaming does not allocate.

pub mod frame;
pub mod queue;
pub mod stats;

pub use frame::{I420FrameStorage, I420FrameView};
pub use queue::VideoFrameQueue;
pub use stats::{FrameQueueStats, RateTracker};

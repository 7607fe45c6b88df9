//! Stand-in for the remote side of a peer connection.
//!
//! Brings a [`LocalPeerConnection`] up, announces a video track and feeds
//! synthetic I420 frames from two "decoder" threads, the way a native WebRTC
//! stack calls back from its own worker threads. Stopping removes the track
//! and shuts the connection down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};
use vidlink_core::{ReceiverConfig, Resolution};
use vidlink_frames::I420FrameView;
use vidlink_webrtc::{LocalPeerConnection, LocalTrackSource};

const DECODER_THREADS: u64 = 2;

// ── Synthetic frames ──────────────────────────────────────────────────────────

/// Scrolling luma gradient with a slowly cycling chroma tint.
pub struct SyntheticFrames {
    resolution: Resolution,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl SyntheticFrames {
    pub fn new(resolution: Resolution) -> Self {
        let chroma = resolution.chroma().total_pixels() as usize;
        Self {
            resolution,
            y: vec![0; resolution.total_pixels() as usize],
            u: vec![128; chroma],
            v: vec![128; chroma],
        }
    }

    /// Renders frame `index`; the view borrows this generator's buffers.
    pub fn render(&mut self, index: u64, timestamp_us: u64) -> I420FrameView<'_> {
        let width = self.resolution.width as usize;
        for (i, px) in self.y.iter_mut().enumerate() {
            *px = ((i % width) as u64 + index) as u8;
        }
        self.v.fill((index * 4) as u8);
        I420FrameView::packed(self.resolution, &self.y, &self.u, &self.v, timestamp_us)
    }
}

// ── Simulator thread ──────────────────────────────────────────────────────────

/// Running simulator. [`stop`](Self::stop) tears the connection down.
pub struct RemotePeerSimulator {
    stop: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    thread: JoinHandle<Result<()>>,
}

impl RemotePeerSimulator {
    pub fn spawn(peer: Arc<LocalPeerConnection>, config: &ReceiverConfig) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let frames_sent = Arc::new(AtomicU64::new(0));
        let resolution = config.simulated_resolution;
        let interval = config.frame_interval();

        let (st, fs) = (Arc::clone(&stop), Arc::clone(&frames_sent));
        let thread = thread::Builder::new()
            .name("vidlink-network".into())
            .spawn(move || run_remote_peer(&peer, resolution, interval, &st, &fs))
            .context("spawning simulator thread")?;

        Ok(Self { stop, frames_sent, thread })
    }

    /// Frames handed to the track source so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Stops producing, removes the track and shuts the connection down.
    /// Returns the total number of frames sent.
    pub fn stop(self) -> Result<u64> {
        self.stop.store(true, Ordering::Release);
        self.thread
            .join()
            .map_err(|_| anyhow!("simulator thread panicked"))??;
        Ok(self.frames_sent.load(Ordering::Relaxed))
    }
}

fn run_remote_peer(
    peer: &LocalPeerConnection,
    resolution: Resolution,
    interval: Duration,
    stop: &AtomicBool,
    frames_sent: &AtomicU64,
) -> Result<()> {
    let source = peer.initialize().context("initializing peer connection")?;
    info!("Remote peer up, announcing {} video track", resolution);
    source.add_track();

    let start = Instant::now();
    thread::scope(|s| -> Result<()> {
        for lane in 0..DECODER_THREADS {
            let source = &source;
            thread::Builder::new()
                .name(format!("vidlink-decode-{lane}"))
                .spawn_scoped(s, move || {
                    decode_lane(source, resolution, interval, lane, start, stop, frames_sent)
                })
                .context("spawning decoder thread")?;
        }
        Ok(())
    })?;

    info!("Remote peer removing video track after {} frames", frames_sent.load(Ordering::Relaxed));
    source.remove_track();
    peer.shutdown().context("shutting down peer connection")?;
    Ok(())
}

/// Delivers every `DECODER_THREADS`-th frame starting at `lane`, paced to the
/// configured frame rate.
fn decode_lane(
    source: &LocalTrackSource,
    resolution: Resolution,
    interval: Duration,
    lane: u64,
    start: Instant,
    stop: &AtomicBool,
    frames_sent: &AtomicU64,
) {
    let mut frames = SyntheticFrames::new(resolution);
    let mut index = lane;
    while !stop.load(Ordering::Acquire) {
        let due = start + interval * index as u32;
        let now = Instant::now();
        if due > now {
            // Short naps keep stop() responsive at low frame rates
            thread::sleep((due - now).min(Duration::from_millis(10)));
            continue;
        }

        let timestamp_us = (due - start).as_micros() as u64;
        source.deliver_frame(&frames.render(index, timestamp_us));
        frames_sent.fetch_add(1, Ordering::Relaxed);
        index += DECODER_THREADS;
    }
    debug!("Decoder lane {} exiting at frame {}", lane, index);
}

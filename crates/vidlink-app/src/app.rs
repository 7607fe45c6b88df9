use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, trace};
use vidlink_core::ReceiverConfig;
use vidlink_dispatch::main_thread_queue;
use vidlink_frames::{FrameQueueStats, VideoFrameQueue};
use vidlink_webrtc::{LocalPeerConnection, PeerConnection, RemoteVideoSource};

use crate::simulator::RemotePeerSimulator;

const DEFAULT_RUN_SECS: u64 = 10;

/// Totals reported when the receiver loop ends.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub frames_sent: u64,
    pub frames_consumed: u64,
    pub streams_started: u64,
    pub streams_stopped: u64,
    pub actions_drained: u64,
    pub stats: FrameQueueStats,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} consumed={} dropped={} streams started={} stopped={} actions={}",
            self.frames_sent,
            self.frames_consumed,
            self.stats.dropped_total,
            self.streams_started,
            self.streams_stopped,
            self.actions_drained
        )
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Reads the receiver config and run time from the environment.
///
/// - `VIDLINK_CONFIG`: path to a JSON [`ReceiverConfig`] (defaults otherwise)
/// - `VIDLINK_AUTO_PLAY`: `1`/`true`/`on` or `0`/`false`/`off`
/// - `VIDLINK_RUN_SECS`: how long to run before shutting down (default 10)
pub fn load_settings() -> Result<(ReceiverConfig, Duration)> {
    let mut config = match std::env::var("VIDLINK_CONFIG") {
        Ok(path) => ReceiverConfig::from_file(&path)
            .with_context(|| format!("loading receiver config from {path}"))?,
        Err(_) => ReceiverConfig::default(),
    };

    if let Ok(raw) = std::env::var("VIDLINK_AUTO_PLAY") {
        config.auto_play = parse_flag(&raw)
            .with_context(|| format!("VIDLINK_AUTO_PLAY={raw}"))?;
    }

    let run_secs = std::env::var("VIDLINK_RUN_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_RUN_SECS)
        .max(1);

    Ok((config, Duration::from_secs(run_secs)))
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("expected a boolean flag, got '{other}'"),
    }
}

// ── Receiver loop ─────────────────────────────────────────────────────────────

/// Runs the receiver for `run_for`, then shuts the remote peer down.
///
/// The calling thread is the consumer: it drains deferred actions and the
/// frame queue once per tick, the way a render loop would.
pub fn run(config: ReceiverConfig, run_for: Duration) -> Result<RunSummary> {
    config.validate().context("invalid receiver config")?;
    info!(
        "auto_play={} queue_capacity={} tick={}ms simulated={} @ {} fps",
        config.auto_play,
        config.frame_queue_capacity,
        config.tick_interval_ms,
        config.simulated_resolution,
        config.simulated_fps
    );

    let (actions, mut pump) = main_thread_queue();
    let peer = Arc::new(LocalPeerConnection::new());
    let video = RemoteVideoSource::from_config(
        Arc::clone(&peer) as Arc<dyn PeerConnection>,
        &config,
        actions,
    )?;

    let started = Arc::new(AtomicU64::new(0));
    let stopped = Arc::new(AtomicU64::new(0));
    let s = Arc::clone(&started);
    video.on_stream_started(move || {
        s.fetch_add(1, Ordering::Relaxed);
        info!("Remote stream started, presenting frames");
    });
    let s = Arc::clone(&stopped);
    video.on_stream_stopped(move || {
        s.fetch_add(1, Ordering::Relaxed);
        info!("Remote stream stopped");
    });

    let simulator = RemotePeerSimulator::spawn(Arc::clone(&peer), &config)?;

    let tick = config.tick_interval();
    let window = config.stats_window();
    let deadline = Instant::now() + run_for;
    let mut next_stats = Instant::now() + window;
    let mut summary = RunSummary::default();

    while Instant::now() < deadline {
        let tick_start = Instant::now();
        summary.actions_drained += pump.drain_once()?.executed as u64;
        summary.frames_consumed += consume_frames(video.frame_queue());

        if tick_start >= next_stats {
            info!(
                "[{}] sent={} | {}",
                video.connection_id(),
                simulator.frames_sent(),
                video.frame_queue().stats()
            );
            next_stats += window;
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick {
            thread::sleep(tick - elapsed);
        }
    }

    info!("Run time elapsed, shutting down remote peer");
    summary.frames_sent = simulator.stop()?;

    // One last tick picks up the track-removed notification and any frames
    // that arrived before shutdown.
    summary.actions_drained += pump.drain_once()?.executed as u64;
    summary.frames_consumed += consume_frames(video.frame_queue());
    video.detach();

    summary.streams_started = started.load(Ordering::Relaxed);
    summary.streams_stopped = stopped.load(Ordering::Relaxed);
    summary.stats = video.frame_queue().stats();
    Ok(summary)
}

/// Presents every waiting frame and returns its storage to the pool.
fn consume_frames(queue: &VideoFrameQueue) -> u64 {
    let mut consumed = 0;
    while let Some(frame) = queue.try_dequeue() {
        trace!("Presenting {} frame ts={}us", frame.resolution(), frame.timestamp_us());
        queue.recycle(frame);
        consumed += 1;
    }
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidlink_core::Resolution;

    fn quick_config(auto_play: bool) -> ReceiverConfig {
        ReceiverConfig {
            auto_play,
            tick_interval_ms: 5,
            stats_window_ms: 100,
            simulated_fps: 120,
            simulated_resolution: Resolution::new(32, 16),
            ..Default::default()
        }
    }

    #[test]
    fn parses_flags() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(parse_flag(" on ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn receiver_loop_consumes_every_frame_it_does_not_drop() {
        let summary = run(quick_config(true), Duration::from_millis(400)).unwrap();

        assert_eq!(summary.streams_started, 1);
        assert_eq!(summary.streams_stopped, 1);
        // started, stopped, and the streaming reset on shutdown
        assert_eq!(summary.actions_drained, 3);
        assert!(summary.frames_sent > 0);
        assert_eq!(summary.stats.queued_total, summary.frames_sent);
        assert_eq!(
            summary.frames_consumed + summary.stats.dropped_total,
            summary.frames_sent
        );
        assert_eq!(summary.stats.len, 0);
    }

    #[test]
    fn receiver_loop_without_auto_play_sees_nothing() {
        let summary = run(quick_config(false), Duration::from_millis(200)).unwrap();

        assert_eq!(summary.streams_started, 0);
        assert_eq!(summary.frames_consumed, 0);
        assert_eq!(summary.actions_drained, 0);
        assert_eq!(summary.stats.queued_total, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ReceiverConfig { tick_interval_ms: 0, ..Default::default() };
        assert!(run(config, Duration::from_millis(10)).is_err());
    }
}

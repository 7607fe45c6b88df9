//! `RemoteVideoSource` forwards a peer connection's remote video to the
//! consumer thread.
//!
//! # Binding
//!
//! ```text
//!            Initialized (auto-play on)
//!   Unbound ───────────────────────────► Bound
//!      ▲                                   │
//!      └────────────── Shutdown ───────────┘
//! ```
//!
//! While bound the source holds three subscriptions on the connection's
//! [`TrackEventSource`]:
//!
//! | Event         | Runs on          | Action                                            |
//! |---------------|------------------|---------------------------------------------------|
//! | track added   | callback thread  | queue "stream started" for the consumer thread    |
//! | track removed | callback thread  | queue "stream stopped" for the consumer thread    |
//! | frame ready   | callback thread  | copy straight into the [`VideoFrameQueue`]        |
//!
//! Unbinding removes all three and closes a gate shared with the handlers,
//! waiting out any frame copy already in progress, so once `Shutdown`
//! returns nothing more reaches the frame queue. It also queues a reset of
//! [`is_streaming`](RemoteVideoSource::is_streaming), since a connection can
//! go away without a track-removed event. Stream listeners only ever run
//! inside [`ActionPump::drain_once`](vidlink_dispatch::ActionPump::drain_once);
//! a panicking listener is logged and the rest still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, error, info, warn};
use vidlink_core::{ConnectionId, ReceiverConfig, SubscriptionId, VidLinkError};
use vidlink_dispatch::ActionSender;
use vidlink_frames::VideoFrameQueue;

use crate::event::EventSource;
use crate::peer::{
    frame_handler, FrameHandler, LifecycleEvent, PeerConnection, TrackEventSource, TrackHandler,
};

// MARK: - Gate

/// Open while bound. Handlers run their work under the read lock; closing
/// takes the write lock and so waits for in-flight work to finish.
struct Gate(RwLock<bool>);

impl Gate {
    fn open() -> Self {
        Self(RwLock::new(true))
    }

    fn run_if_open(&self, f: impl FnOnce()) -> bool {
        let open = self.0.read().unwrap_or_else(PoisonError::into_inner);
        if *open {
            f();
        }
        *open
    }

    fn close(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

// MARK: - BindingState

enum BindingState {
    Unbound,
    Bound(Binding),
}

struct Binding {
    source: Arc<dyn TrackEventSource>,
    subscriptions: [SubscriptionId; 3],
    gate: Arc<Gate>,
}

// MARK: - RemoteVideoSource

/// Lifecycle-gated bridge between a [`PeerConnection`] and the consumer
/// thread. Create with [`attach`](Self::attach); dropping the last handle (or
/// calling [`detach`](Self::detach)) releases every subscription.
pub struct RemoteVideoSource {
    peer: Arc<dyn PeerConnection>,
    auto_play: AtomicBool,
    frame_queue: Arc<VideoFrameQueue>,
    actions: ActionSender,
    stream_started: Arc<EventSource<TrackHandler>>,
    stream_stopped: Arc<EventSource<TrackHandler>>,
    streaming: Arc<AtomicBool>,
    frames_rejected: Arc<AtomicU64>,
    // Bumped on every `Shutdown`; lets `attach` tell whether the source it
    // looked up is still live when it gets to bind.
    shutdowns: AtomicU64,
    binding: Mutex<BindingState>,
    lifecycle_sub: Mutex<Option<SubscriptionId>>,
}

impl RemoteVideoSource {
    /// Subscribes to `peer`'s lifecycle. If the connection is already
    /// initialized the source binds immediately (when auto-play is on).
    pub fn attach(
        peer: Arc<dyn PeerConnection>,
        auto_play: bool,
        frame_queue: Arc<VideoFrameQueue>,
        actions: ActionSender,
    ) -> Arc<Self> {
        let this = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let lifecycle_sub = peer.subscribe_lifecycle(Arc::new(move |event: &LifecycleEvent| {
                if let Some(this) = weak.upgrade() {
                    this.on_lifecycle(event);
                }
            }));

            Self {
                peer: Arc::clone(&peer),
                auto_play: AtomicBool::new(auto_play),
                frame_queue,
                actions,
                stream_started: Arc::new(EventSource::new()),
                stream_stopped: Arc::new(EventSource::new()),
                streaming: Arc::new(AtomicBool::new(false)),
                frames_rejected: Arc::new(AtomicU64::new(0)),
                shutdowns: AtomicU64::new(0),
                binding: Mutex::new(BindingState::Unbound),
                lifecycle_sub: Mutex::new(Some(lifecycle_sub)),
            }
        });

        debug!("[{}] Remote video source attached (auto_play={})", this.connection_id(), auto_play);
        let seen = this.shutdowns.load(Ordering::SeqCst);
        if let Some(source) = this.peer.track_events() {
            if this.auto_play() {
                this.bind(source, Some(seen));
            } else {
                info!(
                    "[{}] Peer connection already up with auto-play off, not subscribing",
                    this.connection_id()
                );
            }
        }
        this
    }

    /// [`attach`](Self::attach) with a frame queue sized from `config`.
    pub fn from_config(
        peer: Arc<dyn PeerConnection>,
        config: &ReceiverConfig,
        actions: ActionSender,
    ) -> Result<Arc<Self>, VidLinkError> {
        config.validate()?;
        let queue = VideoFrameQueue::with_stats_window(config.frame_queue_capacity, config.stats_window())?;
        Ok(Self::attach(peer, config.auto_play, Arc::new(queue), actions))
    }

    /// Registers a listener run on the consumer thread when a remote track
    /// starts.
    pub fn on_stream_started(&self, f: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.stream_started.subscribe(Arc::new(f))
    }

    /// Registers a listener run on the consumer thread when the remote track
    /// goes away.
    pub fn on_stream_stopped(&self, f: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.stream_stopped.subscribe(Arc::new(f))
    }

    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.stream_started.unsubscribe(id) || self.stream_stopped.unsubscribe(id)
    }

    /// Takes effect at the next `Initialized`; an existing binding is left
    /// alone.
    pub fn set_auto_play(&self, enabled: bool) {
        self.auto_play.store(enabled, Ordering::Relaxed);
    }

    pub fn auto_play(&self) -> bool {
        self.auto_play.load(Ordering::Relaxed)
    }

    pub fn is_bound(&self) -> bool {
        matches!(*self.lock_binding(), BindingState::Bound(_))
    }

    /// Whether a "stream started" has been processed on the consumer thread
    /// without a matching "stream stopped" or a shutdown since.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn frame_queue(&self) -> &Arc<VideoFrameQueue> {
        &self.frame_queue
    }

    /// Frames refused by the queue (malformed views).
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.peer.id()
    }

    /// Stops listening to the peer connection and releases any binding.
    /// Safe to call more than once.
    pub fn detach(&self) {
        let sub = self
            .lifecycle_sub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = sub {
            self.peer.unsubscribe_lifecycle(id);
            debug!("[{}] Remote video source detached", self.connection_id());
        }
        self.unbind();
    }

    fn on_lifecycle(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Initialized(source) => {
                if !self.auto_play() {
                    info!(
                        "[{}] Peer connection initialized with auto-play off, not subscribing",
                        self.connection_id()
                    );
                    return;
                }
                self.bind(Arc::clone(source), None);
            }
            LifecycleEvent::Shutdown => {
                self.shutdowns.fetch_add(1, Ordering::SeqCst);
                self.unbind();
            }
        }
    }

    /// With `shutdowns_seen`, binding is skipped if a `Shutdown` arrived
    /// since that count was read.
    fn bind(&self, source: Arc<dyn TrackEventSource>, shutdowns_seen: Option<u64>) {
        let mut state = self.lock_binding();
        if shutdowns_seen.is_some_and(|seen| seen != self.shutdowns.load(Ordering::SeqCst)) {
            debug!("[{}] Connection shut down while attaching, not binding", self.connection_id());
            return;
        }
        if let BindingState::Bound(_) = *state {
            warn!("[{}] Already bound, ignoring Initialized", self.connection_id());
            return;
        }

        let gate = Arc::new(Gate::open());
        let added = source.subscribe_track_added(self.track_handler(&gate, true));
        let removed = source.subscribe_track_removed(self.track_handler(&gate, false));
        let frames = source.subscribe_frame_ready(self.frame_ready_handler(&gate));

        *state = BindingState::Bound(Binding {
            source,
            subscriptions: [added, removed, frames],
            gate,
        });
        info!("[{}] Subscribed to remote track and frame callbacks", self.connection_id());
    }

    fn unbind(&self) {
        let previous = std::mem::replace(&mut *self.lock_binding(), BindingState::Unbound);
        let BindingState::Bound(binding) = previous else {
            debug!("[{}] Not bound, nothing to unsubscribe", self.connection_id());
            return;
        };

        binding.gate.close();
        // A connection may go away without announcing track removal
        let streaming = Arc::clone(&self.streaming);
        self.actions.enqueue(move || streaming.store(false, Ordering::Release));

        let detached = binding
            .subscriptions
            .iter()
            .filter(|id| binding.source.unsubscribe(**id))
            .count();
        info!(
            "[{}] Unsubscribed from remote video callbacks ({}/3 detached)",
            self.connection_id(),
            detached
        );
    }

    /// Track added (`started = true`) or removed: defer the listener call to
    /// the consumer thread.
    fn track_handler(&self, gate: &Arc<Gate>, started: bool) -> Arc<TrackHandler> {
        let gate = Arc::clone(gate);
        let actions = self.actions.clone();
        let listeners = if started {
            Arc::clone(&self.stream_started)
        } else {
            Arc::clone(&self.stream_stopped)
        };
        let streaming = Arc::clone(&self.streaming);
        let conn = self.connection_id();

        Arc::new(move || {
            gate.run_if_open(|| {
                let listeners = Arc::clone(&listeners);
                let streaming = Arc::clone(&streaming);
                actions.enqueue(move || {
                    streaming.store(started, Ordering::Release);
                    let label = if started { "started" } else { "stopped" };
                    info!("[{}] Video stream {}", conn, label);
                    for listener in listeners.handlers() {
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener())) {
                            error!(
                                "[{}] Stream {} listener panicked: {}",
                                conn,
                                label,
                                panic_message(payload.as_ref())
                            );
                        }
                    }
                });
            });
        })
    }

    fn frame_ready_handler(&self, gate: &Arc<Gate>) -> Arc<FrameHandler> {
        let gate = Arc::clone(gate);
        let queue = Arc::clone(&self.frame_queue);
        let rejected = Arc::clone(&self.frames_rejected);
        let conn = self.connection_id();

        frame_handler(move |view| {
            gate.run_if_open(|| {
                if let Err(e) = queue.enqueue(view) {
                    let count = rejected.fetch_add(1, Ordering::Relaxed) + 1;
                    if count < 20 || count % 120 == 0 {
                        warn!("[{}] Dropping malformed frame ({} so far): {}", conn, count, e);
                    }
                }
            });
        })
    }

    fn lock_binding(&self) -> MutexGuard<'_, BindingState> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

impl Drop for RemoteVideoSource {
    fn drop(&mut self) {
        self.detach();
    }
}

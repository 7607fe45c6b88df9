//! Peer connection collaborator interfaces and an in-process implementation.
//!
//! A real peer connection owns ICE, codecs and the decoder; all the video
//! source needs from it is:
//!
//! - lifecycle notifications (`Initialized` once, then `Shutdown` once),
//! - while initialized, a [`TrackEventSource`] raising track added / track
//!   removed / frame ready on the connection's own threads.
//!
//! [`LocalPeerConnection`] drives those callbacks directly so the receiver
//! can be exercised without a network stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use vidlink_core::{ConnectionId, SubscriptionId, VidLinkError};
use vidlink_frames::I420FrameView;

use crate::event::EventSource;

// MARK: - Handler types

/// Zero-argument track notification.
pub type TrackHandler = dyn Fn() + Send + Sync;

/// Receives one decoded frame, borrowed for the duration of the call.
pub type FrameHandler = dyn Fn(&I420FrameView<'_>) + Send + Sync;

pub type LifecycleHandler = dyn Fn(&LifecycleEvent) + Send + Sync;

/// Wraps a closure as a [`FrameHandler`].
pub fn frame_handler<F>(f: F) -> Arc<FrameHandler>
where
    F: Fn(&I420FrameView<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

// MARK: - LifecycleEvent

#[derive(Clone)]
pub enum LifecycleEvent {
    /// The connection is up; track and frame callbacks may be attached to
    /// the given source until `Shutdown`.
    Initialized(Arc<dyn TrackEventSource>),
    /// The connection is going away. Handlers must detach from the track
    /// source before returning.
    Shutdown,
}

impl std::fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized(_) => write!(f, "Initialized"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

// MARK: - Traits

/// Native track/frame callbacks of an initialized connection.
pub trait TrackEventSource: Send + Sync {
    fn subscribe_track_added(&self, handler: Arc<TrackHandler>) -> SubscriptionId;

    fn subscribe_track_removed(&self, handler: Arc<TrackHandler>) -> SubscriptionId;

    fn subscribe_frame_ready(&self, handler: Arc<FrameHandler>) -> SubscriptionId;

    /// Detaches a handler from whichever event it was attached to.
    /// Returns `false` if it was not attached.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Lifecycle side of a peer connection.
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn subscribe_lifecycle(&self, handler: Arc<LifecycleHandler>) -> SubscriptionId;

    fn unsubscribe_lifecycle(&self, id: SubscriptionId) -> bool;

    /// Track source of the live connection, `None` before `Initialized` and
    /// after `Shutdown`.
    fn track_events(&self) -> Option<Arc<dyn TrackEventSource>>;

    fn is_initialized(&self) -> bool {
        self.track_events().is_some()
    }
}

// MARK: - LocalTrackSource

/// In-process [`TrackEventSource`]. Handlers run on whichever thread calls
/// [`add_track`](Self::add_track), [`remove_track`](Self::remove_track) or
/// [`deliver_frame`](Self::deliver_frame).
pub struct LocalTrackSource {
    connection: ConnectionId,
    track_added: EventSource<TrackHandler>,
    track_removed: EventSource<TrackHandler>,
    frame_ready: EventSource<FrameHandler>,
    closed: AtomicBool,
}

impl LocalTrackSource {
    fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            track_added: EventSource::new(),
            track_removed: EventSource::new(),
            frame_ready: EventSource::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Raises track added. Returns the number of handlers notified.
    pub fn add_track(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let handlers = self.track_added.handlers();
        debug!("[{}] Track added ({} handlers)", self.connection, handlers.len());
        for h in &handlers {
            h();
        }
        handlers.len()
    }

    /// Raises track removed. Returns the number of handlers notified.
    pub fn remove_track(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let handlers = self.track_removed.handlers();
        debug!("[{}] Track removed ({} handlers)", self.connection, handlers.len());
        for h in &handlers {
            h();
        }
        handlers.len()
    }

    /// Raises frame ready. Returns the number of handlers notified.
    pub fn deliver_frame(&self, frame: &I420FrameView<'_>) -> usize {
        if self.is_closed() {
            return 0;
        }
        let handlers = self.frame_ready.handlers();
        for h in &handlers {
            h(frame);
        }
        handlers.len()
    }

    /// Handlers attached across all three events.
    pub fn handler_count(&self) -> usize {
        self.track_added.len() + self.track_removed.len() + self.frame_ready.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let leftover = self.handler_count();
        if leftover > 0 {
            warn!(
                "[{}] {} handler(s) still attached at shutdown, dropping them",
                self.connection, leftover
            );
        }
        self.track_added.clear();
        self.track_removed.clear();
        self.frame_ready.clear();
    }

    fn refuse_if_closed(&self, what: &str) -> bool {
        if self.is_closed() {
            warn!("[{}] Ignoring {} subscription on closed source", self.connection, what);
            return true;
        }
        false
    }
}

impl TrackEventSource for LocalTrackSource {
    fn subscribe_track_added(&self, handler: Arc<TrackHandler>) -> SubscriptionId {
        let id = self.track_added.subscribe(handler);
        if self.refuse_if_closed("track-added") {
            self.track_added.unsubscribe(id);
        }
        id
    }

    fn subscribe_track_removed(&self, handler: Arc<TrackHandler>) -> SubscriptionId {
        let id = self.track_removed.subscribe(handler);
        if self.refuse_if_closed("track-removed") {
            self.track_removed.unsubscribe(id);
        }
        id
    }

    fn subscribe_frame_ready(&self, handler: Arc<FrameHandler>) -> SubscriptionId {
        let id = self.frame_ready.subscribe(handler);
        if self.refuse_if_closed("frame-ready") {
            self.frame_ready.unsubscribe(id);
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.track_added.unsubscribe(id)
            || self.track_removed.unsubscribe(id)
            || self.frame_ready.unsubscribe(id)
    }
}

// MARK: - LocalPeerConnection

/// In-process [`PeerConnection`] whose lifecycle is driven by
/// [`initialize`](Self::initialize) and [`shutdown`](Self::shutdown).
pub struct LocalPeerConnection {
    id: ConnectionId,
    lifecycle: EventSource<LifecycleHandler>,
    source: Mutex<Option<Arc<LocalTrackSource>>>,
    // Serializes initialize/shutdown so their notifications never interleave.
    transition: Mutex<()>,
}

impl LocalPeerConnection {
    pub fn new() -> Self {
        let id = ConnectionId::new();
        debug!("[{}] Peer connection created", id);
        Self {
            id,
            lifecycle: EventSource::new(),
            source: Mutex::new(None),
            transition: Mutex::new(()),
        }
    }

    /// Brings the connection up and raises `Initialized`.
    pub fn initialize(&self) -> Result<Arc<LocalTrackSource>, VidLinkError> {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        let source = {
            let mut slot = self.slot();
            if slot.is_some() {
                return Err(VidLinkError::InvalidState {
                    reason: format!("peer connection {} already initialized", self.id),
                });
            }
            let source = Arc::new(LocalTrackSource::new(self.id));
            *slot = Some(Arc::clone(&source));
            source
        };

        info!("[{}] Peer connection initialized", self.id);
        let event = LifecycleEvent::Initialized(Arc::clone(&source) as Arc<dyn TrackEventSource>);
        for h in self.lifecycle.handlers() {
            h(&event);
        }
        Ok(source)
    }

    /// Raises `Shutdown`, then closes the track source. Handlers still
    /// attached to it afterwards are dropped.
    pub fn shutdown(&self) -> Result<(), VidLinkError> {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        let source = self.slot().take().ok_or_else(|| VidLinkError::InvalidState {
            reason: format!("peer connection {} is not initialized", self.id),
        })?;

        info!("[{}] Peer connection shutting down", self.id);
        for h in self.lifecycle.handlers() {
            h(&LifecycleEvent::Shutdown);
        }
        source.close();
        Ok(())
    }

    /// Live track source, if initialized.
    pub fn track_source(&self) -> Option<Arc<LocalTrackSource>> {
        self.slot().clone()
    }

    pub fn lifecycle_handler_count(&self) -> usize {
        self.lifecycle.len()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<LocalTrackSource>>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalPeerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerConnection for LocalPeerConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn subscribe_lifecycle(&self, handler: Arc<LifecycleHandler>) -> SubscriptionId {
        self.lifecycle.subscribe(handler)
    }

    fn unsubscribe_lifecycle(&self, id: SubscriptionId) -> bool {
        self.lifecycle.unsubscribe(id)
    }

    fn track_events(&self) -> Option<Arc<dyn TrackEventSource>> {
        self.track_source().map(|s| s as Arc<dyn TrackEventSource>)
    }
}

impl Drop for LocalPeerConnection {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(e) = self.shutdown() {
                warn!("[{}] Failed to shut down on drop: {}", self.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use vidlink_core::Resolution;

    fn counter_handler(counter: &Arc<AtomicUsize>) -> Arc<TrackHandler> {
        let c = Arc::clone(counter);
        Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn lifecycle_events_fire_in_order() {
        let peer = LocalPeerConnection::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        peer.subscribe_lifecycle(Arc::new(move |e: &LifecycleEvent| {
            s.lock().unwrap().push(format!("{e:?}"));
        }));

        assert!(!peer.is_initialized());
        peer.initialize().unwrap();
        assert!(peer.is_initialized());
        peer.shutdown().unwrap();
        assert!(!peer.is_initialized());

        assert_eq!(*seen.lock().unwrap(), vec!["Initialized", "Shutdown"]);
    }

    #[test]
    fn double_initialize_and_shutdown_are_rejected() {
        let peer = LocalPeerConnection::new();
        assert!(matches!(peer.shutdown(), Err(VidLinkError::InvalidState { .. })));
        peer.initialize().unwrap();
        assert!(matches!(peer.initialize(), Err(VidLinkError::InvalidState { .. })));
        peer.shutdown().unwrap();
        assert!(peer.shutdown().is_err());
    }

    #[test]
    fn track_source_routes_events() {
        let peer = LocalPeerConnection::new();
        let source = peer.initialize().unwrap();
        let (added, removed) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let frames = Arc::new(AtomicUsize::new(0));

        source.subscribe_track_added(counter_handler(&added));
        let removed_id = source.subscribe_track_removed(counter_handler(&removed));
        let f = Arc::clone(&frames);
        source.subscribe_frame_ready(frame_handler(move |view| {
            assert_eq!(view.width, 2);
            f.fetch_add(1, Ordering::SeqCst);
        }));

        let plane = [0u8; 4];
        let view = I420FrameView::packed(Resolution::new(2, 2), &plane, &plane, &plane, 0);
        assert_eq!(source.add_track(), 1);
        assert_eq!(source.deliver_frame(&view), 1);
        assert_eq!(source.remove_track(), 1);

        assert!(source.unsubscribe(removed_id));
        assert_eq!(source.remove_track(), 0);
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_closes_source() {
        let peer = LocalPeerConnection::new();
        let source = peer.initialize().unwrap();
        let added = Arc::new(AtomicUsize::new(0));
        source.subscribe_track_added(counter_handler(&added));

        peer.shutdown().unwrap();
        assert!(source.is_closed());
        assert_eq!(source.handler_count(), 0);
        assert_eq!(source.add_track(), 0);

        // Late subscriptions are refused
        source.subscribe_track_added(counter_handler(&added));
        assert_eq!(source.handler_count(), 0);
        assert_eq!(added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_shuts_down_a_live_connection() {
        let peer = LocalPeerConnection::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        peer.subscribe_lifecycle(Arc::new(move |e: &LifecycleEvent| {
            s.lock().unwrap().push(format!("{e:?}"));
        }));
        let source = peer.initialize().unwrap();

        drop(peer);
        assert!(source.is_closed());
        assert_eq!(*seen.lock().unwrap(), vec!["Initialized", "Shutdown"]);
    }

    #[test]
    fn reinitialize_gives_fresh_source() {
        let peer = LocalPeerConnection::new();
        let first = peer.initialize().unwrap();
        peer.shutdown().unwrap();
        let second = peer.initialize().unwrap();
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(!Arc::ptr_eq(&first, &second));
    }
}

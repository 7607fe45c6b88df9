//! vidlink-webrtc: remote video receive path
//!
//! - [`peer`]: collaborator traits for a peer connection and its native
//!   track/frame callbacks, plus [`LocalPeerConnection`] for in-process use.
//! - [`video_source`]: [`RemoteVideoSource`], which binds those callbacks
//!   between `Initialized` and `Shutdown` and forwards them to the consumer
//!   thread and the frame queue.

pub mod event;
pub mod peer;
pub mod video_source;

pub use event::EventSource;
pub use peer::{
    frame_handler, FrameHandler, LifecycleEvent, LifecycleHandler, LocalPeerConnection,
    LocalTrackSource, PeerConnection, TrackEventSource, TrackHandler,
};
pub use video_source::RemoteVideoSource;

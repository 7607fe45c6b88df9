pub mod config;
pub mod errors;
pub mod types;

pub use config::ReceiverConfig;
pub use errors::{DispatchError, FrameError, Plane, VidLinkError};
pub use types::*;

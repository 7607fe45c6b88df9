use std::thread::ThreadId;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidLinkError {
    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Action queue drained from {actual:?}, but the consumer thread is {expected:?}")]
    WrongThread { expected: ThreadId, actual: ThreadId },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("{plane} stride {stride} is smaller than plane width {min}")]
    StrideTooSmall { plane: Plane, stride: u32, min: u32 },

    #[error("{plane} plane holds {len} bytes, expected at least {min}")]
    PlaneTooSmall { plane: Plane, len: usize, min: usize },
}

/// One of the three planes of an I420 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Y,
    U,
    V,
}

impl std::fmt::Display for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Y => write!(f, "Y"),
            Self::U => write!(f, "U"),
            Self::V => write!(f, "V"),
        }
    }
}

//! Error types shared by every pod operation.

use thiserror::Error;

use crate::types::{PodUrl, VideoId};

/// Failure of a single pod operation.
///
/// None of these are fatal to the pod process; each is scoped to the call
/// that produced it.
#[derive(Error, Debug)]
pub enum PodError {
    /// Malformed publish, handshake or propagation input.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("video not found: {0}")]
    VideoNotFound(VideoId),

    /// A peer could not be reached at all.
    #[error("pod {pod} unreachable: {reason}")]
    Unreachable { pod: PodUrl, reason: String },

    /// A peer answered but declined the request.
    #[error("pod {pod} refused: {reason}")]
    Refused { pod: PodUrl, reason: String },

    /// A peer answered with something we could not interpret.
    #[error("protocol error with {pod}: {reason}")]
    Protocol { pod: PodUrl, reason: String },

    /// The swarm adapter failed to seed, fetch or stop a payload.
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<std::io::Error> for PodError {
    fn from(err: std::io::Error) -> Self {
        PodError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PodError {
    fn from(err: serde_json::Error) -> Self {
        PodError::Storage(err.to_string())
    }
}

pub type Result<T, E = PodError> = std::result::Result<T, E>;

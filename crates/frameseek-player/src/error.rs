//! Error types for frameseek-player.

use frameseek_common::ErrorDescriptor;
use std::time::Duration;
use thiserror::Error;

/// Result type for player operations.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Errors raised by the store, decoder session, seek engine and player.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The codec configuration record is missing or unusable.
    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),

    /// The decoder rejected a unit; recoverable with reset and a new seek.
    #[error("Decode error at frame {index}: {reason}")]
    Decode { index: u32, reason: String },

    /// Requested frame is not in the store.
    #[error("Frame {index} out of range ({available} available)")]
    OutOfRange { index: i64, available: u32 },

    /// Operation not allowed in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The activity was superseded.
    #[error("Operation cancelled")]
    Cancelled,

    /// The decoder did not drain in time.
    #[error("Flush timed out after {0:?}")]
    FlushTimeout(Duration),

    /// The container parser failed.
    #[error("Parse failed: {0}")]
    Parse(ErrorDescriptor),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The player or decode thread has shut down.
    #[error("Player closed")]
    Closed,
}

impl PlayerError {
    /// Create a decode error.
    pub fn decode(index: u32, reason: impl Into<String>) -> Self {
        Self::Decode {
            index,
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an out of range error.
    pub fn out_of_range(index: impl Into<i64>, available: u32) -> Self {
        Self::OutOfRange {
            index: index.into(),
            available,
        }
    }

    /// Whether the operation may succeed when retried after more data or a reset.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::Decode { .. })
    }
}

impl From<frameseek_media::Error> for PlayerError {
    fn from(err: frameseek_media::Error) -> Self {
        Self::Parse(err.descriptor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            PlayerError::decode(12, "missing reference").to_string(),
            "Decode error at frame 12: missing reference"
        );
        assert_eq!(
            PlayerError::out_of_range(-1, 300).to_string(),
            "Frame -1 out of range (300 available)"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(PlayerError::InvalidConfig("empty".into()).is_retryable());
        assert!(PlayerError::decode(0, "x").is_retryable());
        assert!(!PlayerError::Cancelled.is_retryable());
        assert!(!PlayerError::out_of_range(5u32, 3).is_retryable());
    }

    #[test]
    fn test_from_media_error() {
        let err: PlayerError = frameseek_media::Error::NoVideoTrack.into();
        match err {
            PlayerError::Parse(desc) => {
                assert_eq!(desc.kind, frameseek_common::ErrorKind::NoVideoTrack)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

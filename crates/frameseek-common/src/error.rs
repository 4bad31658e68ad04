//! Transport-safe error descriptors.
//!
//! Library crates keep their own rich error enums; when an error has to
//! cross the worker boundary it is flattened into an [`ErrorDescriptor`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a failure reported across the worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Corrupt or truncated container.
    Parse,
    /// The container holds no video track.
    NoVideoTrack,
    /// The video track uses a codec we cannot describe to a decoder.
    UnsupportedCodec,
    /// The byte source failed.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse error",
            Self::NoVideoTrack => "no video track",
            Self::UnsupportedCodec => "unsupported codec",
            Self::Io => "I/O error",
        };
        f.write_str(s)
    }
}

/// A failure flattened for transport between the worker and the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a parse error descriptor.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    /// Create an I/O error descriptor.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }
}

//! Error types for frameseek-media.

use frameseek_common::{ErrorDescriptor, ErrorKind};
use std::io;
use thiserror::Error;

/// Result type for frameseek-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for frameseek-media operations.
///
/// Every variant is fatal for the stream being parsed.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid or corrupt MP4 structure.
    #[error("Invalid MP4: {0}")]
    Parse(String),

    /// Missing required atom in MP4 file.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Atom larger than the configured limit.
    #[error("Atom {atom} data size {size} exceeds maximum {max}")]
    AtomTooLarge { atom: String, size: u64, max: u64 },

    /// Ran out of bytes while reading a structure.
    #[error("Truncated data: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// The container has no video track.
    #[error("No video track found")]
    NoVideoTrack,

    /// The video sample entry is not one we can configure a decoder for.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A previous call already failed; the demuxer emits nothing further.
    #[error("Demuxer already failed: {0}")]
    Poisoned(ErrorDescriptor),
}

impl Error {
    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an unsupported codec error.
    pub fn unsupported(codec: impl Into<String>) -> Self {
        Self::UnsupportedCodec(codec.into())
    }

    /// Flatten into a transport-safe descriptor.
    pub fn descriptor(&self) -> ErrorDescriptor {
        match self {
            Self::Poisoned(desc) => desc.clone(),
            Self::Io(e) => ErrorDescriptor::io(e.to_string()),
            Self::NoVideoTrack => ErrorDescriptor::new(ErrorKind::NoVideoTrack, self.to_string()),
            Self::UnsupportedCodec(_) => {
                ErrorDescriptor::new(ErrorKind::UnsupportedCodec, self.to_string())
            }
            Self::Parse(_)
            | Self::MissingAtom(_)
            | Self::AtomTooLarge { .. }
            | Self::Truncated { .. } => ErrorDescriptor::parse(self.to_string()),
        }
    }
}

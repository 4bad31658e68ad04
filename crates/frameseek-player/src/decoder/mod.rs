//! Decoder backends.
//!
//! A backend is a synchronous, stateful decoder. The [`DecoderSession`]
//! drives it from a dedicated thread, so implementations never need to be
//! `Sync`.
//!
//! [`DecoderSession`]: crate::DecoderSession

mod reference;

#[cfg(feature = "openh264")]
mod openh264;

pub use reference::ReferenceDecoder;

#[cfg(feature = "openh264")]
pub use self::openh264::OpenH264Decoder;

use crate::{Picture, PlayerError, Result};
use bytes::Bytes;
use frameseek_common::{AccessUnit, StreamConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything a backend needs before the first decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// RFC 6381 codec string.
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// Codec configuration record (avcC/hvcC payload).
    pub description: Bytes,
}

impl DecoderConfig {
    pub fn from_stream(config: &StreamConfig) -> Self {
        Self {
            codec: config.codec.clone(),
            coded_width: config.width,
            coded_height: config.height,
            description: config.codec_config.clone(),
        }
    }

    /// Reject configurations no backend can use.
    pub fn validate(&self) -> Result<()> {
        if self.description.is_empty() {
            return Err(PlayerError::InvalidConfig(
                "codec configuration record is empty".to_string(),
            ));
        }
        if self.coded_width == 0 || self.coded_height == 0 {
            return Err(PlayerError::InvalidConfig(format!(
                "invalid coded size {}x{}",
                self.coded_width, self.coded_height
            )));
        }
        Ok(())
    }
}

/// A stateful video decoder.
pub trait VideoDecoder: Send {
    /// Prepare for a new stream. Called after construction or `reset`.
    fn configure(&mut self, config: &DecoderConfig) -> Result<()>;

    /// Decode one unit, returning every picture that became ready.
    fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<Picture>>;

    /// Emit pictures still held for reordering.
    fn flush(&mut self) -> Result<Vec<Picture>>;

    /// Drop all decoding state, including the configuration.
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Selectable decoder implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderBackend {
    /// Deterministic software reference decoder.
    #[default]
    Reference,
    /// OpenH264 (requires the `openh264` feature).
    OpenH264,
}

impl DecoderBackend {
    /// Instantiate the backend.
    pub fn create(self) -> Result<Box<dyn VideoDecoder>> {
        match self {
            Self::Reference => Ok(Box::new(ReferenceDecoder::new())),
            #[cfg(feature = "openh264")]
            Self::OpenH264 => Ok(Box::new(OpenH264Decoder::new())),
            #[cfg(not(feature = "openh264"))]
            Self::OpenH264 => Err(PlayerError::InvalidConfig(
                "openh264 backend not compiled in (enable the `openh264` feature)".to_string(),
            )),
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            Self::Reference => true,
            Self::OpenH264 => cfg!(feature = "openh264"),
        }
    }
}

impl fmt::Display for DecoderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => f.write_str("reference"),
            Self::OpenH264 => f.write_str("openh264"),
        }
    }
}

impl std::str::FromStr for DecoderBackend {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reference" => Ok(Self::Reference),
            "openh264" => Ok(Self::OpenH264),
            other => Err(PlayerError::InvalidConfig(format!(
                "unknown decoder backend: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config() -> DecoderConfig {
        DecoderConfig {
            codec: "avc1.64001f".to_string(),
            coded_width: 64,
            coded_height: 48,
            description: Bytes::from_static(&[1, 0x64, 0, 0x1f]),
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let empty = DecoderConfig {
            description: Bytes::new(),
            ..config()
        };
        assert_matches!(empty.validate(), Err(PlayerError::InvalidConfig(_)));

        let zero = DecoderConfig {
            coded_width: 0,
            ..config()
        };
        assert_matches!(zero.validate(), Err(PlayerError::InvalidConfig(_)));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(
            "Reference".parse::<DecoderBackend>().unwrap(),
            DecoderBackend::Reference
        );
        assert_eq!(
            "openh264".parse::<DecoderBackend>().unwrap(),
            DecoderBackend::OpenH264
        );
        assert!("ffmpeg".parse::<DecoderBackend>().is_err());
        assert_eq!(DecoderBackend::OpenH264.to_string(), "openh264");
    }

    #[test]
    fn test_reference_backend_available() {
        assert!(DecoderBackend::Reference.is_available());
        assert_eq!(DecoderBackend::Reference.create().unwrap().name(), "reference");
    }

    #[cfg(not(feature = "openh264"))]
    #[test]
    fn test_openh264_missing_feature() {
        assert_matches!(
            DecoderBackend::OpenH264.create().err(),
            Some(PlayerError::InvalidConfig(_))
        );
    }
}

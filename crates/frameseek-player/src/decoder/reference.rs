//! Deterministic reference decoder.
//!
//! Keeps a SHA-256 chain over the payloads since the last keyframe: a keyframe
//! restarts the chain from the codec configuration record, every other unit
//! extends it. The output picture is filled from the chain digest, so a frame
//! comes out bit-exact only when its whole reference chain was decoded in
//! order.

use super::{DecoderConfig, VideoDecoder};
use crate::{Picture, PixelFormat, PlayerError, Result};
use bytes::Bytes;
use frameseek_common::AccessUnit;
use sha2::{Digest, Sha256};

#[derive(Debug, Default)]
pub struct ReferenceDecoder {
    config: Option<DecoderConfig>,
    chain: Option<[u8; 32]>,
}

impl ReferenceDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoDecoder for ReferenceDecoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        config.validate()?;
        self.config = Some(config.clone());
        self.chain = None;
        Ok(())
    }

    fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<Picture>> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| PlayerError::invalid_state("decoder is not configured"))?;

        let mut hasher = Sha256::new();
        if unit.is_keyframe {
            hasher.update(&config.description);
        } else {
            let previous = self.chain.ok_or_else(|| {
                PlayerError::decode(unit.sequence_index, "delta frame without reference")
            })?;
            hasher.update(previous);
        }
        hasher.update(&unit.payload);
        let digest: [u8; 32] = hasher.finalize().into();
        self.chain = Some(digest);

        let size = PixelFormat::I420.frame_size(config.coded_width, config.coded_height);
        let data: Vec<u8> = digest.iter().copied().cycle().take(size).collect();

        Ok(vec![Picture::new(
            unit.sequence_index,
            unit.timestamp,
            config.coded_width,
            config.coded_height,
            PixelFormat::I420,
            Bytes::from(data),
        )])
    }

    fn flush(&mut self) -> Result<Vec<Picture>> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {
        self.config = None;
        self.chain = None;
    }

    fn name(&self) -> &'static str {
        "reference"
    }
}

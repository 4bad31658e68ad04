//! H.264 software decoding through the `openh264` crate.

use super::{DecoderConfig, VideoDecoder};
use crate::{Picture, PixelFormat, PlayerError, Result};
use bytes::Bytes;
use frameseek_common::AccessUnit;
use frameseek_media::codec::{self, AvcConfig, VideoCodec};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use tracing::debug;

pub struct OpenH264Decoder {
    decoder: Option<Decoder>,
    nal_length_size: u8,
}

impl OpenH264Decoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            nal_length_size: 4,
        }
    }
}

impl Default for OpenH264Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for OpenH264Decoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        config.validate()?;
        if VideoCodec::from_codec_string(&config.codec) != Some(VideoCodec::H264) {
            return Err(PlayerError::InvalidConfig(format!(
                "openh264 cannot decode {}",
                config.codec
            )));
        }
        let avcc = AvcConfig::parse(&config.description)
            .map_err(|e| PlayerError::InvalidConfig(e.to_string()))?;

        let mut decoder =
            Decoder::new().map_err(|e| PlayerError::InvalidConfig(e.to_string()))?;
        // parameter sets alone produce no picture
        decoder
            .decode(&avcc.parameter_sets_annex_b())
            .map_err(|e| PlayerError::InvalidConfig(e.to_string()))?;

        debug!(
            profile = avcc.profile_idc,
            level = avcc.level_idc,
            sps = avcc.sps.len(),
            pps = avcc.pps.len(),
            "Configured openh264"
        );
        self.nal_length_size = avcc.nal_length_size;
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<Picture>> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| PlayerError::invalid_state("decoder is not configured"))?;

        let annex_b = codec::to_annex_b(&unit.payload, self.nal_length_size)
            .map_err(|e| PlayerError::decode(unit.sequence_index, e.to_string()))?;

        match decoder.decode(&annex_b) {
            Ok(Some(yuv)) => {
                let (width, height) = yuv.dimensions();
                let (y_stride, u_stride, v_stride) = yuv.strides();
                let uv_width = width.div_ceil(2);
                let uv_height = height.div_ceil(2);

                let mut i420 = Vec::with_capacity(width * height + 2 * uv_width * uv_height);
                copy_plane(yuv.y(), y_stride, width, height, &mut i420);
                copy_plane(yuv.u(), u_stride, uv_width, uv_height, &mut i420);
                copy_plane(yuv.v(), v_stride, uv_width, uv_height, &mut i420);

                Ok(vec![Picture::new(
                    unit.sequence_index,
                    unit.timestamp,
                    width as u32,
                    height as u32,
                    PixelFormat::I420,
                    Bytes::from(i420),
                )])
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(PlayerError::decode(unit.sequence_index, e.to_string())),
        }
    }

    fn flush(&mut self) -> Result<Vec<Picture>> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {
        self.decoder = None;
    }

    fn name(&self) -> &'static str {
        "openh264"
    }
}

/// Copy a plane row by row, dropping stride padding.
fn copy_plane(plane: &[u8], stride: usize, width: usize, height: usize, out: &mut Vec<u8>) {
    for row in 0..height {
        let start = row * stride;
        let end = start + width;
        if end <= plane.len() {
            out.extend_from_slice(&plane[start..end]);
        }
    }
}

//! Core stream types shared by the parser and the player.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stream-level configuration of the video track.
///
/// Produced exactly once by the container parser when the metadata section
/// has been parsed, and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Number of access units advertised by the sample table.
    pub total_frames: u32,
    /// Average frame rate (frames per second).
    pub fps: f64,
    /// Stream duration in seconds.
    pub duration: f64,
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub codec: String,
    /// Timebase of access unit timestamps (ticks per second).
    pub timescale: u32,
    /// Codec configuration record (avcC/hvcC payload without its box header).
    pub codec_config: Bytes,
}

impl StreamConfig {
    /// Time between two consecutive frames at the native rate.
    ///
    /// Returns `None` when the frame rate is not a positive finite number.
    pub fn frame_interval(&self) -> Option<Duration> {
        if self.fps.is_finite() && self.fps > 0.0 {
            Some(Duration::from_secs_f64(1.0 / self.fps))
        } else {
            None
        }
    }

    /// Whether a decoder can be configured from this stream config.
    pub fn has_codec_config(&self) -> bool {
        !self.codec_config.is_empty()
    }
}

/// One encoded frame in decode order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessUnit {
    /// 0-based decode order index.
    pub sequence_index: u32,
    /// Whether the unit can be decoded without reference to prior units.
    pub is_keyframe: bool,
    /// Decode timestamp in track timebase units.
    pub timestamp: u64,
    /// Duration in track timebase units.
    pub duration: u64,
    /// Encoded payload.
    pub payload: Bytes,
}

impl AccessUnit {
    pub fn new(
        sequence_index: u32,
        is_keyframe: bool,
        timestamp: u64,
        duration: u64,
        payload: Bytes,
    ) -> Self {
        Self {
            sequence_index,
            is_keyframe,
            timestamp,
            duration,
            payload,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

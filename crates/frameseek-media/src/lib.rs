//! Frameseek-Media: incremental MP4 demuxing into indexed access units.
//!
//! This crate is the container side of frameseek. It turns raw container
//! bytes, delivered whole or in arbitrary pieces, into a [`StreamConfig`] and
//! an ordered sequence of [`AccessUnit`]s with keyframe markers.
//!
//! # Modules
//!
//! - `mp4` - MP4 box parsing (moov, sample tables, visual sample entries)
//! - `demux` - Incremental demuxer over an append-only byte buffer
//! - `codec` - avcC/hvcC configuration records, codec strings, Annex B
//! - `synth` - Synthetic MP4 writer (feature `test-util`)
//!
//! # Architecture
//!
//! 1. Top-level boxes are scanned as their headers arrive
//! 2. Once `moov` is fully buffered, the first video track's sample table is
//!    resolved from stts/stss/stsc/stsz/stco and a `StreamConfig` is emitted
//! 3. Access units are emitted in decode order, in batches, as soon as their
//!    sample bytes are buffered
//!
//! [`StreamConfig`]: frameseek_common::StreamConfig
//! [`AccessUnit`]: frameseek_common::AccessUnit

pub mod codec;
pub mod demux;
pub mod error;
pub mod mp4;
#[cfg(any(test, feature = "test-util"))]
pub mod synth;

pub use codec::VideoCodec;
pub use demux::{demux_all, DemuxEvent, DemuxOptions, DemuxOutput, Mp4Demuxer};
pub use error::{Error, Result};
pub use mp4::Movie;

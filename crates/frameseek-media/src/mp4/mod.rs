//! MP4 container parsing.
//!
//! This module turns a fully buffered `moov` payload into a [`Movie`]: the
//! movie header plus the first video track with its resolved sample table.
//! Locating `moov` inside a byte stream is the demuxer's job.

mod atoms;
mod cursor;
mod reader;
mod sample_table;

pub use atoms::{atom_data, child_atoms, Atom, AtomType, HandlerType, TrackInfo, VisualSampleEntry};
pub use reader::MoovParser;
pub use sample_table::{SampleEntry, SampleTable, SampleTableBuilder};

use crate::codec;
use crate::{Error, Result};
use bytes::Bytes;
use frameseek_common::StreamConfig;

/// Parsed movie metadata.
#[derive(Debug, Default)]
pub struct Movie {
    /// Duration in movie timescale units.
    pub duration: u64,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// First video track.
    pub video_track: Option<TrackInfo>,
    /// Tracks that were skipped (audio, hint, extra video).
    pub other_tracks: usize,
}

impl Movie {
    /// Get the duration in seconds from the movie header.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    /// Get the video sample table, if available.
    pub fn video_samples(&self) -> Option<&SampleTable> {
        self.video_track.as_ref().map(|t| &t.sample_table)
    }

    /// Derive the stream configuration of the video track.
    ///
    /// Duration comes from mvhd, then mdhd, then the sum of sample durations.
    /// Dimensions come from the sample entry, then tkhd.
    pub fn stream_config(&self) -> Result<StreamConfig> {
        let track = self.video_track.as_ref().ok_or(Error::NoVideoTrack)?;
        let entry = track
            .sample_entry
            .as_ref()
            .ok_or(Error::MissingAtom("stsd"))?;

        let codec = codec::VideoCodec::from_fourcc(&entry.fourcc)
            .ok_or_else(|| Error::unsupported(entry.fourcc_str()))?;

        let table = &track.sample_table;
        let first = table
            .samples
            .first()
            .ok_or_else(|| Error::parse("video track has no samples"))?;
        if !first.is_keyframe {
            return Err(Error::parse("first video sample is not a keyframe"));
        }
        if track.timescale == 0 {
            return Err(Error::parse("video track timescale is zero"));
        }

        let duration = if self.duration > 0 && self.timescale > 0 {
            self.duration_secs()
        } else if track.duration > 0 {
            track.duration_secs()
        } else {
            table.total_duration() as f64 / track.timescale as f64
        };
        if duration <= 0.0 {
            return Err(Error::parse("stream duration is zero"));
        }

        let (codec_string, codec_config) = match entry.codec_config.as_deref() {
            Some(record) => (
                codec::codec_string(codec, &entry.fourcc, record)?,
                Bytes::copy_from_slice(record),
            ),
            // configure() rejects the empty record later
            None => (entry.fourcc_str(), Bytes::new()),
        };

        let width = if entry.width > 0 {
            entry.width as u32
        } else {
            track.width.unwrap_or(0)
        };
        let height = if entry.height > 0 {
            entry.height as u32
        } else {
            track.height.unwrap_or(0)
        };

        let total_frames = table.len() as u32;
        Ok(StreamConfig {
            total_frames,
            fps: total_frames as f64 / duration,
            duration,
            width,
            height,
            codec: codec_string,
            timescale: track.timescale,
            codec_config,
        })
    }
}

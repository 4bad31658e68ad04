//! Synthetic MP4 writer.
//!
//! Builds small but structurally valid single-chunk MP4 files with a chosen
//! keyframe pattern. Payloads are length-prefixed NAL units whose bytes are a
//! function of the frame index, so every frame is distinguishable.

const AVCC: [u8; 19] = [
    1, 0x64, 0x00, 0x1f, 0xff, 0xe1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1f, 0x01, 0x00, 0x04, 0x68,
    0xee, 0x3c, 0x80,
];

const HVCC: [u8; 30] = [
    1, 0x01, 0x60, 0x00, 0x00, 0x00, 0xb0, 0, 0, 0, 0, 0, 93, 0xf0, 0x00, 0xfc, 0xfd, 0xf8, 0xf8,
    0x00, 0x00, 0x0f, 1, 0x21, 0x00, 0x01, 0x00, 0x02, 0x42, 0x01,
];

/// Builder for a synthetic single-video-track MP4.
#[derive(Debug, Clone)]
pub struct SyntheticStream {
    frames: u32,
    fps: f64,
    keyframes: Vec<u32>,
    width: u16,
    height: u16,
    payload_size: usize,
    moov_at_end: bool,
    write_stss: bool,
    audio_track: bool,
    video_track: bool,
    fourcc: [u8; 4],
    hevc: bool,
    header_durations: bool,
}

impl SyntheticStream {
    /// `frames` frames at `fps`, keyframe every 30 frames, 64x48.
    pub fn new(frames: u32, fps: f64) -> Self {
        Self {
            frames,
            fps,
            keyframes: (0..frames).step_by(30).collect(),
            width: 64,
            height: 48,
            payload_size: 64,
            moov_at_end: false,
            write_stss: true,
            audio_track: false,
            video_track: true,
            fourcc: *b"avc1",
            hevc: false,
            header_durations: true,
        }
    }

    pub fn keyframe_interval(mut self, interval: u32) -> Self {
        self.keyframes = (0..self.frames).step_by(interval.max(1) as usize).collect();
        self
    }

    /// Explicit keyframe positions (0-based).
    pub fn keyframes(mut self, keyframes: &[u32]) -> Self {
        self.keyframes = keyframes.to_vec();
        self
    }

    pub fn dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Bytes per sample, including the 4-byte NAL length prefix.
    pub fn payload_size(mut self, size: usize) -> Self {
        self.payload_size = size.max(9);
        self
    }

    /// Place moov after mdat.
    pub fn moov_at_end(mut self) -> Self {
        self.moov_at_end = true;
        self
    }

    /// Leave out stss, making every sample a sync sample.
    pub fn omit_stss(mut self) -> Self {
        self.write_stss = false;
        self
    }

    /// Add a sound track next to the video track.
    pub fn with_audio_track(mut self) -> Self {
        self.audio_track = true;
        self
    }

    /// Write only a sound track.
    pub fn without_video(mut self) -> Self {
        self.video_track = false;
        self.audio_track = true;
        self
    }

    /// Override the visual sample entry fourcc.
    pub fn sample_entry(mut self, fourcc: [u8; 4]) -> Self {
        self.fourcc = fourcc;
        self
    }

    /// HEVC sample entry (`hvc1` + `hvcC`).
    pub fn hevc(mut self) -> Self {
        self.fourcc = *b"hvc1";
        self.hevc = true;
        self
    }

    /// Write zero durations in mvhd and mdhd.
    pub fn zero_header_durations(mut self) -> Self {
        self.header_durations = false;
        self
    }

    /// Payload of one sample.
    pub fn payload(index: u32, is_keyframe: bool, size: usize) -> Vec<u8> {
        let size = size.max(9);
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&((size - 4) as u32).to_be_bytes());
        out.push(if is_keyframe { 0x65 } else { 0x41 });
        out.extend_from_slice(&index.to_be_bytes());
        out.extend((9..size).map(|j| (index as usize * 31 + j) as u8));
        out
    }

    fn timescale(&self) -> u32 {
        (self.fps * 1000.0).round() as u32
    }

    /// Serialize the file.
    pub fn build(&self) -> Vec<u8> {
        let ftyp = write_ftyp();

        let mut mdat_payload = Vec::with_capacity(self.frames as usize * self.payload_size);
        for i in 0..self.frames {
            let key = self.keyframes.contains(&i);
            mdat_payload.extend(Self::payload(i, key, self.payload_size));
        }
        let mdat = write_box(b"mdat", &mdat_payload);

        let mut out = ftyp;
        if self.moov_at_end {
            let data_start = out.len() as u32 + 8;
            out.extend(mdat);
            out.extend(self.write_moov(data_start));
        } else {
            // moov length does not depend on the chunk offset value
            let probe = self.write_moov(0);
            let data_start = (out.len() + probe.len() + 8) as u32;
            out.extend(self.write_moov(data_start));
            out.extend(mdat);
        }
        out
    }

    fn write_moov(&self, chunk_offset: u32) -> Vec<u8> {
        let timescale = self.timescale();
        let duration = if self.header_durations {
            self.frames as u64 * 1000
        } else {
            0
        };

        let mvhd = write_mvhd(timescale, duration);
        let mut children: Vec<Vec<u8>> = vec![mvhd];
        if self.video_track {
            children.push(self.write_video_trak(chunk_offset, timescale, duration));
        }
        if self.audio_track {
            children.push(write_audio_trak(duration));
        }
        let refs: Vec<&[u8]> = children.iter().map(Vec::as_slice).collect();
        write_container_box(b"moov", &refs)
    }

    fn write_video_trak(&self, chunk_offset: u32, timescale: u32, duration: u64) -> Vec<u8> {
        let tkhd = write_tkhd(1, duration, self.width as u32, self.height as u32);
        let mdhd = write_mdhd(timescale, duration);
        let hdlr = write_hdlr(b"vide");

        let stsd = self.write_stsd();
        let stts = write_full_box(b"stts", &[1, self.frames, 1000]);
        let stsc = write_full_box(b"stsc", &[1, 1, self.frames, 1]);
        let stsz = write_full_box(b"stsz", &[self.payload_size as u32, self.frames]);
        let stco = write_full_box(b"stco", &[1, chunk_offset]);

        let mut stbl_children = vec![stsd, stts];
        if self.write_stss {
            let mut fields = vec![self.keyframes.len() as u32];
            fields.extend(self.keyframes.iter().map(|k| k + 1));
            stbl_children.push(write_full_box(b"stss", &fields));
        }
        stbl_children.extend([stsc, stsz, stco]);

        let stbl_refs: Vec<&[u8]> = stbl_children.iter().map(Vec::as_slice).collect();
        let stbl = write_container_box(b"stbl", &stbl_refs);
        let minf = write_container_box(b"minf", &[&stbl]);
        let mdia = write_container_box(b"mdia", &[&mdhd, &hdlr, &minf]);
        write_container_box(b"trak", &[&tkhd, &mdia])
    }

    fn write_stsd(&self) -> Vec<u8> {
        let mut entry = Vec::with_capacity(78 + 8 + HVCC.len());
        // reserved + data_reference_index
        entry.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        // pre_defined + reserved
        entry.extend_from_slice(&[0u8; 16]);
        entry.extend_from_slice(&self.width.to_be_bytes());
        entry.extend_from_slice(&self.height.to_be_bytes());
        // 72 dpi horizontal and vertical
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        entry.extend_from_slice(&0u32.to_be_bytes());
        // frame_count
        entry.extend_from_slice(&1u16.to_be_bytes());
        // compressorname
        entry.extend_from_slice(&[0u8; 32]);
        // depth + pre_defined
        entry.extend_from_slice(&0x0018u16.to_be_bytes());
        entry.extend_from_slice(&0xffffu16.to_be_bytes());
        if self.hevc {
            entry.extend(write_box(b"hvcC", &HVCC));
        } else {
            entry.extend(write_box(b"avcC", &AVCC));
        }
        let sample_entry = write_box(&self.fourcc, &entry);

        let mut content = Vec::with_capacity(8 + sample_entry.len());
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&1u32.to_be_bytes());
        content.extend(sample_entry);
        write_box(b"stsd", &content)
    }
}

fn write_audio_trak(duration: u64) -> Vec<u8> {
    let tkhd = write_tkhd(2, duration, 0, 0);
    let mdhd = write_mdhd(48_000, duration);
    let hdlr = write_hdlr(b"soun");
    let mdia = write_container_box(b"mdia", &[&mdhd, &hdlr]);
    write_container_box(b"trak", &[&tkhd, &mdia])
}

fn write_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let size = (8 + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(content);
    out
}

fn write_container_box(box_type: &[u8; 4], children: &[&[u8]]) -> Vec<u8> {
    let content: Vec<u8> = children.concat();
    write_box(box_type, &content)
}

fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    (((version as u32) << 24) | (flags & 0x00FF_FFFF)).to_be_bytes()
}

/// Version 0 full box made of u32 fields.
fn write_full_box(box_type: &[u8; 4], fields: &[u32]) -> Vec<u8> {
    let mut content = Vec::with_capacity(4 + fields.len() * 4);
    content.extend_from_slice(&fullbox_header(0, 0));
    for field in fields {
        content.extend_from_slice(&field.to_be_bytes());
    }
    write_box(box_type, &content)
}

fn write_ftyp() -> Vec<u8> {
    let mut content = Vec::with_capacity(16);
    content.extend_from_slice(b"isom");
    content.extend_from_slice(&0x200u32.to_be_bytes());
    content.extend_from_slice(b"isom");
    content.extend_from_slice(b"avc1");
    write_box(b"ftyp", &content)
}

fn write_mvhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut content = Vec::with_capacity(112);
    content.extend_from_slice(&fullbox_header(1, 0));
    content.extend_from_slice(&[0u8; 16]);
    content.extend_from_slice(&timescale.to_be_bytes());
    content.extend_from_slice(&duration.to_be_bytes());
    // rate 1.0, volume 1.0, reserved
    content.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    content.extend_from_slice(&0x0100u16.to_be_bytes());
    content.extend_from_slice(&[0u8; 10]);
    content.extend_from_slice(&identity_matrix());
    content.extend_from_slice(&[0u8; 24]);
    // next_track_ID
    content.extend_from_slice(&3u32.to_be_bytes());
    write_box(b"mvhd", &content)
}

fn write_tkhd(track_id: u32, duration: u64, width: u32, height: u32) -> Vec<u8> {
    let mut content = Vec::with_capacity(96);
    // enabled | in_movie | in_preview
    content.extend_from_slice(&fullbox_header(1, 7));
    content.extend_from_slice(&[0u8; 16]);
    content.extend_from_slice(&track_id.to_be_bytes());
    content.extend_from_slice(&0u32.to_be_bytes());
    content.extend_from_slice(&duration.to_be_bytes());
    // reserved, layer, alternate_group, volume, reserved
    content.extend_from_slice(&[0u8; 16]);
    content.extend_from_slice(&identity_matrix());
    content.extend_from_slice(&(width << 16).to_be_bytes());
    content.extend_from_slice(&(height << 16).to_be_bytes());
    write_box(b"tkhd", &content)
}

fn write_mdhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut content = Vec::with_capacity(24);
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&[0u8; 8]);
    content.extend_from_slice(&timescale.to_be_bytes());
    content.extend_from_slice(&(duration as u32).to_be_bytes());
    // language "und", pre_defined
    content.extend_from_slice(&0x55c4u16.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    write_box(b"mdhd", &content)
}

fn write_hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut content = Vec::with_capacity(25);
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&0u32.to_be_bytes());
    content.extend_from_slice(handler);
    content.extend_from_slice(&[0u8; 12]);
    content.push(0);
    write_box(b"hdlr", &content)
}

fn identity_matrix() -> [u8; 36] {
    let mut m = [0u8; 36];
    m[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[16..20].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[32..36].copy_from_slice(&0x4000_0000u32.to_be_bytes());
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{demux_all, DemuxOptions};

    #[test]
    fn test_payload_layout() {
        let key = SyntheticStream::payload(7, true, 16);
        assert_eq!(key.len(), 16);
        assert_eq!(&key[..4], &12u32.to_be_bytes());
        assert_eq!(key[4], 0x65);
        assert_eq!(&key[5..9], &7u32.to_be_bytes());
        assert_eq!(SyntheticStream::payload(7, false, 16)[4], 0x41);
    }

    #[test]
    fn test_payloads_round_trip_through_demuxer() {
        let file = SyntheticStream::new(12, 30.0)
            .keyframe_interval(5)
            .payload_size(20)
            .build();
        let out = demux_all(&file, DemuxOptions::default()).unwrap();
        for unit in &out.units {
            let expected =
                SyntheticStream::payload(unit.sequence_index, unit.is_keyframe, 20);
            assert_eq!(unit.payload.as_ref(), expected.as_slice());
        }
    }

    #[test]
    fn test_hevc_stream() {
        let file = SyntheticStream::new(4, 25.0).hevc().build();
        let out = demux_all(&file, DemuxOptions::default()).unwrap();
        assert_eq!(out.config.codec, "hvc1.1.6.L93.B0");
    }
}

//! Codec configuration records.
//!
//! Parses `avcC` (ISO/IEC 14496-15 AVCDecoderConfigurationRecord) and `hvcC`
//! (HEVCDecoderConfigurationRecord), derives RFC 6381 codec strings, and
//! converts length-prefixed samples to Annex B byte streams.

use crate::{Error, Result};
use std::fmt::Write as _;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Video codecs with a supported sample entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// Map a visual sample entry fourcc.
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"avc1" | b"avc3" => Some(Self::H264),
            b"hvc1" | b"hev1" => Some(Self::H265),
            _ => None,
        }
    }

    /// Map the prefix of an RFC 6381 codec string.
    pub fn from_codec_string(codec: &str) -> Option<Self> {
        let prefix = codec.split('.').next()?;
        let fourcc: [u8; 4] = prefix.as_bytes().try_into().ok()?;
        Self::from_fourcc(&fourcc)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::H265 => "H.265",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed AVCDecoderConfigurationRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    pub profile_idc: u8,
    pub profile_compatibility: u8,
    pub level_idc: u8,
    /// Size of the NAL unit length prefix in samples (1, 2 or 4).
    pub nal_length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcConfig {
    pub fn parse(record: &[u8]) -> Result<Self> {
        let mut r = Reader::new(record);
        let version = r.u8()?;
        if version != 1 {
            return Err(Error::parse(format!("avcC version {version} is not 1")));
        }
        let profile_idc = r.u8()?;
        let profile_compatibility = r.u8()?;
        let level_idc = r.u8()?;
        let nal_length_size = (r.u8()? & 0x03) + 1;
        if nal_length_size == 3 {
            return Err(Error::parse("avcC NAL length size 3 is invalid"));
        }

        let sps_count = r.u8()? & 0x1f;
        let sps = (0..sps_count)
            .map(|_| r.sized().map(<[u8]>::to_vec))
            .collect::<Result<Vec<_>>>()?;
        let pps_count = r.u8()?;
        let pps = (0..pps_count)
            .map(|_| r.sized().map(<[u8]>::to_vec))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            profile_idc,
            profile_compatibility,
            level_idc,
            nal_length_size,
            sps,
            pps,
        })
    }

    /// RFC 6381 string, e.g. `avc1.64001f`.
    pub fn codec_string(&self, fourcc: &[u8; 4]) -> String {
        format!(
            "{}.{:02x}{:02x}{:02x}",
            String::from_utf8_lossy(fourcc),
            self.profile_idc,
            self.profile_compatibility,
            self.level_idc
        )
    }

    /// SPS then PPS, each prefixed with an Annex B start code.
    pub fn parameter_sets_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in self.sps.iter().chain(&self.pps) {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nal);
        }
        out
    }
}

/// Parsed HEVCDecoderConfigurationRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcConfig {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: [u8; 6],
    pub general_level_idc: u8,
    pub nal_length_size: u8,
    /// (NAL unit type, NAL units) per parameter set array.
    pub arrays: Vec<(u8, Vec<Vec<u8>>)>,
}

impl HevcConfig {
    pub fn parse(record: &[u8]) -> Result<Self> {
        let mut r = Reader::new(record);
        let version = r.u8()?;
        if version != 1 {
            return Err(Error::parse(format!("hvcC version {version} is not 1")));
        }
        let b = r.u8()?;
        let general_profile_space = b >> 6;
        let general_tier_flag = b & 0x20 != 0;
        let general_profile_idc = b & 0x1f;
        let general_profile_compatibility_flags = r.u32()?;
        let mut general_constraint_indicator_flags = [0u8; 6];
        general_constraint_indicator_flags.copy_from_slice(r.take(6)?);
        let general_level_idc = r.u8()?;
        // min_spatial_segmentation(2) parallelism(1) chroma(1) luma/chroma depth(2)
        // avg_frame_rate(2)
        r.take(8)?;
        let nal_length_size = (r.u8()? & 0x03) + 1;

        let num_arrays = r.u8()?;
        let mut arrays = Vec::with_capacity(num_arrays as usize);
        for _ in 0..num_arrays {
            let nal_type = r.u8()? & 0x3f;
            let count = r.u16()?;
            let nals = (0..count)
                .map(|_| r.sized().map(<[u8]>::to_vec))
                .collect::<Result<Vec<_>>>()?;
            arrays.push((nal_type, nals));
        }

        Ok(Self {
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_profile_compatibility_flags,
            general_constraint_indicator_flags,
            general_level_idc,
            nal_length_size,
            arrays,
        })
    }

    /// RFC 6381 string, e.g. `hvc1.1.6.L93.B0`.
    pub fn codec_string(&self, fourcc: &[u8; 4]) -> String {
        let mut out = String::from_utf8_lossy(fourcc).into_owned();

        let space = match self.general_profile_space {
            1 => "A",
            2 => "B",
            3 => "C",
            _ => "",
        };
        let _ = write!(out, ".{}{}", space, self.general_profile_idc);
        // compatibility flags are written bit-reversed
        let _ = write!(
            out,
            ".{:x}",
            self.general_profile_compatibility_flags.reverse_bits()
        );
        let tier = if self.general_tier_flag { 'H' } else { 'L' };
        let _ = write!(out, ".{}{}", tier, self.general_level_idc);

        let flags = &self.general_constraint_indicator_flags;
        let used = flags.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        for byte in &flags[..used] {
            let _ = write!(out, ".{byte:X}");
        }
        out
    }

    /// VPS, SPS and PPS arrays, each NAL prefixed with a start code.
    pub fn parameter_sets_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in self.arrays.iter().flat_map(|(_, nals)| nals) {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nal);
        }
        out
    }
}

/// Build the RFC 6381 codec string for a configuration record.
pub fn codec_string(codec: VideoCodec, fourcc: &[u8; 4], record: &[u8]) -> Result<String> {
    Ok(match codec {
        VideoCodec::H264 => AvcConfig::parse(record)?.codec_string(fourcc),
        VideoCodec::H265 => HevcConfig::parse(record)?.codec_string(fourcc),
    })
}

/// Convert a length-prefixed sample into an Annex B byte stream.
pub fn to_annex_b(sample: &[u8], nal_length_size: u8) -> Result<Vec<u8>> {
    let prefix = nal_length_size as usize;
    if !matches!(prefix, 1 | 2 | 4) {
        return Err(Error::parse(format!(
            "invalid NAL length size {nal_length_size}"
        )));
    }

    let mut out = Vec::with_capacity(sample.len() + 16);
    let mut pos = 0;
    while pos < sample.len() {
        if pos + prefix > sample.len() {
            return Err(Error::Truncated {
                need: prefix,
                have: sample.len() - pos,
            });
        }
        let len = sample[pos..pos + prefix]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        pos += prefix;
        if pos + len > sample.len() {
            return Err(Error::Truncated {
                need: len,
                have: sample.len() - pos,
            });
        }
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&sample[pos..pos + len]);
        pos += len;
    }
    Ok(out)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let have = self.data.len() - self.pos;
        if have < n {
            return Err(Error::Truncated { need: n, have });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// u16 length followed by that many bytes.
    fn sized(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}

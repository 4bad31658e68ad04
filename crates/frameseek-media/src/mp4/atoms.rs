//! MP4 box definitions and header parsing.

use super::SampleTable;
use crate::{Error, Result};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MOOF: Self = Self(*b"moof");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const AVCC: Self = Self(*b"avcC");
    pub const HVCC: Self = Self(*b"hvcC");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed box header.
#[derive(Debug, Clone)]
pub struct Atom {
    /// Box type code.
    pub atom_type: AtomType,
    /// Box size including header. `None` when the box extends to the end of
    /// its enclosing range (`size == 0` on disk) and that end is not known.
    pub size: Option<u64>,
    /// Offset of the box header.
    pub offset: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
}

impl Atom {
    /// Read a box header at the start of `buf`, which sits at `offset`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold the whole header.
    /// `limit`, when known, is the end of the enclosing range; it resolves
    /// `size == 0` boxes and bounds every other box.
    pub fn read_header(buf: &[u8], offset: u64, limit: Option<u64>) -> Result<Option<Self>> {
        if buf.len() < 8 {
            return Ok(None);
        }

        let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
        let atom_type = AtomType([buf[4], buf[5], buf[6], buf[7]]);

        let (size, header_size) = match size32 {
            1 => {
                if buf.len() < 16 {
                    return Ok(None);
                }
                let mut ext = [0u8; 8];
                ext.copy_from_slice(&buf[8..16]);
                (Some(u64::from_be_bytes(ext)), 16u8)
            }
            0 => (limit.map(|end| end.saturating_sub(offset)), 8u8),
            n => (Some(n), 8u8),
        };

        if let Some(size) = size {
            if size < header_size as u64 {
                return Err(Error::parse(format!(
                    "box {atom_type} at offset {offset} has invalid size {size}"
                )));
            }
            if let Some(end) = limit {
                let box_end = offset.checked_add(size).ok_or_else(|| {
                    Error::parse(format!("box {atom_type} at offset {offset} overflows"))
                })?;
                if box_end > end {
                    return Err(Error::Truncated {
                        need: size as usize,
                        have: end.saturating_sub(offset) as usize,
                    });
                }
            }
        }

        Ok(Some(Self {
            atom_type,
            size,
            offset,
            header_size,
        }))
    }

    /// Offset where the box data starts (after the header).
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header_size as u64
    }

    /// Get the data size (size - header).
    pub fn data_size(&self) -> Option<u64> {
        self.size.map(|s| s.saturating_sub(self.header_size as u64))
    }

    /// Offset one past the last byte of the box.
    pub fn end(&self) -> Option<u64> {
        self.size.map(|s| self.offset + s)
    }
}

/// Split a fully buffered container payload into its child boxes.
///
/// Offsets of the returned atoms are relative to `data`.
pub fn child_atoms(data: &[u8]) -> Result<Vec<Atom>> {
    let mut atoms = Vec::new();
    let end = data.len() as u64;
    let mut pos = 0u64;

    while pos < end {
        let rest = &data[pos as usize..];
        let atom = Atom::read_header(rest, pos, Some(end))?.ok_or(Error::Truncated {
            need: 8,
            have: rest.len(),
        })?;
        // limit is known, so size is always resolved
        let size = atom.size.unwrap_or(end - pos);
        atoms.push(atom);
        pos += size;
    }

    Ok(atoms)
}

/// Borrow the data section of a child atom produced by [`child_atoms`].
pub fn atom_data<'a>(parent: &'a [u8], atom: &Atom) -> &'a [u8] {
    let start = atom.data_offset() as usize;
    let end = atom.end().map(|e| e as usize).unwrap_or(parent.len());
    &parent[start.min(end)..end]
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

/// First sample entry of a visual track's `stsd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualSampleEntry {
    /// Sample entry fourcc, e.g. `avc1`.
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    /// avcC / hvcC payload without its box header.
    pub codec_config: Option<Vec<u8>>,
}

impl VisualSampleEntry {
    pub fn fourcc_str(&self) -> String {
        String::from_utf8_lossy(&self.fourcc).into_owned()
    }
}

/// Track information extracted from a trak box.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track ID.
    pub track_id: u32,
    /// Handler type (video/audio/etc).
    pub handler_type: HandlerType,
    /// Track duration in media timescale.
    pub duration: u64,
    /// Media timescale (ticks per second for this track).
    pub timescale: u32,
    /// Sample table with all sample info.
    pub sample_table: SampleTable,
    /// Visual sample entry, for video tracks.
    pub sample_entry: Option<VisualSampleEntry>,
    /// Width from tkhd.
    pub width: Option<u32>,
    /// Height from tkhd.
    pub height: Option<u32>,
}

impl TrackInfo {
    /// Create empty track info.
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Unknown([0; 4]),
            duration: 0,
            timescale: 0,
            sample_table: SampleTable::default(),
            sample_entry: None,
            width: None,
            height: None,
        }
    }

    /// Get duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }
}

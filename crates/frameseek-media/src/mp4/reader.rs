//! moov box parsing.

use super::atoms::{atom_data, child_atoms};
use super::cursor::ByteReader;
use super::{AtomType, HandlerType, Movie, SampleTableBuilder, TrackInfo, VisualSampleEntry};
use crate::{Error, Result};
use tracing::debug;

/// Size of the fixed VisualSampleEntry fields; child boxes follow them.
const VISUAL_ENTRY_FIELDS: usize = 78;

/// Parser for a fully buffered moov payload.
pub struct MoovParser {
    max_atom_size: u64,
}

impl MoovParser {
    pub fn new(max_atom_size: u64) -> Self {
        Self { max_atom_size }
    }

    /// Parse the moov payload (without its own box header).
    pub fn parse(&self, moov: &[u8]) -> Result<Movie> {
        let mut movie = Movie::default();

        for child in child_atoms(moov)? {
            self.check_size(&child.atom_type, child.data_size().unwrap_or(0))?;
            let data = atom_data(moov, &child);
            match child.atom_type {
                AtomType::MVHD => parse_mvhd(data, &mut movie)?,
                AtomType::TRAK => {
                    let track = self.parse_trak(data)?;
                    debug!(
                        track_id = track.track_id,
                        handler = ?track.handler_type,
                        samples = track.sample_table.len(),
                        "Parsed track"
                    );
                    match track.handler_type {
                        HandlerType::Video if movie.video_track.is_none() => {
                            movie.video_track = Some(track);
                        }
                        _ => movie.other_tracks += 1,
                    }
                }
                _ => {}
            }
        }

        Ok(movie)
    }

    fn check_size(&self, atom_type: &AtomType, size: u64) -> Result<()> {
        if size > self.max_atom_size {
            return Err(Error::AtomTooLarge {
                atom: atom_type.to_string(),
                size,
                max: self.max_atom_size,
            });
        }
        Ok(())
    }

    fn parse_trak(&self, trak: &[u8]) -> Result<TrackInfo> {
        let mut track = TrackInfo::new(0);

        for child in child_atoms(trak)? {
            let data = atom_data(trak, &child);
            match child.atom_type {
                AtomType::TKHD => parse_tkhd(data, &mut track)?,
                AtomType::MDIA => self.parse_mdia(data, &mut track)?,
                _ => {}
            }
        }

        Ok(track)
    }

    fn parse_mdia(&self, mdia: &[u8], track: &mut TrackInfo) -> Result<()> {
        let children = child_atoms(mdia)?;

        // hdlr decides whether the sample table is worth resolving
        for child in &children {
            let data = atom_data(mdia, child);
            match child.atom_type {
                AtomType::MDHD => parse_mdhd(data, track)?,
                AtomType::HDLR => parse_hdlr(data, track)?,
                _ => {}
            }
        }

        if !track.handler_type.is_video() {
            return Ok(());
        }

        for child in &children {
            if child.atom_type == AtomType::MINF {
                self.parse_minf(atom_data(mdia, child), track)?;
            }
        }

        Ok(())
    }

    fn parse_minf(&self, minf: &[u8], track: &mut TrackInfo) -> Result<()> {
        let stbl = child_atoms(minf)?
            .into_iter()
            .find(|a| a.atom_type == AtomType::STBL)
            .ok_or(Error::MissingAtom("stbl"))?;
        self.parse_stbl(atom_data(minf, &stbl), track)
    }

    fn parse_stbl(&self, stbl: &[u8], track: &mut TrackInfo) -> Result<()> {
        let mut builder = SampleTableBuilder::new();

        for child in child_atoms(stbl)? {
            self.check_size(&child.atom_type, child.data_size().unwrap_or(0))?;
            let data = atom_data(stbl, &child);
            match child.atom_type {
                AtomType::STSD => track.sample_entry = parse_stsd(data)?,
                AtomType::STTS => builder.set_stts(parse_stts(data)?),
                AtomType::STSS => builder.set_sync_samples(parse_stss(data)?),
                AtomType::STSC => builder.set_stsc(parse_stsc(data)?),
                AtomType::STSZ => {
                    let (uniform, count, sizes) = parse_stsz(data)?;
                    builder.set_stsz(uniform, count, sizes);
                }
                AtomType::STCO => builder.set_chunk_offsets(parse_stco(data)?),
                AtomType::CO64 => builder.set_chunk_offsets(parse_co64(data)?),
                _ => {}
            }
        }

        if track.sample_entry.is_none() {
            return Err(Error::MissingAtom("stsd"));
        }
        track.sample_table = builder.build()?;
        Ok(())
    }
}

/// Parse mvhd (movie header).
fn parse_mvhd(data: &[u8], movie: &mut Movie) -> Result<()> {
    let mut r = ByteReader::new(data);
    let version = r.u8()?;
    r.skip(3)?;
    if version == 1 {
        r.skip(16)?;
        movie.timescale = r.u32()?;
        movie.duration = r.u64()?;
    } else {
        r.skip(8)?;
        movie.timescale = r.u32()?;
        movie.duration = r.u32()? as u64;
    }
    Ok(())
}

/// Parse tkhd (track header).
fn parse_tkhd(data: &[u8], track: &mut TrackInfo) -> Result<()> {
    let mut r = ByteReader::new(data);
    let version = r.u8()?;
    r.skip(3)?;
    if version == 1 {
        r.skip(16)?;
        track.track_id = r.u32()?;
        r.skip(4 + 8)?;
    } else {
        r.skip(8)?;
        track.track_id = r.u32()?;
        r.skip(4 + 4)?;
    }
    // reserved, layer, alternate group, volume, reserved, matrix
    r.skip(8 + 8 + 36)?;
    // 16.16 fixed point; absent in some writers
    if r.remaining() >= 8 {
        track.width = Some(r.u32()? >> 16);
        track.height = Some(r.u32()? >> 16);
    }
    Ok(())
}

/// Parse mdhd (media header).
fn parse_mdhd(data: &[u8], track: &mut TrackInfo) -> Result<()> {
    let mut r = ByteReader::new(data);
    let version = r.u8()?;
    r.skip(3)?;
    if version == 1 {
        r.skip(16)?;
        track.timescale = r.u32()?;
        track.duration = r.u64()?;
    } else {
        r.skip(8)?;
        track.timescale = r.u32()?;
        track.duration = r.u32()? as u64;
    }
    Ok(())
}

/// Parse hdlr (handler).
fn parse_hdlr(data: &[u8], track: &mut TrackInfo) -> Result<()> {
    let mut r = ByteReader::new(data);
    r.skip(8)?;
    track.handler_type = HandlerType::from_bytes(r.fourcc()?);
    Ok(())
}

/// Parse stsd (sample description); only the first entry is used.
fn parse_stsd(data: &[u8]) -> Result<Option<VisualSampleEntry>> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    if r.u32()? == 0 {
        return Ok(None);
    }

    let entries = &data[8..];
    let entry = child_atoms(entries)?
        .into_iter()
        .next()
        .ok_or(Error::MissingAtom("stsd"))?;
    let body = atom_data(entries, &entry);

    // SampleEntry: reserved(6) + data_reference_index(2)
    // VisualSampleEntry: pre_defined/reserved(16), width(2), height(2), ...
    let mut r = ByteReader::new(body);
    r.skip(8 + 16)?;
    let width = r.u16()?;
    let height = r.u16()?;

    let codec_config = if body.len() > VISUAL_ENTRY_FIELDS {
        let extensions = &body[VISUAL_ENTRY_FIELDS..];
        child_atoms(extensions)?
            .into_iter()
            .find(|a| a.atom_type == AtomType::AVCC || a.atom_type == AtomType::HVCC)
            .map(|a| atom_data(extensions, &a).to_vec())
    } else {
        None
    };

    Ok(Some(VisualSampleEntry {
        fourcc: entry.atom_type.0,
        width,
        height,
        codec_config,
    }))
}

/// Parse stts (decoding time to sample).
fn parse_stts(data: &[u8]) -> Result<Vec<(u32, u32)>> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let count = r.entry_count(8)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push((r.u32()?, r.u32()?));
    }
    Ok(entries)
}

/// Parse stss (sync sample).
fn parse_stss(data: &[u8]) -> Result<Vec<u32>> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let count = r.entry_count(4)?;
    (0..count).map(|_| r.u32()).collect()
}

/// Parse stsc (sample to chunk).
fn parse_stsc(data: &[u8]) -> Result<Vec<(u32, u32, u32)>> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let count = r.entry_count(12)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push((r.u32()?, r.u32()?, r.u32()?));
    }
    Ok(entries)
}

/// Parse stsz (sample size).
fn parse_stsz(data: &[u8]) -> Result<(u32, u32, Vec<u32>)> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let uniform_size = r.u32()?;
    if uniform_size != 0 {
        let count = r.u32()?;
        return Ok((uniform_size, count, Vec::new()));
    }
    let count = r.entry_count(4)?;
    let sizes = (0..count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
    Ok((0, count as u32, sizes))
}

/// Parse stco (chunk offset, 32-bit).
fn parse_stco(data: &[u8]) -> Result<Vec<u64>> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let count = r.entry_count(4)?;
    (0..count).map(|_| r.u32().map(u64::from)).collect()
}

/// Parse co64 (chunk offset, 64-bit).
fn parse_co64(data: &[u8]) -> Result<Vec<u64>> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let count = r.entry_count(8)?;
    (0..count).map(|_| r.u64()).collect()
}

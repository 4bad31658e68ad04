//! Incremental MP4 demuxer.
//!
//! [`Mp4Demuxer`] accepts container bytes in arbitrary pieces and emits the
//! stream configuration followed by access units in decode order. Bytes are
//! kept in one append-only buffer; once the sample table is known, the prefix
//! that no remaining sample refers to is released.

use crate::mp4::{Atom, AtomType, MoovParser, SampleEntry};
use crate::{Error, Result};
use bytes::Bytes;
use frameseek_common::{AccessUnit, ErrorDescriptor, StreamConfig};
use tracing::{debug, trace, warn};

/// Release buffered bytes once at least this much is dead.
const TRIM_THRESHOLD: usize = 256 * 1024;

/// Demuxer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxOptions {
    /// Maximum number of access units per [`DemuxEvent::Units`] batch.
    pub batch_size: usize,
    /// Largest box payload that will be buffered and parsed.
    pub max_atom_size: u64,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_atom_size: 64 * 1024 * 1024,
        }
    }
}

/// Output of the demuxer.
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxEvent {
    /// Emitted exactly once, before any units.
    Config(StreamConfig),
    /// Access units in decode order.
    Units(Vec<AccessUnit>),
}

#[derive(Debug)]
enum Phase {
    /// Walking top-level boxes looking for moov.
    Scanning { next_box: u64 },
    /// Sample table known; cutting samples out of the buffer.
    Extracting,
    /// Every sample has been emitted.
    Done,
}

/// Incremental MP4 demuxer for a single video track.
pub struct Mp4Demuxer {
    options: DemuxOptions,
    buf: Vec<u8>,
    /// File offset of `buf[0]`.
    base: u64,
    phase: Phase,
    /// moov declared with size 0; parsed at end of input.
    open_moov: Option<u64>,
    samples: Vec<SampleEntry>,
    /// `min_offset[i]` = lowest file offset among samples `i..`.
    min_offset: Vec<u64>,
    next_sample: usize,
    config: Option<StreamConfig>,
    poisoned: Option<ErrorDescriptor>,
}

impl Mp4Demuxer {
    pub fn new(options: DemuxOptions) -> Self {
        Self {
            options: DemuxOptions {
                batch_size: options.batch_size.max(1),
                ..options
            },
            buf: Vec::new(),
            base: 0,
            phase: Phase::Scanning { next_box: 0 },
            open_moov: None,
            samples: Vec::new(),
            min_offset: Vec::new(),
            next_sample: 0,
            config: None,
            poisoned: None,
        }
    }

    /// Append bytes and return everything that became available.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<DemuxEvent>> {
        self.check_poisoned()?;
        self.buf.extend_from_slice(data);
        let result = self.advance();
        self.guard(result)
    }

    /// Signal end of input.
    ///
    /// Fails when no moov was found or when sample data is missing.
    pub fn finish(&mut self) -> Result<Vec<DemuxEvent>> {
        self.check_poisoned()?;
        let result = self.finish_inner();
        self.guard(result)
    }

    /// Stream configuration, once known.
    pub fn config(&self) -> Option<&StreamConfig> {
        self.config.as_ref()
    }

    /// Number of access units emitted so far.
    pub fn emitted(&self) -> u32 {
        self.next_sample as u32
    }

    /// Whether every sample has been emitted.
    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Keyframe indices of the whole track, once the sample table is known.
    pub fn keyframe_index(&self) -> Vec<u32> {
        self.samples
            .iter()
            .filter(|s| s.is_keyframe)
            .map(|s| s.index)
            .collect()
    }

    /// Bytes currently held in the buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn check_poisoned(&self) -> Result<()> {
        match &self.poisoned {
            Some(desc) => Err(Error::Poisoned(desc.clone())),
            None => Ok(()),
        }
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(error = %e, "Demuxer failed");
            self.poisoned = Some(e.descriptor());
            self.buf = Vec::new();
        }
        result
    }

    fn finish_inner(&mut self) -> Result<Vec<DemuxEvent>> {
        let mut events = Vec::new();

        if let Some(offset) = self.open_moov.take() {
            let end = self.base + self.buf.len() as u64;
            events.extend(self.load_moov(offset, end)?);
        }

        match self.phase {
            Phase::Scanning { .. } => Err(Error::MissingAtom("moov")),
            Phase::Extracting => {
                events.extend(self.extract());
                if self.is_done() {
                    Ok(events)
                } else {
                    Err(Error::parse(format!(
                        "sample data truncated: {} of {} samples available",
                        self.next_sample,
                        self.samples.len()
                    )))
                }
            }
            Phase::Done => Ok(events),
        }
    }

    fn advance(&mut self) -> Result<Vec<DemuxEvent>> {
        let mut events = Vec::new();

        while let Phase::Scanning { next_box } = self.phase {
            if self.open_moov.is_some() {
                break;
            }
            let rel = (next_box - self.base) as usize;
            if rel > self.buf.len() {
                break;
            }
            let Some(atom) = Atom::read_header(&self.buf[rel..], next_box, None)? else {
                break;
            };
            trace!(atom = %atom.atom_type, offset = atom.offset, size = ?atom.size, "Top-level box");

            let end = match atom.size {
                Some(size) => Some(next_box.checked_add(size).ok_or_else(|| {
                    Error::parse(format!(
                        "box {} at offset {} overflows",
                        atom.atom_type, next_box
                    ))
                })?),
                None => None,
            };

            match (atom.atom_type, atom.size, end) {
                (AtomType::MOOF, _, _) => {
                    return Err(Error::parse("fragmented MP4 is not supported"));
                }
                (AtomType::MOOV, Some(size), Some(end)) => {
                    let data_size = size - atom.header_size as u64;
                    self.check_atom_size(&atom.atom_type, data_size)?;
                    if end > self.base + self.buf.len() as u64 {
                        break;
                    }
                    events.extend(self.load_moov(next_box, end)?);
                }
                (AtomType::MOOV, _, _) => {
                    self.open_moov = Some(next_box);
                }
                (_, _, Some(end)) => {
                    self.phase = Phase::Scanning { next_box: end };
                }
                // a box running to end of file leaves no room for moov after it
                (_, _, None) => break,
            }
        }

        if matches!(self.phase, Phase::Extracting) {
            events.extend(self.extract());
        }
        Ok(events)
    }

    fn check_atom_size(&self, atom_type: &AtomType, size: u64) -> Result<()> {
        if size > self.options.max_atom_size {
            return Err(Error::AtomTooLarge {
                atom: atom_type.to_string(),
                size,
                max: self.options.max_atom_size,
            });
        }
        Ok(())
    }

    /// Parse the moov box spanning `[start, end)` and switch to extraction.
    fn load_moov(&mut self, start: u64, end: u64) -> Result<Vec<DemuxEvent>> {
        let from = (start - self.base) as usize;
        let to = (end - self.base) as usize;
        let header = Atom::read_header(&self.buf[from..to], start, Some(end))?
            .ok_or(Error::Truncated {
                need: 8,
                have: to - from,
            })?;
        let payload = &self.buf[from + header.header_size as usize..to];
        self.check_atom_size(&AtomType::MOOV, payload.len() as u64)?;

        let movie = MoovParser::new(self.options.max_atom_size).parse(payload)?;
        let config = movie.stream_config()?;
        let samples = movie
            .video_track
            .map(|t| t.sample_table.samples)
            .unwrap_or_default();

        let mut min_offset = vec![u64::MAX; samples.len() + 1];
        for (i, sample) in samples.iter().enumerate().rev() {
            min_offset[i] = min_offset[i + 1].min(sample.offset);
        }

        debug!(
            total_frames = config.total_frames,
            fps = config.fps,
            codec = %config.codec,
            width = config.width,
            height = config.height,
            "Parsed moov"
        );

        self.samples = samples;
        self.min_offset = min_offset;
        self.config = Some(config.clone());
        self.phase = Phase::Extracting;
        Ok(vec![DemuxEvent::Config(config)])
    }

    /// Emit every sample whose bytes are buffered, in decode order.
    fn extract(&mut self) -> Vec<DemuxEvent> {
        let mut events = Vec::new();
        let mut batch = Vec::new();
        let buffered_end = self.base + self.buf.len() as u64;

        while let Some(sample) = self.samples.get(self.next_sample) {
            if sample.end() > buffered_end {
                break;
            }
            let from = (sample.offset - self.base) as usize;
            let payload = Bytes::copy_from_slice(&self.buf[from..from + sample.size as usize]);
            batch.push(AccessUnit::new(
                sample.index,
                sample.is_keyframe,
                sample.dts,
                sample.duration as u64,
                payload,
            ));
            self.next_sample += 1;

            if batch.len() == self.options.batch_size {
                events.push(DemuxEvent::Units(std::mem::take(&mut batch)));
            }
        }
        if !batch.is_empty() {
            events.push(DemuxEvent::Units(batch));
        }

        if self.next_sample == self.samples.len() {
            self.phase = Phase::Done;
            self.buf = Vec::new();
            return events;
        }

        let keep_from = self.min_offset[self.next_sample];
        let dead = keep_from.saturating_sub(self.base).min(self.buf.len() as u64) as usize;
        if dead >= TRIM_THRESHOLD {
            self.buf.drain(..dead);
            self.base += dead as u64;
        }
        events
    }
}

/// Everything a demuxer produced for a complete file.
#[derive(Debug, Clone)]
pub struct DemuxOutput {
    pub config: StreamConfig,
    pub units: Vec<AccessUnit>,
    pub keyframes: Vec<u32>,
}

/// Demux a fully buffered file.
pub fn demux_all(data: &[u8], options: DemuxOptions) -> Result<DemuxOutput> {
    let mut demuxer = Mp4Demuxer::new(options);
    let mut events = demuxer.push(data)?;
    events.extend(demuxer.finish()?);

    let mut config = None;
    let mut units = Vec::new();
    for event in events {
        match event {
            DemuxEvent::Config(c) => config = Some(c),
            DemuxEvent::Units(batch) => units.extend(batch),
        }
    }
    let config = config.ok_or(Error::MissingAtom("moov"))?;

    Ok(DemuxOutput {
        config,
        units,
        keyframes: demuxer.keyframe_index(),
    })
}

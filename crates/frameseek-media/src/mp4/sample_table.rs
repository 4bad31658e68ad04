//! MP4 sample table resolution.
//!
//! Sample tables describe how samples (frames) are organized in the file:
//! - stts: sample durations (decoding time)
//! - stss: sync sample table (keyframes)
//! - stsc: sample-to-chunk mapping
//! - stsz: sample sizes
//! - stco/co64: chunk offsets

use crate::{Error, Result};

/// A resolved sample with everything needed to cut it out of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Sample index (0-based).
    pub index: u32,
    /// File offset where sample data starts.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Sample duration in media timescale.
    pub duration: u32,
    /// Whether this sample is a keyframe (sync sample).
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// File offset one past the last byte of the sample.
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

/// Sample table containing resolved sample information.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    /// All resolved samples in decode order.
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    /// Create a new sample table builder.
    pub fn builder() -> SampleTableBuilder {
        SampleTableBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get sample by index.
    pub fn get(&self, index: u32) -> Option<&SampleEntry> {
        self.samples.get(index as usize)
    }

    /// Keyframe sample indices in increasing order.
    pub fn keyframe_indices(&self) -> Vec<u32> {
        self.samples
            .iter()
            .filter(|s| s.is_keyframe)
            .map(|s| s.index)
            .collect()
    }

    /// Sum of all sample durations in media timescale.
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }
}

/// Builder for constructing a sample table from raw box data.
#[derive(Debug, Default)]
pub struct SampleTableBuilder {
    // stts: (count, delta)
    stts_entries: Option<Vec<(u32, u32)>>,
    // stss: 1-based sync sample numbers; None means every sample is sync
    sync_samples: Option<Vec<u32>>,
    // stsc: (first_chunk, samples_per_chunk, sample_description_index)
    stsc_entries: Option<Vec<(u32, u32, u32)>>,
    // stsz: uniform size (0 = per-sample sizes) and sample count
    stsz: Option<(u32, u32, Vec<u32>)>,
    // stco/co64
    chunk_offsets: Option<Vec<u64>>,
}

impl SampleTableBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set stts (decoding time to sample) entries.
    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts_entries = Some(entries);
    }

    /// Set stss (sync sample) entries.
    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    /// Set stsc (sample to chunk) entries.
    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc_entries = Some(entries);
    }

    /// Set stsz (sample size) data.
    pub fn set_stsz(&mut self, uniform_size: u32, sample_count: u32, sizes: Vec<u32>) {
        self.stsz = Some((uniform_size, sample_count, sizes));
    }

    /// Set chunk offsets (from stco or co64).
    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = Some(offsets);
    }

    /// Build the sample table by resolving all sample information.
    pub fn build(self) -> Result<SampleTable> {
        let (uniform_size, sample_count, sizes) = self.stsz.ok_or(Error::MissingAtom("stsz"))?;
        let stts = self.stts_entries.ok_or(Error::MissingAtom("stts"))?;
        let stsc = self.stsc_entries.ok_or(Error::MissingAtom("stsc"))?;
        let chunk_offsets = self.chunk_offsets.ok_or(Error::MissingAtom("stco"))?;

        if uniform_size == 0 && sizes.len() != sample_count as usize {
            return Err(Error::parse(format!(
                "stsz lists {} sizes for {} samples",
                sizes.len(),
                sample_count
            )));
        }
        if sample_count == 0 {
            return Ok(SampleTable::default());
        }

        let sample_chunks = resolve_sample_chunks(&stsc, chunk_offsets.len(), sample_count)?;
        let timestamps = resolve_timestamps(&stts, sample_count)?;
        let keyframes = resolve_keyframes(self.sync_samples.as_deref(), sample_count)?;

        let mut samples = Vec::with_capacity(sample_count as usize);
        let mut chunk_cursor: Option<(u32, u64)> = None;

        for i in 0..sample_count {
            let size = if uniform_size > 0 {
                uniform_size
            } else {
                sizes[i as usize]
            };

            // samples of one chunk are contiguous; a new chunk restarts at its base
            let chunk = sample_chunks[i as usize];
            let offset = match chunk_cursor {
                Some((current, next)) if current == chunk => next,
                _ => chunk_offsets[chunk as usize],
            };
            let end = offset.checked_add(size as u64).ok_or_else(|| {
                Error::parse(format!("sample {i} offset {offset} overflows"))
            })?;
            chunk_cursor = Some((chunk, end));

            let (dts, duration) = timestamps[i as usize];
            samples.push(SampleEntry {
                index: i,
                offset,
                size,
                dts,
                duration,
                is_keyframe: keyframes[i as usize],
            });
        }

        Ok(SampleTable { samples })
    }
}

/// Map every sample to its 0-based chunk index.
fn resolve_sample_chunks(
    stsc: &[(u32, u32, u32)],
    num_chunks: usize,
    sample_count: u32,
) -> Result<Vec<u32>> {
    let num_chunks = num_chunks as u32;
    let mut result = Vec::with_capacity(sample_count as usize);

    for (i, &(first_chunk, samples_per_chunk, _)) in stsc.iter().enumerate() {
        let next_first = stsc.get(i + 1).map(|e| e.0).unwrap_or(num_chunks + 1);
        if first_chunk == 0 || next_first < first_chunk {
            return Err(Error::parse(format!(
                "stsc entry {i} has invalid first chunk {first_chunk}"
            )));
        }

        for chunk in first_chunk..next_first.min(num_chunks + 1) {
            for _ in 0..samples_per_chunk {
                if result.len() as u32 == sample_count {
                    return Ok(result);
                }
                result.push(chunk - 1);
            }
        }
    }

    if (result.len() as u32) < sample_count {
        return Err(Error::parse(format!(
            "chunk tables cover {} of {} samples",
            result.len(),
            sample_count
        )));
    }
    Ok(result)
}

/// Resolve (dts, duration) per sample.
fn resolve_timestamps(stts: &[(u32, u32)], sample_count: u32) -> Result<Vec<(u64, u32)>> {
    let mut out = Vec::with_capacity(sample_count as usize);
    let mut current_dts = 0u64;

    'entries: for &(count, delta) in stts {
        for _ in 0..count {
            if out.len() as u32 == sample_count {
                break 'entries;
            }
            out.push((current_dts, delta));
            current_dts += delta as u64;
        }
    }

    // short stts tables are padded with the last delta
    let last_delta = match out.last() {
        Some(&(_, delta)) => delta,
        None => return Err(Error::parse("stts has no entries")),
    };
    while (out.len() as u32) < sample_count {
        out.push((current_dts, last_delta));
        current_dts += last_delta as u64;
    }

    Ok(out)
}

fn resolve_keyframes(sync_samples: Option<&[u32]>, sample_count: u32) -> Result<Vec<bool>> {
    let Some(sync_samples) = sync_samples else {
        // No stss means all samples are sync samples
        return Ok(vec![true; sample_count as usize]);
    };

    let mut keyframes = vec![false; sample_count as usize];
    for &number in sync_samples {
        // stss uses 1-based numbering
        if number == 0 || number > sample_count {
            return Err(Error::parse(format!(
                "sync sample {number} outside 1..={sample_count}"
            )));
        }
        keyframes[(number - 1) as usize] = true;
    }
    Ok(keyframes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn builder(sample_count: u32) -> SampleTableBuilder {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(sample_count, 1000)]);
        builder.set_stsc(vec![(1, sample_count, 1)]);
        builder.set_stsz(100, sample_count, vec![]);
        builder.set_chunk_offsets(vec![0]);
        builder
    }

    #[test]
    fn test_sample_table_builder() {
        let mut builder = SampleTableBuilder::new();

        // 3 samples, each with duration 1000
        builder.set_stts(vec![(3, 1000)]);

        // Sample 1 is a keyframe (1-based)
        builder.set_sync_samples(vec![1]);

        // All samples in chunk 1
        builder.set_stsc(vec![(1, 3, 1)]);

        // Individual sample sizes
        builder.set_stsz(0, 3, vec![100, 200, 150]);

        // One chunk at offset 1000
        builder.set_chunk_offsets(vec![1000]);

        let table = builder.build().unwrap();
        assert_eq!(table.len(), 3);

        assert_eq!(table.samples[0].offset, 1000);
        assert_eq!(table.samples[0].size, 100);
        assert_eq!(table.samples[0].dts, 0);
        assert!(table.samples[0].is_keyframe);

        assert_eq!(table.samples[1].offset, 1100);
        assert_eq!(table.samples[1].dts, 1000);
        assert!(!table.samples[1].is_keyframe);

        assert_eq!(table.samples[2].offset, 1300);
        assert_eq!(table.samples[2].end(), 1450);
        assert_eq!(table.total_duration(), 3000);
    }

    #[test]
    fn test_multiple_chunks() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(2, 500), (3, 1000)]);
        // chunks 1-2 hold 2 samples each, chunk 3 holds 1
        builder.set_stsc(vec![(1, 2, 1), (3, 1, 1)]);
        builder.set_stsz(10, 5, vec![]);
        builder.set_chunk_offsets(vec![100, 500, 900]);

        let table = builder.build().unwrap();
        let offsets: Vec<u64> = table.samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![100, 110, 500, 510, 900]);
        let dts: Vec<u64> = table.samples.iter().map(|s| s.dts).collect();
        assert_eq!(dts, vec![0, 500, 1000, 2000, 3000]);
        assert_eq!(table.keyframe_indices(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_keyframe_indices() {
        let mut b = builder(10);
        b.set_sync_samples(vec![1, 5, 9]);
        let table = b.build().unwrap();
        assert_eq!(table.keyframe_indices(), vec![0, 4, 8]);
    }

    #[test]
    fn test_short_stts_is_padded() {
        let mut b = builder(4);
        b.set_stts(vec![(2, 40)]);
        let table = b.build().unwrap();
        assert_eq!(table.samples[3].dts, 120);
        assert_eq!(table.samples[3].duration, 40);
    }

    #[test]
    fn test_missing_tables() {
        let mut b = SampleTableBuilder::new();
        b.set_stts(vec![(1, 1)]);
        assert_matches!(b.build(), Err(Error::MissingAtom("stsz")));
    }

    #[test]
    fn test_chunks_do_not_cover_samples() {
        let mut b = builder(10);
        b.set_stsc(vec![(1, 4, 1)]);
        assert_matches!(b.build(), Err(Error::Parse(msg)) if msg.contains("4 of 10"));
    }

    #[test]
    fn test_sync_sample_out_of_range() {
        let mut b = builder(3);
        b.set_sync_samples(vec![1, 4]);
        assert_matches!(b.build(), Err(Error::Parse(_)));
    }

    #[test]
    fn test_stsz_size_count_mismatch() {
        let mut b = builder(3);
        b.set_stsz(0, 3, vec![1, 2]);
        assert_matches!(b.build(), Err(Error::Parse(_)));
    }
}

use crate::config::Config;
use anyhow::{Context, Result};
use frameseek_common::StreamConfig;
use frameseek_media::{demux_all, DemuxOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Stream summary of an MP4 file.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub file: PathBuf,
    pub file_size: u64,
    pub stream: StreamConfig,
    pub keyframes: Vec<u32>,
    /// Suppressed decodes needed by the most expensive seek.
    pub max_replay: u32,
}

impl ProbeReport {
    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }
}

/// Longest run of frames after a keyframe, i.e. the worst-case replay.
pub fn max_replay(keyframes: &[u32], total: u32) -> u32 {
    let mut bounds = keyframes.to_vec();
    bounds.push(total);
    bounds
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]).saturating_sub(1))
        .max()
        .unwrap_or(0)
}

/// Parse `path` and summarize its video track.
pub fn probe_file(path: &Path, config: &Config) -> Result<ProbeReport> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let options = DemuxOptions {
        batch_size: config.demux.batch_size,
        max_atom_size: config.demux.max_atom_size,
    };
    let output = demux_all(&data, options).with_context(|| format!("Failed to parse {:?}", path))?;
    let total = output.units.len() as u32;

    Ok(ProbeReport {
        file: path.to_path_buf(),
        file_size: data.len() as u64,
        max_replay: max_replay(&output.keyframes, total),
        stream: output.config,
        keyframes: output.keyframes,
    })
}

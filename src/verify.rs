//! Seek verification against sequential decode.
//!
//! The file is decoded front to back once to get the checksum of every
//! frame; then sampled frames are sought twice each through a full player
//! and both presented pictures must match the sequential checksum.

use crate::config::Config;
use anyhow::{Context, Result};
use frameseek_media::{demux_all, DemuxOptions};
use frameseek_player::{
    open_player, CaptureSink, CommandOutcome, DecoderConfig, DecoderSession, OutputFn, Picture,
    PresentationIntent,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One sampled frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameCheck {
    pub index: u32,
    pub keyframe: u32,
    pub replayed: u32,
    pub expected: String,
    pub first: String,
    pub second: String,
}

impl FrameCheck {
    pub fn passed(&self) -> bool {
        self.first == self.expected && self.second == self.expected
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub total_frames: u32,
    pub checks: Vec<FrameCheck>,
}

impl VerifyReport {
    pub fn failures(&self) -> impl Iterator<Item = &FrameCheck> {
        self.checks.iter().filter(|c| !c.passed())
    }

    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Every `stride`-th frame plus the last one.
pub fn sample_indices(total: u32, stride: u32) -> Vec<u32> {
    if total == 0 {
        return Vec::new();
    }
    let mut indices: Vec<u32> = (0..total).step_by(stride.max(1) as usize).collect();
    if indices.last() != Some(&(total - 1)) {
        indices.push(total - 1);
    }
    indices
}

/// Checksum of every frame, decoded in order with the configured backend.
pub async fn sequential_checksums(path: &Path, config: &Config) -> Result<Vec<String>> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let output = demux_all(
        &data,
        DemuxOptions {
            batch_size: config.demux.batch_size,
            max_atom_size: config.demux.max_atom_size,
        },
    )?;

    let checksums = Arc::new(Mutex::new(Vec::with_capacity(output.units.len())));
    let sink = checksums.clone();
    let on_picture: OutputFn = Box::new(move |p: &Picture| sink.lock().push(p.checksum()));

    let mut session = DecoderSession::new(
        config.player.backend.create()?,
        on_picture,
        config.player_options().session,
    )?;
    session
        .configure(DecoderConfig::from_stream(&output.config))
        .await?;

    let token = CancellationToken::new();
    for unit in output.units {
        if session.pending() >= config.player.max_decode_queue {
            session.flush(&token).await?;
        }
        session.decode(unit, PresentationIntent::Present, &token)?;
    }
    session.flush(&token).await?;

    let checksums = checksums.lock().clone();
    Ok(checksums)
}

/// Seek each sampled frame twice and compare with sequential decode.
pub async fn verify_file(path: &Path, config: &Config, stride: u32) -> Result<VerifyReport> {
    let expected = sequential_checksums(path, config).await?;

    let sink = CaptureSink::new();
    let player = open_player(
        &path.display().to_string(),
        config.worker_options(),
        config.player_options(),
        config.player.backend.create()?,
        Box::new(sink.clone()),
    )?;
    let total = player.wait_for_complete().await?;
    if total as usize != expected.len() {
        anyhow::bail!(
            "Player parsed {} frames but sequential decode produced {}",
            total,
            expected.len()
        );
    }

    let mut checks = Vec::new();
    for index in sample_indices(total, stride) {
        let mut presented = Vec::with_capacity(2);
        let mut report = None;
        for _ in 0..2 {
            match player.seek(index).await? {
                CommandOutcome::Seeked(r) => report = Some(r),
                other => anyhow::bail!("Unexpected outcome for seek {}: {:?}", index, other),
            }
            let frame = sink
                .last()
                .with_context(|| format!("Seek to {} presented nothing", index))?;
            presented.push(frame.checksum);
        }
        let report = report.with_context(|| format!("Seek to {} did not complete", index))?;
        tracing::debug!(index, replayed = report.replayed, "Frame verified");

        checks.push(FrameCheck {
            index,
            keyframe: report.keyframe,
            replayed: report.replayed,
            expected: expected[index as usize].clone(),
            second: presented.pop().unwrap_or_default(),
            first: presented.pop().unwrap_or_default(),
        });
    }
    player.join().await;

    Ok(VerifyReport {
        total_frames: total,
        checks,
    })
}

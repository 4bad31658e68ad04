//! Chunk store: the ordered, append-only list of access units.
//!
//! [`ChunkStore`] is the plain data structure. [`SharedStore`] wraps it for
//! the ingest task (single writer) and the driver (reader), and publishes
//! ingest progress on a watch channel so readers can wait for data without
//! polling.

use crate::{PlayerError, Result};
use frameseek_common::{AccessUnit, ErrorDescriptor, StreamConfig};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Ordered access units plus the keyframe index.
#[derive(Debug, Default)]
pub struct ChunkStore {
    config: Option<StreamConfig>,
    units: Vec<AccessUnit>,
    keyframes: Vec<u32>,
    complete: bool,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append units in decode order.
    ///
    /// The whole batch is rejected if any unit is out of order or if the
    /// first unit of the stream is not a keyframe.
    pub fn append(&mut self, units: Vec<AccessUnit>) -> Result<()> {
        let mut expected = self.units.len() as u32;
        for unit in &units {
            if unit.sequence_index != expected {
                return Err(PlayerError::Parse(ErrorDescriptor::parse(format!(
                    "access unit {} arrived, expected {}",
                    unit.sequence_index, expected
                ))));
            }
            if expected == 0 && !unit.is_keyframe {
                return Err(PlayerError::Parse(ErrorDescriptor::parse(
                    "first access unit is not a keyframe",
                )));
            }
            expected += 1;
        }

        self.keyframes.extend(
            units
                .iter()
                .filter(|u| u.is_keyframe)
                .map(|u| u.sequence_index),
        );
        self.units.extend(units);
        Ok(())
    }

    /// Unit at `index`.
    pub fn get(&self, index: u32) -> Result<&AccessUnit> {
        self.units
            .get(index as usize)
            .ok_or_else(|| PlayerError::out_of_range(index, self.len()))
    }

    /// Largest keyframe index `<= index`; `0` when none qualifies.
    pub fn nearest_keyframe_at_or_before(&self, index: u32) -> u32 {
        let pos = self.keyframes.partition_point(|&k| k <= index);
        if pos == 0 {
            0
        } else {
            self.keyframes[pos - 1]
        }
    }

    /// Units appended so far.
    pub fn len(&self) -> u32 {
        self.units.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn keyframes(&self) -> &[u32] {
        &self.keyframes
    }

    pub fn config(&self) -> Option<&StreamConfig> {
        self.config.as_ref()
    }

    /// Whether parsing signaled completion.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Frames the stream will have once parsing completes.
    pub fn total_frames(&self) -> u32 {
        if self.complete {
            self.len()
        } else {
            self.config.as_ref().map_or(0, |c| c.total_frames)
        }
    }
}

/// Lifecycle of the ingest pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    /// Waiting for the stream configuration.
    Pending,
    /// Configuration known; units are arriving.
    Parsing,
    /// All units are in the store.
    Complete,
    /// Parsing failed; no further units will arrive.
    Failed(ErrorDescriptor),
}

/// Snapshot published after every store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestProgress {
    pub available: u32,
    pub config_ready: bool,
    pub status: IngestStatus,
}

/// Result of waiting for a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Ready,
    /// Parsing finished without reaching the unit.
    Exhausted,
    Failed(ErrorDescriptor),
    Cancelled,
}

/// Store shared between the ingest task and the driver.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<ChunkStore>>,
    progress: Arc<watch::Sender<IngestProgress>>,
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(IngestProgress {
            available: 0,
            config_ready: false,
            status: IngestStatus::Pending,
        });
        Self {
            inner: Arc::new(RwLock::new(ChunkStore::new())),
            progress: Arc::new(progress),
        }
    }

    /// Read access. Do not hold the guard across an await point.
    pub fn read(&self) -> RwLockReadGuard<'_, ChunkStore> {
        self.inner.read()
    }

    pub fn progress(&self) -> IngestProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<IngestProgress> {
        self.progress.subscribe()
    }

    pub fn config(&self) -> Option<StreamConfig> {
        self.inner.read().config.clone()
    }

    pub fn len(&self) -> u32 {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone the unit at `index` (payloads are reference counted).
    pub fn get(&self, index: u32) -> Result<AccessUnit> {
        self.inner.read().get(index).cloned()
    }

    pub fn set_config(&self, config: StreamConfig) -> Result<()> {
        {
            let mut store = self.inner.write();
            if store.config.is_some() {
                return Err(PlayerError::invalid_state("stream config already set"));
            }
            debug!(total_frames = config.total_frames, fps = config.fps, "Stream config stored");
            store.config = Some(config);
        }
        self.publish(IngestStatus::Parsing);
        Ok(())
    }

    pub fn append(&self, units: Vec<AccessUnit>) -> Result<()> {
        {
            let mut store = self.inner.write();
            if store.config.is_none() {
                return Err(PlayerError::invalid_state("units arrived before stream config"));
            }
            store.append(units)?;
        }
        self.publish(IngestStatus::Parsing);
        Ok(())
    }

    /// Mark parsing complete. `total` is the count the parser reported.
    pub fn complete(&self, total: u32) {
        {
            let mut store = self.inner.write();
            if store.len() != total {
                warn!(total, stored = store.len(), "Parser total disagrees with store");
            }
            store.complete = true;
        }
        self.publish(IngestStatus::Complete);
    }

    pub fn fail(&self, error: ErrorDescriptor) {
        warn!(error = %error, "Ingest failed");
        self.publish(IngestStatus::Failed(error));
    }

    /// Compare the parser's keyframe index with the one built on append.
    pub fn verify_keyframes(&self, keyframes: &[u32]) -> bool {
        let store = self.inner.read();
        let matches = store.keyframes() == keyframes;
        if !matches {
            warn!(
                parser = keyframes.len(),
                store = store.keyframes().len(),
                "Keyframe index mismatch"
            );
        }
        matches
    }

    fn publish(&self, status: IngestStatus) {
        let (available, config_ready) = {
            let store = self.inner.read();
            (store.len(), store.config.is_some())
        };
        self.progress.send_modify(|p| {
            p.available = available;
            p.config_ready = config_ready;
            // a failure is final
            if !matches!(p.status, IngestStatus::Failed(_)) {
                p.status = status;
            }
        });
    }

    /// Wait until unit `index` is available.
    pub async fn wait_for(&self, index: u32, cancel: &CancellationToken) -> Availability {
        let mut rx = self.subscribe();
        loop {
            {
                let progress = rx.borrow_and_update();
                if index < progress.available {
                    return Availability::Ready;
                }
                match &progress.status {
                    IngestStatus::Complete => return Availability::Exhausted,
                    IngestStatus::Failed(e) => return Availability::Failed(e.clone()),
                    IngestStatus::Pending | IngestStatus::Parsing => {}
                }
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Availability::Exhausted;
                    }
                }
                _ = cancel.cancelled() => return Availability::Cancelled,
            }
        }
    }

    /// Wait until the stream configuration is known.
    pub async fn wait_for_config(&self, cancel: &CancellationToken) -> Result<StreamConfig> {
        let mut rx = self.subscribe();
        loop {
            {
                let progress = rx.borrow_and_update();
                if progress.config_ready {
                    drop(progress);
                    if let Some(config) = self.config() {
                        return Ok(config);
                    }
                } else if let IngestStatus::Failed(e) = &progress.status {
                    return Err(PlayerError::Parse(e.clone()));
                }
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(PlayerError::Closed);
                    }
                }
                _ = cancel.cancelled() => return Err(PlayerError::Cancelled),
            }
        }
    }

    /// Wait until parsing completes or fails.
    pub async fn wait_for_complete(&self, cancel: &CancellationToken) -> Result<u32> {
        let mut rx = self.subscribe();
        loop {
            {
                let progress = rx.borrow_and_update();
                match &progress.status {
                    IngestStatus::Complete => return Ok(progress.available),
                    IngestStatus::Failed(e) => return Err(PlayerError::Parse(e.clone())),
                    IngestStatus::Pending | IngestStatus::Parsing => {}
                }
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(PlayerError::Closed);
                    }
                }
                _ = cancel.cancelled() => return Err(PlayerError::Cancelled),
            }
        }
    }
}

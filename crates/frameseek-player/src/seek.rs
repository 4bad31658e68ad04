//! Frame-accurate seeking by keyframe replay.
//!
//! A seek to `target` resets the session, replays every unit from the
//! nearest preceding keyframe with [`PresentationIntent::Suppressed`], then
//! decodes `target` itself with [`PresentationIntent::Present`] and waits
//! for the flush barrier.

use crate::decoder::DecoderConfig;
use crate::session::{DecoderSession, PresentationIntent};
use crate::store::SharedStore;
use crate::{PlayerError, Result};
use frameseek_common::AccessUnit;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a completed seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeekReport {
    pub target: u32,
    /// Keyframe the replay started from.
    pub keyframe: u32,
    /// Suppressed decodes issued.
    pub replayed: u32,
}

#[derive(Debug, Clone)]
pub struct SeekEngine {
    store: SharedStore,
    config: DecoderConfig,
}

impl SeekEngine {
    pub fn new(store: SharedStore, config: DecoderConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Units `keyframe..=target`, cloned under a single read lock.
    fn replay_plan(&self, target: u32) -> Result<(u32, Vec<AccessUnit>)> {
        let store = self.store.read();
        if target >= store.len() {
            return Err(PlayerError::out_of_range(target, store.len()));
        }
        let keyframe = store.nearest_keyframe_at_or_before(target);
        let units = (keyframe..=target)
            .map(|i| store.get(i).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok((keyframe, units))
    }

    async fn rebuild(
        &self,
        session: &mut DecoderSession,
        units: &[AccessUnit],
        cancel: &CancellationToken,
    ) -> Result<()> {
        session.reset();
        session.configure(self.config.clone()).await?;
        for unit in units {
            if cancel.is_cancelled() {
                return Err(PlayerError::Cancelled);
            }
            session.decode(unit.clone(), PresentationIntent::Suppressed, cancel)?;
        }
        Ok(())
    }

    /// Present exactly frame `target`.
    pub async fn seek_to(
        &self,
        session: &mut DecoderSession,
        target: u32,
        cancel: &CancellationToken,
    ) -> Result<SeekReport> {
        let (keyframe, mut units) = self.replay_plan(target)?;
        let Some(last) = units.pop() else {
            return Err(PlayerError::out_of_range(target, self.store.len()));
        };
        let replayed = units.len() as u32;
        debug!(target, keyframe, replayed, "Seeking");

        self.rebuild(session, &units, cancel).await?;
        session.decode(last, PresentationIntent::Present, cancel)?;
        session.flush(cancel).await?;

        debug!(target, keyframe, replayed, "Seek completed");
        Ok(SeekReport {
            target,
            keyframe,
            replayed,
        })
    }

    /// Rebuild reference state so `index` is the session's continuation,
    /// without presenting anything.
    pub async fn prime(
        &self,
        session: &mut DecoderSession,
        index: u32,
        cancel: &CancellationToken,
    ) -> Result<SeekReport> {
        let (keyframe, mut units) = self.replay_plan(index)?;
        units.pop();
        let replayed = units.len() as u32;
        debug!(index, keyframe, replayed, "Priming");

        self.rebuild(session, &units, cancel).await?;
        Ok(SeekReport {
            target: index,
            keyframe,
            replayed,
        })
    }

    /// Present `target`, decoding it directly when the session already
    /// continues there.
    pub async fn step_forward(
        &self,
        session: &mut DecoderSession,
        target: u32,
        cancel: &CancellationToken,
    ) -> Result<SeekReport> {
        if session.continuation() != Some(target) {
            return self.seek_to(session, target, cancel).await;
        }
        let (unit, keyframe) = {
            let store = self.store.read();
            (
                store.get(target).cloned()?,
                store.nearest_keyframe_at_or_before(target),
            )
        };
        debug!(target, "Stepping forward");
        session.decode(unit, PresentationIntent::Present, cancel)?;
        session.flush(cancel).await?;
        Ok(SeekReport {
            target,
            keyframe,
            replayed: 0,
        })
    }
}

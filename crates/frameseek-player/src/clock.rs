//! Paced sequential playback.

use crate::seek::SeekEngine;
use crate::session::{DecoderSession, PresentationIntent};
use crate::store::Availability;
use crate::{PlayerError, Result};
use frameseek_common::{ErrorDescriptor, StreamConfig};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_INTERVAL: Duration = Duration::from_nanos(33_333_333);

/// Why a playback run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum StopReason {
    EndOfStream,
    Cancelled,
    ParseFailed(ErrorDescriptor),
    DecodeError { index: u32, reason: String },
}

/// Result of [`PlaybackClock::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackOutcome {
    pub reason: StopReason,
    /// Next index the run would have submitted.
    pub next: u32,
    /// Decode errors recovered from by re-priming.
    pub recovered: Vec<(u32, String)>,
}

/// Drives presentation at the stream's frame rate.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    interval: Duration,
    max_decode_queue: usize,
}

impl PlaybackClock {
    pub fn new(interval: Duration, max_decode_queue: usize) -> Self {
        Self {
            interval,
            max_decode_queue: max_decode_queue.max(1),
        }
    }

    /// Clock at the stream's native rate, 30 fps if the rate is unusable.
    pub fn for_stream(config: &StreamConfig, max_decode_queue: usize) -> Self {
        Self::new(
            config.frame_interval().unwrap_or(DEFAULT_INTERVAL),
            max_decode_queue,
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Present frames from `start` until the end of the stream, a parse
    /// failure, an unrecoverable decode error or cancellation.
    pub async fn run(
        &self,
        engine: &SeekEngine,
        session: &mut DecoderSession,
        start: u32,
        cancel: &CancellationToken,
    ) -> PlaybackOutcome {
        let store = engine.store();
        let mut index = start;
        let mut recovered = Vec::new();
        let mut retried_at: Option<u32> = None;
        let mut deadline: Option<Instant> = None;

        info!(from = start, interval = ?self.interval, "Playback started");

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            let total = store.read().total_frames();
            if total > 0 && index >= total {
                break self.finish(session, cancel).await;
            }
            match store.wait_for(index, cancel).await {
                Availability::Ready => {}
                Availability::Exhausted => break self.finish(session, cancel).await,
                Availability::Failed(e) => break StopReason::ParseFailed(e),
                Availability::Cancelled => break StopReason::Cancelled,
            }

            let step = self.step(engine, session, index, cancel).await;
            match step {
                Ok(primed) => {
                    if primed {
                        deadline = None;
                    }
                }
                Err(PlayerError::Cancelled) => break StopReason::Cancelled,
                Err(e) => {
                    let failed = match &e {
                        PlayerError::Decode { index, .. } => *index,
                        _ => index,
                    };
                    if retried_at == Some(failed) {
                        warn!(index = failed, error = %e, "Decode failed again, stopping");
                        break StopReason::DecodeError {
                            index: failed,
                            reason: e.to_string(),
                        };
                    }
                    warn!(index = failed, error = %e, "Decode failed, re-priming");
                    retried_at = Some(failed);
                    recovered.push((failed, e.to_string()));
                    session.reset();
                    index = failed;
                    deadline = None;
                    continue;
                }
            }
            index += 1;

            let next = next_deadline(deadline, Instant::now(), self.interval);
            deadline = Some(next);

            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = cancel.cancelled() => break StopReason::Cancelled,
            }
        };

        info!(at = index, reason = ?reason, "Playback stopped");
        PlaybackOutcome {
            reason,
            next: index,
            recovered,
        }
    }

    /// Submit one presented decode, priming or draining first as needed.
    /// Returns whether a prime happened.
    async fn step(
        &self,
        engine: &SeekEngine,
        session: &mut DecoderSession,
        index: u32,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut primed = false;
        if session.continuation() != Some(index) {
            let report = engine.prime(session, index, cancel).await?;
            debug!(index, keyframe = report.keyframe, replayed = report.replayed, "Primed");
            primed = true;
        }
        if session.pending() >= self.max_decode_queue {
            session.flush(cancel).await?;
        }
        let unit = engine.store().get(index)?;
        session.decode(unit, PresentationIntent::Present, cancel)?;
        Ok(primed)
    }

    async fn finish(&self, session: &mut DecoderSession, cancel: &CancellationToken) -> StopReason {
        if session.pending() == 0 {
            return StopReason::EndOfStream;
        }
        match session.flush(cancel).await {
            Ok(()) => StopReason::EndOfStream,
            Err(PlayerError::Cancelled) => StopReason::Cancelled,
            Err(e) => {
                let index = match &e {
                    PlayerError::Decode { index, .. } => *index,
                    _ => 0,
                };
                StopReason::DecodeError {
                    index,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// `previous + interval`, or `now` once more than one interval behind so a
/// late clock resynchronises instead of bursting.
fn next_deadline(previous: Option<Instant>, now: Instant, interval: Duration) -> Instant {
    match previous {
        Some(previous) => (previous + interval).max(now),
        None => now + interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecoderConfig, ReferenceDecoder, VideoDecoder};
    use crate::session::{OutputFn, SessionOptions};
    use crate::store::SharedStore;
    use crate::Picture;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use frameseek_common::AccessUnit;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Seen = Arc<Mutex<Vec<(u32, String)>>>;

    fn stream_config(total: u32) -> StreamConfig {
        StreamConfig {
            total_frames: total,
            fps: 500.0,
            duration: total as f64 / 500.0,
            width: 8,
            height: 4,
            codec: "avc1.64001f".to_string(),
            timescale: 500_000,
            codec_config: Bytes::from_static(&[1, 0x64, 0, 0x1f]),
        }
    }

    fn units(range: std::ops::Range<u32>, keyframes: &[u32]) -> Vec<AccessUnit> {
        range
            .map(|i| {
                AccessUnit::new(
                    i,
                    keyframes.contains(&i),
                    i as u64 * 1000,
                    1000,
                    Bytes::from(i.to_be_bytes().to_vec()),
                )
            })
            .collect()
    }

    fn full_store(total: u32, keyframes: &[u32]) -> SharedStore {
        let store = SharedStore::new();
        store.set_config(stream_config(total)).unwrap();
        store.append(units(0..total, keyframes)).unwrap();
        store.complete(total);
        store
    }

    fn session_with(decoder: Box<dyn VideoDecoder>) -> (DecoderSession, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let output: OutputFn =
            Box::new(move |p: &Picture| sink.lock().push((p.sequence_index, p.checksum())));
        let session = DecoderSession::new(decoder, output, SessionOptions::default()).unwrap();
        (session, seen)
    }

    fn engine(store: &SharedStore) -> SeekEngine {
        SeekEngine::new(
            store.clone(),
            DecoderConfig::from_stream(&store.config().unwrap()),
        )
    }

    /// Reference decoder that fails the first `failures` decodes of one index.
    struct FlakyDecoder {
        inner: ReferenceDecoder,
        fail_at: u32,
        failures: Arc<AtomicUsize>,
    }

    impl VideoDecoder for FlakyDecoder {
        fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
            self.inner.configure(config)
        }

        fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<Picture>> {
            if unit.sequence_index == self.fail_at
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(PlayerError::decode(unit.sequence_index, "bitstream error"));
            }
            self.inner.decode(unit)
        }

        fn flush(&mut self) -> Result<Vec<Picture>> {
            self.inner.flush()
        }

        fn reset(&mut self) {
            self.inner.reset()
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_next_deadline() {
        let interval = Duration::from_millis(10);
        let start = Instant::now();

        assert_eq!(next_deadline(None, start, interval), start + interval);
        // on time: drift-free
        let on_time = start + Duration::from_millis(3);
        assert_eq!(next_deadline(Some(start), on_time, interval), start + interval);
        // late by less than two intervals still resyncs, no burst
        let late = start + Duration::from_millis(15);
        assert_eq!(next_deadline(Some(start), late, interval), late);
        let very_late = start + Duration::from_millis(45);
        assert_eq!(next_deadline(Some(start), very_late, interval), very_late);
    }

    #[test]
    fn test_stop_reason_serialization() {
        let json = serde_json::to_value(StopReason::DecodeError {
            index: 7,
            reason: "bitstream error".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"stop": "decode_error", "index": 7, "reason": "bitstream error"})
        );

        let json = serde_json::to_value(StopReason::EndOfStream).unwrap();
        assert_eq!(json, serde_json::json!({"stop": "end_of_stream"}));

        let failed = StopReason::ParseFailed(ErrorDescriptor::parse("bad"));
        let json = serde_json::to_value(failed).unwrap();
        assert_eq!(json["stop"], "parse_failed");
        assert_eq!(json["message"], "bad");
    }

    #[tokio::test]
    async fn test_plays_to_end_in_order() {
        let store = full_store(20, &[0, 10]);
        let engine = engine(&store);
        let (mut session, seen) = session_with(Box::new(ReferenceDecoder::new()));
        let clock = PlaybackClock::for_stream(&store.config().unwrap(), 4);
        assert_eq!(clock.interval(), Duration::from_millis(2));

        let outcome = clock
            .run(&engine, &mut session, 0, &CancellationToken::new())
            .await;
        assert_eq!(outcome.reason, StopReason::EndOfStream);
        assert_eq!(outcome.next, 20);
        assert!(outcome.recovered.is_empty());

        let indices: Vec<u32> = seen.lock().iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
        assert_eq!(session.stats().suppressed, 0);
    }

    #[tokio::test]
    async fn test_resume_at_delta_primes() {
        let store = full_store(60, &[0, 30]);
        let engine = engine(&store);
        let (mut session, seen) = session_with(Box::new(ReferenceDecoder::new()));
        let token = CancellationToken::new();

        engine.seek_to(&mut session, 45, &token).await.unwrap();
        let sought = seen.lock().pop().unwrap();
        session.reset();

        let clock = PlaybackClock::new(Duration::from_millis(1), 8);
        let outcome = clock.run(&engine, &mut session, 45, &token).await;
        assert_eq!(outcome.reason, StopReason::EndOfStream);

        let frames = seen.lock().clone();
        assert_eq!(frames.first(), Some(&sought));
        assert_eq!(frames.len(), 15);
    }

    #[tokio::test]
    async fn test_cancel_stops_playback() {
        let store = full_store(100, &[0]);
        let engine = engine(&store);
        let (mut session, seen) = session_with(Box::new(ReferenceDecoder::new()));
        let clock = PlaybackClock::new(Duration::from_millis(50), 4);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            canceller.cancel();
        });

        let outcome = clock.run(&engine, &mut session, 0, &token).await;
        assert_eq!(outcome.reason, StopReason::Cancelled);
        assert!(outcome.next < 10);
        assert!(seen.lock().len() < 10);
    }

    #[tokio::test]
    async fn test_waits_for_units_in_flight() {
        let store = SharedStore::new();
        store.set_config(stream_config(12)).unwrap();
        store.append(units(0..4, &[0])).unwrap();

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.append(units(4..12, &[8])).unwrap();
            writer.complete(12);
        });

        let engine = engine(&store);
        let (mut session, seen) = session_with(Box::new(ReferenceDecoder::new()));
        let clock = PlaybackClock::new(Duration::from_millis(1), 4);
        let outcome = clock
            .run(&engine, &mut session, 0, &CancellationToken::new())
            .await;

        assert_eq!(outcome.reason, StopReason::EndOfStream);
        assert_eq!(seen.lock().len(), 12);
    }

    #[tokio::test]
    async fn test_stops_on_parse_failure() {
        let store = SharedStore::new();
        store.set_config(stream_config(12)).unwrap();
        store.append(units(0..3, &[0])).unwrap();

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.fail(ErrorDescriptor::parse("truncated mdat"));
        });

        let engine = engine(&store);
        let (mut session, _) = session_with(Box::new(ReferenceDecoder::new()));
        let clock = PlaybackClock::new(Duration::from_millis(1), 4);
        let outcome = clock
            .run(&engine, &mut session, 0, &CancellationToken::new())
            .await;

        assert_matches!(outcome.reason, StopReason::ParseFailed(_));
        assert_eq!(outcome.next, 3);
    }

    #[tokio::test]
    async fn test_recovers_from_one_decode_error() {
        let store = full_store(16, &[0, 8]);
        let engine = engine(&store);
        let decoder = FlakyDecoder {
            inner: ReferenceDecoder::new(),
            fail_at: 5,
            failures: Arc::new(AtomicUsize::new(1)),
        };
        let (mut session, seen) = session_with(Box::new(decoder));
        let clock = PlaybackClock::new(Duration::from_millis(1), 4);

        let outcome = clock
            .run(&engine, &mut session, 0, &CancellationToken::new())
            .await;
        assert_eq!(outcome.reason, StopReason::EndOfStream);
        assert_eq!(outcome.recovered.len(), 1);
        assert_eq!(outcome.recovered[0].0, 5);

        let indices: Vec<u32> = seen.lock().iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_recovered_playback_is_exact() {
        let store = full_store(16, &[0, 8]);
        let engine = engine(&store);
        let token = CancellationToken::new();
        let clock = PlaybackClock::new(Duration::from_millis(1), 4);

        let (mut clean, expected) = session_with(Box::new(ReferenceDecoder::new()));
        clock.run(&engine, &mut clean, 0, &token).await;

        let decoder = FlakyDecoder {
            inner: ReferenceDecoder::new(),
            fail_at: 5,
            failures: Arc::new(AtomicUsize::new(1)),
        };
        let (mut session, seen) = session_with(Box::new(decoder));
        let outcome = clock.run(&engine, &mut session, 0, &token).await;
        assert_eq!(outcome.reason, StopReason::EndOfStream);
        assert_eq!(*seen.lock(), *expected.lock());
    }

    #[tokio::test]
    async fn test_stops_after_repeated_decode_error() {
        let store = full_store(16, &[0, 8]);
        let engine = engine(&store);
        let decoder = FlakyDecoder {
            inner: ReferenceDecoder::new(),
            fail_at: 5,
            failures: Arc::new(AtomicUsize::new(usize::MAX)),
        };
        let (mut session, seen) = session_with(Box::new(decoder));
        let clock = PlaybackClock::new(Duration::from_millis(1), 4);

        let outcome = clock
            .run(&engine, &mut session, 0, &CancellationToken::new())
            .await;
        assert_matches!(outcome.reason, StopReason::DecodeError { index: 5, .. });
        assert!(!seen.lock().iter().any(|(i, _)| *i == 5));
    }
}

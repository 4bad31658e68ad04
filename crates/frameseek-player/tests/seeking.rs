//! Seek correctness over a fully indexed stream.

use assert_matches::assert_matches;
use frameseek_common::WorkerMessage;
use frameseek_media::synth::SyntheticStream;
use frameseek_media::{demux_all, DemuxOptions, DemuxOutput};
use frameseek_player::{
    spawn_player, CaptureSink, CommandOutcome, DecoderConfig, DecoderSession, OutputFn,
    Picture, PlaybackClock, PlayerError, PlayerHandle, PlayerOptions, ReferenceDecoder,
    SeekEngine, SeekReport, SessionOptions, SharedStore, StopReason, VideoDecoder,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 300 frames at 30 fps with keyframes every 90 frames.
fn reference_stream() -> DemuxOutput {
    let file = SyntheticStream::new(300, 30.0).keyframe_interval(90).build();
    demux_all(&file, DemuxOptions::default()).unwrap()
}

/// Checksum of every frame when decoded front to back.
fn sequential_checksums(output: &DemuxOutput) -> Vec<String> {
    let mut decoder = ReferenceDecoder::new();
    decoder
        .configure(&DecoderConfig::from_stream(&output.config))
        .unwrap();
    output
        .units
        .iter()
        .map(|unit| decoder.decode(unit).unwrap().remove(0).checksum())
        .collect()
}

fn shared_store(output: &DemuxOutput) -> SharedStore {
    let store = SharedStore::new();
    store.set_config(output.config.clone()).unwrap();
    store.append(output.units.clone()).unwrap();
    store.complete(output.units.len() as u32);
    store
}

type Presented = Arc<Mutex<Vec<(u32, String)>>>;

fn session() -> (DecoderSession, Presented) {
    let presented: Presented = Arc::new(Mutex::new(Vec::new()));
    let sink = presented.clone();
    let output: OutputFn =
        Box::new(move |p: &Picture| sink.lock().push((p.sequence_index, p.checksum())));
    let session = DecoderSession::new(
        Box::new(ReferenceDecoder::new()),
        output,
        SessionOptions::default(),
    )
    .unwrap();
    (session, presented)
}

fn player(output: &DemuxOutput) -> (PlayerHandle, CaptureSink) {
    let (tx, rx) = mpsc::channel(1024);
    tx.try_send(WorkerMessage::Config(output.config.clone()))
        .unwrap();
    for batch in output.units.chunks(64) {
        tx.try_send(WorkerMessage::Chunk(batch.to_vec())).unwrap();
    }
    tx.try_send(WorkerMessage::KeyframeIndex(output.keyframes.clone()))
        .unwrap();
    tx.try_send(WorkerMessage::Complete {
        total: output.units.len() as u32,
    })
    .unwrap();

    let sink = CaptureSink::new();
    let handle = spawn_player(
        PlayerOptions {
            present_first_frame: false,
            ..PlayerOptions::default()
        },
        Box::new(ReferenceDecoder::new()),
        Box::new(sink.clone()),
        rx,
    )
    .unwrap();
    (handle, sink)
}

#[tokio::test]
async fn every_frame_seek_presents_one_exact_picture() {
    let output = reference_stream();
    let expected = sequential_checksums(&output);
    let store = shared_store(&output);
    let engine = SeekEngine::new(store, DecoderConfig::from_stream(&output.config));
    let (mut session, presented) = session();
    let token = CancellationToken::new();

    for target in 0..300u32 {
        let before = session.stats();
        let report = engine.seek_to(&mut session, target, &token).await.unwrap();
        let after = session.stats();

        assert_eq!(report.keyframe, target / 90 * 90);
        assert_eq!(report.replayed, target - report.keyframe);
        assert_eq!(after.suppressed - before.suppressed, report.replayed as u64);
        assert_eq!(after.presented - before.presented, 1);

        let frames = presented.lock().split_off(0);
        assert_eq!(frames.len(), 1, "seek to {target}");
        assert_eq!(frames[0].0, target);
        assert_eq!(frames[0].1, expected[target as usize], "seek to {target}");
    }
}

#[tokio::test]
async fn repeated_seeks_are_bit_identical() {
    let output = reference_stream();
    let store = shared_store(&output);
    let engine = SeekEngine::new(store, DecoderConfig::from_stream(&output.config));
    let (mut session, presented) = session();
    let token = CancellationToken::new();

    for target in [137, 12, 137, 299, 12, 137] {
        engine.seek_to(&mut session, target, &token).await.unwrap();
    }
    let frames = presented.lock().clone();
    let of = |index: u32| -> Vec<&String> {
        frames
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, c)| c)
            .collect()
    };
    assert_eq!(of(137).len(), 3);
    assert!(of(137).windows(2).all(|w| w[0] == w[1]));
    assert!(of(12).windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn seek_examples_replay_from_nearest_keyframe() {
    let output = reference_stream();
    assert_eq!(output.keyframes, vec![0, 90, 180, 270]);
    let (handle, sink) = player(&output);
    handle.wait_for_complete().await.unwrap();

    assert_eq!(
        handle.seek(200).await.unwrap(),
        CommandOutcome::Seeked(SeekReport {
            target: 200,
            keyframe: 180,
            replayed: 20
        })
    );
    assert_eq!(
        handle.seek(50).await.unwrap(),
        CommandOutcome::Seeked(SeekReport {
            target: 50,
            keyframe: 0,
            replayed: 50
        })
    );
    assert_eq!(
        handle.seek(270).await.unwrap(),
        CommandOutcome::Seeked(SeekReport {
            target: 270,
            keyframe: 270,
            replayed: 0
        })
    );
    assert_eq!(sink.indices(), vec![200, 50, 270]);
    handle.join().await;
}

#[tokio::test]
async fn superseded_seek_presents_nothing() {
    let output = reference_stream();
    let expected = sequential_checksums(&output);
    let (handle, sink) = player(&output);
    handle.wait_for_complete().await.unwrap();

    let first = handle.seek(260);
    let second = handle.seek(100);

    assert_matches!(first.await, Err(PlayerError::Cancelled));
    assert_matches!(
        second.await,
        Ok(CommandOutcome::Seeked(SeekReport { target: 100, .. }))
    );
    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].sequence_index, 100);
    assert_eq!(frames[0].checksum, expected[100]);
    handle.join().await;
}

#[tokio::test]
async fn seek_storm_ends_on_last_target() {
    let output = reference_stream();
    let expected = sequential_checksums(&output);
    let (handle, sink) = player(&output);
    handle.wait_for_complete().await.unwrap();

    let mut tickets = Vec::new();
    for target in [10, 250, 89, 179, 299, 45] {
        tickets.push(handle.seek(target));
        tokio::time::sleep(Duration::from_micros(200)).await;
    }
    let last = tickets.pop().unwrap();
    for ticket in tickets {
        let _ = ticket.await;
    }
    assert_matches!(
        last.await,
        Ok(CommandOutcome::Seeked(SeekReport { target: 45, .. }))
    );

    // whatever completed before being superseded was exact
    let frames = sink.frames();
    assert_eq!(frames.last().unwrap().sequence_index, 45);
    for frame in &frames {
        assert_eq!(frame.checksum, expected[frame.sequence_index as usize]);
    }
    assert_eq!(handle.current_frame(), Some(45));
    handle.join().await;
}

#[tokio::test]
async fn playback_from_delta_matches_seek() {
    let output = reference_stream();
    let expected = sequential_checksums(&output);
    let store = shared_store(&output);
    let engine = SeekEngine::new(store, DecoderConfig::from_stream(&output.config));
    let (mut session, presented) = session();

    let clock = PlaybackClock::new(Duration::from_millis(1), 8);
    let outcome = clock
        .run(&engine, &mut session, 285, &CancellationToken::new())
        .await;
    assert_eq!(outcome.reason, StopReason::EndOfStream);
    assert_eq!(session.stats().suppressed, 15);

    let frames = presented.lock().clone();
    assert_eq!(frames.len(), 15);
    for (index, checksum) in frames {
        assert_eq!(checksum, expected[index as usize]);
    }
}

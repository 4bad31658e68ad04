//! Benchmarks for keyframe-replay seeking
//!
//! Seek cost against distance from the preceding keyframe, using the
//! reference decoder.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use frameseek_media::synth::SyntheticStream;
use frameseek_media::{demux_all, DemuxOptions};
use frameseek_player::{
    DecoderConfig, DecoderSession, OutputFn, Picture, ReferenceDecoder, SeekEngine,
    SessionOptions, SharedStore,
};
use tokio_util::sync::CancellationToken;

const GOP: u32 = 120;

fn engine() -> SeekEngine {
    let data = SyntheticStream::new(GOP * 4, 30.0)
        .keyframe_interval(GOP)
        .dimensions(320, 240)
        .build();
    let output = demux_all(&data, DemuxOptions::default()).unwrap();
    let total = output.units.len() as u32;

    let store = SharedStore::new();
    store.set_config(output.config.clone()).unwrap();
    store.append(output.units).unwrap();
    store.complete(total);
    SeekEngine::new(store, DecoderConfig::from_stream(&output.config))
}

fn bench_seek_distance(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let engine = engine();
    let on_picture: OutputFn = Box::new(|_: &Picture| {});
    let mut session = DecoderSession::new(
        Box::new(ReferenceDecoder::new()),
        on_picture,
        SessionOptions::default(),
    )
    .unwrap();
    let token = CancellationToken::new();

    let mut group = c.benchmark_group("seek_to");
    for offset in [0u32, 15, 60, GOP - 1] {
        let target = GOP * 2 + offset;
        group.bench_with_input(BenchmarkId::from_parameter(offset), &target, |b, &target| {
            b.iter(|| {
                rt.block_on(engine.seek_to(&mut session, target, &token))
                    .unwrap()
            })
        });
    }
    group.finish();

    c.bench_function("step_forward", |b| {
        rt.block_on(engine.seek_to(&mut session, 0, &token)).unwrap();
        let mut next = 1;
        b.iter(|| {
            if next >= GOP * 4 {
                rt.block_on(engine.seek_to(&mut session, 0, &token)).unwrap();
                next = 1;
            }
            let report = rt
                .block_on(engine.step_forward(&mut session, next, &token))
                .unwrap();
            next += 1;
            report
        })
    });
}

criterion_group!(benches, bench_seek_distance);
criterion_main!(benches);

//! Benchmarks for MP4 demuxing
//!
//! Whole-buffer parsing and incremental parsing at different read sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frameseek_media::synth::SyntheticStream;
use frameseek_media::{demux_all, DemuxOptions, Mp4Demuxer};

fn clip(frames: u32, moov_at_end: bool) -> Vec<u8> {
    let stream = SyntheticStream::new(frames, 30.0)
        .keyframe_interval(60)
        .payload_size(2048);
    if moov_at_end {
        stream.moov_at_end().build()
    } else {
        stream.build()
    }
}

fn bench_demux_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("demux_all");

    for frames in [300u32, 3000] {
        for moov_at_end in [false, true] {
            let data = clip(frames, moov_at_end);
            let layout = if moov_at_end { "moov_last" } else { "moov_first" };
            group.throughput(Throughput::Bytes(data.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(layout, frames),
                &data,
                |b, data| b.iter(|| demux_all(black_box(data), DemuxOptions::default()).unwrap()),
            );
        }
    }

    group.finish();
}

fn bench_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("demux_incremental");
    let data = clip(3000, false);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_size in [4096usize, 65536, 1 << 20] {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut demuxer = Mp4Demuxer::new(DemuxOptions::default());
                    let mut events = 0;
                    for chunk in data.chunks(chunk_size) {
                        events += demuxer.push(black_box(chunk)).unwrap().len();
                    }
                    events += demuxer.finish().unwrap().len();
                    events
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_demux_all, bench_incremental);
criterion_main!(benches);

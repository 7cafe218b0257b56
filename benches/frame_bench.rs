//! Benchmarks for building, parsing and stream-decoding command frames.
//!
//! Run with:
//! ```sh
//! cargo bench --bench frame_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use floodhub_core::constants::MAX_PAYLOAD_LEN;
use floodhub_protocol::{CommandFrame, FrameBuilder, LightCodec, LightCommand, decode_notification};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn commands() -> [(&'static str, LightCommand); 3] {
    [
        ("power", LightCommand::power(true)),
        ("brightness", LightCommand::brightness(80)),
        ("color", LightCommand::color(255, 128, 0)),
    ]
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(1));

    for (name, command) in commands() {
        group.bench_with_input(BenchmarkId::new("to_frame", name), &command, |b, cmd| {
            b.iter(|| black_box(cmd).to_frame().unwrap());
        });
    }

    let payload = [0x10u8; MAX_PAYLOAD_LEN];
    group.bench_function("builder_max_payload", |b| {
        b.iter(|| {
            FrameBuilder::new(0x31)
                .payload(black_box(&payload))
                .build()
                .unwrap()
        });
    });

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    for (name, command) in commands() {
        let bytes = command.to_frame().unwrap().to_bytes();
        group.bench_with_input(BenchmarkId::new("frame", name), &bytes, |b, raw| {
            b.iter(|| {
                let frame = CommandFrame::parse(black_box(raw)).unwrap();
                LightCommand::try_from(&frame).unwrap()
            });
        });
    }

    let notification = [0xAA, 0x21, 0x07, 0x01, 0x00, 0x00, 0x00];
    group.bench_function("notification", |b| {
        b.iter(|| decode_notification(black_box(&notification)));
    });

    group.finish();
}

fn bench_codec_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_stream");

    for count in [1usize, 10, 100] {
        let mut encoded = BytesMut::new();
        let mut codec = LightCodec::new();
        for i in 0..count {
            let (_, command) = commands()[i % 3];
            codec.encode(command, &mut encoded).unwrap();
        }
        let encoded = encoded.freeze();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("decode", count), &encoded, |b, data| {
            b.iter(|| {
                let mut codec = LightCodec::new();
                let mut buffer = BytesMut::from(&data[..]);
                let mut frames = 0;
                while let Some(frame) = codec.decode(&mut buffer).unwrap() {
                    black_box(frame);
                    frames += 1;
                }
                assert_eq!(frames, count);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_parse, bench_codec_stream);
criterion_main!(benches);

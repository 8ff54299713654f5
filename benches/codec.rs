use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use acioemu::protocol::{FrameDecoder, decode, encode};
use acioemu::Message;

fn payload(len: usize, escape_every: usize) -> Vec<u8> {
    (0..len)
        .map(|i| if i % escape_every == 0 { 0xAA } else { (i % 200) as u8 })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    // Typical status poll (16 bytes, single escape)
    let small = payload(16, usize::MAX);
    group.throughput(Throughput::Bytes(16));
    group.bench_function("encode_16b", |b| {
        b.iter(|| {
            black_box(encode(&small).unwrap());
        });
    });

    // Full frame, every fourth byte escaped
    let full = payload(255, 4);
    group.throughput(Throughput::Bytes(255));
    group.bench_function("encode_255b_escaped", |b| {
        b.iter(|| {
            black_box(encode(&full).unwrap());
        });
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let small = encode(&payload(16, usize::MAX)).unwrap();
    group.throughput(Throughput::Bytes(16));
    group.bench_function("decode_16b", |b| {
        b.iter(|| {
            black_box(decode(&small).unwrap());
        });
    });

    let full = encode(&payload(255, 4)).unwrap();
    group.throughput(Throughput::Bytes(255));
    group.bench_function("decode_255b_escaped", |b| {
        b.iter(|| {
            black_box(decode(&full).unwrap());
        });
    });

    // Streaming decoder over a burst of frames
    let mut burst = Vec::new();
    for _ in 0..32 {
        burst.extend(encode(&payload(64, 8)).unwrap());
    }
    group.throughput(Throughput::Bytes(burst.len() as u64));
    group.bench_function("stream_decode_32x64b", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::default();
            black_box(decoder.feed(&burst));
        });
    });

    group.finish();
}

fn bench_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let msg = Message::new(0x01, 0x0134, 0x07, vec![0u8; 16]);
    let encoded = msg.encode();
    group.bench_function("message_roundtrip", |b| {
        b.iter(|| {
            let bytes = msg.encode();
            black_box(Message::decode(&bytes).unwrap());
        });
    });
    group.bench_function("message_decode", |b| {
        b.iter(|| {
            black_box(Message::decode(&encoded).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_message);
criterion_main!(benches);

use criterion::*;
use vigil_protocol::codec::{parse_body, parse_header_bulk};
use vigil_protocol::compression::CompressionStream;
use vigil_protocol::types::CompressionType;

fn lp(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn sample_header_bulk(n: u8) -> Vec<u8> {
    let mut buf = vec![1u8, n];
    for i in 0..n {
        lp(&mut buf, &format!("X-Header-{i}"));
        lp(&mut buf, "a-representative-header-value");
    }
    buf
}

fn sample_body(size: usize) -> Vec<u8> {
    let mut buf = vec![1u8, 0u8];
    buf.extend(std::iter::repeat(b'a').take(size));
    buf
}

fn codec_bench(c: &mut Criterion) {
    let bulk = sample_header_bulk(32);
    c.bench_function("parse_header_bulk/32 headers", |b| {
        b.iter(|| parse_header_bulk(std::hint::black_box(&bulk), 0))
    });

    let body = sample_body(64 * 1024);
    c.bench_function("parse_body/64KiB", |b| {
        b.iter(|| parse_body(std::hint::black_box(&body)))
    });
}

fn compression_bench(c: &mut Criterion) {
    let payload = b"the quick brown fox jumps over the lazy dog".repeat(1024);

    c.bench_function("gzip compress/1KiB repeated", |b| {
        b.iter(|| {
            let mut stream = CompressionStream::new();
            stream
                .compress(CompressionType::Gzip, std::hint::black_box(&payload), true)
                .unwrap()
        })
    });

    let mut encoder = CompressionStream::new();
    let compressed = encoder
        .compress(CompressionType::Gzip, &payload, true)
        .unwrap();

    c.bench_function("gzip decompress/1KiB repeated", |b| {
        b.iter(|| {
            let mut stream = CompressionStream::new();
            stream.decompress(std::hint::black_box(&compressed)).unwrap()
        })
    });
}

criterion_group!(benches, codec_bench, compression_bench);
criterion_main!(benches);

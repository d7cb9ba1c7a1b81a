// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hot-path benchmarks: block cipher throughput and filter matching.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mbus::cipher::Blowfish;
use mbus::protocol::{DataPacket, Header, Packet};
use mbus::TopicFilter;

fn bench_cipher(c: &mut Criterion) {
    let bf = Blowfish::new(b"benchmark key").expect("valid key");

    c.bench_function("blowfish_block_encrypt", |b| {
        let mut block = [0x42u8; 8];
        b.iter(|| {
            bf.encrypt_block(black_box(&mut block));
        });
    });

    c.bench_function("blowfish_payload_1k_roundtrip", |b| {
        let payload = vec![0xA5u8; 1024];
        b.iter(|| {
            let sealed = bf.encrypt_payload(black_box(&payload));
            black_box(bf.decrypt_payload(&sealed).expect("decrypts"));
        });
    });

    c.bench_function("blowfish_key_schedule", |b| {
        b.iter(|| black_box(Blowfish::new(black_box(b"3657")).expect("valid key")));
    });
}

fn bench_filter(c: &mut Criterion) {
    let filter = TopicFilter::new("metrics.*.cpu.>").expect("valid pattern");
    let subject: Vec<&str> = "metrics.host42.cpu.core0.load".split('.').collect();

    c.bench_function("filter_match_wildcard", |b| {
        b.iter(|| black_box(filter.matches(black_box(&subject))));
    });

    let literal = TopicFilter::new("metrics.host42.cpu.core0.load").expect("valid pattern");
    c.bench_function("filter_match_literal", |b| {
        b.iter(|| black_box(literal.matches(black_box(&subject))));
    });
}

fn bench_codec(c: &mut Criterion) {
    let packet = Packet::Data(DataPacket {
        header: Header::new(0xDEADBEEF, 7, 123456, 0),
        topic: "metrics.host42.cpu".into(),
        payload: vec![0x5Au8; 512],
    });
    let bytes = packet.encode();

    c.bench_function("packet_encode_data_512", |b| {
        b.iter(|| black_box(packet.encode()));
    });

    c.bench_function("packet_decode_data_512", |b| {
        b.iter(|| black_box(Packet::decode(black_box(&bytes)).expect("decodes")));
    });
}

criterion_group!(benches, bench_cipher, bench_filter, bench_codec);
criterion_main!(benches);

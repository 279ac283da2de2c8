//! Benchmark suite for the JAB Code codec.
//!
//! Measures the LDPC encoder, the mode analyzer and the full
//! encode/decode pipeline over synthetic payloads.
//!
//! Run with: cargo bench --manifest-path benches/Cargo.toml

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use jabcode_benches::{sizes, synthetic_payload, synthetic_text};
use jabcode_core::{DecodeMode, EncodeSettings, Encoder, decode, ldpc};
use std::hint::black_box;

fn bench_ldpc_encode(c: &mut Criterion) {
	let mut group = c.benchmark_group("ldpc_encode");
	for bits in [300usize, 1200, 4800] {
		let data: Vec<u8> = synthetic_payload(bits).iter().map(|b| b & 1).collect();
		group.throughput(Throughput::Elements(bits as u64));
		group.bench_with_input(BenchmarkId::from_parameter(bits), &data, |b, data| {
			b.iter(|| black_box(ldpc::encode(black_box(data), 4, 7)));
		});
	}
	group.finish();
}

fn bench_mode_analysis(c: &mut Criterion) {
	let mut group = c.benchmark_group("full_encode");
	for &len in &[sizes::SHORT, sizes::MEDIUM, sizes::LARGE] {
		let text = synthetic_text(len);
		group.throughput(Throughput::Bytes(len as u64));
		group.bench_with_input(BenchmarkId::new("text", len), &text, |b, text| {
			b.iter(|| {
				let mut encoder = Encoder::new(EncodeSettings::default());
				black_box(encoder.generate(black_box(text)).unwrap())
			});
		});
	}
	group.finish();
}

fn bench_decode(c: &mut Criterion) {
	let mut group = c.benchmark_group("decode");
	for &len in &[sizes::SHORT, sizes::MEDIUM] {
		let text = synthetic_text(len);
		let mut encoder = Encoder::new(EncodeSettings::default());
		let bitmap = encoder.generate(&text).unwrap();
		group.throughput(Throughput::Bytes(len as u64));
		group.bench_with_input(BenchmarkId::new("clean", len), &bitmap, |b, bitmap| {
			b.iter(|| black_box(decode(black_box(bitmap), DecodeMode::Normal).unwrap()));
		});
	}
	group.finish();
}

criterion_group!(benches, bench_ldpc_encode, bench_mode_analysis, bench_decode);
criterion_main!(benches);

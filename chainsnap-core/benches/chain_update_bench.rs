// Chain update and response benchmarks
//
// Covers the feed-thread hot path and the request walk:
// - decode + apply of one page update (continuous publication)
// - update that hits an existing next link (no structural change)
// - trigger scan over many chains
// - response assembly for a multi-link chain

use chainsnap_core::codec::{BinaryCodec, Payload, ResponseDescriptor, WireCodec};
use chainsnap_core::monitoring::MetricsRegistry;
use chainsnap_core::testing::{page, with_timestamp, ChainFixture};
use chainsnap_core::{ProtocolVersion, StreamId, TriggerEvaluator, TriggerPolicy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

const VALUES: [&str; 14] = [
    "A.N", "B.N", "C.N", "D.N", "E.N", "F.N", "G.N", "H.N", "I.N", "J.N", "K.N", "L.N", "M.N",
    "N.N",
];

// ============================================================================
// UPDATE PROCESSING
// ============================================================================

fn bench_apply_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_update");
    group.measurement_time(Duration::from_secs(2));
    group.significance_level(0.01);

    group.bench_function("last_page_full_payload", |b| {
        let mut fixture = ChainFixture::new(&["FOO"]);
        let fields = page(None, &VALUES);
        b.iter(|| {
            black_box(fixture.update("FOO", black_box(&fields)).ok());
        })
    });

    group.bench_function("existing_next_link", |b| {
        let mut fixture = ChainFixture::new(&["FOO"]);
        let fields = page(Some("FOO.1"), &VALUES);
        let _ = fixture.update("FOO", &fields);
        b.iter(|| {
            black_box(fixture.update("FOO", black_box(&fields)).ok());
        })
    });

    group.bench_function("decode_and_apply", |b| {
        let mut fixture = ChainFixture::new(&["FOO"]);
        let codec = BinaryCodec::new();
        let raw = codec
            .encode_fields(
                ProtocolVersion::CURRENT,
                &with_timestamp(page(None, &VALUES), Some("14:30:00")),
            )
            .unwrap_or_default();
        let stream = fixture.stream("FOO");
        b.iter(|| {
            black_box(
                fixture
                    .builder
                    .apply_raw(stream, ProtocolVersion::CURRENT, black_box(&raw))
                    .ok(),
            );
        })
    });

    group.finish();
}

// ============================================================================
// TRIGGER SCAN
// ============================================================================

fn bench_trigger_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("trigger_scan");
    group.measurement_time(Duration::from_secs(2));

    for chains in [10usize, 100, 1000] {
        let names: Vec<String> = (0..chains).map(|i| format!("SYM{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut fixture = ChainFixture::new(&refs);
        for name in &refs {
            let _ = fixture.update(name, &page(None, &VALUES[..4]));
        }
        let evaluator = TriggerEvaluator::new(TriggerPolicy::default(), MetricsRegistry::default());

        group.bench_with_input(BenchmarkId::new("all_captured", chains), &chains, |b, _| {
            b.iter(|| black_box(evaluator.scan(&fixture.store)))
        });
    }

    group.finish();
}

// ============================================================================
// RESPONSE ENCODING
// ============================================================================

fn bench_encode_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_response");
    group.measurement_time(Duration::from_secs(2));

    let codec = BinaryCodec::new();
    let entries: Vec<String> = VALUES.iter().map(|s| s.to_string()).collect();

    group.bench_function("full_page", |b| {
        b.iter(|| {
            let descriptor = ResponseDescriptor {
                token: StreamId(1),
                service_id: 1,
                item_name: "FOO",
                part_number: black_box(3),
                is_final: false,
                payload: Payload::Entries(&entries),
            };
            black_box(codec.encode_response(ProtocolVersion::CURRENT, &descriptor).ok())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_apply_update,
    bench_trigger_scan,
    bench_encode_response
);
criterion_main!(benches);

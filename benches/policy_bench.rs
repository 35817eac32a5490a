//! Performance benchmarks for photo validation and certification.
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use agritrace::certification::{CertificationConfig, CertificationStateMachine};
use agritrace::crypto::fingerprint;
use agritrace::domain::{BatchId, ContentHash, StageNumber, VerifiedImage, Verifier};
use agritrace::metrics::MetricsRegistry;
use agritrace::validation::{visual_quality_score, FormatValidator, PolicyEngine, PolicyInput};
use agritrace::InMemoryLedger;

fn jpeg(len: usize) -> Vec<u8> {
    let mut bytes = vec![0xA5; len];
    bytes[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    bytes
}

/// Benchmark content fingerprinting across photo sizes
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let content = jpeg(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| black_box(fingerprint(content)));
        });
    }

    group.finish();
}

/// Benchmark format checks plus the decision policy
fn bench_validation(c: &mut Criterion) {
    let validator = FormatValidator::default();
    let policy = PolicyEngine::default();
    let content = jpeg(512 * 1024);
    let content_hash = fingerprint(&content);

    c.bench_function("validate_and_decide", |b| {
        b.iter(|| {
            let report = validator.validate(black_box(&content), "image/jpeg");
            let quality = visual_quality_score(content.len(), report.integrity_valid);
            black_box(policy.decide(PolicyInput {
                format: &report,
                content_hash,
                authenticity_score: 0.12,
                visual_quality: quality,
            }))
        });
    });
}

/// Benchmark feeding verified images through the state machine
fn bench_certification(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let machine = Arc::new(CertificationStateMachine::new(
        Arc::new(InMemoryLedger::new()),
        CertificationConfig::default(),
        Arc::new(MetricsRegistry::new()),
    ));
    let stage = StageNumber::new(3).unwrap();
    let mut counter: u64 = 0;

    c.bench_function("on_verified_image", |b| {
        b.to_async(&runtime).iter(|| {
            counter += 1;
            let mut hash = [0u8; 32];
            hash[..8].copy_from_slice(&counter.to_be_bytes());
            let image = VerifiedImage {
                batch_id: BatchId::from("BENCH"),
                stage,
                content_hash: ContentHash(hash),
                verified_by: Verifier::Policy,
            };
            let machine = machine.clone();
            async move { black_box(machine.on_verified_image(&image).await.unwrap()) }
        });
    });
}

criterion_group!(benches, bench_fingerprint, bench_validation, bench_certification);
criterion_main!(benches);

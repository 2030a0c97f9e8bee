//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rankflow::breaker::CircuitBreakerRegistry;
use rankflow::config::{BreakerConfig, HealthConfig};
use rankflow::health::HealthRegistry;
use rankflow::pipeline::{confidence, Orchestrator};
use rankflow::testing::{ranking_pipeline, ranking_services, sample_request};
use std::time::Duration;

fn confidence_benchmark(c: &mut Criterion) {
    c.bench_function("confidence", |b| {
        b.iter(|| confidence(black_box(2), black_box(3), black_box(1)));
    });
}

fn registry_benchmark(c: &mut Criterion) {
    let health = HealthRegistry::new(HealthConfig::default());
    c.bench_function("health_record", |b| {
        b.iter(|| health.record(black_box("catalog"), Duration::from_millis(12), true));
    });

    let breakers = CircuitBreakerRegistry::new(BreakerConfig::default());
    c.bench_function("breaker_acquire_release", |b| {
        b.iter(|| {
            if let Ok(permit) = breakers.try_acquire(black_box("catalog")) {
                permit.record_success();
            }
        });
    });
}

fn submit_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let orchestrator = Orchestrator::builder()
        .services(ranking_services())
        .pipeline(ranking_pipeline())
        .build()
        .expect("orchestrator");

    c.bench_function("submit_ranking_pipeline", |b| {
        b.iter(|| runtime.block_on(orchestrator.submit(black_box(sample_request()))));
    });
}

criterion_group!(benches, confidence_benchmark, registry_benchmark, submit_benchmark);
criterion_main!(benches);

//! # Admission Benchmarks
//!
//! End-to-end cost of admission decisions through the manager.
//!
//! Run with: `cargo bench --bench admission`

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use slotgate::{
    CircuitBreaker, CpuCircuitBreaker, PropertyMap, RateLimitManager, RateLimiterConfig,
    RequestContext, RequestType, SharedLoadGauge,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn config(request_type: RequestType, capacity: u32, borrowing: bool) -> RateLimiterConfig {
    RateLimiterConfig::builder(request_type)
        .enabled(true)
        .max_concurrent_requests(capacity)
        .slot_borrowing_enabled(borrowing)
        .build()
}

/// Acquire and release through the manager, own pool never exhausted
fn bench_local_admit(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_admit");
    group.throughput(Throughput::Elements(1));

    for capacity in [1, 64, 4096] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let manager = RateLimitManager::builder()
                    .limiter(config(RequestType::Query, capacity, false))
                    .build()
                    .unwrap();
                b.iter(|| {
                    std::hint::black_box(
                        manager.admit(RequestType::Query, RequestContext::Client),
                    )
                });
            },
        );
    }

    group.finish();
}

/// Requests that skip admission control entirely
fn bench_unlimited_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("unlimited_paths");
    let manager = RateLimitManager::builder()
        .limiter(config(RequestType::Query, 8, false))
        .build()
        .unwrap();

    group.bench_function("internal_context", |b| {
        b.iter(|| std::hint::black_box(manager.handle_request(Some("QUERY"), Some("SERVER"))));
    });

    group.bench_function("unclassified", |b| {
        b.iter(|| std::hint::black_box(manager.handle_request(None, None)));
    });

    group.bench_function("unregistered_type", |b| {
        b.iter(|| std::hint::black_box(manager.handle_request(Some("UPDATE"), None)));
    });

    group.finish();
}

/// Own pool exhausted; cost of sweeping donors
fn bench_borrow_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("borrow_sweep");

    for donors in [1usize, 2, 3] {
        group.bench_with_input(BenchmarkId::from_parameter(donors), &donors, |b, &donors| {
            let donor_types = [RequestType::Update, RequestType::Admin, RequestType::Streaming];
            let manager = donor_types[..donors]
                .iter()
                .fold(
                    RateLimitManager::builder().limiter(config(RequestType::Query, 1, false)),
                    |builder, &t| builder.limiter(config(t, 1024, true)),
                )
                .build()
                .unwrap();
            let _held = manager.admit(RequestType::Query, RequestContext::Client);

            b.iter(|| std::hint::black_box(manager.try_slot_borrowing(RequestType::Query)));
        });
    }

    group.finish();
}

/// Full rejection: own pool exhausted, no donor lends
fn bench_rejection(c: &mut Criterion) {
    let manager = RateLimitManager::builder()
        .limiter(config(RequestType::Query, 1, false))
        .limiter(config(RequestType::Update, 1, false))
        .build()
        .unwrap();
    let _held = manager.admit(RequestType::Query, RequestContext::Client);

    c.bench_function("rejection", |b| {
        b.iter(|| std::hint::black_box(manager.admit(RequestType::Query, RequestContext::Client)));
    });
}

/// Concurrent admission against a shared pool
fn bench_concurrent_admit(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_admit");

    for num_threads in [2, 4, 8, 16] {
        group.throughput(Throughput::Elements(num_threads as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_threads", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let manager = Arc::new(
                    RateLimitManager::builder()
                        .limiter(config(RequestType::Query, 8, false))
                        .limiter(config(RequestType::Update, 8, true))
                        .build()
                        .unwrap(),
                );

                b.iter_custom(|iters| {
                    let mut total_duration = Duration::ZERO;

                    for _ in 0..iters {
                        let start = std::time::Instant::now();

                        let handles: Vec<_> = (0..num_threads)
                            .map(|_| {
                                let manager = manager.clone();
                                thread::spawn(move || {
                                    for _ in 0..1000 {
                                        let _ = manager
                                            .admit(RequestType::Query, RequestContext::Client);
                                    }
                                })
                            })
                            .collect();

                        for handle in handles {
                            handle.join().unwrap();
                        }

                        total_duration += start.elapsed();
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

/// Query limiter hot swap
fn bench_config_swap(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_swap");

    let mut a = PropertyMap::new();
    a.insert("rate-limiters.query.enabled".into(), "true".into());
    a.insert("rate-limiters.query.allowedRequests".into(), "10".into());
    let mut b_props = a.clone();
    b_props.insert("rate-limiters.query.allowedRequests".into(), "20".into());

    group.bench_function("unchanged", |b| {
        let manager = RateLimitManager::from_properties(&a).unwrap();
        b.iter(|| std::hint::black_box(manager.on_change(&a)));
    });

    group.bench_function("swap", |b| {
        b.iter_batched(
            || RateLimitManager::from_properties(&a).unwrap(),
            |manager| std::hint::black_box(manager.on_change(&b_props)),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// CPU breaker check with a fresh gauge read
fn bench_breaker_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("breaker_check");

    let gauge = SharedLoadGauge::new();
    let breaker = CpuCircuitBreaker::new(gauge.clone(), 90.0).unwrap();

    gauge.record(50.0);
    group.bench_function("below_threshold", |b| {
        b.iter(|| std::hint::black_box(breaker.check()));
    });

    gauge.record(95.0);
    group.bench_function("tripped", |b| {
        b.iter(|| std::hint::black_box(breaker.check().error_message()));
    });

    group.finish();
}

/// Metrics snapshots
fn bench_metrics(c: &mut Criterion) {
    let manager = RateLimitManager::builder()
        .limiter(config(RequestType::Query, 64, false))
        .build()
        .unwrap();

    c.bench_function("metrics_snapshot", |b| {
        b.iter(|| std::hint::black_box(manager.metrics(RequestType::Query)));
    });

    c.bench_function("stats_summary", |b| {
        b.iter(|| std::hint::black_box(manager.stats().summary()));
    });
}

criterion_group!(
    benches,
    bench_local_admit,
    bench_unlimited_paths,
    bench_borrow_sweep,
    bench_rejection,
    bench_concurrent_admit,
    bench_config_swap,
    bench_breaker_check,
    bench_metrics,
);

criterion_main!(benches);

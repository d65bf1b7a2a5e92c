//! Basic usage example for the slotgate crate.
//!
//! Run with `RUST_LOG=slotgate=debug cargo run --example basic` to see the
//! borrowing and reconfiguration logs.

use slotgate::{
    CircuitBreaker, ConfigListener, CpuCircuitBreaker, PropertyMap, RateLimitManager,
    RateLimiterConfig, RequestType, SharedLoadGauge, ERROR_MESSAGE,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Basic Admission Control Example ===\n");

    // Example 1: One pool, no waiting
    simple_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Borrowing from an idle pool
    borrowing_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Waiting for a slot
    waiting_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Live reconfiguration
    reconfiguration_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 5: CPU circuit breaker
    breaker_example();
}

fn simple_example() {
    println!("1. Single Query Pool:");

    let manager = RateLimitManager::builder()
        .limiter(
            RateLimiterConfig::builder(RequestType::Query)
                .enabled(true)
                .max_concurrent_requests(3)
                .build(),
        )
        .build()
        .expect("valid config");

    println!("   Query pool with 3 slots, no waiting");

    let mut held = Vec::new();
    for i in 1..=5 {
        match manager.handle_request(Some("QUERY"), None).expect("not interrupted") {
            Some(reservation) => {
                println!("   Request {} - ✅ Admitted", i);
                held.push(reservation);
            }
            None => println!("   Request {} - ❌ {}", i, ERROR_MESSAGE),
        }
    }

    let internal = manager
        .handle_request(Some("QUERY"), Some("SERVER"))
        .expect("not interrupted");
    println!(
        "   Internal request while full - unlimited: {}",
        internal.map_or(false, |r| r.is_unlimited())
    );

    held.clear();
    println!(
        "   All requests finished, in use: {}",
        manager.metrics(RequestType::Query).map_or(0, |m| m.in_use)
    );
}

fn borrowing_example() {
    println!("2. Slot Borrowing:");

    let manager = RateLimitManager::builder()
        .limiter(
            RateLimiterConfig::builder(RequestType::Query)
                .enabled(true)
                .max_concurrent_requests(2)
                .build(),
        )
        .limiter(
            RateLimiterConfig::builder(RequestType::Update)
                .enabled(true)
                .max_concurrent_requests(4)
                .guaranteed_slots(2)
                .slot_borrowing_enabled(true)
                .build(),
        )
        .build()
        .expect("valid config");

    println!("   Query: 2 slots. Update: 4 slots, 2 guaranteed, lends the rest");

    let mut held = Vec::new();
    for i in 1..=6 {
        match manager.handle_request(Some("QUERY"), None).expect("not interrupted") {
            Some(r) if r.is_borrowed() => {
                println!("   Query {} - 🤝 Borrowed from {:?}", i, r.pool_request_type());
                held.push(r);
            }
            Some(r) => {
                println!("   Query {} - ✅ Own slot", i);
                held.push(r);
            }
            None => println!("   Query {} - ❌ Rejected", i),
        }
    }

    println!("\n{}", manager.stats());
}

fn waiting_example() {
    println!("3. Waiting For A Slot:");

    let manager = Arc::new(
        RateLimitManager::builder()
            .limiter(
                RateLimiterConfig::builder(RequestType::Update)
                    .enabled(true)
                    .max_concurrent_requests(1)
                    .slot_acquisition_timeout_ms(500)
                    .build(),
            )
            .build()
            .expect("valid config"),
    );

    let first = manager
        .handle_request(Some("UPDATE"), None)
        .expect("not interrupted");
    println!("   First update holds the only slot");

    let waiter = {
        let manager = manager.clone();
        thread::spawn(move || {
            let start = std::time::Instant::now();
            let admitted = manager
                .handle_request(Some("UPDATE"), None)
                .expect("not interrupted")
                .is_some();
            (admitted, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(100));
    drop(first);
    println!("   First update finished after 100ms");

    let (admitted, waited) = waiter.join().expect("waiter panicked");
    println!(
        "   Second update admitted: {} after {:.1}ms",
        admitted,
        waited.as_secs_f64() * 1000.0
    );
}

fn reconfiguration_example() {
    println!("4. Live Reconfiguration:");

    let manager = RateLimitManager::from_properties(&PropertyMap::new()).expect("valid config");
    println!(
        "   Startup query limiter enabled: {}",
        manager.metrics(RequestType::Query).map_or(false, |m| m.enabled)
    );

    let mut props = PropertyMap::new();
    props.insert("rate-limiters.query.enabled".into(), "true".into());
    props.insert("rate-limiters.query.allowedRequests".into(), "2".into());
    println!("   Applied: {:?}", manager.on_change(&props));

    let held = manager.handle_request(Some("QUERY"), None).expect("not interrupted");

    props.insert("rate-limiters.query.allowedRequests".into(), "10".into());
    println!("   Raised to 10: {:?}", manager.on_change(&props));
    println!("   Same again: {:?}", manager.on_change(&props));

    props.insert("rate-limiters.query.allowedRequests".into(), "0".into());
    match manager.on_change(&props) {
        Ok(_) => println!("   Unexpectedly accepted capacity 0"),
        Err(e) => println!("   Rejected: {}", e),
    }

    drop(held);
    if let Some(metrics) = manager.metrics(RequestType::Query) {
        println!("\n{}", metrics);
    }
}

fn breaker_example() {
    println!("5. CPU Circuit Breaker:");

    let gauge = SharedLoadGauge::new();
    let breaker = CpuCircuitBreaker::new(gauge.clone(), 80.0).expect("valid threshold");

    println!("   No sample yet - tripped: {}", breaker.is_tripped());

    for load in [35.0, 79.9, 80.0, 97.2] {
        gauge.record(load);
        let decision = breaker.check();
        if decision.tripped {
            println!("   CPU {:>5.1}% - ⛔ {}", load, decision.error_message());
        } else {
            println!("   CPU {:>5.1}% - ✅ {}", load, decision.debug_info());
        }
    }

    let mut props = PropertyMap::new();
    props.insert("circuit-breakers.cpu.threshold".into(), "150".into());
    if let Err(e) = ConfigListener::on_change(&breaker, &props) {
        println!("   Rejected threshold update: {}", e);
    }
}

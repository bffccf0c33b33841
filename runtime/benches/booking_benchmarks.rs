//! Booking Engine Benchmarks
//!
//! Measures the pure scheduling rules and the full create path against the
//! in-memory store:
//! - Slot validation and pricing: pure in-memory operations
//! - Create + cancel round: lock, conflict probe, insert, commit, effects
//! - Conflict rejection on a busy schedule
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use chairbook_core::types::Currency;
use chairbook_core::{RequestContext, SchedulingPolicy};
use chairbook_runtime::BookingService;
use chairbook_testing::helpers::{
    PROVIDER_ID, SERVICE_ID, customer_request, hours_after, provider_record, service_record,
    test_now,
};
use chairbook_testing::{InMemoryBookingStore, MockDirectory, test_clock};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn service() -> BookingService<InMemoryBookingStore> {
    let directory = Arc::new(MockDirectory::new());
    directory.add_provider(provider_record(PROVIDER_ID));
    directory.add_service(service_record(PROVIDER_ID, SERVICE_ID));

    BookingService::new(
        Arc::new(InMemoryBookingStore::new()),
        directory.clone(),
        directory,
        Arc::new(test_clock()),
        SchedulingPolicy::default(),
    )
}

fn bench_rules(c: &mut Criterion) {
    let policy = SchedulingPolicy::default();
    let now = test_now();

    c.bench_function("validate_slot", |b| {
        b.iter(|| {
            policy
                .validator
                .validate(black_box(hours_after(24)), black_box(45), now)
        });
    });

    c.bench_function("compute_pricing", |b| {
        b.iter(|| {
            policy
                .pricing
                .compute(black_box(dec!(47.50)), black_box(dec!(2.25)), Currency::usd())
        });
    });
}

fn bench_create(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let service = service();
    let ctx = RequestContext::system();

    c.bench_function("create_then_cancel", |b| {
        b.to_async(&runtime).iter(|| async {
            let booking = service
                .create_booking(customer_request(PROVIDER_ID, hours_after(2), 30), &ctx)
                .await
                .expect("slot is free");
            service
                .cancel_booking(booking.id, true, None, &ctx)
                .await
                .expect("pending bookings can be cancelled");
        });
    });

    runtime.block_on(async {
        service
            .create_booking(customer_request(PROVIDER_ID, hours_after(48), 60), &ctx)
            .await
            .expect("slot is free");
    });

    c.bench_function("reject_conflict", |b| {
        b.to_async(&runtime).iter(|| async {
            let result = service
                .create_booking(customer_request(PROVIDER_ID, hours_after(48), 30), &ctx)
                .await;
            black_box(result.is_err())
        });
    });
}

criterion_group!(benches, bench_rules, bench_create);
criterion_main!(benches);

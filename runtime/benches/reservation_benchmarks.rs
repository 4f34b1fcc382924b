//! Reservation round-trip benchmarks
//!
//! Measures one full commit loop (read, plan, conditional commit) against
//! the in-memory store, so the numbers reflect coordinator overhead rather
//! than any real backend.
//!
//! Run with: `cargo bench --bench reservation_benchmarks`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use seatflow_core::reservation::ReservationIntent;
use seatflow_core::types::{EventId, HolderId, SeatId};
use seatflow_runtime::{EngineConfig, SeatEngine};
use seatflow_testing::InMemoryTicketStore;
use seatflow_testing::fixtures::storefront_catalog;
use seatflow_testing::mocks::stepping_clock;
use std::sync::Arc;

fn engine() -> SeatEngine {
    SeatEngine::new(
        Arc::new(InMemoryTicketStore::new()),
        Arc::new(storefront_catalog()),
        Arc::new(stepping_clock()),
        EngineConfig::default(),
    )
}

fn benchmark_claim_and_cancel(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let mut group = c.benchmark_group("reservation");

    group.bench_function("claim_then_cancel", |b| {
        let engine = engine();
        let (event, holder) = (EventId::new("1"), HolderId::new("bench"));

        b.to_async(&runtime).iter(|| async {
            let ticket = engine
                .reserve(
                    &event,
                    &holder,
                    ReservationIntent::ClaimSeat {
                        seat_id: SeatId::new("A1"),
                    },
                )
                .await
                .expect("claim");
            engine.cancel(&event, black_box(ticket.id), &holder).await.expect("cancel");
        });
    });

    group.bench_function("join_waitlist_idempotent", |b| {
        let engine = engine();
        let event = EventId::new("2");
        let holder = HolderId::new("queued");

        b.to_async(&runtime).iter(|| async {
            let _ = engine
                .reserve(&event, black_box(&holder), ReservationIntent::JoinWaitlist)
                .await;
        });
    });

    group.bench_function("one_shot_snapshot", |b| {
        let engine = engine();
        let event = EventId::new("3");

        b.to_async(&runtime).iter(|| async {
            let _ = engine.snapshot(black_box(&event)).await;
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_claim_and_cancel);
criterion_main!(benches);

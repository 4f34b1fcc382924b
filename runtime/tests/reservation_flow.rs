//! End-to-end reservation flows through `SeatEngine` over the in-memory store.
//!
//! Covers the waitlist promotion path (including holder-wide watches and
//! lagging subscriptions), concurrent seat races, commit-loop exhaustion and
//! store outages.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use seatflow_core::catalog::StaticCatalog;
use seatflow_core::eligibility::EligibilityResult;
use seatflow_core::reservation::{PlanOutcome, ReservationError, ReservationIntent};
use seatflow_core::snapshot::CapacitySnapshot;
use seatflow_core::ticket::TicketStatus;
use seatflow_core::types::{Event, EventId, HolderId, SeatId, TicketId};
use seatflow_runtime::{EngineConfig, FirstFreeSeat, SeatEngine};
use seatflow_testing::InMemoryTicketStore;
use seatflow_testing::fixtures::{booked, event_with_seats, storefront_catalog, waiting};
use seatflow_testing::helpers::init_tracing;
use seatflow_testing::mocks::stepping_clock;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const WAIT: Duration = Duration::from_secs(2);

fn engine_with(store: &InMemoryTicketStore, catalog: StaticCatalog, config: EngineConfig) -> SeatEngine {
    init_tracing();
    SeatEngine::new(Arc::new(store.clone()), Arc::new(catalog), Arc::new(stepping_clock()), config)
}

fn single_seat_engine(store: &InMemoryTicketStore) -> SeatEngine {
    engine_with(store, StaticCatalog::new([event_with_seats("1", 1)]), EngineConfig::default())
}

fn claim(seat: &str) -> ReservationIntent {
    ReservationIntent::ClaimSeat {
        seat_id: SeatId::new(seat),
    }
}

// ============================================================================
// Waitlist promotion
// ============================================================================

#[tokio::test]
async fn test_cancellation_promotes_first_in_queue() {
    let store = InMemoryTicketStore::new();
    let engine = single_seat_engine(&store);
    let event = EventId::new("1");
    let (x, y) = (HolderId::new("x"), HolderId::new("y"));

    // X books the only seat.
    let x_ticket = engine.reserve(&event, &x, claim("A1")).await.unwrap();
    assert_eq!(x_ticket.seat_id(), Some(&SeatId::new("A1")));

    // Y cannot claim and joins the queue at rank 1.
    let err = engine.reserve(&event, &y, claim("A1")).await.unwrap_err();
    assert!(err.is_seat_taken());
    let y_waiting = engine.reserve(&event, &y, ReservationIntent::JoinWaitlist).await.unwrap();
    assert!(y_waiting.is_waiting());

    let mut viewer = engine.watch(&event, Some(y.clone())).await.unwrap();
    let before = tokio::time::timeout(WAIT, viewer.wait_for_eligibility(|r| r.rank == Some(1)))
        .await
        .unwrap()
        .unwrap();
    assert!(!before.eligible);

    // X cancels: Y is now eligible at rank 1 and gets exactly one promotion.
    engine.cancel(&event, x_ticket.id, &x).await.unwrap();

    let promotion = tokio::time::timeout(WAIT, viewer.next_promotion())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promotion.ticket_id, y_waiting.id);
    assert_eq!(promotion.rank, 1);
    let after = viewer.wait_for_eligibility(|r| r.eligible).await.unwrap();
    assert_eq!(after, EligibilityResult { eligible: true, rank: Some(1) });

    // Y claims A1; the waiting ticket is closed out in the same commit.
    let reservation = engine.reserve_detailed(&event, &y, claim("A1")).await.unwrap();
    assert_eq!(
        reservation.outcome,
        PlanOutcome::Booked {
            promoted_from: Some(y_waiting.id)
        }
    );

    let tickets = engine.tickets_of(&event, &y).await.unwrap();
    assert_eq!(tickets.len(), 2);
    let superseded = tickets.iter().find(|t| t.id == y_waiting.id).unwrap();
    assert_eq!(
        superseded.status,
        TicketStatus::Superseded {
            promoted_to: reservation.ticket.id
        }
    );

    let snapshot = viewer
        .wait_for_snapshot(|s| s.booked_count() == 1 && s.waiting_queue().is_empty())
        .await
        .unwrap();
    assert!(snapshot.is_occupied(&SeatId::new("A1")));
    assert!(viewer.try_next_promotion().is_none());
    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_fresh_holder_cannot_jump_the_queue() {
    let store = InMemoryTicketStore::new();
    store.insert_unchecked([waiting(1, "1", "y", 0)]);
    let engine = single_seat_engine(&store);
    let event = EventId::new("1");

    let err = engine.reserve(&event, &HolderId::new("z"), claim("A1")).await.unwrap_err();
    assert_eq!(
        err,
        ReservationError::NotEligible {
            event_id: event.clone(),
            holder_id: HolderId::new("z"),
            rank: None,
        }
    );

    engine.reserve(&event, &HolderId::new("y"), claim("A1")).await.unwrap();
}

#[tokio::test]
async fn test_queue_order_follows_commit_time() {
    let store = InMemoryTicketStore::new();
    store.insert_unchecked([booked(1, "1", "x", "A1")]);
    let engine = single_seat_engine(&store);
    let event = EventId::new("1");

    for holder in ["a", "b", "c"] {
        engine
            .reserve(&event, &HolderId::new(holder), ReservationIntent::JoinWaitlist)
            .await
            .unwrap();
    }

    let snapshot = engine.snapshot(&event).await.unwrap();
    let order: Vec<_> = snapshot.waiting_queue().iter().map(|e| e.holder_id.as_str().to_string()).collect();
    assert_eq!(order, ["a", "b", "c"]);

    let c = engine.eligibility(&event, &HolderId::new("c")).await.unwrap();
    assert_eq!(c, EligibilityResult { eligible: false, rank: Some(3) });
}

#[tokio::test]
async fn test_promotion_reaches_holder_without_open_viewer() {
    let store = InMemoryTicketStore::new();
    let catalog = StaticCatalog::new([event_with_seats("1", 1), event_with_seats("2", 1)]);
    let engine = engine_with(&store, catalog, EngineConfig::default());
    let (summit, festival) = (EventId::new("1"), EventId::new("2"));
    let (x, y) = (HolderId::new("x"), HolderId::new("y"));

    // Y is browsing event 1 while queued for the sold-out event 2.
    let x_ticket = engine.reserve(&festival, &x, claim("A1")).await.unwrap();
    let y_waiting = engine.reserve(&festival, &y, ReservationIntent::JoinWaitlist).await.unwrap();
    let mut summit_viewer = engine.watch(&summit, Some(y.clone())).await.unwrap();

    let mut holder = engine.watch_holder(y.clone()).await.unwrap();
    let watched = tokio::time::timeout(WAIT, holder.wait_for_watched(|events| !events.is_empty()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(watched, vec![festival.clone()]);

    engine.cancel(&festival, x_ticket.id, &x).await.unwrap();

    let promotion = tokio::time::timeout(WAIT, holder.next_promotion())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promotion.event_id, festival);
    assert_eq!(promotion.ticket_id, y_waiting.id);
    assert!(summit_viewer.try_next_promotion().is_none());

    let y_ticket = engine.reserve(&summit, &y, claim("A1")).await.unwrap();
    let ids: Vec<_> = engine.tickets_of_holder(&y).await.unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![y_ticket.id, y_waiting.id]);

    summit_viewer.close().await.unwrap();
    holder.close().await.unwrap();
}

#[tokio::test]
async fn test_lagging_viewer_promoted_exactly_once() {
    let store = InMemoryTicketStore::with_feed_capacity(1);
    store.insert_unchecked([booked(1, "1", "x", "A1"), waiting(2, "1", "y", 1)]);
    let engine = engine_with(
        &store,
        StaticCatalog::new([event_with_seats("1", 1)]),
        EngineConfig::default().with_subscription_buffer(1),
    );
    let event = EventId::new("1");

    let mut viewer = engine.watch(&event, Some(HolderId::new("y"))).await.unwrap();
    tokio::time::timeout(WAIT, viewer.wait_for_eligibility(|r| r.rank == Some(1)))
        .await
        .unwrap()
        .unwrap();

    // Several commits while the session is not polling: its feeds lag and
    // resynchronise from a fresh read.
    store.insert_unchecked([booked(1, "1", "x", "A1").transition(TicketStatus::Cancelled).unwrap()]);
    store.insert_unchecked([waiting(3, "1", "w", 10)]);
    store.insert_unchecked([waiting(4, "1", "v", 11)]);

    tokio::time::timeout(WAIT, viewer.wait_for_snapshot(|s| s.waiting_queue().len() == 3))
        .await
        .unwrap()
        .unwrap();
    let promotion = viewer.try_next_promotion().expect("one promotion after the resync");
    assert_eq!(promotion.ticket_id, TicketId::from_u128(2));
    assert!(viewer.try_next_promotion().is_none());

    // Later changes that keep Y eligible stay silent.
    store.insert_unchecked([waiting(5, "1", "u", 12)]);
    tokio::time::timeout(WAIT, viewer.wait_for_snapshot(|s| s.waiting_queue().len() == 4))
        .await
        .unwrap()
        .unwrap();
    assert!(viewer.try_next_promotion().is_none());
    assert_eq!(viewer.eligibility(), Some(EligibilityResult { eligible: true, rank: Some(1) }));

    viewer.close().await.unwrap();
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_claims_for_one_seat() {
    let store = InMemoryTicketStore::new();
    let engine = engine_with(&store, storefront_catalog(), EngineConfig::default());
    let event = EventId::new("1");
    let (a, b) = (HolderId::new("a"), HolderId::new("b"));

    // Both attempts read revision 0 before either commits.
    store.gate_next_commits(2);
    let (first, second) = tokio::join!(
        engine.reserve(&event, &a, claim("A1")),
        engine.reserve(&event, &b, claim("A1")),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(loser.is_seat_taken(), "unexpected error: {loser}");

    assert_eq!(store.commit_count(), 1);
    assert_eq!(store.conflict_count(), 1);
    assert_eq!(engine.snapshot(&event).await.unwrap().booked_count(), 1);
}

#[tokio::test]
async fn test_lost_race_repicks_next_free_seat() {
    let store = InMemoryTicketStore::new();
    let engine = engine_with(&store, storefront_catalog(), EngineConfig::default());
    let event = EventId::new("1");
    let (a, b) = (HolderId::new("a"), HolderId::new("b"));

    store.gate_next_commits(2);
    let (first, second) = tokio::join!(
        engine.reserve_with_repick(&event, &a, SeatId::new("A1"), &FirstFreeSeat),
        engine.reserve_with_repick(&event, &b, SeatId::new("A1"), &FirstFreeSeat),
    );

    let mut seats: Vec<_> = [first.unwrap(), second.unwrap()]
        .iter()
        .map(|t| t.seat_id().unwrap().as_str().to_string())
        .collect();
    seats.sort();
    assert_eq!(seats, ["A1", "A2"]);
}

#[tokio::test]
async fn test_repick_gives_up_without_a_seat() {
    let store = InMemoryTicketStore::new();
    store.insert_unchecked([booked(1, "1", "x", "A1")]);
    let engine = engine_with(&store, storefront_catalog(), EngineConfig::default());
    let event = EventId::new("1");

    let nothing = |_: &Event, _: &CapacitySnapshot| -> Option<SeatId> { None };
    let err = engine
        .reserve_with_repick(&event, &HolderId::new("b"), SeatId::new("A1"), &nothing)
        .await
        .unwrap_err();
    assert!(err.is_seat_taken());

    let no_retries = engine_with(&store, storefront_catalog(), EngineConfig::default().with_seat_taken_retries(0));
    let err = no_retries
        .reserve_with_repick(&event, &HolderId::new("b"), SeatId::new("A1"), &FirstFreeSeat)
        .await
        .unwrap_err();
    assert!(err.is_seat_taken());

    let ticket = engine
        .reserve_with_repick(&event, &HolderId::new("b"), SeatId::new("A1"), &FirstFreeSeat)
        .await
        .unwrap();
    assert_eq!(ticket.seat_id(), Some(&SeatId::new("A2")));
}

#[tokio::test]
async fn test_commit_attempts_exhausted() {
    let store = InMemoryTicketStore::new();
    let engine = engine_with(
        &store,
        storefront_catalog(),
        EngineConfig::default().with_max_commit_attempts(1),
    );
    let event = EventId::new("1");

    // Different seats: no rule conflict, only the revision race.
    store.gate_next_commits(2);
    let holder_a = HolderId::new("a");
    let holder_b = HolderId::new("b");
    let (first, second) = tokio::join!(
        engine.reserve(&event, &holder_a, claim("A1")),
        engine.reserve(&event, &holder_b, claim("A2")),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(err, ReservationError::StoreUnavailable(_)));
    assert_eq!(store.commit_count(), 1);
}

// ============================================================================
// Failures and retention
// ============================================================================

#[tokio::test]
async fn test_store_outage_writes_nothing() {
    let store = InMemoryTicketStore::new();
    let engine = engine_with(&store, storefront_catalog(), EngineConfig::default());
    store.set_unavailable(true);

    let err = engine
        .reserve(&EventId::new("1"), &HolderId::new("a"), claim("A1"))
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, ReservationError::StoreUnavailable(_)));

    store.set_unavailable(false);
    assert!(store.all_tickets().is_empty());
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn test_retained_cancellation_frees_seat_and_revenue() {
    let store = InMemoryTicketStore::new();
    let engine = engine_with(
        &store,
        storefront_catalog(),
        EngineConfig::default().with_retain_cancelled(true),
    );
    let event = EventId::new("1");
    let a = HolderId::new("a");

    let ticket = engine.reserve(&event, &a, claim("A1")).await.unwrap();
    assert_eq!(engine.sales_summary().await.unwrap().total_revenue, 15_000);

    engine.cancel(&event, ticket.id, &a).await.unwrap();

    assert_eq!(store.all_tickets()[0].status, TicketStatus::Cancelled);
    assert_eq!(engine.snapshot(&event).await.unwrap().booked_count(), 0);
    assert_eq!(engine.sales_summary().await.unwrap().total_revenue, 0);

    // The seat is free again.
    engine.reserve(&event, &HolderId::new("b"), claim("A1")).await.unwrap();
}

#[tokio::test]
async fn test_viewer_reports_duplicate_seat() {
    let store = InMemoryTicketStore::new();
    store.insert_unchecked([booked(1, "1", "x", "A1"), booked(2, "1", "y", "A1")]);
    let engine = single_seat_engine(&store);
    let event = EventId::new("1");

    let mut viewer = engine.watch(&event, None).await.unwrap();
    let snapshot = tokio::time::timeout(WAIT, viewer.wait_for_snapshot(|_| true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.faults().len(), 1);
    assert_eq!(snapshot.booked_count(), 2);

    let err = engine.reserve(&event, &HolderId::new("z"), claim("A1")).await.unwrap_err();
    assert!(err.is_seat_taken());
    viewer.close().await.unwrap();
}

//! Viewer reducer scenarios driven through the Given-When-Then harness

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use seatflow_core::eligibility::EligibilityResult;
use seatflow_core::store::TicketSet;
use seatflow_core::ticket::Ticket;
use seatflow_core::types::{HolderId, TicketId};
use seatflow_core::viewer::{ViewerAction, ViewerEffect, ViewerEnvironment, ViewerReducer, ViewerState};
use seatflow_testing::ReducerTest;
use seatflow_testing::fixtures::{booked, event_with_seats, waiting};
use seatflow_testing::mocks::{epoch, test_clock};
use seatflow_testing::reducer_test::assertions;
use std::sync::Arc;

fn env() -> ViewerEnvironment {
    ViewerEnvironment::new(Arc::new(test_clock()))
}

fn capacity(sequence: u64, tickets: Vec<Ticket>) -> ViewerAction {
    ViewerAction::CapacityChanged(TicketSet { sequence, tickets })
}

fn own(sequence: u64, tickets: Vec<Ticket>) -> ViewerAction {
    ViewerAction::OwnTicketsChanged(TicketSet { sequence, tickets })
}

fn viewer(seats: u32, holder: Option<&str>) -> ViewerState {
    ViewerState::new(event_with_seats("1", seats), holder.map(HolderId::new))
}

#[test]
fn anonymous_viewer_only_gets_snapshots() {
    ReducerTest::new(ViewerReducer)
        .with_env(env())
        .given_state(viewer(1, None))
        .when_action(capacity(0, vec![booked(1, "1", "x", "A1")]))
        .then_state(|state| {
            assert_eq!(state.snapshot.as_ref().map(|s| s.booked_count()), Some(1));
            assert!(state.eligibility.is_none());
        })
        .then_effects(|effects| {
            assertions::assert_effects_count(effects, 1);
            assert!(matches!(&effects[0], ViewerEffect::SnapshotUpdated(s) if s.generation() == 0));
        })
        .run();
}

#[test]
fn eligibility_published_only_on_change() {
    ReducerTest::new(ViewerReducer)
        .with_env(env())
        .given_state(viewer(1, Some("y")))
        .when_action(capacity(0, vec![]))
        .when_action(capacity(1, vec![]))
        .then_effects_at(0, |effects| {
            assert!(effects.contains(&ViewerEffect::EligibilityChanged(EligibilityResult {
                eligible: true,
                rank: None
            })));
        })
        .then_effects(|effects| {
            assertions::assert_effects_count(effects, 1);
            assert!(matches!(&effects[0], ViewerEffect::SnapshotUpdated(_)));
        })
        .run();
}

#[test]
fn cancellation_promotes_rank_one() {
    ReducerTest::new(ViewerReducer::new())
        .with_env(env())
        .given_state(viewer(1, Some("y")))
        .when_action(own(0, vec![waiting(2, "1", "y", 1)]))
        .when_action(capacity(0, vec![booked(1, "1", "x", "A1"), waiting(2, "1", "y", 1)]))
        .when_action(capacity(1, vec![waiting(2, "1", "y", 1)]))
        .then_effects_at(1, |effects| {
            assertions::assert_promotions(effects, 0);
            assert!(effects.contains(&ViewerEffect::EligibilityChanged(EligibilityResult {
                eligible: false,
                rank: Some(1)
            })));
        })
        .then_effects(|effects| {
            assert_eq!(assertions::promoted_tickets(effects), vec![TicketId::from_u128(2)]);
            assertions::assert_has_eligibility_change(effects);
            let promotion = effects.iter().find_map(|e| match e {
                ViewerEffect::Promoted(p) => Some(p.clone()),
                _ => None,
            });
            let promotion = promotion.expect("promotion effect");
            assert_eq!(promotion.rank, 1);
            assert_eq!(promotion.generation, 1);
            assert_eq!(promotion.observed_at, epoch());
        })
        .then_state(|state| {
            assert_eq!(
                state.eligibility,
                Some(EligibilityResult {
                    eligible: true,
                    rank: Some(1)
                })
            );
        })
        .run();
}

#[test]
fn promotion_deferred_until_holder_feed_catches_up() {
    ReducerTest::new(ViewerReducer)
        .with_env(env())
        .given_state(viewer(1, Some("y")))
        .when_action(capacity(0, vec![waiting(2, "1", "y", 1)]))
        .when_action(own(0, vec![waiting(2, "1", "y", 1)]))
        .then_effects_at(0, |effects| assertions::assert_promotions(effects, 0))
        .then_effects(|effects| assertions::assert_promotions(effects, 1))
        .run();
}

#[test]
fn promotion_announced_once_across_rebuilds() {
    let rebuilds = (0..4).map(|sequence| capacity(sequence, vec![waiting(2, "1", "y", 1)]));

    ReducerTest::new(ViewerReducer)
        .with_env(env())
        .given_state(viewer(1, Some("y")))
        .when_action(own(0, vec![waiting(2, "1", "y", 1)]))
        .when_actions(rebuilds)
        .then_all_effects(|effects| assertions::assert_promotions(effects, 1))
        .then_effects(|effects| assertions::assert_effects_count(effects, 1))
        .run();
}

#[test]
fn losing_the_seat_rearms_the_promotion() {
    ReducerTest::new(ViewerReducer)
        .with_env(env())
        .given_state(viewer(1, Some("y")))
        .when_action(own(0, vec![waiting(2, "1", "y", 1)]))
        .when_action(capacity(0, vec![waiting(2, "1", "y", 1)]))
        .when_action(capacity(1, vec![booked(1, "1", "x", "A1"), waiting(2, "1", "y", 1)]))
        .when_action(capacity(2, vec![waiting(2, "1", "y", 1)]))
        .then_effects_at(1, |effects| assertions::assert_promotions(effects, 1))
        .then_effects_at(2, |effects| assertions::assert_promotions(effects, 0))
        .then_effects(|effects| assertions::assert_promotions(effects, 1))
        .run();
}

#[test]
fn integrity_faults_reported_once() {
    let doubled = vec![booked(1, "1", "x", "A1"), booked(2, "1", "z", "A1")];

    ReducerTest::new(ViewerReducer)
        .with_env(env())
        .given_state(viewer(1, None))
        .when_action(capacity(0, doubled.clone()))
        .when_action(capacity(1, doubled))
        .then_effects_at(0, |effects| assertions::assert_faults(effects, 1))
        .then_effects(|effects| assertions::assert_faults(effects, 0))
        .run();
}

#[test]
fn own_tickets_listed_newest_first() {
    let older = waiting(1, "1", "y", 1);
    let newer = waiting(2, "1", "y", 5);
    let expected = vec![newer.clone(), older.clone()];

    ReducerTest::new(ViewerReducer)
        .with_env(env())
        .given_state(viewer(1, Some("y")))
        .when_action(own(0, vec![older, newer]))
        .then_state({
            let expected = expected.clone();
            move |state| assert_eq!(state.own_tickets, expected)
        })
        .then_effects(move |effects| {
            assert_eq!(effects[0], ViewerEffect::OwnTicketsUpdated(expected));
        })
        .run();
}

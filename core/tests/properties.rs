//! Property-based tests for reservation planning.
//!
//! Random sequences of claims, waitlist joins and cancellations are planned
//! one after another against a plain ticket vector (standing in for a store
//! that applies each batch atomically). After every step the allocation
//! invariants must hold.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use seatflow_core::eligibility::{available_seats, evaluate};
use seatflow_core::reservation::{
    CommitStamp, PlanOutcome, ReservationIntent, plan_cancellation, plan_reservation,
};
use seatflow_core::snapshot::CapacitySnapshot;
use seatflow_core::store::TicketWrite;
use seatflow_core::ticket::{ConfirmationToken, Ticket};
use seatflow_core::types::{Event, EventId, HolderId, SeatId, SeatLayout, TicketId};

// ============================================================================
// Operation model
// ============================================================================

#[derive(Clone, Debug)]
enum Op {
    Claim { holder: u8, seat: u8 },
    Join { holder: u8 },
    Cancel { pick: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 0u8..8).prop_map(|(holder, seat)| Op::Claim { holder, seat }),
        (0u8..6).prop_map(|holder| Op::Join { holder }),
        any::<u8>().prop_map(|pick| Op::Cancel { pick }),
    ]
}

fn holder(index: u8) -> HolderId {
    HolderId::new(format!("holder-{index}"))
}

fn seat(index: u8) -> SeatId {
    SeatId::new(format!("A{}", index + 1))
}

fn stamp(step: usize) -> CommitStamp {
    let offset = i64::try_from(step).unwrap();
    CommitStamp {
        ticket_id: TicketId::from_u128(step as u128 + 1),
        now: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset),
        confirmation: ConfirmationToken::generate(),
    }
}

fn apply(tickets: &mut Vec<Ticket>, writes: Vec<TicketWrite>) {
    for write in writes {
        match write {
            TicketWrite::Insert(ticket) => {
                assert!(tickets.iter().all(|t| t.id != ticket.id), "duplicate insert");
                tickets.push(ticket);
            }
            TicketWrite::Replace(ticket) => {
                let slot = tickets.iter_mut().find(|t| t.id == ticket.id).expect("replace target");
                *slot = ticket;
            }
            TicketWrite::Delete(id) => tickets.retain(|t| t.id != id),
        }
    }
}

fn check_invariants(event: &Event, tickets: &[Ticket]) -> Result<(), TestCaseError> {
    let snapshot = CapacitySnapshot::build(&event.id, tickets);

    prop_assert!(snapshot.booked_count() <= event.total_seats, "capacity exceeded");
    prop_assert!(snapshot.faults().is_empty(), "seat booked twice: {:?}", snapshot.faults());

    let queue = snapshot.waiting_queue();
    prop_assert!(
        queue.windows(2).all(|w| (w[0].created_at, w[0].ticket_id) < (w[1].created_at, w[1].ticket_id)),
        "queue out of order"
    );

    let mut holders: Vec<_> = queue.iter().map(|e| &e.holder_id).collect();
    holders.sort();
    let queued = holders.len();
    holders.dedup();
    prop_assert_eq!(holders.len(), queued, "holder queued twice");
    Ok(())
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn allocation_invariants_hold(total_seats in 0u32..5, ops in prop::collection::vec(op(), 1..60)) {
        let event = Event::new(EventId::new("1"), "Tech Summit 2025", total_seats)
            .with_layout(SeatLayout::new(1, 8));
        let mut tickets: Vec<Ticket> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Claim { holder: h, seat: s } => {
                    let before = CapacitySnapshot::build(&event.id, &tickets);
                    let was_queued = before.first_entry_of(&holder(h)).is_some();

                    if let Ok(plan) = plan_reservation(
                        &event,
                        &tickets,
                        &holder(h),
                        &ReservationIntent::ClaimSeat { seat_id: seat(s) },
                        stamp(step),
                    ) {
                        // A fresh holder only books when nobody is queued.
                        if !was_queued {
                            prop_assert!(before.waiting_queue().is_empty());
                        }
                        prop_assert!(available_seats(&before, &event) > 0);
                        apply(&mut tickets, plan.writes);
                    }
                }
                Op::Join { holder: h } => {
                    let plan = plan_reservation(
                        &event,
                        &tickets,
                        &holder(h),
                        &ReservationIntent::JoinWaitlist,
                        stamp(step),
                    )
                    .unwrap();
                    apply(&mut tickets, plan.writes);
                }
                Op::Cancel { pick } => {
                    if tickets.is_empty() {
                        continue;
                    }
                    let target = &tickets[usize::from(pick) % tickets.len()];
                    let (id, owner) = (target.id, target.holder_id.clone());
                    if let Ok((_, write)) = plan_cancellation(&tickets, id, &owner, step % 2 == 0) {
                        apply(&mut tickets, vec![write]);
                    }
                }
            }

            check_invariants(&event, &tickets)?;
        }
    }

    #[test]
    fn join_waitlist_twice_returns_same_ticket(booked in 0u32..4, extra in 0u32..3) {
        let event = Event::new(EventId::new("1"), "Tech Summit 2025", booked + extra);
        let mut tickets = Vec::new();
        for i in 0..booked {
            let plan = plan_reservation(
                &event,
                &tickets,
                &HolderId::new(format!("b{i}")),
                &ReservationIntent::ClaimSeat { seat_id: SeatId::new(format!("A{i}")) },
                stamp(i as usize),
            )
            .unwrap();
            apply(&mut tickets, plan.writes);
        }

        let yuna = HolderId::new("yuna");
        let first = plan_reservation(&event, &tickets, &yuna, &ReservationIntent::JoinWaitlist, stamp(100)).unwrap();
        prop_assert_eq!(&first.outcome, &PlanOutcome::Queued);
        apply(&mut tickets, first.writes);

        let second = plan_reservation(&event, &tickets, &yuna, &ReservationIntent::JoinWaitlist, stamp(101)).unwrap();
        prop_assert_eq!(second.outcome, PlanOutcome::AlreadyQueued);
        prop_assert_eq!(second.ticket.id, first.ticket.id);
        prop_assert_eq!(CapacitySnapshot::build(&event.id, &tickets).waiting_queue().len(), 1);
    }

    #[test]
    fn eligibility_window_is_queue_prefix(total_seats in 0u32..6, booked in 0u32..6, queued in 0usize..8) {
        let event = Event::new(EventId::new("1"), "Tech Summit 2025", total_seats);
        let mut tickets = Vec::new();
        for i in 0..booked {
            tickets.push(Ticket::booked(
                TicketId::from_u128(u128::from(i) + 1),
                event.id.clone(),
                HolderId::new(format!("b{i}")),
                SeatId::new(format!("A{i}")),
                DateTime::<Utc>::UNIX_EPOCH,
            ));
        }
        for i in 0..queued {
            tickets.push(Ticket::waiting(
                TicketId::from_u128(1_000 + i as u128),
                event.id.clone(),
                HolderId::new(format!("w{i}")),
                DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(i64::try_from(i).unwrap()),
            ));
        }

        let snapshot = CapacitySnapshot::build(&event.id, &tickets);
        let available = total_seats.saturating_sub(booked) as usize;
        for i in 0..queued {
            let result = evaluate(&snapshot, &event, &HolderId::new(format!("w{i}")));
            prop_assert_eq!(result.rank, Some(i + 1));
            prop_assert_eq!(result.eligible, i < available);
        }

        let fresh = evaluate(&snapshot, &event, &HolderId::new("fresh"));
        prop_assert_eq!(fresh.eligible, available > 0 && queued == 0);
    }

    #[test]
    fn snapshot_rebuild_ignores_delivery_order(rotation in 0usize..16, ops in prop::collection::vec(op(), 1..30)) {
        let event = Event::new(EventId::new("1"), "Tech Summit 2025", 3);
        let mut tickets: Vec<Ticket> = Vec::new();
        for (step, op) in ops.into_iter().enumerate() {
            let (h, intent) = match op {
                Op::Claim { holder, seat: s } => (holder, ReservationIntent::ClaimSeat { seat_id: seat(s) }),
                Op::Join { holder } | Op::Cancel { pick: holder } => (holder, ReservationIntent::JoinWaitlist),
            };
            if let Ok(plan) = plan_reservation(&event, &tickets, &holder(h), &intent, stamp(step)) {
                apply(&mut tickets, plan.writes);
            }
        }

        let first = CapacitySnapshot::build(&event.id, &tickets);
        prop_assert_eq!(&first, &CapacitySnapshot::build(&event.id, &tickets));

        if !tickets.is_empty() {
            let k = rotation % tickets.len();
            tickets.rotate_left(k);
        }
        prop_assert_eq!(first, CapacitySnapshot::build(&event.id, &tickets));
    }
}

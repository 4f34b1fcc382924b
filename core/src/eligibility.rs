//! Eligibility: who may claim a seat right now.
//!
//! The queue, once non-empty, is serviced strictly in arrival order with one
//! promotion slot per free seat. A holder without a waiting ticket may only
//! book directly when nobody is queued; otherwise they join at the back.

use crate::snapshot::{CapacitySnapshot, QueueEntry};
use crate::types::{Event, HolderId, TicketId};
use serde::{Deserialize, Serialize};

/// Outcome of evaluating one holder against one snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EligibilityResult {
    /// Whether the holder may claim a seat now
    pub eligible: bool,
    /// 1-based queue position, when the holder is waiting
    pub rank: Option<usize>,
}

impl EligibilityResult {
    /// Result for a holder with nothing to claim.
    pub const INELIGIBLE: Self = Self {
        eligible: false,
        rank: None,
    };

    /// Whether the holder is in the waiting queue.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.rank.is_some()
    }
}

/// Seats not held by a booked ticket, clamped at zero.
#[must_use]
pub fn available_seats(snapshot: &CapacitySnapshot, event: &Event) -> u32 {
    event.total_seats.saturating_sub(snapshot.booked_count())
}

/// Whether the waiting ticket at `rank` falls inside the current window.
#[must_use]
pub fn rank_is_eligible(rank: usize, available: u32) -> bool {
    available > 0 && u32::try_from(rank).is_ok_and(|rank| rank <= available)
}

/// Evaluates `holder_id` against `snapshot`.
///
/// 1. `available = max(0, total_seats − booked_count)`
/// 2. If the holder has a waiting ticket, `rank` is the position of their
///    earliest one and they are eligible iff `rank ≤ available`.
/// 3. Otherwise they are eligible iff seats are available and the queue is
///    empty.
#[must_use]
pub fn evaluate(snapshot: &CapacitySnapshot, event: &Event, holder_id: &HolderId) -> EligibilityResult {
    let available = available_seats(snapshot, event);

    if let Some((rank, _)) = snapshot.first_entry_of(holder_id) {
        return EligibilityResult {
            eligible: rank_is_eligible(rank, available),
            rank: Some(rank),
        };
    }

    EligibilityResult {
        eligible: available > 0 && snapshot.waiting_queue().is_empty(),
        rank: None,
    }
}

/// Evaluates one specific waiting ticket.
///
/// Returns [`EligibilityResult::INELIGIBLE`] when the ticket is not in the queue.
#[must_use]
pub fn evaluate_ticket(snapshot: &CapacitySnapshot, event: &Event, ticket_id: TicketId) -> EligibilityResult {
    snapshot
        .rank_of(ticket_id)
        .map_or(EligibilityResult::INELIGIBLE, |rank| EligibilityResult {
            eligible: rank_is_eligible(rank, available_seats(snapshot, event)),
            rank: Some(rank),
        })
}

/// The head of the queue that is currently entitled to claim a seat.
#[must_use]
pub fn eligible_waiting<'a>(snapshot: &'a CapacitySnapshot, event: &Event) -> &'a [QueueEntry] {
    let available = usize::try_from(available_seats(snapshot, event)).unwrap_or(usize::MAX);
    let queue = snapshot.waiting_queue();
    &queue[..available.min(queue.len())]
}

//! Reservation planning.
//!
//! Turns a holder's intent into the exact batch of writes that must be
//! committed atomically, validated against the ticket set the batch will be
//! conditioned on. Planning is pure: the runtime coordinator reads the
//! event, calls [`plan_reservation`], and commits the plan against the
//! revision it read. If the commit loses a race, it re-reads and re-plans,
//! so the preconditions checked here always hold for the state the writes
//! land on.

use crate::eligibility::evaluate;
use crate::snapshot::CapacitySnapshot;
use crate::store::{StoreError, TicketWrite};
use crate::ticket::{ConfirmationToken, StatusKind, Ticket, TicketStatus};
use crate::types::{Event, EventId, HolderId, SeatId, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a holder is asking for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReservationIntent {
    /// Book a specific seat (directly, or by converting a waiting ticket)
    ClaimSeat {
        /// Seat to book
        seat_id: SeatId,
    },
    /// Enter the waiting queue
    JoinWaitlist,
}

impl ReservationIntent {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ClaimSeat { .. } => "claim_seat",
            Self::JoinWaitlist => "join_waitlist",
        }
    }
}

/// Errors returned to the caller of a reservation or cancellation.
///
/// Nothing is ever written when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// The seat was booked by someone else first. Re-render the seat map and
    /// let the holder pick again.
    #[error("Seat {seat_id} is already taken for event {event_id}")]
    SeatTaken {
        /// Event of the seat
        event_id: EventId,
        /// The contested seat
        seat_id: SeatId,
    },

    /// The holder's eligibility window closed before the commit. Route the
    /// holder back to the waiting state.
    #[error("Holder {holder_id} is not eligible to claim a seat for event {event_id}")]
    NotEligible {
        /// Event the holder tried to book
        event_id: EventId,
        /// The holder
        holder_id: HolderId,
        /// The holder's queue position at commit time, if queued
        rank: Option<usize>,
    },

    /// The event does not exist.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The ticket store could not be reached, or kept conflicting.
    #[error("Ticket store unavailable: {0}")]
    StoreUnavailable(String),

    /// The seat is not part of the event's seat map.
    #[error("Seat {seat_id} does not exist at event {event_id}")]
    UnknownSeat {
        /// Event whose seat map was consulted
        event_id: EventId,
        /// The unknown seat label
        seat_id: SeatId,
    },

    /// No ticket with this id exists for the event.
    #[error("Ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// The ticket belongs to another holder.
    #[error("Ticket {ticket_id} is not owned by {holder_id}")]
    NotOwner {
        /// Ticket in question
        ticket_id: TicketId,
        /// Holder who attempted the change
        holder_id: HolderId,
    },

    /// The ticket is already cancelled or superseded.
    #[error("Ticket {ticket_id} is already {status}")]
    AlreadyTerminal {
        /// Ticket in question
        ticket_id: TicketId,
        /// Its terminal status
        status: StatusKind,
    },
}

impl ReservationError {
    /// Whether the holder can try again with fresh state.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SeatTaken { .. } | Self::NotEligible { .. } | Self::StoreUnavailable(_)
        )
    }

    /// Whether this is a lost seat race.
    #[must_use]
    pub const fn is_seat_taken(&self) -> bool {
        matches!(self, Self::SeatTaken { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SeatTaken { .. } => "seat_taken",
            Self::NotEligible { .. } => "not_eligible",
            Self::EventNotFound(_) => "event_not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::UnknownSeat { .. } => "unknown_seat",
            Self::TicketNotFound(_) => "ticket_not_found",
            Self::NotOwner { .. } => "not_owner",
            Self::AlreadyTerminal { .. } => "already_terminal",
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

/// Values fixed at commit time for the ticket a plan may mint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitStamp {
    /// Id for a newly minted ticket
    pub ticket_id: TicketId,
    /// Commit time; becomes `created_at` and therefore the queue position
    pub now: DateTime<Utc>,
    /// Confirmation token for the new ticket
    pub confirmation: ConfirmationToken,
}

impl CommitStamp {
    /// Fresh id and token for a commit happening at `now`.
    #[must_use]
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            ticket_id: TicketId::new(),
            now,
            confirmation: ConfirmationToken::generate(),
        }
    }
}

/// How a plan resolves the intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanOutcome {
    /// A new booked ticket; `promoted_from` is the waiting ticket it supersedes
    Booked {
        /// Superseded waiting ticket, if the holder was queued
        promoted_from: Option<TicketId>,
    },
    /// A new waiting ticket
    Queued,
    /// The holder was already queued; nothing to write
    AlreadyQueued,
}

/// The writes to commit and the ticket to hand back to the holder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationPlan {
    /// Ticket returned to the caller
    pub ticket: Ticket,
    /// Writes to apply atomically (empty when nothing changes)
    pub writes: Vec<TicketWrite>,
    /// Classification of the plan
    pub outcome: PlanOutcome,
}

impl ReservationPlan {
    /// Whether committing this plan would change the store.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Plans `intent` for `holder_id` against the event's current tickets.
///
/// # Errors
///
/// - `UnknownSeat`: the seat is not in the event's seat map
/// - `SeatTaken`: the seat is held by a booked ticket
/// - `NotEligible`: the holder may not claim a seat per the eligibility rules
pub fn plan_reservation(
    event: &Event,
    tickets: &[Ticket],
    holder_id: &HolderId,
    intent: &ReservationIntent,
    stamp: CommitStamp,
) -> Result<ReservationPlan, ReservationError> {
    let snapshot = CapacitySnapshot::build(&event.id, tickets);
    let queued = snapshot
        .first_entry_of(holder_id)
        .and_then(|(_, entry)| tickets.iter().find(|t| t.id == entry.ticket_id));

    match intent {
        ReservationIntent::ClaimSeat { seat_id } => {
            if !event.has_seat(seat_id) {
                return Err(ReservationError::UnknownSeat {
                    event_id: event.id.clone(),
                    seat_id: seat_id.clone(),
                });
            }
            if snapshot.is_occupied(seat_id) {
                return Err(ReservationError::SeatTaken {
                    event_id: event.id.clone(),
                    seat_id: seat_id.clone(),
                });
            }
            let eligibility = evaluate(&snapshot, event, holder_id);
            if !eligibility.eligible {
                return Err(ReservationError::NotEligible {
                    event_id: event.id.clone(),
                    holder_id: holder_id.clone(),
                    rank: eligibility.rank,
                });
            }

            let ticket = Ticket::booked(
                stamp.ticket_id,
                event.id.clone(),
                holder_id.clone(),
                seat_id.clone(),
                stamp.now,
            )
            .with_confirmation(stamp.confirmation);

            let mut writes = vec![TicketWrite::Insert(ticket.clone())];
            let promoted_from = match queued {
                Some(waiting) => {
                    let closed = waiting
                        .transition(TicketStatus::Superseded {
                            promoted_to: ticket.id,
                        })
                        .map_err(|_| ReservationError::AlreadyTerminal {
                            ticket_id: waiting.id,
                            status: waiting.status.kind(),
                        })?;
                    writes.push(TicketWrite::Replace(closed));
                    Some(waiting.id)
                }
                None => None,
            };

            Ok(ReservationPlan {
                ticket,
                writes,
                outcome: PlanOutcome::Booked { promoted_from },
            })
        }
        ReservationIntent::JoinWaitlist => {
            if let Some(existing) = queued {
                return Ok(ReservationPlan {
                    ticket: existing.clone(),
                    writes: Vec::new(),
                    outcome: PlanOutcome::AlreadyQueued,
                });
            }

            let ticket = Ticket::waiting(stamp.ticket_id, event.id.clone(), holder_id.clone(), stamp.now)
                .with_confirmation(stamp.confirmation);

            Ok(ReservationPlan {
                writes: vec![TicketWrite::Insert(ticket.clone())],
                ticket,
                outcome: PlanOutcome::Queued,
            })
        }
    }
}

/// Plans a holder-initiated cancellation.
///
/// With `retain` the ticket is rewritten as `Cancelled`; otherwise it is
/// deleted. Either way it stops counting toward capacity and the queue.
///
/// # Returns
///
/// The ticket as it looks after cancellation, and the write to commit.
///
/// # Errors
///
/// - `TicketNotFound`: no such ticket among `tickets`
/// - `NotOwner`: the ticket belongs to another holder
/// - `AlreadyTerminal`: the ticket is already cancelled or superseded
pub fn plan_cancellation(
    tickets: &[Ticket],
    ticket_id: TicketId,
    holder_id: &HolderId,
    retain: bool,
) -> Result<(Ticket, TicketWrite), ReservationError> {
    let ticket = tickets
        .iter()
        .find(|t| t.id == ticket_id)
        .ok_or(ReservationError::TicketNotFound(ticket_id))?;

    if &ticket.holder_id != holder_id {
        return Err(ReservationError::NotOwner {
            ticket_id,
            holder_id: holder_id.clone(),
        });
    }

    let cancelled = ticket
        .transition(TicketStatus::Cancelled)
        .map_err(|err| ReservationError::AlreadyTerminal {
            ticket_id,
            status: err.from,
        })?;

    let write = if retain {
        TicketWrite::Replace(cancelled.clone())
    } else {
        TicketWrite::Delete(ticket_id)
    };
    Ok((cancelled, write))
}

//! Capacity snapshots: the read model every eligibility decision is made against.
//!
//! A [`CapacitySnapshot`] is derived from the complete live ticket set of one
//! event. It is never patched incrementally; every store notification builds
//! a new one, so two builds from the same input are structurally identical
//! regardless of the order the store delivered the tickets in.

use crate::ticket::{Ticket, TicketStatus};
use crate::types::{EventId, HolderId, SeatId, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One position in the waiting queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The waiting ticket
    pub ticket_id: TicketId,
    /// Its holder
    pub holder_id: HolderId,
    /// Commit time of the waiting ticket
    pub created_at: DateTime<Utc>,
}

/// A data-integrity fault detected while building a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityFault {
    /// Two booked tickets claim the same seat.
    DuplicateSeat {
        /// The doubly-booked seat
        seat_id: SeatId,
        /// The ticket that sorts first by `(created_at, id)`
        first: TicketId,
        /// The conflicting ticket
        second: TicketId,
    },
}

/// Booked count, occupied seats and ordered waiting queue of one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    event_id: EventId,
    generation: u64,
    booked_count: u32,
    occupied_seats: BTreeSet<SeatId>,
    waiting_queue: Vec<QueueEntry>,
    faults: Vec<IntegrityFault>,
}

impl CapacitySnapshot {
    /// Builds a snapshot from the current ticket set of `event_id`.
    ///
    /// Tickets of other events and tickets in a terminal status are ignored,
    /// so the full result of a store query can be passed as-is.
    #[must_use]
    pub fn build(event_id: &EventId, tickets: &[Ticket]) -> Self {
        let mut booked: Vec<&Ticket> = Vec::new();
        let mut waiting: Vec<&Ticket> = Vec::new();

        for ticket in tickets.iter().filter(|t| &t.event_id == event_id) {
            match ticket.status {
                TicketStatus::Booked { .. } => booked.push(ticket),
                TicketStatus::Waiting => waiting.push(ticket),
                TicketStatus::Cancelled | TicketStatus::Superseded { .. } => {}
            }
        }

        // Sorting booked tickets first makes fault reports independent of input order.
        booked.sort_by_key(|t| t.queue_key());
        waiting.sort_by_key(|t| t.queue_key());

        let mut owners: BTreeMap<&SeatId, TicketId> = BTreeMap::new();
        let mut faults = Vec::new();
        for ticket in &booked {
            let Some(seat_id) = ticket.seat_id() else {
                continue;
            };
            if let Some(first) = owners.get(seat_id) {
                tracing::warn!(
                    event_id = %event_id,
                    seat_id = %seat_id,
                    first = %first,
                    second = %ticket.id,
                    "Seat booked by more than one ticket"
                );
                faults.push(IntegrityFault::DuplicateSeat {
                    seat_id: seat_id.clone(),
                    first: *first,
                    second: ticket.id,
                });
            } else {
                owners.insert(seat_id, ticket.id);
            }
        }

        let waiting_queue = waiting
            .into_iter()
            .map(|t| QueueEntry {
                ticket_id: t.id,
                holder_id: t.holder_id.clone(),
                created_at: t.created_at,
            })
            .collect();

        Self {
            event_id: event_id.clone(),
            generation: 0,
            booked_count: u32::try_from(booked.len()).unwrap_or(u32::MAX),
            occupied_seats: owners.into_keys().cloned().collect(),
            waiting_queue,
            faults,
        }
    }

    /// Tags the snapshot with the notification generation it was built from.
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// The event this snapshot describes.
    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Notification generation (0 for snapshots built outside a subscription).
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of booked tickets.
    #[must_use]
    pub const fn booked_count(&self) -> u32 {
        self.booked_count
    }

    /// Seats currently held by booked tickets.
    #[must_use]
    pub const fn occupied_seats(&self) -> &BTreeSet<SeatId> {
        &self.occupied_seats
    }

    /// Whether `seat` is held by a booked ticket.
    #[must_use]
    pub fn is_occupied(&self, seat: &SeatId) -> bool {
        self.occupied_seats.contains(seat)
    }

    /// The waiting queue, oldest first.
    #[must_use]
    pub fn waiting_queue(&self) -> &[QueueEntry] {
        &self.waiting_queue
    }

    /// Waiting ticket ids, oldest first.
    pub fn waiting_ticket_ids(&self) -> impl Iterator<Item = TicketId> + '_ {
        self.waiting_queue.iter().map(|entry| entry.ticket_id)
    }

    /// Integrity faults found while building.
    #[must_use]
    pub fn faults(&self) -> &[IntegrityFault] {
        &self.faults
    }

    /// 1-based queue position of `ticket_id`, if it is waiting.
    #[must_use]
    pub fn rank_of(&self, ticket_id: TicketId) -> Option<usize> {
        self.waiting_queue
            .iter()
            .position(|entry| entry.ticket_id == ticket_id)
            .map(|index| index + 1)
    }

    /// The holder's earliest waiting entry and its 1-based rank.
    #[must_use]
    pub fn first_entry_of(&self, holder_id: &HolderId) -> Option<(usize, &QueueEntry)> {
        self.waiting_queue
            .iter()
            .enumerate()
            .find(|(_, entry)| &entry.holder_id == holder_id)
            .map(|(index, entry)| (index + 1, entry))
    }

    /// Seats of `candidates` that are not occupied, in iteration order.
    pub fn free_seats<'a, I>(&'a self, candidates: I) -> impl Iterator<Item = SeatId> + 'a
    where
        I: IntoIterator<Item = SeatId>,
        I::IntoIter: 'a,
    {
        candidates
            .into_iter()
            .filter(move |seat| !self.occupied_seats.contains(seat))
    }
}

//! One-shot promotion signals for queued holders.
//!
//! A holder is told "you may now claim a seat" exactly when one of their
//! waiting tickets moves from ineligible to eligible. Recomputations where
//! the ticket is already eligible stay silent. The signal is advisory: the
//! claim itself is validated again by the reservation coordinator.

use crate::eligibility::evaluate_ticket;
use crate::snapshot::CapacitySnapshot;
use crate::types::{Event, EventId, HolderId, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// "You may now claim a seat."
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Event the seat is at
    pub event_id: EventId,
    /// Holder being invited
    pub holder_id: HolderId,
    /// The waiting ticket that became eligible
    pub ticket_id: TicketId,
    /// Queue position at the time of the signal
    pub rank: usize,
    /// Generation of the snapshot that triggered the signal
    pub generation: u64,
    /// When the transition was observed
    pub observed_at: DateTime<Utc>,
}

/// Edge detector over a holder's waiting tickets.
///
/// Tickets never seen before are assumed ineligible, so a ticket that is
/// already eligible on first observation is signalled once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromotionTracker {
    last_eligible: HashMap<TicketId, bool>,
}

impl PromotionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-evaluates `holder_id`'s waiting tickets against a new snapshot.
    ///
    /// Returns a promotion for every ticket whose eligibility flipped to
    /// `true` since the previous observation. Tickets that left the queue
    /// are forgotten.
    pub fn observe(
        &mut self,
        snapshot: &CapacitySnapshot,
        event: &Event,
        holder_id: &HolderId,
        observed_at: DateTime<Utc>,
    ) -> Vec<Promotion> {
        self.observe_where(snapshot, event, holder_id, observed_at, |_| true)
    }

    /// Like [`observe`](Self::observe), restricted to tickets in `held`.
    ///
    /// Used when the holder's own ticket feed lags the capacity feed: a
    /// queue entry the holder does not (yet) know about is not tracked, so
    /// its rising edge is reported once the holder's feed catches up.
    pub fn observe_held(
        &mut self,
        snapshot: &CapacitySnapshot,
        event: &Event,
        holder_id: &HolderId,
        held: &HashSet<TicketId>,
        observed_at: DateTime<Utc>,
    ) -> Vec<Promotion> {
        self.observe_where(snapshot, event, holder_id, observed_at, |id| held.contains(id))
    }

    fn observe_where(
        &mut self,
        snapshot: &CapacitySnapshot,
        event: &Event,
        holder_id: &HolderId,
        observed_at: DateTime<Utc>,
        include: impl Fn(&TicketId) -> bool,
    ) -> Vec<Promotion> {
        let mine: Vec<TicketId> = snapshot
            .waiting_queue()
            .iter()
            .filter(|entry| &entry.holder_id == holder_id && include(&entry.ticket_id))
            .map(|entry| entry.ticket_id)
            .collect();

        self.last_eligible.retain(|ticket_id, _| mine.contains(ticket_id));

        let mut promotions = Vec::new();
        for ticket_id in mine {
            let result = evaluate_ticket(snapshot, event, ticket_id);
            let was_eligible = self.last_eligible.insert(ticket_id, result.eligible).unwrap_or(false);

            if result.eligible && !was_eligible {
                let rank = result.rank.unwrap_or_default();
                tracing::info!(
                    event_id = %event.id,
                    holder_id = %holder_id,
                    ticket_id = %ticket_id,
                    rank,
                    "Waiting ticket became eligible"
                );
                promotions.push(Promotion {
                    event_id: event.id.clone(),
                    holder_id: holder_id.clone(),
                    ticket_id,
                    rank,
                    generation: snapshot.generation(),
                    observed_at,
                });
            }
        }
        promotions
    }

    /// Number of waiting tickets currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.last_eligible.len()
    }
}

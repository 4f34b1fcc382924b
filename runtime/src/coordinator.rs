//! Seat reservation coordinator: the only writer of seat-affecting state.
//!
//! Every reservation and cancellation runs the same commit loop:
//!
//! ```text
//! load_event ──► plan against the tickets read ──► commit(expected revision)
//!     ▲                                                  │
//!     └────────────── revision conflict ◄────────────────┘
//! ```
//!
//! The store applies a batch only if the event is still at the revision the
//! plan was made against, so the checks in [`plan_reservation`] hold for the
//! exact state the writes land on. Two holders racing for one seat both
//! plan a booking; one commit wins and the other re-reads, re-plans and gets
//! `SeatTaken`.

use crate::config::EngineConfig;
use crate::metrics::ReservationMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use seatflow_core::catalog::EventCatalog;
use seatflow_core::environment::Clock;
use seatflow_core::reservation::{
    CommitStamp, PlanOutcome, ReservationError, ReservationIntent, ReservationPlan, plan_cancellation,
    plan_reservation,
};
use seatflow_core::snapshot::CapacitySnapshot;
use seatflow_core::store::{EventTickets, Revision, TicketStore, TicketWrite};
use seatflow_core::ticket::Ticket;
use seatflow_core::types::{Event, EventId, HolderId, SeatId, TicketId};
use std::sync::Arc;
use std::time::Instant;

/// Picks a seat from the current snapshot after a lost race.
///
/// Returning `None` gives up: the lost race is reported as `SeatTaken`.
pub trait SeatPicker: Send + Sync {
    /// Choose a seat at `event` given `snapshot`.
    fn pick(&self, event: &Event, snapshot: &CapacitySnapshot) -> Option<SeatId>;
}

impl<F> SeatPicker for F
where
    F: Fn(&Event, &CapacitySnapshot) -> Option<SeatId> + Send + Sync,
{
    fn pick(&self, event: &Event, snapshot: &CapacitySnapshot) -> Option<SeatId> {
        self(event, snapshot)
    }
}

/// Picks the first free seat of the event's seat map, row by row.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstFreeSeat;

impl SeatPicker for FirstFreeSeat {
    fn pick(&self, event: &Event, snapshot: &CapacitySnapshot) -> Option<SeatId> {
        let layout = event.layout?;
        snapshot.free_seats(layout.seats()).next()
    }
}

/// Result of a committed (or no-op) reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// The ticket handed back to the holder
    pub ticket: Ticket,
    /// How the intent was resolved
    pub outcome: PlanOutcome,
}

impl Reservation {
    fn outcome_label(&self) -> &'static str {
        match self.outcome {
            PlanOutcome::Booked { promoted_from: None } => "booked",
            PlanOutcome::Booked { promoted_from: Some(_) } => "promoted",
            PlanOutcome::Queued => "queued",
            PlanOutcome::AlreadyQueued => "already_queued",
        }
    }
}

/// Coordinates reservations and cancellations against a [`TicketStore`].
#[derive(Clone)]
pub struct SeatReservationCoordinator {
    store: Arc<dyn TicketStore>,
    catalog: Arc<dyn EventCatalog>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl SeatReservationCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        catalog: Arc<dyn EventCatalog>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            config,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn event(&self, event_id: &EventId) -> Result<Event, ReservationError> {
        self.catalog
            .find(event_id)
            .ok_or_else(|| ReservationError::EventNotFound(event_id.clone()))
    }

    /// Reserve for `holder_id` at `event_id`.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: the catalog does not know the event
    /// - `UnknownSeat`, `SeatTaken`, `NotEligible`: the claim was rejected
    ///   against the state at commit time
    /// - `StoreUnavailable`: the store failed, or kept conflicting for
    ///   `max_commit_attempts` attempts
    pub async fn reserve(
        &self,
        event_id: &EventId,
        holder_id: &HolderId,
        intent: ReservationIntent,
    ) -> Result<Ticket, ReservationError> {
        self.reserve_detailed(event_id, holder_id, intent)
            .await
            .map(|reservation| reservation.ticket)
    }

    /// Like [`reserve`](Self::reserve), also reporting how the intent was
    /// resolved.
    ///
    /// # Errors
    ///
    /// See [`reserve`](Self::reserve).
    #[tracing::instrument(
        skip_all,
        fields(event_id = %event_id, holder_id = %holder_id, intent = intent.label())
    )]
    pub async fn reserve_detailed(
        &self,
        event_id: &EventId,
        holder_id: &HolderId,
        intent: ReservationIntent,
    ) -> Result<Reservation, ReservationError> {
        let label = intent.label();
        let result = self.run_reservation(event_id, holder_id, &intent).await;

        match &result {
            Ok(reservation) => {
                ReservationMetrics::record_outcome(label, reservation.outcome_label());
                tracing::info!(
                    ticket_id = %reservation.ticket.id,
                    seat_id = ?reservation.ticket.seat_id().map(SeatId::as_str),
                    outcome = reservation.outcome_label(),
                    "Reservation resolved"
                );
            }
            Err(err) => {
                ReservationMetrics::record_outcome(label, err.label());
                tracing::info!(error = %err, "Reservation rejected");
            }
        }
        result
    }

    async fn run_reservation(
        &self,
        event_id: &EventId,
        holder_id: &HolderId,
        intent: &ReservationIntent,
    ) -> Result<Reservation, ReservationError> {
        let event = self.event(event_id)?;

        // Simulated transaction time. Elapses before the commit-time read so
        // it never separates the read from the write.
        if !self.config.submission_delay.is_zero() {
            tokio::time::sleep(self.config.submission_delay).await;
        }

        let started = Instant::now();
        let reservation = self
            .commit_loop(&event.id, |current| {
                let stamp = CommitStamp::fresh(self.clock.now());
                let ReservationPlan { ticket, writes, outcome } =
                    plan_reservation(&event, &current.tickets, holder_id, intent, stamp)?;
                Ok((Reservation { ticket, outcome }, writes))
            })
            .await?;
        ReservationMetrics::record_commit(started.elapsed());
        Ok(reservation)
    }

    /// Claim `seat_id`, re-picking with `picker` after a lost race.
    ///
    /// On `SeatTaken` the event is re-read, `picker` chooses again from the
    /// fresh snapshot, and the claim is retried, at most
    /// `seat_taken_retries` times. Every other error ends the attempt.
    ///
    /// # Errors
    ///
    /// See [`reserve`](Self::reserve). `SeatTaken` is returned once the
    /// retries are spent or the picker finds no seat.
    pub async fn reserve_with_repick(
        &self,
        event_id: &EventId,
        holder_id: &HolderId,
        seat_id: SeatId,
        picker: &dyn SeatPicker,
    ) -> Result<Ticket, ReservationError> {
        let policy = RetryPolicy::builder()
            .max_retries(self.config.seat_taken_retries)
            .build();

        retry_with_predicate(
            policy,
            |attempt| {
                let first_choice = seat_id.clone();
                async move {
                    let seat_id = if attempt == 0 {
                        first_choice
                    } else {
                        self.repick(event_id, &first_choice, picker).await?
                    };
                    self.reserve(event_id, holder_id, ReservationIntent::ClaimSeat { seat_id })
                        .await
                }
            },
            ReservationError::is_seat_taken,
        )
        .await
    }

    async fn repick(
        &self,
        event_id: &EventId,
        lost: &SeatId,
        picker: &dyn SeatPicker,
    ) -> Result<SeatId, ReservationError> {
        let event = self.event(event_id)?;
        let current = self.store.load_event(event.id.clone()).await?;
        let snapshot = CapacitySnapshot::build(&event.id, &current.tickets);

        let choice = picker.pick(&event, &snapshot);
        tracing::debug!(lost = %lost, choice = ?choice.as_ref().map(SeatId::as_str), "Re-picking seat");
        choice.ok_or_else(|| ReservationError::SeatTaken {
            event_id: event.id.clone(),
            seat_id: lost.clone(),
        })
    }

    /// Cancel one of the holder's tickets.
    ///
    /// The ticket is deleted, or rewritten as `cancelled` when
    /// `retain_cancelled` is configured. Either way its seat or queue slot is
    /// released in the same commit.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: the catalog does not know the event
    /// - `TicketNotFound`, `NotOwner`, `AlreadyTerminal`: the cancellation
    ///   was rejected
    /// - `StoreUnavailable`: the store failed or kept conflicting
    #[tracing::instrument(skip_all, fields(event_id = %event_id, ticket_id = %ticket_id, holder_id = %holder_id))]
    pub async fn cancel(
        &self,
        event_id: &EventId,
        ticket_id: TicketId,
        holder_id: &HolderId,
    ) -> Result<Ticket, ReservationError> {
        let result = async {
            let event = self.event(event_id)?;
            self.commit_loop(&event.id, |current| {
                let (cancelled, write) =
                    plan_cancellation(&current.tickets, ticket_id, holder_id, self.config.retain_cancelled)?;
                Ok((cancelled, vec![write]))
            })
            .await
        }
        .await;

        match &result {
            Ok(_) => {
                ReservationMetrics::record_cancellation("cancelled");
                tracing::info!("Ticket cancelled");
            }
            Err(err) => {
                ReservationMetrics::record_cancellation(err.label());
                tracing::info!(error = %err, "Cancellation rejected");
            }
        }
        result
    }

    /// Read, plan, conditionally commit; repeat on revision conflicts.
    ///
    /// An empty batch is returned without touching the store.
    async fn commit_loop<T>(
        &self,
        event_id: &EventId,
        mut plan: impl FnMut(&EventTickets) -> Result<(T, Vec<TicketWrite>), ReservationError>,
    ) -> Result<T, ReservationError> {
        let attempts = self.config.max_commit_attempts.max(1);
        let mut last_seen = Revision::default();

        for attempt in 1..=attempts {
            let current = self.store.load_event(event_id.clone()).await?;
            let (value, writes) = plan(&current)?;
            if writes.is_empty() {
                return Ok(value);
            }

            match self.store.commit(event_id.clone(), current.revision, writes).await {
                Ok(revision) => {
                    tracing::debug!(attempt, revision = %revision, "Commit applied");
                    return Ok(value);
                }
                Err(err) if err.is_conflict() => {
                    ReservationMetrics::record_conflict();
                    tracing::warn!(attempt, read = %current.revision, error = %err, "Commit conflicted, re-planning");
                    last_seen = current.revision;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ReservationError::StoreUnavailable(format!(
            "event {event_id} still changing after {attempts} commit attempts (last read revision {last_seen})"
        )))
    }
}

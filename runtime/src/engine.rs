//! `SeatEngine`: the surface the storefront UI talks to.
//!
//! Bundles the coordinator, one-shot reads and viewer sessions over a
//! shared store, catalog and clock.

use crate::config::EngineConfig;
use crate::coordinator::{Reservation, SeatPicker, SeatReservationCoordinator};
use crate::holder_watch::{HolderWatch, HolderWatchSession};
use crate::viewer::{ViewerError, ViewerHandle, ViewerSession};
use seatflow_core::catalog::EventCatalog;
use seatflow_core::eligibility::{EligibilityResult, evaluate};
use seatflow_core::environment::Clock;
use seatflow_core::reservation::{ReservationError, ReservationIntent};
use seatflow_core::snapshot::CapacitySnapshot;
use seatflow_core::store::{TicketFilter, TicketStore};
use seatflow_core::summary::{SalesSummary, sales_summary};
use seatflow_core::ticket::Ticket;
use seatflow_core::types::{Event, EventId, HolderId, SeatId, TicketId};
use std::sync::Arc;

/// Capacity and waitlist engine over one ticket store.
#[derive(Clone)]
pub struct SeatEngine {
    store: Arc<dyn TicketStore>,
    catalog: Arc<dyn EventCatalog>,
    clock: Arc<dyn Clock>,
    coordinator: SeatReservationCoordinator,
}

impl SeatEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        catalog: Arc<dyn EventCatalog>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let coordinator =
            SeatReservationCoordinator::new(Arc::clone(&store), Arc::clone(&catalog), Arc::clone(&clock), config);
        Self {
            store,
            catalog,
            clock,
            coordinator,
        }
    }

    /// The coordinator backing `reserve` and `cancel`.
    #[must_use]
    pub const fn coordinator(&self) -> &SeatReservationCoordinator {
        &self.coordinator
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        self.coordinator.config()
    }

    /// Every event in the catalog.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.catalog.events()
    }

    fn event(&self, event_id: &EventId) -> Result<Event, ReservationError> {
        self.catalog
            .find(event_id)
            .ok_or_else(|| ReservationError::EventNotFound(event_id.clone()))
    }

    /// Start a live viewer session for `event_id`.
    ///
    /// Pass `holder_id` for an authenticated visitor to also track their
    /// eligibility, own tickets and promotions.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: the catalog does not know the event
    /// - `Subscription`: the store refused the subscriptions
    pub async fn watch(&self, event_id: &EventId, holder_id: Option<HolderId>) -> Result<ViewerHandle, ViewerError> {
        let event = self
            .catalog
            .find(event_id)
            .ok_or_else(|| ViewerError::EventNotFound(event_id.clone()))?;

        ViewerSession::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            event,
            holder_id,
            self.config().subscription_buffer,
        )
        .await
    }

    /// Follow `holder_id` across every event they are queued in.
    ///
    /// Promotions arrive on the returned watch whether or not a viewer
    /// session is open for the event.
    ///
    /// # Errors
    ///
    /// `Subscription`: the store refused the holder feed.
    pub async fn watch_holder(&self, holder_id: HolderId) -> Result<HolderWatch, ViewerError> {
        HolderWatchSession::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            Arc::clone(&self.clock),
            holder_id,
            self.config().subscription_buffer,
        )
        .await
    }

    /// Build a snapshot of `event_id` from a single read.
    ///
    /// # Errors
    ///
    /// `EventNotFound` or `StoreUnavailable`.
    pub async fn snapshot(&self, event_id: &EventId) -> Result<CapacitySnapshot, ReservationError> {
        let event = self.event(event_id)?;
        let current = self.store.load_event(event.id.clone()).await?;
        Ok(CapacitySnapshot::build(&event.id, &current.tickets).with_generation(current.revision.value()))
    }

    /// Evaluate `holder_id` at `event_id` from a single read.
    ///
    /// # Errors
    ///
    /// `EventNotFound` or `StoreUnavailable`.
    pub async fn eligibility(&self, event_id: &EventId, holder_id: &HolderId) -> Result<EligibilityResult, ReservationError> {
        let event = self.event(event_id)?;
        let snapshot = self.snapshot(event_id).await?;
        Ok(evaluate(&snapshot, &event, holder_id))
    }

    /// See [`SeatReservationCoordinator::reserve`].
    ///
    /// # Errors
    ///
    /// See [`SeatReservationCoordinator::reserve`].
    pub async fn reserve(
        &self,
        event_id: &EventId,
        holder_id: &HolderId,
        intent: ReservationIntent,
    ) -> Result<Ticket, ReservationError> {
        self.coordinator.reserve(event_id, holder_id, intent).await
    }

    /// See [`SeatReservationCoordinator::reserve_detailed`].
    ///
    /// # Errors
    ///
    /// See [`SeatReservationCoordinator::reserve`].
    pub async fn reserve_detailed(
        &self,
        event_id: &EventId,
        holder_id: &HolderId,
        intent: ReservationIntent,
    ) -> Result<Reservation, ReservationError> {
        self.coordinator.reserve_detailed(event_id, holder_id, intent).await
    }

    /// See [`SeatReservationCoordinator::reserve_with_repick`].
    ///
    /// # Errors
    ///
    /// See [`SeatReservationCoordinator::reserve_with_repick`].
    pub async fn reserve_with_repick(
        &self,
        event_id: &EventId,
        holder_id: &HolderId,
        seat_id: SeatId,
        picker: &dyn SeatPicker,
    ) -> Result<Ticket, ReservationError> {
        self.coordinator
            .reserve_with_repick(event_id, holder_id, seat_id, picker)
            .await
    }

    /// See [`SeatReservationCoordinator::cancel`].
    ///
    /// # Errors
    ///
    /// See [`SeatReservationCoordinator::cancel`].
    pub async fn cancel(
        &self,
        event_id: &EventId,
        ticket_id: TicketId,
        holder_id: &HolderId,
    ) -> Result<Ticket, ReservationError> {
        self.coordinator.cancel(event_id, ticket_id, holder_id).await
    }

    /// A holder's tickets for one event, newest first.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn tickets_of(&self, event_id: &EventId, holder_id: &HolderId) -> Result<Vec<Ticket>, ReservationError> {
        let mut tickets = self
            .store
            .query(TicketFilter::holder(event_id.clone(), holder_id.clone()))
            .await?;
        tickets.sort_by(|a, b| b.queue_key().cmp(&a.queue_key()));
        Ok(tickets)
    }

    /// A holder's tickets across all events, newest first.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn tickets_of_holder(&self, holder_id: &HolderId) -> Result<Vec<Ticket>, ReservationError> {
        let mut tickets = self.store.query(TicketFilter::owned_by(holder_id.clone())).await?;
        tickets.sort_by(|a, b| b.queue_key().cmp(&a.queue_key()));
        Ok(tickets)
    }

    /// Sold seats and revenue per catalog event.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn sales_summary(&self) -> Result<SalesSummary, ReservationError> {
        let tickets = self.store.query(TicketFilter::all()).await?;
        let summary = sales_summary(self.catalog.as_ref(), &tickets);
        tracing::debug!(
            events = summary.events.len(),
            total_sold = summary.total_sold,
            total_revenue = summary.total_revenue,
            "Sales summary computed"
        );
        Ok(summary)
    }
}

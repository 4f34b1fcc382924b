//! Viewer sessions: one reactive loop per connected client.
//!
//! A session owns two live subscriptions on the ticket store, the capacity
//! feed of the event and (for an authenticated holder) the holder's own
//! tickets, and feeds every push through [`ViewerReducer`] one at a time.
//! Effects are published to the [`ViewerHandle`]:
//!
//! - snapshot, eligibility and own tickets through `watch` channels
//!   (latest value wins, readers never block the loop)
//! - promotions through a bounded `mpsc` channel
//!
//! Dropping the handle stops the session at its next suspension point.

use crate::metrics::ViewerMetrics;
use futures::StreamExt;
use seatflow_core::eligibility::EligibilityResult;
use seatflow_core::environment::Clock;
use seatflow_core::promotion::Promotion;
use seatflow_core::reducer::Reducer;
use seatflow_core::snapshot::CapacitySnapshot;
use seatflow_core::store::{StoreError, TicketFilter, TicketSet, TicketStore, TicketStream};
use seatflow_core::ticket::Ticket;
use seatflow_core::types::{Event, EventId, HolderId};
use seatflow_core::viewer::{ViewerAction, ViewerEffect, ViewerEnvironment, ViewerReducer, ViewerState};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Errors surfaced by viewer sessions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewerError {
    /// The event does not exist.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// A subscription could not be opened or failed while running.
    #[error("Subscription failed: {0}")]
    Subscription(#[from] StoreError),

    /// The session ended before the awaited condition held.
    #[error("Viewer session closed")]
    Closed,

    /// The session task panicked or was cancelled.
    #[error("Viewer task failed: {0}")]
    TaskFailed(String),
}

/// Client side of a running viewer session.
#[derive(Debug)]
pub struct ViewerHandle {
    event_id: EventId,
    holder_id: Option<HolderId>,
    snapshot: watch::Receiver<Option<Arc<CapacitySnapshot>>>,
    eligibility: watch::Receiver<Option<EligibilityResult>>,
    own_tickets: watch::Receiver<Vec<Ticket>>,
    promotions: mpsc::Receiver<Promotion>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), ViewerError>>,
}

impl ViewerHandle {
    /// Event being viewed.
    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Holder the session evaluates, if any.
    #[must_use]
    pub const fn holder_id(&self) -> Option<&HolderId> {
        self.holder_id.as_ref()
    }

    /// Latest capacity snapshot, once the first push has been processed.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<CapacitySnapshot>> {
        self.snapshot.borrow().clone()
    }

    /// Latest eligibility of the holder. Always `None` for anonymous viewers.
    #[must_use]
    pub fn eligibility(&self) -> Option<EligibilityResult> {
        *self.eligibility.borrow()
    }

    /// The holder's tickets for the event, newest first.
    #[must_use]
    pub fn own_tickets(&self) -> Vec<Ticket> {
        self.own_tickets.borrow().clone()
    }

    /// Receiver for snapshot changes, for callers that drive their own loop.
    #[must_use]
    pub fn snapshot_updates(&self) -> watch::Receiver<Option<Arc<CapacitySnapshot>>> {
        self.snapshot.clone()
    }

    /// Receiver for eligibility changes.
    #[must_use]
    pub fn eligibility_updates(&self) -> watch::Receiver<Option<EligibilityResult>> {
        self.eligibility.clone()
    }

    /// Wait for the next promotion. `None` once the session has ended.
    pub async fn next_promotion(&mut self) -> Option<Promotion> {
        self.promotions.recv().await
    }

    /// A promotion that has already arrived, if any.
    pub fn try_next_promotion(&mut self) -> Option<Promotion> {
        self.promotions.try_recv().ok()
    }

    /// Wait until a snapshot satisfying `predicate` has been published.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the session ends first.
    pub async fn wait_for_snapshot(
        &mut self,
        mut predicate: impl FnMut(&CapacitySnapshot) -> bool,
    ) -> Result<Arc<CapacitySnapshot>, ViewerError> {
        let current = self
            .snapshot
            .wait_for(|snapshot| snapshot.as_deref().is_some_and(|s| predicate(s)))
            .await
            .map_err(|_| ViewerError::Closed)?;
        current.clone().ok_or(ViewerError::Closed)
    }

    /// Wait until the holder's eligibility satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the session ends first.
    pub async fn wait_for_eligibility(
        &mut self,
        mut predicate: impl FnMut(&EligibilityResult) -> bool,
    ) -> Result<EligibilityResult, ViewerError> {
        let current = self
            .eligibility
            .wait_for(|result| result.as_ref().is_some_and(|r| predicate(r)))
            .await
            .map_err(|_| ViewerError::Closed)?;
        (*current).ok_or(ViewerError::Closed)
    }

    /// Stop the session and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session early, if any.
    pub async fn close(self) -> Result<(), ViewerError> {
        let Self { shutdown, task, .. } = self;
        let _ = shutdown.send(true);
        task.await.map_err(|e| ViewerError::TaskFailed(e.to_string()))?
    }
}

/// Spawns viewer sessions.
pub struct ViewerSession;

impl ViewerSession {
    /// Open the subscriptions for `event` (and `holder_id`'s own tickets)
    /// and start the session loop.
    ///
    /// # Errors
    ///
    /// Returns `Subscription` if either subscription cannot be opened.
    pub async fn spawn(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        event: Event,
        holder_id: Option<HolderId>,
        promotion_buffer: usize,
    ) -> Result<ViewerHandle, ViewerError> {
        let capacity = store.subscribe(TicketFilter::capacity(event.id.clone())).await?;
        let own: TicketStream = match &holder_id {
            Some(holder) => {
                store
                    .subscribe(TicketFilter::holder(event.id.clone(), holder.clone()))
                    .await?
            }
            None => Box::pin(futures::stream::pending::<Result<TicketSet, StoreError>>()),
        };

        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (eligibility_tx, eligibility_rx) = watch::channel(None);
        let (own_tx, own_rx) = watch::channel(Vec::new());
        let (promotion_tx, promotion_rx) = mpsc::channel(promotion_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let span = tracing::info_span!(
            "viewer_session",
            event_id = %event.id,
            holder_id = holder_id.as_ref().map_or("-", HolderId::as_str)
        );
        let event_id = event.id.clone();
        let session = SessionLoop {
            state: ViewerState::new(event, holder_id.clone()),
            env: ViewerEnvironment::new(clock),
            outputs: Outputs {
                snapshot: snapshot_tx,
                eligibility: eligibility_tx,
                own_tickets: own_tx,
                promotions: promotion_tx,
            },
        };

        ViewerMetrics::record_session_started();
        let task = tokio::spawn(session.run(capacity, own, shutdown_rx).instrument(span));

        Ok(ViewerHandle {
            event_id,
            holder_id,
            snapshot: snapshot_rx,
            eligibility: eligibility_rx,
            own_tickets: own_rx,
            promotions: promotion_rx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

struct Outputs {
    snapshot: watch::Sender<Option<Arc<CapacitySnapshot>>>,
    eligibility: watch::Sender<Option<EligibilityResult>>,
    own_tickets: watch::Sender<Vec<Ticket>>,
    promotions: mpsc::Sender<Promotion>,
}

struct SessionLoop {
    state: ViewerState,
    env: ViewerEnvironment,
    outputs: Outputs,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut capacity: TicketStream,
        mut own: TicketStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ViewerError> {
        tracing::debug!("Viewer session started");

        let result = loop {
            tokio::select! {
                // Shutdown requested, or the handle was dropped
                _ = shutdown.changed() => break Ok(()),

                next = capacity.next() => match next {
                    Some(Ok(set)) => {
                        ViewerMetrics::record_notification("capacity");
                        let started = Instant::now();
                        self.dispatch(ViewerAction::CapacityChanged(set));
                        ViewerMetrics::record_rebuild(started.elapsed());
                    }
                    Some(Err(err)) => break Err(ViewerError::Subscription(err)),
                    None => break Err(ViewerError::Subscription(StoreError::SubscriptionClosed)),
                },

                next = own.next() => match next {
                    Some(Ok(set)) => {
                        ViewerMetrics::record_notification("holder");
                        self.dispatch(ViewerAction::OwnTicketsChanged(set));
                    }
                    Some(Err(err)) => break Err(ViewerError::Subscription(err)),
                    None => break Err(ViewerError::Subscription(StoreError::SubscriptionClosed)),
                },
            }
        };

        ViewerMetrics::record_session_ended();
        match &result {
            Ok(()) => tracing::debug!("Viewer session stopped"),
            Err(err) => tracing::warn!(error = %err, "Viewer session ended"),
        }
        result
    }

    fn dispatch(&mut self, action: ViewerAction) {
        let effects = ViewerReducer::new().reduce(&mut self.state, action, &self.env);
        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&self, effect: ViewerEffect) {
        match effect {
            ViewerEffect::SnapshotUpdated(snapshot) => {
                self.outputs.snapshot.send_replace(Some(snapshot));
            }
            ViewerEffect::EligibilityChanged(result) => {
                self.outputs.eligibility.send_replace(Some(result));
            }
            ViewerEffect::OwnTicketsUpdated(tickets) => {
                self.outputs.own_tickets.send_replace(tickets);
            }
            ViewerEffect::Promoted(promotion) => {
                ViewerMetrics::record_promotion();
                tracing::info!(
                    ticket_id = %promotion.ticket_id,
                    rank = promotion.rank,
                    generation = promotion.generation,
                    "Holder may now claim a seat"
                );
                match self.outputs.promotions.try_send(promotion) {
                    Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        tracing::warn!(ticket_id = %dropped.ticket_id, "Promotion channel full, signal dropped");
                    }
                }
            }
            ViewerEffect::IntegrityFault(fault) => {
                ViewerMetrics::record_integrity_fault();
                tracing::warn!(fault = ?fault, "Integrity fault in capacity feed");
            }
        }
    }
}

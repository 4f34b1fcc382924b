//! Viewer reducer: everything one connected client derives from the store.
//!
//! A viewer watches one event, optionally as an authenticated holder. It is
//! fed two kinds of notifications, the capacity feed (booked and waiting
//! tickets of the event) and the holder's own ticket feed, and folds each
//! one into its state strictly one at a time. The reducer is pure; the
//! runtime session owns the subscriptions and executes the effects.
//!
//! ```text
//! CapacityChanged ──► rebuild snapshot ──► SnapshotUpdated
//!                                      ├─► IntegrityFault (new faults only)
//!                                      ├─► EligibilityChanged (on change)
//!                                      └─► Promoted (rising edge)
//! OwnTicketsChanged ─► OwnTicketsUpdated ─► EligibilityChanged / Promoted
//! ```

use crate::eligibility::{EligibilityResult, evaluate};
use crate::environment::Clock;
use crate::promotion::{Promotion, PromotionTracker};
use crate::reducer::Reducer;
use crate::snapshot::{CapacitySnapshot, IntegrityFault};
use crate::store::TicketSet;
use crate::ticket::Ticket;
use crate::types::{Event, HolderId, TicketId};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;

/// State of one viewer.
#[derive(Clone, Debug)]
pub struct ViewerState {
    /// The event being viewed
    pub event: Event,
    /// The authenticated holder, if any
    pub holder_id: Option<HolderId>,
    /// Latest capacity snapshot
    pub snapshot: Option<Arc<CapacitySnapshot>>,
    /// The holder's own tickets for the event, from the holder feed
    pub own_tickets: Vec<Ticket>,
    /// Latest eligibility of the holder
    pub eligibility: Option<EligibilityResult>,
    tracker: PromotionTracker,
}

impl ViewerState {
    /// Creates the initial state of a viewer.
    #[must_use]
    pub fn new(event: Event, holder_id: Option<HolderId>) -> Self {
        Self {
            event,
            holder_id,
            snapshot: None,
            own_tickets: Vec::new(),
            eligibility: None,
            tracker: PromotionTracker::new(),
        }
    }

    fn held_waiting(&self) -> HashSet<TicketId> {
        self.own_tickets
            .iter()
            .filter(|t| t.is_waiting())
            .map(|t| t.id)
            .collect()
    }
}

/// Notifications a viewer reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewerAction {
    /// The capacity feed pushed a new result set
    CapacityChanged(TicketSet),
    /// The holder feed pushed a new result set
    OwnTicketsChanged(TicketSet),
}

/// Work for the session to carry out after a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewerEffect {
    /// Publish a new snapshot
    SnapshotUpdated(Arc<CapacitySnapshot>),
    /// Publish the holder's new eligibility
    EligibilityChanged(EligibilityResult),
    /// Publish the holder's ticket list
    OwnTicketsUpdated(Vec<Ticket>),
    /// Invite the holder to claim a seat
    Promoted(Promotion),
    /// Report a data-integrity fault seen for the first time
    IntegrityFault(IntegrityFault),
}

/// Dependencies of the viewer reducer.
#[derive(Clone)]
pub struct ViewerEnvironment {
    /// Clock stamping promotions
    pub clock: Arc<dyn Clock>,
}

impl ViewerEnvironment {
    /// Creates a new `ViewerEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reducer for a viewer session.
#[derive(Clone, Copy, Debug, Default)]
pub struct ViewerReducer;

impl ViewerReducer {
    /// Creates a new `ViewerReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn reevaluate(
        state: &mut ViewerState,
        env: &ViewerEnvironment,
        effects: &mut SmallVec<[ViewerEffect; 4]>,
    ) {
        let (Some(holder_id), Some(snapshot)) = (state.holder_id.clone(), state.snapshot.clone()) else {
            return;
        };

        let result = evaluate(&snapshot, &state.event, &holder_id);
        if state.eligibility != Some(result) {
            tracing::debug!(
                event_id = %state.event.id,
                holder_id = %holder_id,
                eligible = result.eligible,
                rank = ?result.rank,
                "Eligibility changed"
            );
            state.eligibility = Some(result);
            effects.push(ViewerEffect::EligibilityChanged(result));
        }

        let held = state.held_waiting();
        for promotion in state
            .tracker
            .observe_held(&snapshot, &state.event, &holder_id, &held, env.clock.now())
        {
            effects.push(ViewerEffect::Promoted(promotion));
        }
    }
}

impl Reducer for ViewerReducer {
    type State = ViewerState;
    type Action = ViewerAction;
    type Environment = ViewerEnvironment;
    type Effect = ViewerEffect;

    fn reduce(
        &self,
        state: &mut ViewerState,
        action: ViewerAction,
        env: &ViewerEnvironment,
    ) -> SmallVec<[ViewerEffect; 4]> {
        let mut effects = SmallVec::new();

        match action {
            ViewerAction::CapacityChanged(set) => {
                let snapshot = Arc::new(
                    CapacitySnapshot::build(&state.event.id, &set.tickets).with_generation(set.sequence),
                );
                tracing::debug!(
                    event_id = %state.event.id,
                    generation = set.sequence,
                    booked = snapshot.booked_count(),
                    waiting = snapshot.waiting_queue().len(),
                    "Capacity snapshot rebuilt"
                );

                let known = state
                    .snapshot
                    .as_ref()
                    .map(|previous| previous.faults().to_vec())
                    .unwrap_or_default();
                for fault in snapshot.faults() {
                    if !known.contains(fault) {
                        effects.push(ViewerEffect::IntegrityFault(fault.clone()));
                    }
                }

                state.snapshot = Some(Arc::clone(&snapshot));
                effects.push(ViewerEffect::SnapshotUpdated(snapshot));
                Self::reevaluate(state, env, &mut effects);
            }
            ViewerAction::OwnTicketsChanged(set) => {
                let mut tickets = set.tickets;
                // Newest first, as the holder's ticket page lists them.
                tickets.sort_by(|a, b| b.queue_key().cmp(&a.queue_key()));
                state.own_tickets.clone_from(&tickets);
                effects.push(ViewerEffect::OwnTicketsUpdated(tickets));
                Self::reevaluate(state, env, &mut effects);
            }
        }

        effects
    }
}

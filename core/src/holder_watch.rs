//! Holder watch reducer: one holder's waitlist across every event.
//!
//! A viewer session only sees the event on screen. A holder queued for
//! several events still has to hear about a promotion on any of them, and
//! their ticket page lists tickets of every event. This reducer follows the
//! holder-wide ticket feed and keeps one capacity watch per event in which
//! the holder has a waiting ticket:
//!
//! ```text
//! TicketsChanged ──► TicketsUpdated
//!                ├─► Watch(event)   (first waiting ticket at an event)
//!                ├─► Unwatch(event) (last waiting ticket left the queue)
//!                └─► Promoted       (re-evaluated against known snapshots)
//! CapacityChanged(event) ──► rebuild snapshot ──► Promoted (rising edge)
//! ```

use crate::catalog::EventCatalog;
use crate::environment::Clock;
use crate::promotion::{Promotion, PromotionTracker};
use crate::reducer::Reducer;
use crate::snapshot::CapacitySnapshot;
use crate::store::TicketSet;
use crate::ticket::Ticket;
use crate::types::{Event, EventId, HolderId, TicketId};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
struct EventWatch {
    event: Event,
    held: HashSet<TicketId>,
    snapshot: Option<Arc<CapacitySnapshot>>,
    tracker: PromotionTracker,
}

impl EventWatch {
    fn observe(&mut self, holder_id: &HolderId, env: &HolderWatchEnvironment) -> Vec<Promotion> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        self.tracker
            .observe_held(snapshot, &self.event, holder_id, &self.held, env.clock.now())
    }
}

/// State of one holder watch.
#[derive(Clone, Debug)]
pub struct HolderWatchState {
    /// The holder being followed
    pub holder_id: HolderId,
    /// Every ticket the holder owns, across events, newest first
    pub tickets: Vec<Ticket>,
    watches: BTreeMap<EventId, EventWatch>,
}

impl HolderWatchState {
    /// Creates the initial state for `holder_id`.
    #[must_use]
    pub fn new(holder_id: HolderId) -> Self {
        Self {
            holder_id,
            tickets: Vec::new(),
            watches: BTreeMap::new(),
        }
    }

    /// Events currently watched, in id order.
    pub fn watched_events(&self) -> impl Iterator<Item = &EventId> {
        self.watches.keys()
    }

    /// Latest snapshot of a watched event.
    #[must_use]
    pub fn snapshot(&self, event_id: &EventId) -> Option<&Arc<CapacitySnapshot>> {
        self.watches.get(event_id).and_then(|w| w.snapshot.as_ref())
    }
}

/// Notifications a holder watch reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HolderWatchAction {
    /// The holder-wide feed pushed a new result set
    TicketsChanged(TicketSet),
    /// The capacity feed of a watched event pushed a new result set
    CapacityChanged {
        /// Event the set belongs to
        event_id: EventId,
        /// Booked and waiting tickets of that event
        set: TicketSet,
    },
}

/// Work for the session after a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HolderWatchEffect {
    /// Publish the holder's ticket list
    TicketsUpdated(Vec<Ticket>),
    /// Open the capacity feed of an event
    Watch(EventId),
    /// Close the capacity feed of an event
    Unwatch(EventId),
    /// Invite the holder to claim a seat at `promotion.event_id`
    Promoted(Promotion),
}

/// Dependencies of the holder watch reducer.
#[derive(Clone)]
pub struct HolderWatchEnvironment {
    /// Clock stamping promotions
    pub clock: Arc<dyn Clock>,
    /// Where watched events are looked up
    pub catalog: Arc<dyn EventCatalog>,
}

impl HolderWatchEnvironment {
    /// Creates a new `HolderWatchEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, catalog: Arc<dyn EventCatalog>) -> Self {
        Self { clock, catalog }
    }
}

/// Reducer for a holder watch.
#[derive(Clone, Copy, Debug, Default)]
pub struct HolderWatchReducer;

impl HolderWatchReducer {
    /// Creates a new `HolderWatchReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn tickets_changed(
        state: &mut HolderWatchState,
        set: TicketSet,
        env: &HolderWatchEnvironment,
        effects: &mut SmallVec<[HolderWatchEffect; 4]>,
    ) {
        let mut tickets = set.tickets;
        tickets.sort_by(|a, b| b.queue_key().cmp(&a.queue_key()));

        let mut waiting: BTreeMap<EventId, HashSet<TicketId>> = BTreeMap::new();
        for ticket in tickets.iter().filter(|t| t.is_waiting()) {
            waiting.entry(ticket.event_id.clone()).or_default().insert(ticket.id);
        }

        state.tickets.clone_from(&tickets);
        effects.push(HolderWatchEffect::TicketsUpdated(tickets));

        let gone: Vec<EventId> = state
            .watches
            .keys()
            .filter(|id| !waiting.contains_key(*id))
            .cloned()
            .collect();
        for event_id in gone {
            state.watches.remove(&event_id);
            tracing::debug!(holder_id = %state.holder_id, event_id = %event_id, "No longer queued, unwatching");
            effects.push(HolderWatchEffect::Unwatch(event_id));
        }

        for (event_id, held) in waiting {
            if let Some(watch) = state.watches.get_mut(&event_id) {
                watch.held = held;
                for promotion in watch.observe(&state.holder_id, env) {
                    effects.push(HolderWatchEffect::Promoted(promotion));
                }
                continue;
            }

            let Some(event) = env.catalog.find(&event_id) else {
                tracing::warn!(
                    holder_id = %state.holder_id,
                    event_id = %event_id,
                    "Waiting ticket for an event missing from the catalog"
                );
                continue;
            };
            tracing::debug!(holder_id = %state.holder_id, event_id = %event_id, "Queued, watching");
            state.watches.insert(
                event_id.clone(),
                EventWatch {
                    event,
                    held,
                    snapshot: None,
                    tracker: PromotionTracker::new(),
                },
            );
            effects.push(HolderWatchEffect::Watch(event_id));
        }
    }
}

impl Reducer for HolderWatchReducer {
    type State = HolderWatchState;
    type Action = HolderWatchAction;
    type Environment = HolderWatchEnvironment;
    type Effect = HolderWatchEffect;

    fn reduce(
        &self,
        state: &mut HolderWatchState,
        action: HolderWatchAction,
        env: &HolderWatchEnvironment,
    ) -> SmallVec<[HolderWatchEffect; 4]> {
        let mut effects = SmallVec::new();

        match action {
            HolderWatchAction::TicketsChanged(set) => {
                Self::tickets_changed(state, set, env, &mut effects);
            }
            HolderWatchAction::CapacityChanged { event_id, set } => {
                // Late pushes from a feed that was already closed.
                let Some(watch) = state.watches.get_mut(&event_id) else {
                    return effects;
                };
                watch.snapshot = Some(Arc::new(
                    CapacitySnapshot::build(&event_id, &set.tickets).with_generation(set.sequence),
                ));
                for promotion in watch.observe(&state.holder_id, env) {
                    effects.push(HolderWatchEffect::Promoted(promotion));
                }
            }
        }

        effects
    }
}

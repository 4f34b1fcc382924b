//! Ticket store abstraction.
//!
//! The ticket store is the document collection every client reads from and
//! the reservation coordinator writes to. The engine treats it as an opaque
//! collaborator with four capabilities:
//!
//! - Read the live ticket set of one event together with its revision
//! - Query tickets by filter (holder pages, admin summaries)
//! - Commit a batch of writes for one event **atomically**, conditioned on
//!   the revision the caller read (optimistic concurrency)
//! - Subscribe to a filter and receive the full matching set on every change
//!
//! # Implementations
//!
//! - `InMemoryTicketStore` (in `seatflow-testing`): fast, deterministic, with
//!   fault injection for race and outage tests
//!
//! # Example
//!
//! ```no_run
//! use seatflow_core::store::{StoreError, TicketStore, TicketWrite};
//! use seatflow_core::types::EventId;
//!
//! async fn example<S: TicketStore>(store: &S) -> Result<(), StoreError> {
//!     let event_id = EventId::new("1");
//!
//!     // Read state and the revision it corresponds to
//!     let current = store.load_event(event_id.clone()).await?;
//!
//!     // Writes only land if nobody committed in between
//!     let writes: Vec<TicketWrite> = vec![/* ... */];
//!     store.commit(event_id, current.revision, writes).await?;
//!     Ok(())
//! }
//! ```

use crate::ticket::{StatusKind, Ticket};
use crate::types::{EventId, HolderId, TicketId};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Per-event revision counter used for conditional commits.
///
/// Starts at 0 for an event nobody has written to and increments by one on
/// every successful commit that touches the event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// Create a revision from a raw counter.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw counter.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The revision after one more commit.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All tickets of one event at one revision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventTickets {
    /// Revision the tickets were read at
    pub revision: Revision,
    /// Every ticket stored for the event, in no particular order
    pub tickets: Vec<Ticket>,
}

/// One push from a subscription: the full matching result set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TicketSet {
    /// Position of this push within its subscription (the initial set is 0)
    pub sequence: u64,
    /// Every ticket currently matching the filter
    pub tickets: Vec<Ticket>,
}

/// A single write inside an atomic commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketWrite {
    /// Insert a ticket whose id is not yet stored
    Insert(Ticket),
    /// Overwrite an existing ticket with the same id
    Replace(Ticket),
    /// Remove a ticket
    Delete(TicketId),
}

impl TicketWrite {
    /// Id of the ticket this write touches.
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        match self {
            Self::Insert(ticket) | Self::Replace(ticket) => ticket.id,
            Self::Delete(id) => *id,
        }
    }
}

/// Predicate over tickets, used for queries and subscriptions.
///
/// Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TicketFilter {
    event_id: Option<EventId>,
    holder_id: Option<HolderId>,
    statuses: Option<BTreeSet<StatusKind>>,
}

impl TicketFilter {
    /// A filter matching every ticket.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Booked and waiting tickets of one event: the capacity/queue feed.
    #[must_use]
    pub fn capacity(event_id: EventId) -> Self {
        Self::all()
            .for_event(event_id)
            .with_statuses(StatusKind::LIVE)
    }

    /// Every ticket a holder owns for one event.
    #[must_use]
    pub fn holder(event_id: EventId, holder_id: HolderId) -> Self {
        Self::all().for_event(event_id).for_holder(holder_id)
    }

    /// Every ticket a holder owns, across all events.
    #[must_use]
    pub fn owned_by(holder_id: HolderId) -> Self {
        Self::all().for_holder(holder_id)
    }

    /// Restrict to one event.
    #[must_use]
    pub fn for_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Restrict to one holder.
    #[must_use]
    pub fn for_holder(mut self, holder_id: HolderId) -> Self {
        self.holder_id = Some(holder_id);
        self
    }

    /// Restrict to the given status kinds.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = StatusKind>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    /// The event this filter is scoped to, if any.
    #[must_use]
    pub const fn event_id(&self) -> Option<&EventId> {
        self.event_id.as_ref()
    }

    /// Whether `ticket` satisfies the filter.
    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        self.event_id.as_ref().is_none_or(|id| &ticket.event_id == id)
            && self.holder_id.as_ref().is_none_or(|id| &ticket.holder_id == id)
            && self
                .statuses
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&ticket.status.kind()))
    }
}

/// Errors that can occur during ticket store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The event changed since the caller read it; nothing was written.
    #[error("Revision conflict on event {event_id}: expected {expected}, found {actual}")]
    Conflict {
        /// Event whose revision moved
        event_id: EventId,
        /// Revision the caller read
        expected: Revision,
        /// Revision the store is at
        actual: Revision,
    },

    /// The store could not be reached.
    #[error("Ticket store unavailable: {0}")]
    Unavailable(String),

    /// A write in the batch was malformed (wrong event, duplicate insert,
    /// missing ticket). Nothing was written.
    #[error("Invalid write: {0}")]
    InvalidWrite(String),

    /// The subscription was closed by the store.
    #[error("Subscription closed")]
    SubscriptionClosed,
}

impl StoreError {
    /// Whether retrying with freshly read state can succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Boxed future returned by [`TicketStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Stream of result sets pushed by a subscription.
pub type TicketStream = Pin<Box<dyn Stream<Item = Result<TicketSet, StoreError>> + Send>>;

/// Ticket store abstraction.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a single store can be shared by
/// the coordinator and every viewer session.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the store can
/// be held as `Arc<dyn TicketStore>`.
pub trait TicketStore: Send + Sync {
    /// Load every ticket of `event_id` together with the event's revision.
    ///
    /// An event nobody has written to yields revision 0 and no tickets.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, EventTickets>;

    /// Return every ticket matching `filter`.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn query(&self, filter: TicketFilter) -> StoreFuture<'_, Vec<Ticket>>;

    /// Apply `writes` to `event_id` as one atomic unit.
    ///
    /// The batch is applied only if the event is still at `expected`;
    /// otherwise nothing is written. Every write must target `event_id`.
    ///
    /// # Returns
    ///
    /// The event's revision after the commit.
    ///
    /// # Errors
    ///
    /// - `Conflict`: the event's revision is no longer `expected`
    /// - `InvalidWrite`: a write targets another event, inserts an existing
    ///   id, or replaces/deletes a missing ticket
    /// - `Unavailable`: the store could not be reached
    fn commit(
        &self,
        event_id: EventId,
        expected: Revision,
        writes: Vec<TicketWrite>,
    ) -> StoreFuture<'_, Revision>;

    /// Subscribe to `filter`.
    ///
    /// The stream yields the current matching set immediately, then the full
    /// matching set again after every commit that changes it.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn subscribe(&self, filter: TicketFilter) -> StoreFuture<'_, TicketStream>;
}

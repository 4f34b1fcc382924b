//! In-memory ticket store for fast, deterministic testing.
//!
//! Implements the full [`TicketStore`] contract (revision-conditioned atomic
//! commits and live subscriptions) on top of a mutex-guarded map, plus a few
//! knobs tests need to provoke the situations production only sees under
//! load:
//!
//! - [`set_unavailable`](InMemoryTicketStore::set_unavailable): every call
//!   fails with `StoreError::Unavailable`
//! - [`gate_next_commits`](InMemoryTicketStore::gate_next_commits): the next
//!   `n` commits rendezvous on a barrier before applying, so concurrent
//!   reservations are guaranteed to have read the same revision
//! - [`insert_unchecked`](InMemoryTicketStore::insert_unchecked): write
//!   tickets without validation (seeding, corrupt data)

use futures::StreamExt;
use seatflow_core::store::{
    EventTickets, Revision, StoreError, StoreFuture, TicketFilter, TicketSet, TicketStore, TicketStream,
    TicketWrite,
};
use seatflow_core::ticket::Ticket;
use seatflow_core::types::{EventId, TicketId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Barrier, broadcast};
use tokio::sync::broadcast::error::RecvError;

/// Capacity of the change feed shared by all subscriptions.
const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct EventEntry {
    revision: Revision,
    tickets: BTreeMap<TicketId, Ticket>,
}

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<EventId, EventEntry>,
    gate: Option<(Arc<Barrier>, usize)>,
}

impl Inner {
    fn matching(&self, filter: &TicketFilter) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = match filter.event_id() {
            Some(event_id) => self
                .events
                .get(event_id)
                .map(|entry| entry.tickets.values().filter(|t| filter.matches(t)).cloned().collect())
                .unwrap_or_default(),
            None => self
                .events
                .values()
                .flat_map(|entry| entry.tickets.values())
                .filter(|t| filter.matches(t))
                .cloned()
                .collect(),
        };
        tickets.sort_by_key(Ticket::queue_key);
        tickets
    }
}

/// What one commit changed: the post-commit version of every touched
/// ticket (`None` when deleted).
#[derive(Debug)]
struct ChangeNotice {
    changes: Vec<(TicketId, Option<Ticket>)>,
}

/// In-memory [`TicketStore`].
///
/// Cloning is cheap and clones share the same data.
///
/// # Example
///
/// ```
/// use seatflow_core::store::{Revision, TicketStore};
/// use seatflow_core::types::EventId;
/// use seatflow_testing::InMemoryTicketStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryTicketStore::new();
/// let current = store.load_event(EventId::new("1")).await?;
/// assert_eq!(current.revision, Revision::new(0));
/// assert!(current.tickets.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryTicketStore {
    inner: Arc<Mutex<Inner>>,
    changes: broadcast::Sender<Arc<ChangeNotice>>,
    unavailable: Arc<AtomicBool>,
    commits: Arc<AtomicU64>,
    conflicts: Arc<AtomicU64>,
}

impl InMemoryTicketStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_capacity(CHANGE_FEED_CAPACITY)
    }

    /// Create an empty store whose change feed retains only `capacity`
    /// commits.
    ///
    /// A subscriber that falls further behind misses notices and
    /// resynchronises from a fresh read, which a small capacity makes easy
    /// to provoke.
    #[must_use]
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            changes,
            unavailable: Arc::new(AtomicBool::new(false)),
            commits: Arc::new(AtomicU64::new(0)),
            conflicts: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Simulate an outage (or recover from one)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `n` commits wait for each other before applying.
    ///
    /// All `n` callers must reach `commit` or the gated ones wait forever.
    pub fn gate_next_commits(&self, n: usize) {
        self.lock().gate = Some((Arc::new(Barrier::new(n)), n));
    }

    /// Number of successful commits
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of commits rejected with a revision conflict
    #[must_use]
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }

    /// Current revision of an event
    #[must_use]
    pub fn revision(&self, event_id: &EventId) -> Revision {
        self.lock()
            .events
            .get(event_id)
            .map(|entry| entry.revision)
            .unwrap_or_default()
    }

    /// Every stored ticket, of every event and status
    #[must_use]
    pub fn all_tickets(&self) -> Vec<Ticket> {
        self.lock().matching(&TicketFilter::all())
    }

    /// Write tickets without any validation, bumping each touched event's
    /// revision and notifying subscribers.
    ///
    /// Replaces tickets with the same id. Used to seed fixtures and to
    /// plant data a correct coordinator could never produce.
    pub fn insert_unchecked(&self, tickets: impl IntoIterator<Item = Ticket>) {
        let mut inner = self.lock();
        let mut changes = Vec::new();
        let mut touched: Vec<EventId> = Vec::new();

        for ticket in tickets {
            let entry = inner.events.entry(ticket.event_id.clone()).or_default();
            if !touched.contains(&ticket.event_id) {
                touched.push(ticket.event_id.clone());
                entry.revision = entry.revision.next();
            }
            changes.push((ticket.id, Some(ticket.clone())));
            entry.tickets.insert(ticket.id, ticket);
        }

        if !changes.is_empty() {
            // No receivers is fine.
            let _ = self.changes.send(Arc::new(ChangeNotice { changes }));
        }
        drop(inner);
    }

    async fn pass_gate(&self) {
        let barrier = {
            let mut inner = self.lock();
            match inner.gate.take() {
                Some((barrier, remaining)) => {
                    if remaining > 1 {
                        inner.gate = Some((Arc::clone(&barrier), remaining - 1));
                    }
                    Some(barrier)
                }
                None => None,
            }
        };
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
    }

    fn apply(&self, event_id: &EventId, expected: Revision, writes: Vec<TicketWrite>) -> Result<Revision, StoreError> {
        let mut inner = self.lock();
        let entry = inner.events.entry(event_id.clone()).or_default();

        if entry.revision != expected {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                event_id: event_id.clone(),
                expected,
                actual: entry.revision,
            });
        }

        // Validate against a scratch copy; the live map is only swapped in
        // once every write succeeded.
        let mut next = entry.tickets.clone();
        let mut changes = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                TicketWrite::Insert(ticket) => {
                    if &ticket.event_id != event_id {
                        return Err(StoreError::InvalidWrite(format!(
                            "ticket {} belongs to event {}, not {event_id}",
                            ticket.id, ticket.event_id
                        )));
                    }
                    if next.contains_key(&ticket.id) {
                        return Err(StoreError::InvalidWrite(format!("ticket {} already exists", ticket.id)));
                    }
                    changes.push((ticket.id, Some(ticket.clone())));
                    next.insert(ticket.id, ticket);
                }
                TicketWrite::Replace(ticket) => {
                    if &ticket.event_id != event_id {
                        return Err(StoreError::InvalidWrite(format!(
                            "ticket {} belongs to event {}, not {event_id}",
                            ticket.id, ticket.event_id
                        )));
                    }
                    if !next.contains_key(&ticket.id) {
                        return Err(StoreError::InvalidWrite(format!("ticket {} does not exist", ticket.id)));
                    }
                    changes.push((ticket.id, Some(ticket.clone())));
                    next.insert(ticket.id, ticket);
                }
                TicketWrite::Delete(ticket_id) => {
                    if next.remove(&ticket_id).is_none() {
                        return Err(StoreError::InvalidWrite(format!("ticket {ticket_id} does not exist")));
                    }
                    changes.push((ticket_id, None));
                }
            }
        }

        entry.tickets = next;
        entry.revision = entry.revision.next();
        let revision = entry.revision;
        self.commits.fetch_add(1, Ordering::SeqCst);

        if !changes.is_empty() {
            // Sent under the lock so subscribers see commits in order.
            let _ = self.changes.send(Arc::new(ChangeNotice { changes }));
        }
        drop(inner);
        Ok(revision)
    }
}

impl Default for InMemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketStore for InMemoryTicketStore {
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, EventTickets> {
        Box::pin(async move {
            self.check_available()?;
            let inner = self.lock();
            Ok(inner
                .events
                .get(&event_id)
                .map(|entry| EventTickets {
                    revision: entry.revision,
                    tickets: entry.tickets.values().cloned().collect(),
                })
                .unwrap_or_default())
        })
    }

    fn query(&self, filter: TicketFilter) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.lock().matching(&filter))
        })
    }

    fn commit(&self, event_id: EventId, expected: Revision, writes: Vec<TicketWrite>) -> StoreFuture<'_, Revision> {
        Box::pin(async move {
            self.check_available()?;
            self.pass_gate().await;
            self.check_available()?;
            self.apply(&event_id, expected, writes)
        })
    }

    fn subscribe(&self, filter: TicketFilter) -> StoreFuture<'_, TicketStream> {
        Box::pin(async move {
            self.check_available()?;

            // Initial set and receiver taken under one lock: no commit can
            // slip in between.
            let (initial, mut changes) = {
                let inner = self.lock();
                (inner.matching(&filter), self.changes.subscribe())
            };
            let shared = Arc::clone(&self.inner);

            let stream = async_stream::stream! {
                let mut current: BTreeMap<TicketId, Ticket> =
                    initial.into_iter().map(|t| (t.id, t)).collect();
                let mut sequence = 0u64;
                yield Ok(TicketSet { sequence, tickets: sorted(&current) });

                loop {
                    let changed = match changes.recv().await {
                        Ok(notice) => {
                            let mut changed = false;
                            for (ticket_id, after) in &notice.changes {
                                match after {
                                    Some(ticket) if filter.matches(ticket) => {
                                        if current.get(ticket_id) != Some(ticket) {
                                            current.insert(*ticket_id, ticket.clone());
                                            changed = true;
                                        }
                                    }
                                    _ => changed |= current.remove(ticket_id).is_some(),
                                }
                            }
                            changed
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "Subscription lagged, resynchronising");
                            let fresh: BTreeMap<TicketId, Ticket> = shared
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .matching(&filter)
                                .into_iter()
                                .map(|t| (t.id, t))
                                .collect();
                            let changed = fresh != current;
                            current = fresh;
                            changed
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if changed {
                        sequence += 1;
                        yield Ok(TicketSet { sequence, tickets: sorted(&current) });
                    }
                }
            };

            Ok(stream.boxed())
        })
    }
}

fn sorted(tickets: &BTreeMap<TicketId, Ticket>) -> Vec<Ticket> {
    let mut tickets: Vec<Ticket> = tickets.values().cloned().collect();
    tickets.sort_by_key(Ticket::queue_key);
    tickets
}

//! Event catalog: where event definitions come from.

use crate::types::{Event, EventId};
use std::collections::BTreeMap;

/// Read-only source of event definitions.
pub trait EventCatalog: Send + Sync {
    /// Look up one event.
    fn find(&self, event_id: &EventId) -> Option<Event>;

    /// All events, in catalog order.
    fn events(&self) -> Vec<Event>;
}

/// Catalog backed by a fixed list of events.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    events: BTreeMap<EventId, Event>,
}

impl StaticCatalog {
    /// Creates a catalog from a list of events. Later duplicates win.
    #[must_use]
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            events: events.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Adds or replaces an event.
    #[must_use]
    pub fn with_event(mut self, event: Event) -> Self {
        self.events.insert(event.id.clone(), event);
        self
    }

    /// Number of events in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventCatalog for StaticCatalog {
    fn find(&self, event_id: &EventId) -> Option<Event> {
        self.events.get(event_id).cloned()
    }

    fn events(&self) -> Vec<Event> {
        self.events.values().cloned().collect()
    }
}

//! Sales summary for the admin dashboard.

use crate::catalog::EventCatalog;
use crate::ticket::Ticket;
use crate::types::EventId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sales of one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSales {
    /// Event id
    pub event_id: EventId,
    /// Event title
    pub title: String,
    /// Booked tickets
    pub sold: u32,
    /// Seats the event offers
    pub total_seats: u32,
    /// `sold × price`, in minor currency units
    pub revenue: u64,
}

/// Sales across every catalogued event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesSummary {
    /// Per-event rows, in catalog order
    pub events: Vec<EventSales>,
    /// Booked tickets across all events
    pub total_sold: u64,
    /// Revenue across all events
    pub total_revenue: u64,
}

/// Counts booked tickets per catalogued event and prices them.
///
/// Tickets of events missing from the catalog are ignored.
#[must_use]
pub fn sales_summary(catalog: &dyn EventCatalog, tickets: &[Ticket]) -> SalesSummary {
    let mut sold: HashMap<&EventId, u32> = HashMap::new();
    for ticket in tickets.iter().filter(|t| t.is_booked()) {
        *sold.entry(&ticket.event_id).or_default() += 1;
    }

    let mut summary = SalesSummary::default();
    for event in catalog.events() {
        let count = sold.get(&event.id).copied().unwrap_or_default();
        let revenue = u64::from(count).saturating_mul(event.price);
        summary.total_sold += u64::from(count);
        summary.total_revenue = summary.total_revenue.saturating_add(revenue);
        summary.events.push(EventSales {
            event_id: event.id,
            title: event.title,
            sold: count,
            total_seats: event.total_seats,
            revenue,
        });
    }
    summary
}

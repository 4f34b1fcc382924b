//! # Seatflow Testing
//!
//! Testing utilities and helpers for the seat allocation engine.
//!
//! This crate provides:
//! - [`InMemoryTicketStore`]: a complete `TicketStore` with live
//!   subscriptions and fault injection
//! - Deterministic clocks
//! - Fixtures for events and tickets, including the storefront catalog
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```
//! use seatflow_core::store::{TicketFilter, TicketStore};
//! use seatflow_testing::{InMemoryTicketStore, fixtures};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryTicketStore::new();
//! store.insert_unchecked([fixtures::booked(1, "1", "alice", "A1")]);
//!
//! let tickets = store.query(TicketFilter::all()).await?;
//! assert_eq!(tickets.len(), 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use seatflow_core::environment::Clock;

pub mod memory_store;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatflow_testing::mocks::FixedClock;
    /// use seatflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by a fixed step on every reading.
    ///
    /// Gives every commit a distinct, strictly increasing `created_at`, so
    /// waiting-queue order in tests follows commit order.
    ///
    /// ```
    /// use seatflow_testing::mocks::SteppingClock;
    /// use seatflow_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = SteppingClock::new(Utc::now(), Duration::seconds(1));
    /// let first = clock.now();
    /// assert_eq!(clock.now() - first, Duration::seconds(1));
    /// ```
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: chrono::Duration,
    }

    impl SteppingClock {
        /// Create a clock whose first reading is `start`
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// The instant every test clock starts at (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    /// Stepping clock starting at [`epoch`], one millisecond per reading
    #[must_use]
    pub fn stepping_clock() -> SteppingClock {
        SteppingClock::new(epoch(), chrono::Duration::milliseconds(1))
    }
}

/// Test data builders
pub mod fixtures {
    use chrono::Duration;
    use seatflow_core::catalog::StaticCatalog;
    use seatflow_core::ticket::Ticket;
    use seatflow_core::types::{Event, EventId, HolderId, SeatId, SeatLayout, TicketId};

    use crate::mocks::epoch;

    /// Event without price or seat map
    #[must_use]
    pub fn event_with_seats(id: &str, total_seats: u32) -> Event {
        Event::new(EventId::new(id), format!("Event {id}"), total_seats)
    }

    /// The three storefront events: 40 seats each on a 5×8 grid (`A1`..`E8`),
    /// priced in cents.
    #[must_use]
    pub fn storefront_events() -> Vec<Event> {
        [
            ("1", "Tech Summit 2025", 15_000),
            ("2", "Music Festival 2026", 20_000),
            ("3", "Modern Art Exhibition", 5_000),
        ]
        .into_iter()
        .map(|(id, title, price)| {
            Event::new(EventId::new(id), title, 40)
                .with_price(price)
                .with_layout(SeatLayout::new(5, 8))
        })
        .collect()
    }

    /// Catalog of [`storefront_events`]
    #[must_use]
    pub fn storefront_catalog() -> StaticCatalog {
        StaticCatalog::new(storefront_events())
    }

    /// Booked ticket created at the test epoch
    #[must_use]
    pub fn booked(id: u128, event: &str, holder: &str, seat: &str) -> Ticket {
        Ticket::booked(
            TicketId::from_u128(id),
            EventId::new(event),
            HolderId::new(holder),
            SeatId::new(seat),
            epoch(),
        )
    }

    /// Waiting ticket created `offset_secs` after the test epoch
    #[must_use]
    pub fn waiting(id: u128, event: &str, holder: &str, offset_secs: i64) -> Ticket {
        Ticket::waiting(
            TicketId::from_u128(id),
            EventId::new(event),
            HolderId::new(holder),
            epoch() + Duration::seconds(offset_secs),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber.
    ///
    /// Honours `RUST_LOG`, writes through the test harness so output is only
    /// shown for failing tests, and is a no-op when called again.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use memory_store::InMemoryTicketStore;
pub use mocks::{FixedClock, SteppingClock, test_clock};
pub use reducer_test::ReducerTest;

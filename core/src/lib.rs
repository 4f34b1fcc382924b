//! # Seatflow Core
//!
//! Pure domain logic for allocating seats of a fixed-capacity event between
//! holders who book directly and holders who wait in a FIFO queue.
//!
//! Nothing in this crate performs I/O. The async shell (commit loop, live
//! subscriptions, viewer sessions) lives in `seatflow-runtime`; this crate
//! only describes the data, derives read models from it, and decides which
//! writes a reservation should produce.
//!
//! ## Core Concepts
//!
//! - **Ticket**: the unit of allocation (`Booked`, `Waiting`, or terminal)
//! - **`CapacitySnapshot`**: booked count, occupied seats and the ordered
//!   waiting queue of one event, rebuilt from scratch on every store change
//! - **Eligibility**: whether a holder may claim a seat right now, and their
//!   rank when queued
//! - **Reservation plan**: the atomic batch of writes a `claimSeat` or
//!   `joinWaitlist` intent turns into, validated against one snapshot
//! - **Promotion tracking**: one-shot "you may now claim a seat" signals,
//!   per event for a viewer and across events for a holder watch
//!
//! ## Data Flow
//!
//! ```text
//! TicketStore ──subscribe──► CapacitySnapshot ──► evaluate() ──► PromotionTracker / UI
//!      ▲                                                              │
//!      └──────── commit(expected revision, writes) ◄── plan_reservation ◄── intent
//! ```
//!
//! ## Example
//!
//! ```
//! use seatflow_core::eligibility::evaluate;
//! use seatflow_core::snapshot::CapacitySnapshot;
//! use seatflow_core::types::{Event, EventId, HolderId};
//!
//! let event = Event::new(EventId::new("tech-summit"), "Tech Summit", 40);
//! let snapshot = CapacitySnapshot::build(&event.id, &[]);
//!
//! let result = evaluate(&snapshot, &event, &HolderId::new("alice"));
//! assert!(result.eligible);
//! assert_eq!(result.rank, None);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

pub mod catalog;
pub mod eligibility;
pub mod holder_watch;
pub mod promotion;
pub mod reservation;
pub mod snapshot;
pub mod store;
pub mod summary;
pub mod ticket;
pub mod types;
pub mod viewer;

/// Reducer module - the pure state-transition abstraction
///
/// Reducers fold inputs into owned state and describe the side effects the
/// shell should perform, without performing them:
///
/// `(State, Action, Environment) → (State, Effects)`
///
/// The viewer session is built on this trait so that all of its reasoning
/// (snapshot rebuild, eligibility, promotion detection) is deterministic and
/// testable without a runtime.
pub mod reducer {
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The inputs this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Effect`: Descriptions of work for the shell to carry out
    ///
    /// # Example
    ///
    /// ```
    /// use seatflow_core::reducer::Reducer;
    /// use seatflow_core::{SmallVec, smallvec};
    ///
    /// struct CounterReducer;
    ///
    /// impl Reducer for CounterReducer {
    ///     type State = u32;
    ///     type Action = ();
    ///     type Environment = ();
    ///     type Effect = u32;
    ///
    ///     fn reduce(&self, state: &mut u32, _action: (), _env: &()) -> SmallVec<[u32; 4]> {
    ///         *state += 1;
    ///         smallvec![*state]
    ///     }
    /// }
    ///
    /// let mut state = 0;
    /// let effects = CounterReducer.reduce(&mut state, (), &());
    /// assert_eq!(effects.as_slice(), &[1]);
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The effect descriptions this reducer returns
        type Effect;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Updates state in place
        /// 2. Returns effect descriptions to be executed by the caller
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Self::Effect; 4]>;
    }
}

/// Environment module - Dependency injection traits
///
/// External dependencies of the pure core are abstracted behind traits and
/// injected, so tests can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Ticket `created_at` stamps come from this clock at commit time, which
    /// makes the waiting-queue order reproducible in tests.
    ///
    /// # Examples
    ///
    /// ```
    /// use seatflow_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time source used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

//! # Seatflow Runtime
//!
//! Async shell around `seatflow-core`: the reservation coordinator, live
//! viewer sessions and the engine facade the storefront talks to.
//!
//! ## Core Components
//!
//! - **`SeatReservationCoordinator`**: the single writer of seat-affecting
//!   state; plans every intent against a fresh read and commits it
//!   conditioned on the revision it read
//! - **`ViewerSession`**: one tokio task per connected client, folding store
//!   pushes through the viewer reducer and publishing snapshot, eligibility
//!   and promotions
//! - **`HolderWatchSession`**: one task per signed-in holder, delivering
//!   promotions for every event the holder is queued in
//! - **`SeatEngine`**: facade bundling both over a shared store and catalog
//!
//! ## Example
//!
//! ```ignore
//! use seatflow_runtime::{EngineConfig, SeatEngine};
//! use seatflow_core::reservation::ReservationIntent;
//!
//! let engine = SeatEngine::new(store, catalog, clock, EngineConfig::from_env());
//!
//! let mut viewer = engine.watch(&event_id, Some(holder_id.clone())).await?;
//! let ticket = engine.reserve(&event_id, &holder_id, ReservationIntent::JoinWaitlist).await?;
//!
//! // Later, when a seat frees up:
//! if let Some(promotion) = viewer.next_promotion().await {
//!     println!("rank {} may now claim a seat", promotion.rank);
//! }
//! ```

/// Engine configuration from the environment
pub mod config;

/// Reservation commit loop
pub mod coordinator;

/// `SeatEngine` facade
pub mod engine;

/// Holder-wide promotion watch across events
pub mod holder_watch;

/// Prometheus metrics for observability
pub mod metrics;

/// Bounded retries with optional backoff
pub mod retry;

/// Per-client reactive viewer sessions
pub mod viewer;

pub use config::{ConfigError, EngineConfig};
pub use coordinator::{FirstFreeSeat, Reservation, SeatPicker, SeatReservationCoordinator};
pub use engine::SeatEngine;
pub use holder_watch::{HolderWatch, HolderWatchSession};
pub use viewer::{ViewerError, ViewerHandle, ViewerSession};

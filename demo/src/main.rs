//! Seatflow demo
//!
//! Drives the engine through the two storefront stories that matter:
//!
//! 1. A sold-out single-seat event: a holder queues, the seat is cancelled,
//!    the holder is promoted and converts their waiting ticket.
//! 2. Two holders clicking the same seat at the same moment: exactly one
//!    booking lands, the other is re-seated.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=info,seatflow_runtime=debug cargo run -p seatflow-demo
//! SEATFLOW_SUBMISSION_DELAY_MS=500 SEATFLOW_METRICS_ADDR=127.0.0.1:9000 cargo run -p seatflow-demo
//! ```

use anyhow::{Context, bail};
use seatflow_core::catalog::StaticCatalog;
use seatflow_core::environment::SystemClock;
use seatflow_core::reservation::ReservationIntent;
use seatflow_core::types::{Event, EventId, HolderId, SeatId};
use seatflow_runtime::metrics::MetricsServer;
use seatflow_runtime::{EngineConfig, FirstFreeSeat, SeatEngine};
use seatflow_testing::InMemoryTicketStore;
use seatflow_testing::fixtures::storefront_events;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROMOTION_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seatflow_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::try_from_env().context("invalid engine configuration")?;
    info!(
        submission_delay_ms = u64::try_from(config.submission_delay.as_millis()).unwrap_or(u64::MAX),
        max_commit_attempts = config.max_commit_attempts,
        retain_cancelled = config.retain_cancelled,
        "Configuration loaded"
    );

    let metrics = match config.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start()?;
            Some(server)
        }
        None => None,
    };

    let catalog = StaticCatalog::new(storefront_events())
        .with_event(Event::new(EventId::new("acoustic"), "Acoustic Session", 1).with_price(2_500));
    let store = InMemoryTicketStore::new();
    let engine = SeatEngine::new(Arc::new(store.clone()), Arc::new(catalog), Arc::new(SystemClock), config);

    waitlist_promotion(&engine).await?;
    seat_race(&engine, &store).await?;

    let summary = engine.sales_summary().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(rendered) = metrics.as_ref().and_then(MetricsServer::render) {
        println!("{rendered}");
    }
    Ok(())
}

async fn waitlist_promotion(engine: &SeatEngine) -> anyhow::Result<()> {
    let event = EventId::new("acoustic");
    let (xavier, yuki) = (HolderId::new("xavier"), HolderId::new("yuki"));
    let a1 = || ReservationIntent::ClaimSeat {
        seat_id: SeatId::new("A1"),
    };

    let booked = engine.reserve(&event, &xavier, a1()).await?;
    info!(ticket_id = %booked.id, "xavier booked the only seat");

    if let Err(err) = engine.reserve(&event, &yuki, a1()).await {
        info!(error = %err, "yuki could not book");
    }
    let queued = engine.reserve(&event, &yuki, ReservationIntent::JoinWaitlist).await?;

    let mut viewer = engine.watch(&event, Some(yuki.clone())).await?;
    let eligibility = viewer.wait_for_eligibility(|r| r.is_queued()).await?;
    info!(rank = ?eligibility.rank, eligible = eligibility.eligible, "yuki is queued");

    engine.cancel(&event, booked.id, &xavier).await?;

    let promotion = tokio::time::timeout(PROMOTION_TIMEOUT, viewer.next_promotion())
        .await
        .context("no promotion arrived")?
        .context("viewer session ended")?;
    if promotion.ticket_id != queued.id {
        bail!("promoted ticket {} is not yuki's waiting ticket {}", promotion.ticket_id, queued.id);
    }

    let reservation = engine.reserve_detailed(&event, &yuki, a1()).await?;
    info!(ticket_id = %reservation.ticket.id, outcome = ?reservation.outcome, "yuki converted the waiting ticket");

    viewer.close().await?;
    Ok(())
}

async fn seat_race(engine: &SeatEngine, store: &InMemoryTicketStore) -> anyhow::Result<()> {
    let event = EventId::new("1");
    let (ana, ben) = (HolderId::new("ana"), HolderId::new("ben"));

    // Hold both commits until both holders have read the seat map.
    store.gate_next_commits(2);
    let (first, second) = tokio::join!(
        engine.reserve_with_repick(&event, &ana, SeatId::new("C4"), &FirstFreeSeat),
        engine.reserve_with_repick(&event, &ben, SeatId::new("C4"), &FirstFreeSeat),
    );

    for (holder, result) in [(&ana, first), (&ben, second)] {
        let ticket = result?;
        info!(
            holder_id = %holder,
            seat_id = ticket.seat_id().map_or("-", SeatId::as_str),
            "Race settled"
        );
    }
    info!(conflicts = store.conflict_count(), "Seat race finished");
    Ok(())
}

//! Holder watch sessions: promotions for every event a holder is queued in.
//!
//! A session follows the holder-wide ticket feed and, for each event where
//! the holder has a waiting ticket, keeps that event's capacity feed open.
//! Capacity feeds run as forwarding tasks into one channel so the session
//! loop still folds a single notification at a time through
//! [`HolderWatchReducer`]. A feed is closed as soon as the holder has no
//! waiting ticket left at its event.
//!
//! Promotions arrive whether or not a viewer session is open for the event.

use crate::metrics::ViewerMetrics;
use crate::viewer::ViewerError;
use futures::StreamExt;
use seatflow_core::catalog::EventCatalog;
use seatflow_core::environment::Clock;
use seatflow_core::holder_watch::{
    HolderWatchAction, HolderWatchEffect, HolderWatchEnvironment, HolderWatchReducer, HolderWatchState,
};
use seatflow_core::promotion::Promotion;
use seatflow_core::reducer::Reducer;
use seatflow_core::store::{StoreError, TicketFilter, TicketSet, TicketStore, TicketStream};
use seatflow_core::ticket::Ticket;
use seatflow_core::types::{EventId, HolderId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Capacity pushes queued between the forwarding tasks and the loop.
const CAPACITY_QUEUE: usize = 64;

/// A push from one event's capacity feed, tagged with the feed it came from.
struct CapacityPush {
    event_id: EventId,
    feed: u64,
    next: Result<TicketSet, StoreError>,
}

/// Client side of a running holder watch.
#[derive(Debug)]
pub struct HolderWatch {
    holder_id: HolderId,
    tickets: watch::Receiver<Vec<Ticket>>,
    watched: watch::Receiver<Vec<EventId>>,
    promotions: mpsc::Receiver<Promotion>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), ViewerError>>,
}

impl HolderWatch {
    /// Holder being followed.
    #[must_use]
    pub const fn holder_id(&self) -> &HolderId {
        &self.holder_id
    }

    /// The holder's tickets across all events, newest first.
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        self.tickets.borrow().clone()
    }

    /// Events whose capacity feed is currently open.
    #[must_use]
    pub fn watched_events(&self) -> Vec<EventId> {
        self.watched.borrow().clone()
    }

    /// Wait for the next promotion, at any event. `None` once the session
    /// has ended.
    pub async fn next_promotion(&mut self) -> Option<Promotion> {
        self.promotions.recv().await
    }

    /// A promotion that has already arrived, if any.
    pub fn try_next_promotion(&mut self) -> Option<Promotion> {
        self.promotions.try_recv().ok()
    }

    /// Wait until the set of watched events satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the session ends first.
    pub async fn wait_for_watched(
        &mut self,
        mut predicate: impl FnMut(&[EventId]) -> bool,
    ) -> Result<Vec<EventId>, ViewerError> {
        let current = self
            .watched
            .wait_for(|events| predicate(events))
            .await
            .map_err(|_| ViewerError::Closed)?;
        Ok(current.clone())
    }

    /// Stop the session and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session early, if any.
    pub async fn close(self) -> Result<(), ViewerError> {
        let Self { shutdown, task, .. } = self;
        let _ = shutdown.send(true);
        task.await.map_err(|e| ViewerError::TaskFailed(e.to_string()))?
    }
}

/// Spawns holder watch sessions.
pub struct HolderWatchSession;

impl HolderWatchSession {
    /// Open the holder-wide feed for `holder_id` and start the session loop.
    ///
    /// # Errors
    ///
    /// Returns `Subscription` if the holder feed cannot be opened.
    pub async fn spawn(
        store: Arc<dyn TicketStore>,
        catalog: Arc<dyn EventCatalog>,
        clock: Arc<dyn Clock>,
        holder_id: HolderId,
        promotion_buffer: usize,
    ) -> Result<HolderWatch, ViewerError> {
        let holder_feed = store.subscribe(TicketFilter::owned_by(holder_id.clone())).await?;

        let (tickets_tx, tickets_rx) = watch::channel(Vec::new());
        let (watched_tx, watched_rx) = watch::channel(Vec::new());
        let (promotion_tx, promotion_rx) = mpsc::channel(promotion_buffer.max(1));
        let (capacity_tx, capacity_rx) = mpsc::channel(CAPACITY_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let span = tracing::info_span!("holder_watch", holder_id = %holder_id);
        let session = HolderWatchLoop {
            state: HolderWatchState::new(holder_id.clone()),
            env: HolderWatchEnvironment::new(clock, catalog),
            store,
            feeds: HashMap::new(),
            next_feed: 0,
            capacity_tx,
            tickets: tickets_tx,
            watched: watched_tx,
            promotions: promotion_tx,
        };

        ViewerMetrics::record_session_started();
        let task = tokio::spawn(session.run(holder_feed, capacity_rx, shutdown_rx).instrument(span));

        Ok(HolderWatch {
            holder_id,
            tickets: tickets_rx,
            watched: watched_rx,
            promotions: promotion_rx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

struct HolderWatchLoop {
    state: HolderWatchState,
    env: HolderWatchEnvironment,
    store: Arc<dyn TicketStore>,
    feeds: HashMap<EventId, (u64, JoinHandle<()>)>,
    next_feed: u64,
    capacity_tx: mpsc::Sender<CapacityPush>,
    tickets: watch::Sender<Vec<Ticket>>,
    watched: watch::Sender<Vec<EventId>>,
    promotions: mpsc::Sender<Promotion>,
}

impl HolderWatchLoop {
    async fn run(
        mut self,
        mut holder_feed: TicketStream,
        mut capacity: mpsc::Receiver<CapacityPush>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ViewerError> {
        tracing::debug!("Holder watch started");

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),

                next = holder_feed.next() => match next {
                    Some(Ok(set)) => {
                        ViewerMetrics::record_notification("holder_all");
                        if let Err(err) = self.dispatch(HolderWatchAction::TicketsChanged(set)).await {
                            break Err(err);
                        }
                    }
                    Some(Err(err)) => break Err(ViewerError::Subscription(err)),
                    None => break Err(ViewerError::Subscription(StoreError::SubscriptionClosed)),
                },

                Some(push) = capacity.recv() => {
                    // Pushes from a feed closed since they were queued.
                    if self.feeds.get(&push.event_id).is_none_or(|(feed, _)| *feed != push.feed) {
                        continue;
                    }
                    match push.next {
                        Ok(set) => {
                            ViewerMetrics::record_notification("capacity");
                            let action = HolderWatchAction::CapacityChanged { event_id: push.event_id, set };
                            if let Err(err) = self.dispatch(action).await {
                                break Err(err);
                            }
                        }
                        Err(err) => break Err(ViewerError::Subscription(err)),
                    }
                },
            }
        };

        for (_, (_, forward)) in self.feeds.drain() {
            forward.abort();
        }
        ViewerMetrics::record_session_ended();
        match &result {
            Ok(()) => tracing::debug!("Holder watch stopped"),
            Err(err) => tracing::warn!(error = %err, "Holder watch ended"),
        }
        result
    }

    async fn dispatch(&mut self, action: HolderWatchAction) -> Result<(), ViewerError> {
        let effects = HolderWatchReducer::new().reduce(&mut self.state, action, &self.env);
        for effect in effects {
            self.execute(effect).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, effect: HolderWatchEffect) -> Result<(), ViewerError> {
        match effect {
            HolderWatchEffect::TicketsUpdated(tickets) => {
                self.tickets.send_replace(tickets);
            }
            HolderWatchEffect::Watch(event_id) => {
                let feed = self.store.subscribe(TicketFilter::capacity(event_id.clone())).await?;
                self.next_feed += 1;
                let forward = tokio::spawn(forward(
                    event_id.clone(),
                    self.next_feed,
                    feed,
                    self.capacity_tx.clone(),
                ));
                if let Some((_, previous)) = self.feeds.insert(event_id, (self.next_feed, forward)) {
                    previous.abort();
                }
                self.publish_watched();
            }
            HolderWatchEffect::Unwatch(event_id) => {
                if let Some((_, forward)) = self.feeds.remove(&event_id) {
                    forward.abort();
                }
                self.publish_watched();
            }
            HolderWatchEffect::Promoted(promotion) => {
                ViewerMetrics::record_promotion();
                tracing::info!(
                    event_id = %promotion.event_id,
                    ticket_id = %promotion.ticket_id,
                    rank = promotion.rank,
                    "Holder may now claim a seat"
                );
                match self.promotions.try_send(promotion) {
                    Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        tracing::warn!(ticket_id = %dropped.ticket_id, "Promotion channel full, signal dropped");
                    }
                }
            }
        }
        Ok(())
    }

    fn publish_watched(&self) {
        let mut events: Vec<EventId> = self.feeds.keys().cloned().collect();
        events.sort();
        self.watched.send_replace(events);
    }
}

/// Forward one capacity feed into the session's queue until it ends, fails
/// or the session goes away.
async fn forward(event_id: EventId, feed: u64, mut stream: TicketStream, queue: mpsc::Sender<CapacityPush>) {
    loop {
        let next = stream.next().await.unwrap_or(Err(StoreError::SubscriptionClosed));
        let last = next.is_err();
        let push = CapacityPush {
            event_id: event_id.clone(),
            feed,
            next,
        };
        if queue.send(push).await.is_err() || last {
            return;
        }
    }
}

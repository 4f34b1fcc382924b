//! Tickets and their status state machine.

use crate::types::{EventId, HolderId, SeatId, TicketId};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a ticket.
///
/// A closed tagged variant: the seat lives inside `Booked`, so a ticket has a
/// seat if and only if it is booked.
///
/// ```text
///            ┌─────────► Booked ──────────► Cancelled
///  (commit)  │
///            └─► Waiting ──┬──────────────► Cancelled
///                          └─(promotion)──► Superseded
/// ```
///
/// `Cancelled` and `Superseded` are terminal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TicketStatus {
    /// Holds a seat
    Booked {
        /// The occupied seat
        seat_id: SeatId,
    },
    /// Queued for a seat
    Waiting,
    /// Cancelled by the holder (kept only when the store retains cancellations)
    Cancelled,
    /// A waiting ticket closed out by its promotion to a booked ticket
    Superseded {
        /// The booked ticket minted by the promotion
        promoted_to: TicketId,
    },
}

impl TicketStatus {
    /// Coarse kind of this status, for filtering.
    #[must_use]
    pub const fn kind(&self) -> StatusKind {
        match self {
            Self::Booked { .. } => StatusKind::Booked,
            Self::Waiting => StatusKind::Waiting,
            Self::Cancelled => StatusKind::Cancelled,
            Self::Superseded { .. } => StatusKind::Superseded,
        }
    }

    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Superseded { .. })
    }

    /// Whether this status counts toward capacity or the queue.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

/// Field-less mirror of [`TicketStatus`] used by store filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// See [`TicketStatus::Booked`]
    Booked,
    /// See [`TicketStatus::Waiting`]
    Waiting,
    /// See [`TicketStatus::Cancelled`]
    Cancelled,
    /// See [`TicketStatus::Superseded`]
    Superseded,
}

impl StatusKind {
    /// The statuses that make up an event's capacity and queue.
    pub const LIVE: [Self; 2] = [Self::Booked, Self::Waiting];
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Booked => "booked",
            Self::Waiting => "waiting",
            Self::Cancelled => "cancelled",
            Self::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

/// Opaque proof of a committed booking or queue entry.
///
/// Rendered as `0x` followed by 64 lowercase hex digits, the format the
/// storefront shows as a "transaction hash".
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generates a token from the given RNG (seeded RNGs give reproducible tokens).
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let bytes: [u8; 32] = rng.r#gen();
        let mut hex = String::with_capacity(66);
        hex.push_str("0x");
        for byte in bytes {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unit of allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier (document key in the store)
    pub id: TicketId,
    /// Event this ticket belongs to
    pub event_id: EventId,
    /// Holder who owns this ticket
    pub holder_id: HolderId,
    /// Current status
    #[serde(flatten)]
    pub status: TicketStatus,
    /// Commit time; orders the waiting queue
    pub created_at: DateTime<Utc>,
    /// Confirmation token assigned at commit
    pub confirmation: Option<ConfirmationToken>,
}

impl Ticket {
    /// Creates a booked ticket.
    #[must_use]
    pub const fn booked(
        id: TicketId,
        event_id: EventId,
        holder_id: HolderId,
        seat_id: SeatId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            holder_id,
            status: TicketStatus::Booked { seat_id },
            created_at,
            confirmation: None,
        }
    }

    /// Creates a waiting ticket.
    #[must_use]
    pub const fn waiting(
        id: TicketId,
        event_id: EventId,
        holder_id: HolderId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            holder_id,
            status: TicketStatus::Waiting,
            created_at,
            confirmation: None,
        }
    }

    /// Attaches a confirmation token.
    #[must_use]
    pub fn with_confirmation(mut self, token: ConfirmationToken) -> Self {
        self.confirmation = Some(token);
        self
    }

    /// The seat held by this ticket, if booked.
    #[must_use]
    pub const fn seat_id(&self) -> Option<&SeatId> {
        match &self.status {
            TicketStatus::Booked { seat_id } => Some(seat_id),
            _ => None,
        }
    }

    /// Whether the ticket holds a seat.
    #[must_use]
    pub const fn is_booked(&self) -> bool {
        matches!(self.status, TicketStatus::Booked { .. })
    }

    /// Whether the ticket is queued.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self.status, TicketStatus::Waiting)
    }

    /// Queue ordering key: `(created_at, id)`.
    #[must_use]
    pub const fn queue_key(&self) -> (DateTime<Utc>, TicketId) {
        (self.created_at, self.id)
    }

    /// Returns this ticket transitioned to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the ticket is already terminal, or if
    /// `next` is not reachable from the current status (a booked ticket can
    /// only be cancelled; only a waiting ticket can be superseded).
    pub fn transition(&self, next: TicketStatus) -> Result<Self, TransitionError> {
        let allowed = match (&self.status, &next) {
            (TicketStatus::Booked { .. } | TicketStatus::Waiting, TicketStatus::Cancelled)
            | (TicketStatus::Waiting, TicketStatus::Superseded { .. }) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransitionError {
                ticket_id: self.id,
                from: self.status.kind(),
                to: next.kind(),
            });
        }
        Ok(Self {
            status: next,
            ..self.clone()
        })
    }
}

/// A status change that the ticket state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ticket {ticket_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    /// Ticket that was asked to transition
    pub ticket_id: TicketId,
    /// Status it was in
    pub from: StatusKind,
    /// Status that was requested
    pub to: StatusKind,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn waiting_ticket() -> Ticket {
        Ticket::waiting(
            TicketId::from_u128(1),
            EventId::new("1"),
            HolderId::new("yuna"),
            DateTime::<Utc>::UNIX_EPOCH,
        )
    }

    #[test]
    fn waiting_ticket_can_be_superseded_once() {
        let ticket = waiting_ticket();
        let superseded = ticket
            .transition(TicketStatus::Superseded {
                promoted_to: TicketId::from_u128(2),
            })
            .unwrap();

        assert!(superseded.status.is_terminal());
        let err = superseded.transition(TicketStatus::Cancelled).unwrap_err();
        assert_eq!(err.from, StatusKind::Superseded);
        assert_eq!(err.to, StatusKind::Cancelled);
    }

    #[test]
    fn booked_ticket_cannot_be_superseded() {
        let ticket = Ticket::booked(
            TicketId::from_u128(1),
            EventId::new("1"),
            HolderId::new("xavier"),
            SeatId::new("A1"),
            DateTime::<Utc>::UNIX_EPOCH,
        );

        assert!(
            ticket
                .transition(TicketStatus::Superseded {
                    promoted_to: TicketId::from_u128(2)
                })
                .is_err()
        );
        assert!(ticket.transition(TicketStatus::Cancelled).is_ok());
    }

    #[test]
    fn cancelled_is_terminal() {
        let cancelled = waiting_ticket().transition(TicketStatus::Cancelled).unwrap();
        assert!(cancelled.transition(TicketStatus::Waiting).is_err());
        assert!(
            cancelled
                .transition(TicketStatus::Booked {
                    seat_id: SeatId::new("A1")
                })
                .is_err()
        );
    }

    #[test]
    fn seat_present_only_when_booked() {
        assert_eq!(waiting_ticket().seat_id(), None);

        let booked = Ticket::booked(
            TicketId::from_u128(3),
            EventId::new("1"),
            HolderId::new("xavier"),
            SeatId::new("B2"),
            DateTime::<Utc>::UNIX_EPOCH,
        );
        assert_eq!(booked.seat_id(), Some(&SeatId::new("B2")));
    }

    #[test]
    fn confirmation_token_format() {
        let mut rng = StdRng::seed_from_u64(7);
        let token = ConfirmationToken::generate_with(&mut rng);

        assert_eq!(token.as_str().len(), 66);
        assert!(token.as_str().starts_with("0x"));
        assert!(
            token.as_str()[2..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );
        assert_ne!(token, ConfirmationToken::generate_with(&mut rng));
    }

    #[test]
    fn status_serializes_as_tagged_document_field() {
        let json = serde_json::to_value(waiting_ticket()).unwrap();
        assert_eq!(json["status"], "waiting");
        assert!(json.get("seat_id").is_none());

        let booked = Ticket::booked(
            TicketId::from_u128(3),
            EventId::new("1"),
            HolderId::new("xavier"),
            SeatId::new("B2"),
            DateTime::<Utc>::UNIX_EPOCH,
        );
        let json = serde_json::to_value(&booked).unwrap();
        assert_eq!(json["status"], "booked");
        assert_eq!(json["seat_id"], "B2");

        let back: Ticket = serde_json::from_value(json).unwrap();
        assert_eq!(back, booked);
    }
}

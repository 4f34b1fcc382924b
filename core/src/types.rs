//! Identifiers and event definitions.
//!
//! Events are externally defined and immutable from the engine's point of
//! view. Identifiers are strong newtypes so a holder id can never be passed
//! where a seat label is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "` from a string.")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a catalog event (e.g. `"1"` or `"tech-summit"`).
    EventId
);

string_id!(
    /// Identifier of a ticket holder, as issued by the authentication provider.
    HolderId
);

string_id!(
    /// Seat label, e.g. `"A1"`.
    SeatId
);

/// Unique identifier for a ticket.
///
/// Minted as a time-ordered UUID (v7) when the coordinator builds a commit,
/// so ids of tickets created later sort after ids of earlier ones. The id is
/// also the tie-breaker for waiting tickets with identical `created_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new time-ordered `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a `TicketId` from a raw integer (handy for deterministic fixtures)
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Seat layout
// ============================================================================

/// Rectangular seat map: rows labelled `A`, `B`, ... and seats numbered from 1.
///
/// The storefront renders five rows of eight seats (`A1`..`E8`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLayout {
    rows: u8,
    seats_per_row: u16,
}

impl SeatLayout {
    /// Largest number of rows that still gets single-letter labels.
    pub const MAX_ROWS: u8 = 26;

    /// Creates a layout, clamping `rows` to [`Self::MAX_ROWS`].
    #[must_use]
    pub fn new(rows: u8, seats_per_row: u16) -> Self {
        Self {
            rows: rows.min(Self::MAX_ROWS),
            seats_per_row,
        }
    }

    /// Number of seats in the layout.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        u32::from(self.rows) * u32::from(self.seats_per_row)
    }

    /// Whether `seat` names a seat of this layout.
    #[must_use]
    pub fn contains(&self, seat: &SeatId) -> bool {
        let mut chars = seat.as_str().chars();
        let Some(row) = chars.next() else {
            return false;
        };
        if !row.is_ascii_uppercase() || (row as u8 - b'A') >= self.rows {
            return false;
        }
        let number = chars.as_str();
        if number.starts_with('0') {
            return false;
        }
        number
            .parse::<u16>()
            .is_ok_and(|n| n >= 1 && n <= self.seats_per_row)
    }

    /// All seat labels, row by row.
    pub fn seats(&self) -> impl Iterator<Item = SeatId> + '_ {
        (0..self.rows).flat_map(move |row| {
            let letter = char::from(b'A' + row);
            (1..=self.seats_per_row).map(move |n| SeatId::new(format!("{letter}{n}")))
        })
    }
}

// ============================================================================
// Events
// ============================================================================

/// A fixed-capacity event, defined outside the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Display title
    pub title: String,
    /// Total number of seats; fixed at creation, `0` means queue-only
    pub total_seats: u32,
    /// Ticket price in minor currency units
    pub price: u64,
    /// Optional seat map; when present, seat claims are validated against it
    pub layout: Option<SeatLayout>,
}

impl Event {
    /// Creates an event without a price or seat map.
    #[must_use]
    pub fn new(id: EventId, title: impl Into<String>, total_seats: u32) -> Self {
        Self {
            id,
            title: title.into(),
            total_seats,
            price: 0,
            layout: None,
        }
    }

    /// Sets the ticket price in minor currency units.
    #[must_use]
    pub const fn with_price(mut self, price: u64) -> Self {
        self.price = price;
        self
    }

    /// Attaches a seat map.
    #[must_use]
    pub const fn with_layout(mut self, layout: SeatLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Whether `seat` can be claimed at this event at all.
    ///
    /// Without a seat map every label is accepted.
    #[must_use]
    pub fn has_seat(&self, seat: &SeatId) -> bool {
        self.layout.as_ref().is_none_or(|layout| layout.contains(seat))
    }
}

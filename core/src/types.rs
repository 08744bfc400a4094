//! Domain types shared by every layer.
//!
//! The event owns its ticket counters, the booking owns its payment fields.
//! Money is carried as a decimal amount in major currency units and only turned
//! into integer minor units at the processor boundary.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind} id: {value}")]
pub struct ParseIdError {
    kind: &'static str,
    value: String,
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Borrow the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|_| ParseIdError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a ticketed event.
    EventId,
    "event"
);
uuid_id!(
    /// Unique identifier for a booking.
    BookingId,
    "booking"
);
uuid_id!(
    /// Unique identifier for an authenticated user.
    UserId,
    "user"
);

/// Role carried by an authenticated principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular customer.
    User,
    /// Operator with access to every booking and to event management.
    Admin,
}

/// The authenticated caller, as issued by the authentication layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Caller's user id.
    pub id: UserId,
    /// Caller's role.
    pub role: Role,
}

impl Principal {
    /// Construct a regular user principal.
    #[must_use]
    pub const fn user(id: UserId) -> Self {
        Self {
            id,
            role: Role::User,
        }
    }

    /// Construct an admin principal.
    #[must_use]
    pub const fn admin(id: UserId) -> Self {
        Self {
            id,
            role: Role::Admin,
        }
    }

    /// Whether this principal has the admin role.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Owner-or-admin access check.
    #[must_use]
    pub fn can_access(&self, owner: UserId) -> bool {
        self.is_admin() || self.id == owner
    }
}

/// Sale status of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    /// Open for bookings.
    Active,
    /// Withdrawn by an operator. Never reverts on its own.
    Cancelled,
    /// No tickets left.
    SoldOut,
}

impl EventStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::SoldOut => "sold-out",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "sold-out" => Some(Self::SoldOut),
            _ => None,
        }
    }
}

/// Kind of event, used for catalog filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Concert.
    Concert,
    /// Conference.
    Conference,
    /// Workshop.
    Workshop,
    /// Sports.
    Sports,
    /// Theater.
    Theater,
    /// Anything else.
    Other,
}

impl EventCategory {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Concert => "concert",
            Self::Conference => "conference",
            Self::Workshop => "workshop",
            Self::Sports => "sports",
            Self::Theater => "theater",
            Self::Other => "other",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concert" => Some(Self::Concert),
            "conference" => Some(Self::Conference),
            "workshop" => Some(Self::Workshop),
            "sports" => Some(Self::Sports),
            "theater" => Some(Self::Theater),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Where an event takes place.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Venue name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// City.
    pub city: String,
}

/// A monetary amount in major currency units (e.g. dollars).
///
/// # Examples
///
/// ```
/// use eventpass_core::types::Money;
/// use rust_decimal::Decimal;
///
/// let price = Money::new(Decimal::new(1999, 2));
/// assert_eq!(price.to_minor_units(), Some(1999));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Wrap a decimal amount in major units.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Build an amount from integer minor units (cents).
    #[must_use]
    pub fn from_minor_units(minor: i64) -> Self {
        Self(Decimal::new(minor, 2))
    }

    /// The decimal amount in major units.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Integer minor units, rounded to nearest with halves away from zero.
    ///
    /// Returns `None` if the amount does not fit in an `i64`.
    #[must_use]
    pub fn to_minor_units(&self) -> Option<i64> {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }

    /// Multiply by a ticket count. `None` on overflow.
    #[must_use]
    pub fn checked_mul(&self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(Decimal::from(quantity)).map(Self)
    }

    /// Add two amounts. `None` on overflow.
    #[must_use]
    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Whether the amount is strictly negative.
    #[must_use]
    pub fn is_sign_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.round_dp(2))
    }
}

/// A ticketed event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event id.
    pub id: EventId,
    /// Display title.
    pub title: String,
    /// Long description.
    pub description: String,
    /// Catalog category.
    pub category: EventCategory,
    /// When the event takes place.
    pub date: DateTime<Utc>,
    /// Display start time, as entered by the operator (e.g. `"19:30"`).
    pub time: String,
    /// Where it takes place.
    pub venue: Venue,
    /// Image URL; empty when none.
    pub image: String,
    /// Organizer name.
    pub organizer: String,
    /// Price per ticket.
    pub price: Money,
    /// Size of the ticket pool, at least 1.
    pub total_tickets: u32,
    /// Tickets still for sale, in `0..=total_tickets`.
    pub available_tickets: u32,
    /// Sale status.
    pub status: EventStatus,
    /// Promoted on the landing page.
    pub featured: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Tickets consumed by completed bookings.
    #[must_use]
    pub const fn booked_tickets(&self) -> u32 {
        self.total_tickets.saturating_sub(self.available_tickets)
    }

    /// Whether the event accepts new bookings.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, EventStatus::Active)
    }
}

/// Fields an operator supplies to create an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Display title.
    pub title: String,
    /// Long description.
    pub description: String,
    /// Catalog category.
    pub category: EventCategory,
    /// When the event takes place.
    pub date: DateTime<Utc>,
    /// Display start time.
    pub time: String,
    /// Where it takes place.
    pub venue: Venue,
    /// Image URL.
    #[serde(default)]
    pub image: String,
    /// Organizer name.
    pub organizer: String,
    /// Price per ticket.
    pub price: Money,
    /// Size of the ticket pool.
    pub total_tickets: u32,
    /// Promoted on the landing page.
    #[serde(default)]
    pub featured: bool,
}

/// Partial update of an event's descriptive fields.
///
/// Ticket pool resizing goes through the inventory ledger, not through this.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New category.
    pub category: Option<EventCategory>,
    /// New date.
    pub date: Option<DateTime<Utc>>,
    /// New display time.
    pub time: Option<String>,
    /// New venue, replaced as a whole.
    pub venue: Option<Venue>,
    /// New image URL.
    pub image: Option<String>,
    /// New organizer.
    pub organizer: Option<String>,
    /// New ticket price. Existing bookings keep their snapshotted total.
    pub price: Option<Money>,
    /// New featured flag.
    pub featured: Option<bool>,
}

/// Catalog listing filter. Empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only this category.
    pub category: Option<EventCategory>,
    /// Case-insensitive substring of the title, description or venue name.
    pub search: Option<String>,
    /// Only featured events when `true`.
    #[serde(default)]
    pub featured: bool,
    /// Only this status.
    pub status: Option<EventStatus>,
}

impl EventFilter {
    /// Search term, if it has any non-blank content.
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Whether `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if self.category.is_some_and(|category| category != event.category) {
            return false;
        }
        if self.featured && !event.featured {
            return false;
        }
        if self.status.is_some_and(|status| status != event.status) {
            return false;
        }
        self.search_term().is_none_or(|term| {
            let term = term.to_lowercase();
            [&event.title, &event.description, &event.venue.name]
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
        })
    }
}

/// Payment lifecycle of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Awaiting payment.
    Pending,
    /// Paid; tickets are committed.
    Completed,
    /// Payment did not go through (or lost the last tickets).
    Failed,
    /// Refunded by an operator.
    Refunded,
}

impl PaymentStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether no further payment signal can change this status.
    #[must_use]
    pub const fn is_terminal_paid(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a booking's tickets have been taken out of the event's pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryCommit {
    /// Nothing decremented yet.
    Uncommitted,
    /// Tickets decremented exactly once.
    Committed,
    /// Completed, but the decrement hit a storage fault. Picked up by the repair sweep.
    Stranded,
    /// Completed after the event was deleted. Nothing to decrement.
    Orphaned,
    /// Tickets handed back to the pool after a refund.
    Released,
}

impl InventoryCommit {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uncommitted => "uncommitted",
            Self::Committed => "committed",
            Self::Stranded => "stranded",
            Self::Orphaned => "orphaned",
            Self::Released => "released",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uncommitted" => Some(Self::Uncommitted),
            "committed" => Some(Self::Committed),
            "stranded" => Some(Self::Stranded),
            "orphaned" => Some(Self::Orphaned),
            "released" => Some(Self::Released),
            _ => None,
        }
    }
}

/// Why a booking ended up `failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Processor reported the session unpaid.
    Unpaid,
    /// Checkout session expired before payment.
    Expired,
    /// Paid, but the event ran out of tickets before the decrement.
    InventoryExhausted,
}

impl FailureReason {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Expired => "expired",
            Self::InventoryExhausted => "inventory_exhausted",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(Self::Unpaid),
            "expired" => Some(Self::Expired),
            "inventory_exhausted" => Some(Self::InventoryExhausted),
            _ => None,
        }
    }
}

/// A user's booking of tickets for an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id.
    pub id: BookingId,
    /// Owner.
    pub user_id: UserId,
    /// Weak reference; the event may have been deleted.
    pub event_id: EventId,
    /// Number of tickets, at least 1.
    pub tickets: u32,
    /// `price × tickets`, snapshotted at creation.
    pub total_amount: Money,
    /// Payment lifecycle.
    pub payment_status: PaymentStatus,
    /// Processor checkout session id.
    pub external_session_id: Option<String>,
    /// Processor payment reference (payment intent).
    pub external_payment_reference: Option<String>,
    /// Processor transaction id.
    pub external_transaction_id: Option<String>,
    /// Set exactly once, on the first transition to completed.
    pub payment_date: Option<DateTime<Utc>>,
    /// Whether the day-before reminder went out.
    pub reminder_sent: bool,
    /// Inventory side of the completion.
    pub inventory_commit: InventoryCommit,
    /// Set while the booking is failed.
    pub failure_reason: Option<FailureReason>,
    /// Paid but could not be fulfilled; later payment signals must not resurrect it.
    pub refund_eligible: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A fresh pending booking.
    #[must_use]
    pub fn pending(
        user_id: UserId,
        event_id: EventId,
        tickets: u32,
        total_amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BookingId::new(),
            user_id,
            event_id,
            tickets,
            total_amount,
            payment_status: PaymentStatus::Pending,
            external_session_id: None,
            external_payment_reference: None,
            external_transaction_id: None,
            payment_date: None,
            reminder_sent: false,
            inventory_commit: InventoryCommit::Uncommitted,
            failure_reason: None,
            refund_eligible: false,
            created_at: now,
            updated_at: now,
        }
    }
}

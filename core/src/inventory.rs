//! Inventory ledger: an event's ticket counters and their sale status.
//!
//! The event record is the only place ticket counts live. Counters change through
//! exactly three operations:
//!
//! - [`InventoryLedger::decrement_once`]: atomic "decrement if available ≥ N", called
//!   only by the winner of a booking's `→ completed` transition
//! - [`InventoryLedger::release`]: hands tickets back after an administrative refund
//! - [`InventoryLedger::resize`]: operator changes the pool size
//!
//! After every mutation the status is recomputed with [`derive_status`].
//!
//! The pure `apply_*` functions describe each mutation on an in-memory [`Event`];
//! storage implementations either call them under a lock or express the same
//! arithmetic as a single conditional update.

use crate::types::{BookingId, Event, EventDraft, EventFilter, EventId, EventStatus, EventUpdate};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the inventory ledger and event catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Fewer tickets are available than requested.
    #[error("Insufficient inventory for event {event_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        /// The event.
        event_id: EventId,
        /// Tickets requested.
        requested: u32,
        /// Tickets available at the time of the check.
        available: u32,
    },

    /// The event does not exist (never did, or was deleted).
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// A ticket pool must hold at least one ticket.
    #[error("Invalid ticket total: {0}")]
    InvalidTotal(u32),

    /// Storage fault.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Compute an event's status from its availability and its manual status.
///
/// `cancelled` never reverts; otherwise zero availability means sold out and any
/// availability means active.
///
/// # Examples
///
/// ```
/// use eventpass_core::inventory::derive_status;
/// use eventpass_core::types::EventStatus;
///
/// assert_eq!(derive_status(0, EventStatus::Active), EventStatus::SoldOut);
/// assert_eq!(derive_status(3, EventStatus::SoldOut), EventStatus::Active);
/// assert_eq!(derive_status(0, EventStatus::Cancelled), EventStatus::Cancelled);
/// ```
#[must_use]
pub const fn derive_status(available: u32, manual: EventStatus) -> EventStatus {
    match manual {
        EventStatus::Cancelled => EventStatus::Cancelled,
        EventStatus::Active | EventStatus::SoldOut if available == 0 => EventStatus::SoldOut,
        EventStatus::Active | EventStatus::SoldOut => EventStatus::Active,
    }
}

/// Build a new event from an operator draft. All tickets start available.
///
/// # Errors
///
/// Returns [`InventoryError::InvalidTotal`] when the draft has no tickets.
pub fn new_event(draft: EventDraft, now: DateTime<Utc>) -> Result<Event, InventoryError> {
    if draft.total_tickets == 0 {
        return Err(InventoryError::InvalidTotal(0));
    }
    Ok(Event {
        id: EventId::new(),
        title: draft.title,
        description: draft.description,
        category: draft.category,
        date: draft.date,
        time: draft.time,
        venue: draft.venue,
        image: draft.image,
        organizer: draft.organizer,
        price: draft.price,
        total_tickets: draft.total_tickets,
        available_tickets: draft.total_tickets,
        status: derive_status(draft.total_tickets, EventStatus::Active),
        featured: draft.featured,
        created_at: now,
    })
}

/// Conditionally take `tickets` out of the pool.
///
/// # Errors
///
/// Returns [`InventoryError::InsufficientInventory`] and leaves the event untouched
/// when fewer than `tickets` are available.
pub fn apply_decrement(event: &mut Event, tickets: u32) -> Result<(), InventoryError> {
    if event.available_tickets < tickets {
        return Err(InventoryError::InsufficientInventory {
            event_id: event.id,
            requested: tickets,
            available: event.available_tickets,
        });
    }
    event.available_tickets -= tickets;
    event.status = derive_status(event.available_tickets, event.status);
    Ok(())
}

/// Hand `tickets` back to the pool, capped at the pool size.
pub fn apply_release(event: &mut Event, tickets: u32) {
    event.available_tickets = event
        .available_tickets
        .saturating_add(tickets)
        .min(event.total_tickets);
    event.status = derive_status(event.available_tickets, event.status);
}

/// Resize the pool, keeping tickets already sold: `available = max(0, new_total − booked)`.
///
/// # Errors
///
/// Returns [`InventoryError::InvalidTotal`] when `new_total` is zero.
pub fn apply_resize(event: &mut Event, new_total: u32) -> Result<(), InventoryError> {
    if new_total == 0 {
        return Err(InventoryError::InvalidTotal(new_total));
    }
    let booked = event.booked_tickets();
    event.total_tickets = new_total;
    event.available_tickets = new_total.saturating_sub(booked);
    event.status = derive_status(event.available_tickets, event.status);
    Ok(())
}

/// Apply a descriptive update.
pub fn apply_update(event: &mut Event, update: EventUpdate) {
    let EventUpdate {
        title,
        description,
        category,
        date,
        time,
        venue,
        image,
        organizer,
        price,
        featured,
    } = update;
    if let Some(title) = title {
        event.title = title;
    }
    if let Some(description) = description {
        event.description = description;
    }
    if let Some(category) = category {
        event.category = category;
    }
    if let Some(date) = date {
        event.date = date;
    }
    if let Some(time) = time {
        event.time = time;
    }
    if let Some(venue) = venue {
        event.venue = venue;
    }
    if let Some(image) = image {
        event.image = image;
    }
    if let Some(organizer) = organizer {
        event.organizer = organizer;
    }
    if let Some(price) = price {
        event.price = price;
    }
    if let Some(featured) = featured {
        event.featured = featured;
    }
}

/// Atomic counter operations on an event's ticket pool.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the ledger can be shared as
/// `Arc<dyn InventoryLedger>`.
pub trait InventoryLedger: Send + Sync {
    /// Decrement `available_tickets` by `tickets` if at least that many remain.
    ///
    /// Idempotent per `booking_id`: the decrement and its per-booking ledger entry
    /// are written atomically, and a repeat call for a booking already recorded
    /// changes nothing and returns the current event. A caller that lost the reply
    /// can therefore retry safely.
    ///
    /// # Errors
    ///
    /// - `InsufficientInventory`: fewer than `tickets` available, nothing changed
    /// - `EventNotFound`: the event was deleted
    /// - `Storage`: the update could not be performed
    fn decrement_once(
        &self,
        event_id: EventId,
        tickets: u32,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>>;

    /// Best-effort check; not a reservation.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `Storage`: the read failed
    fn check_availability(
        &self,
        event_id: EventId,
        tickets: u32,
    ) -> Pin<Box<dyn Future<Output = Result<bool, InventoryError>> + Send + '_>>;

    /// Return `tickets` to the pool after a refund.
    ///
    /// Only a booking with an unreleased ledger entry gives tickets back; any
    /// other call returns the current event unchanged.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: the event was deleted
    /// - `Storage`: the update could not be performed
    fn release(
        &self,
        event_id: EventId,
        tickets: u32,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>>;

    /// Change the pool size, preserving tickets already sold.
    ///
    /// # Errors
    ///
    /// - `InvalidTotal`: `new_total` is zero
    /// - `EventNotFound`: no such event
    /// - `Storage`: the update could not be performed
    fn resize(
        &self,
        event_id: EventId,
        new_total: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>>;
}

/// Event records outside the ticket counters.
pub trait EventCatalog: Send + Sync {
    /// Persist a new event.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the insert fails.
    fn insert_event(
        &self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>>;

    /// Look up an event. Deleted events resolve to `None`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn find_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, InventoryError>> + Send + '_>>;

    /// Events passing `filter`, soonest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn list_events(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, InventoryError>> + Send + '_>>;

    /// Update descriptive fields.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `Storage`: the update failed
    fn update_event(
        &self,
        event_id: EventId,
        update: EventUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>>;

    /// Set the manual status; the stored status is `derive_status(available, status)`.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event
    /// - `Storage`: the update failed
    fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>>;

    /// Delete an event. Bookings keep their dangling reference.
    ///
    /// Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the delete fails.
    fn delete_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, InventoryError>> + Send + '_>>;

    /// Active events with `start <= date < end`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn list_active_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, InventoryError>> + Send + '_>>;
}

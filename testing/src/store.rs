//! In-memory storage for fast, deterministic tests.
//!
//! [`InMemoryStore`] implements [`EventCatalog`], [`InventoryLedger`] and
//! [`BookingStore`] over `HashMap`s behind a mutex. Every trait method takes the
//! lock once, so each conditional update is atomic exactly like the SQL version.
//!
//! Faults can be injected into the ledger to exercise the stranded-inventory path,
//! into booking lookups, and into per-event reminder candidate listing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Duration, Utc};
use eventpass_core::booking::{BookingStore, BookingSummary, StoreError, Transition, TransitionError};
use eventpass_core::inventory::{
    EventCatalog, InventoryError, InventoryLedger, apply_decrement, apply_release, apply_resize,
    apply_update, derive_status,
};
use eventpass_core::types::{
    Booking, BookingId, Event, EventCategory, EventFilter, EventId, EventStatus, EventUpdate,
    InventoryCommit, Money, PaymentStatus, UserId, Venue,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    event_id: EventId,
    tickets: u32,
    released: bool,
}

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, Event>,
    bookings: HashMap<BookingId, Booking>,
    ledger: HashMap<BookingId, LedgerEntry>,
    decrements: Vec<(EventId, BookingId, u32)>,
    releases: Vec<(EventId, BookingId, u32)>,
    failing_decrements: u32,
    lost_decrement_acks: u32,
    failing_lookups: u32,
    failing_candidate_events: HashSet<EventId>,
}

impl State {
    fn lookup_fault(&mut self) -> Result<(), StoreError> {
        if self.failing_lookups > 0 {
            self.failing_lookups -= 1;
            return Err(StoreError::Storage("injected lookup fault".to_string()));
        }
        Ok(())
    }
}

/// In-memory event catalog, inventory ledger and booking store.
///
/// # Example
///
/// ```
/// use eventpass_testing::InMemoryStore;
/// use eventpass_core::inventory::InventoryLedger;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let event = store.seed_event(5, 2500);
/// assert!(store.check_availability(event.id, 3).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an active event a week from now with `total` tickets at `price_minor` cents each.
    #[must_use]
    pub fn seed_event(&self, total: u32, price_minor: i64) -> Event {
        let now = Utc::now();
        let event = Event {
            id: EventId::new(),
            title: "Test Event".to_string(),
            description: "Seeded for tests".to_string(),
            category: EventCategory::Other,
            date: now + Duration::days(7),
            time: "19:00".to_string(),
            venue: Venue {
                name: "Test Venue".to_string(),
                address: "1 Test Street".to_string(),
                city: "Testville".to_string(),
            },
            image: String::new(),
            organizer: "Test Organizer".to_string(),
            price: Money::from_minor_units(price_minor),
            total_tickets: total,
            available_tickets: total,
            status: derive_status(total, EventStatus::Active),
            featured: false,
            created_at: now,
        };
        self.put_event(event.clone());
        event
    }

    /// Insert or replace an event as-is.
    pub fn put_event(&self, event: Event) {
        self.state.lock().unwrap().events.insert(event.id, event);
    }

    /// Insert or replace a booking as-is.
    pub fn put_booking(&self, booking: Booking) {
        self.state
            .lock()
            .unwrap()
            .bookings
            .insert(booking.id, booking);
    }

    /// Remove an event without touching its bookings.
    pub fn remove_event(&self, event_id: EventId) {
        self.state.lock().unwrap().events.remove(&event_id);
    }

    /// Current copy of an event.
    #[must_use]
    pub fn event(&self, event_id: EventId) -> Option<Event> {
        self.state.lock().unwrap().events.get(&event_id).cloned()
    }

    /// Current copy of a booking.
    #[must_use]
    pub fn booking(&self, booking_id: BookingId) -> Option<Booking> {
        self.state.lock().unwrap().bookings.get(&booking_id).cloned()
    }

    /// Every decrement that took tickets out of a pool, in order: `(event, booking, tickets)`.
    #[must_use]
    pub fn decrements(&self) -> Vec<(EventId, BookingId, u32)> {
        self.state.lock().unwrap().decrements.clone()
    }

    /// Number of successful decrements performed for `booking_id`.
    #[must_use]
    pub fn decrement_count(&self, booking_id: BookingId) -> usize {
        self.state
            .lock()
            .unwrap()
            .decrements
            .iter()
            .filter(|(_, b, _)| *b == booking_id)
            .count()
    }

    /// Every release, in order: `(event, booking, tickets)`.
    #[must_use]
    pub fn releases(&self) -> Vec<(EventId, BookingId, u32)> {
        self.state.lock().unwrap().releases.clone()
    }

    /// Make the next `count` decrements fail with a storage fault before touching the pool.
    pub fn fail_next_decrements(&self, count: u32) {
        self.state.lock().unwrap().failing_decrements = count;
    }

    /// Make the next `count` decrements apply, then report a storage fault anyway.
    pub fn lose_next_decrement_acks(&self, count: u32) {
        self.state.lock().unwrap().lost_decrement_acks = count;
    }

    /// Make the next `count` booking lookups (`find_by_*`) fail with a storage fault.
    ///
    /// The test helpers [`Self::booking`] and [`Self::event`] are never affected.
    pub fn fail_next_lookups(&self, count: u32) {
        self.state.lock().unwrap().failing_lookups = count;
    }

    /// Make listing reminder candidates for `event_id` fail until healed.
    pub fn fail_reminder_candidates_for(&self, event_id: EventId) {
        self.with_state(|state| state.failing_candidate_events.insert(event_id));
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

fn newest_first(mut bookings: Vec<Booking>) -> Vec<Booking> {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    bookings
}

impl InventoryLedger for InMemoryStore {
    fn decrement_once(
        &self,
        event_id: EventId,
        tickets: u32,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Event, InventoryError> {
                if state.failing_decrements > 0 {
                    state.failing_decrements -= 1;
                    return Err(InventoryError::Storage("injected decrement fault".to_string()));
                }
                if state.ledger.contains_key(&booking_id) {
                    return state
                        .events
                        .get(&event_id)
                        .cloned()
                        .ok_or(InventoryError::EventNotFound(event_id));
                }
                let event = state
                    .events
                    .get_mut(&event_id)
                    .ok_or(InventoryError::EventNotFound(event_id))?;
                apply_decrement(event, tickets)?;
                let event = event.clone();
                state.ledger.insert(
                    booking_id,
                    LedgerEntry {
                        event_id,
                        tickets,
                        released: false,
                    },
                );
                state.decrements.push((event_id, booking_id, tickets));
                if state.lost_decrement_acks > 0 {
                    state.lost_decrement_acks -= 1;
                    return Err(InventoryError::Storage("injected lost acknowledgement".to_string()));
                }
                Ok(event)
            })
        })
    }

    fn check_availability(
        &self,
        event_id: EventId,
        tickets: u32,
    ) -> Pin<Box<dyn Future<Output = Result<bool, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| {
                state
                    .events
                    .get(&event_id)
                    .map(|event| event.available_tickets >= tickets)
                    .ok_or(InventoryError::EventNotFound(event_id))
            })
        })
    }

    fn release(
        &self,
        event_id: EventId,
        tickets: u32,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Event, InventoryError> {
                let event = state
                    .events
                    .get_mut(&event_id)
                    .ok_or(InventoryError::EventNotFound(event_id))?;
                let Some(entry) = state
                    .ledger
                    .get_mut(&booking_id)
                    .filter(|entry| entry.event_id == event_id && !entry.released)
                else {
                    return Ok(event.clone());
                };
                entry.released = true;
                apply_release(event, entry.tickets);
                state.releases.push((event_id, booking_id, entry.tickets));
                debug_assert_eq!(entry.tickets, tickets);
                Ok(event.clone())
            })
        })
    }

    fn resize(
        &self,
        event_id: EventId,
        new_total: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Event, InventoryError> {
                let event = state
                    .events
                    .get_mut(&event_id)
                    .ok_or(InventoryError::EventNotFound(event_id))?;
                apply_resize(event, new_total)?;
                Ok(event.clone())
            })
        })
    }
}

impl EventCatalog for InMemoryStore {
    fn insert_event(
        &self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.put_event(event.clone());
            Ok(event)
        })
    }

    fn find_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, InventoryError>> + Send + '_>> {
        Box::pin(async move { Ok(self.event(event_id)) })
    }

    fn list_events(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let mut events: Vec<Event> = self.with_state(|state| {
                state
                    .events
                    .values()
                    .filter(|event| filter.matches(event))
                    .cloned()
                    .collect()
            });
            events.sort_by_key(|event| event.date);
            Ok(events)
        })
    }

    fn update_event(
        &self,
        event_id: EventId,
        update: EventUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Event, InventoryError> {
                let event = state
                    .events
                    .get_mut(&event_id)
                    .ok_or(InventoryError::EventNotFound(event_id))?;
                apply_update(event, update);
                Ok(event.clone())
            })
        })
    }

    fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Event, InventoryError> {
                let event = state
                    .events
                    .get_mut(&event_id)
                    .ok_or(InventoryError::EventNotFound(event_id))?;
                event.status = derive_status(event.available_tickets, status);
                Ok(event.clone())
            })
        })
    }

    fn delete_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, InventoryError>> + Send + '_>> {
        Box::pin(async move { Ok(self.with_state(|state| state.events.remove(&event_id).is_some())) })
    }

    fn list_active_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let mut events: Vec<Event> = self.with_state(|state| {
                state
                    .events
                    .values()
                    .filter(|e| e.status == EventStatus::Active && e.date >= start && e.date < end)
                    .cloned()
                    .collect()
            });
            events.sort_by_key(|event| event.date);
            Ok(events)
        })
    }
}

impl BookingStore for InMemoryStore {
    fn insert_booking(
        &self,
        booking: Booking,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.put_booking(booking.clone());
            Ok(booking)
        })
    }

    fn find_by_id(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Option<Booking>, StoreError> {
                state.lookup_fault()?;
                Ok(state.bookings.get(&id).cloned())
            })
        })
    }

    fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            self.with_state(|state| -> Result<Option<Booking>, StoreError> {
                state.lookup_fault()?;
                Ok(state
                    .bookings
                    .values()
                    .find(|b| b.external_session_id.as_deref() == Some(session_id.as_str()))
                    .cloned())
            })
        })
    }

    fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        let transaction_id = transaction_id.to_string();
        Box::pin(async move {
            self.with_state(|state| -> Result<Option<Booking>, StoreError> {
                state.lookup_fault()?;
                Ok(state
                    .bookings
                    .values()
                    .find(|b| b.external_transaction_id.as_deref() == Some(transaction_id.as_str()))
                    .cloned())
            })
        })
    }

    fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        let reference = reference.to_string();
        Box::pin(async move {
            self.with_state(|state| -> Result<Option<Booking>, StoreError> {
                state.lookup_fault()?;
                Ok(state
                    .bookings
                    .values()
                    .find(|b| b.external_payment_reference.as_deref() == Some(reference.as_str()))
                    .cloned())
            })
        })
    }

    fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let bookings = self.with_state(|state| {
                state
                    .bookings
                    .values()
                    .filter(|b| b.user_id == user_id)
                    .cloned()
                    .collect()
            });
            Ok(newest_first(bookings))
        })
    }

    fn list_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let bookings = self.with_state(|state| state.bookings.values().cloned().collect());
            Ok(newest_first(bookings))
        })
    }

    fn list_reminder_candidates(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut bookings: Vec<Booking> = self.with_state(|state| {
                if state.failing_candidate_events.contains(&event_id) {
                    return Err(StoreError::Storage("injected candidate listing fault".to_string()));
                }
                Ok(state
                    .bookings
                    .values()
                    .filter(|b| {
                        b.event_id == event_id
                            && b.payment_status == PaymentStatus::Completed
                            && !b.reminder_sent
                    })
                    .cloned()
                    .collect())
            })?;
            bookings.sort_by_key(|b| b.created_at);
            Ok(bookings)
        })
    }

    fn list_unsettled(
        &self,
        idle_since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut bookings: Vec<Booking> = self.with_state(|state| {
                state
                    .bookings
                    .values()
                    .filter(|b| {
                        b.payment_status == PaymentStatus::Completed
                            && match b.inventory_commit {
                                InventoryCommit::Stranded => true,
                                InventoryCommit::Uncommitted => b.updated_at < idle_since,
                                _ => false,
                            }
                    })
                    .cloned()
                    .collect()
            });
            bookings.sort_by_key(|b| b.updated_at);
            Ok(bookings)
        })
    }

    fn transition_payment_status(
        &self,
        id: BookingId,
        transition: Transition,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Booking, TransitionError> {
                let booking = state
                    .bookings
                    .get_mut(&id)
                    .ok_or(TransitionError::NotFound(id))?;
                if !transition.permits(booking) {
                    return Err(TransitionError::Stale(Box::new(booking.clone())));
                }
                transition.apply(booking, Utc::now());
                Ok(booking.clone())
            })
        })
    }

    fn set_inventory_commit(
        &self,
        id: BookingId,
        expected: InventoryCommit,
        next: InventoryCommit,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Booking, TransitionError> {
                let booking = state
                    .bookings
                    .get_mut(&id)
                    .ok_or(TransitionError::NotFound(id))?;
                if booking.inventory_commit != expected {
                    return Err(TransitionError::Stale(Box::new(booking.clone())));
                }
                booking.inventory_commit = next;
                booking.updated_at = Utc::now();
                Ok(booking.clone())
            })
        })
    }

    fn attach_session(
        &self,
        id: BookingId,
        session_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<Booking, TransitionError> {
                let booking = state
                    .bookings
                    .get_mut(&id)
                    .ok_or(TransitionError::NotFound(id))?;
                if !eventpass_core::booking::is_payable(booking) {
                    return Err(TransitionError::Stale(Box::new(booking.clone())));
                }
                booking.external_session_id = Some(session_id);
                booking.updated_at = Utc::now();
                Ok(booking.clone())
            })
        })
    }

    fn mark_reminder_sent(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self.with_state(|state| match state.bookings.get_mut(&id) {
                Some(booking) if !booking.reminder_sent => {
                    booking.reminder_sent = true;
                    true
                }
                _ => false,
            }))
        })
    }

    fn summary(&self) -> Pin<Box<dyn Future<Output = Result<BookingSummary, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.with_state(|state| -> Result<BookingSummary, StoreError> {
                let mut summary = BookingSummary::default();
                for booking in state.bookings.values() {
                    summary.total_bookings += 1;
                    if booking.payment_status == PaymentStatus::Completed {
                        summary.completed_bookings += 1;
                        summary.revenue = summary
                            .revenue
                            .checked_add(booking.total_amount)
                            .ok_or_else(|| StoreError::Storage("revenue overflow".to_string()))?;
                    }
                }
                Ok(summary)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventpass_core::types::Money;

    #[tokio::test]
    async fn decrement_is_conditional() {
        let store = InMemoryStore::new();
        let event = store.seed_event(2, 1000);

        let first = store.decrement_once(event.id, 2, BookingId::new()).await;
        assert_eq!(first.unwrap().status, EventStatus::SoldOut);

        let second = store.decrement_once(event.id, 1, BookingId::new()).await;
        assert!(matches!(
            second,
            Err(InventoryError::InsufficientInventory { available: 0, .. })
        ));
        assert_eq!(store.decrements().len(), 1);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let store = InMemoryStore::new();
        let event = store.seed_event(5, 1000);
        store.fail_next_decrements(1);

        assert!(matches!(
            store.decrement_once(event.id, 1, BookingId::new()).await,
            Err(InventoryError::Storage(_))
        ));
        assert!(store.decrement_once(event.id, 1, BookingId::new()).await.is_ok());
        assert_eq!(store.event(event.id).unwrap().available_tickets, 4);
    }

    #[tokio::test]
    async fn decrement_and_release_are_idempotent_per_booking() {
        let store = InMemoryStore::new();
        let event = store.seed_event(5, 1000);
        let booking_id = BookingId::new();
        store.lose_next_decrement_acks(1);

        assert!(matches!(
            store.decrement_once(event.id, 2, booking_id).await,
            Err(InventoryError::Storage(_))
        ));
        let retried = store.decrement_once(event.id, 2, booking_id).await.unwrap();
        assert_eq!(retried.available_tickets, 3);
        assert_eq!(store.decrement_count(booking_id), 1);

        let released = store.release(event.id, 2, booking_id).await.unwrap();
        assert_eq!(released.available_tickets, 5);
        let again = store.release(event.id, 2, booking_id).await.unwrap();
        assert_eq!(again.available_tickets, 5);
        assert_eq!(store.releases().len(), 1);

        let unknown = store.release(event.id, 2, BookingId::new()).await.unwrap();
        assert_eq!(unknown.available_tickets, 5);
    }

    #[tokio::test]
    async fn lookup_faults_are_consumed() {
        let store = InMemoryStore::new();
        store.fail_next_lookups(1);
        assert!(store.find_by_session_id("cs_1").await.is_err());
        assert_eq!(store.find_by_session_id("cs_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_transition_returns_current_record() {
        let store = InMemoryStore::new();
        let mut booking = Booking::pending(
            UserId::new(),
            EventId::new(),
            1,
            Money::from_minor_units(1000),
            Utc::now(),
        );
        booking.payment_status = PaymentStatus::Completed;
        store.put_booking(booking.clone());

        let result = store
            .transition_payment_status(
                booking.id,
                Transition::new([PaymentStatus::Pending], PaymentStatus::Failed),
            )
            .await;
        let Err(TransitionError::Stale(current)) = result else {
            unreachable!("expected stale transition");
        };
        assert_eq!(current.payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn reminder_flag_flips_once() {
        let store = InMemoryStore::new();
        let booking = Booking::pending(UserId::new(), EventId::new(), 1, Money::ZERO, Utc::now());
        store.put_booking(booking.clone());

        assert!(store.mark_reminder_sent(booking.id).await.unwrap());
        assert!(!store.mark_reminder_sent(booking.id).await.unwrap());
    }
}

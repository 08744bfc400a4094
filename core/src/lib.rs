//! # Eventpass Core
//!
//! Domain types and contracts for keeping an event's ticket inventory and its
//! bookings' payment state consistent while payment confirmations arrive through
//! several independent, unordered, possibly duplicated channels.
//!
//! ## Core Concepts
//!
//! - **Event**: owns the ticket counters (`total_tickets`, `available_tickets`)
//! - **Booking**: owns the payment lifecycle (`pending → completed | failed`)
//! - **Inventory Ledger**: atomic "decrement if available ≥ N" on an event
//! - **Booking Record Store**: compare-and-set transitions on a booking's status
//! - **Payment state machine**: pure `(Booking, PaymentSignal) → Decision`
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell: [`payment::decide`] and
//!   [`inventory::derive_status`] are pure; storage and the payment processor
//!   are injected behind traits
//! - The CAS on the booking record is the only synchronization point: whoever
//!   wins `{pending, failed} → completed` performs the single inventory decrement
//! - Storage traits return `Pin<Box<dyn Future>>` so they can be used as `Arc<dyn Trait>`
//!
//! ## Example
//!
//! ```ignore
//! use eventpass_core::payment::{decide, Decision, PaymentSignal};
//!
//! let signal = PaymentSignal::paid(Some("pi_123".into()), Some("cs_123".into()));
//! match decide(&booking, &signal, clock.now()) {
//!     Decision::Complete(transition) => {
//!         let booking = bookings.transition_payment_status(booking.id, transition).await?;
//!         ledger.decrement_once(booking.event_id, booking.tickets, booking.id).await?;
//!     }
//!     Decision::Fail(transition) => { /* ... */ }
//!     Decision::Ignore(reason) => { /* redundant signal */ }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod booking;
pub mod inventory;
pub mod notifier;
pub mod payment;
pub mod processor;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;

/// Environment module - Dependency injection traits
///
/// All time-dependent logic reads the current instant through [`environment::Clock`]
/// so tests can pin it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(time);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation of [`Clock`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use types::{
    Booking, BookingId, Event, EventId, EventStatus, FailureReason, InventoryCommit, Money,
    PaymentStatus, Principal, Role, UserId,
};

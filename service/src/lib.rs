//! # Eventpass
//!
//! Payment reconciliation for event bookings: keeps each event's ticket
//! inventory consistent with its bookings' payment state while payment
//! confirmations arrive through several independent channels.
//!
//! # Architecture
//!
//! ```text
//!  processor webhook     client verify      owner/admin sync
//!         │                    │                    │
//!         └────────────┬───────┴────────────────────┘
//!                      ▼
//!            ReconciliationEngine::apply
//!                      │
//!         decide(booking, signal)      (pure)
//!                      │
//!       BookingStore::transition_payment_status   (CAS)
//!                      │  winner only
//!                      ▼
//!        InventoryLedger::decrement_once          (atomic, once per booking)
//! ```
//!
//! Bookings are created `pending` without touching inventory. Tickets leave
//! the pool exactly once, when the booking first reaches `completed`. A
//! booking paid after its event sold out ends `failed` and refund-eligible.
//!
//! # Modules
//!
//! - [`service`]: the caller-facing [`BookingService`]
//! - [`reconciliation`]: the engine every payment channel funnels into
//! - [`checkout`]: booking ↔ checkout session translation
//! - [`webhook`]: notification signatures and envelope
//! - [`reminders`]: day-before reminder dispatch
//! - [`processor_http`]: `reqwest` client for the checkout API
//! - [`config`], [`error`], [`metrics`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod checkout;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod processor_http;
pub mod reconciliation;
pub mod reminders;
pub mod service;
pub mod webhook;

pub use admin::AdminStats;
pub use config::{AppEnv, Config, ConfigError, ProcessorConfig};
pub use error::{BookingError, ErrorKind};
pub use reconciliation::{Channel, ReconciliationEngine, ReconciliationOutcome, RepairReport};
pub use reminders::{ReminderDispatcher, ReminderReport};
pub use service::{
    BookingDetails, BookingService, CheckoutStart, PaymentView, Payments, ServiceSettings, Storage,
    SyncReport,
};
pub use webhook::{Acknowledgement, WebhookError, WebhookVerifier};

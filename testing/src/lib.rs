//! # Eventpass Testing
//!
//! Testing utilities for the booking and payment reconciliation crates.
//!
//! This crate provides:
//! - Mock implementations of the Environment traits (`FixedClock`)
//! - In-memory implementations of the storage traits (`InMemoryStore`)
//! - A scriptable payment processor and a recording notifier
//! - Property-based testing strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use eventpass_testing::{InMemoryStore, MockPaymentProcessor, test_clock};
//!
//! #[tokio::test]
//! async fn webhook_completes_booking() {
//!     let store = InMemoryStore::new();
//!     let event = store.seed_event(5, 2500);
//!     let processor = MockPaymentProcessor::new();
//!     // build the service over `store`, `processor` and `test_clock()` ...
//! }
//! ```

pub mod processor;
pub mod store;

use chrono::{DateTime, Utc};
use eventpass_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventpass_testing::mocks::FixedClock;
    /// use eventpass_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that tests can move forward.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`.
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }

        /// Move forward by `by`.
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::sync::Once;

    static TRACING: Once = Once::new();

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Respects `RUST_LOG`; safe to call from every test.
    pub fn init_test_tracing() {
        TRACING.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "warn".into()),
                )
                .with_test_writer()
                .try_init();
        });
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use eventpass_core::payment::PaymentSignal;
    use eventpass_core::types::{FailureReason, Money};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    /// Prices between 0.00 and 10 000.000, with up to three decimal places.
    pub fn money() -> impl Strategy<Value = Money> {
        (0i64..10_000_000).prop_map(|mills| Money::new(Decimal::new(mills, 3)))
    }

    /// Any payment signal.
    pub fn payment_signal() -> impl Strategy<Value = PaymentSignal> {
        prop_oneof![
            "pi_[a-z0-9]{4}".prop_map(|reference| PaymentSignal::paid(Some(reference), None)),
            Just(PaymentSignal::unpaid(FailureReason::Unpaid)),
            Just(PaymentSignal::unpaid(FailureReason::Expired)),
        ]
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use processor::{MockPaymentProcessor, RecordingNotifier};
pub use store::InMemoryStore;

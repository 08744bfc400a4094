//! Outbound notification contract used by the reminder trigger.

use crate::types::{Booking, Event};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// What a reminder needs: the booking and the event it is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderSnapshot {
    /// The completed booking.
    pub booking: Booking,
    /// Its event.
    pub event: Event,
}

/// Delivers reminders to booking owners.
pub trait Notifier: Send + Sync {
    /// Send one reminder.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails; the booking is retried next run.
    fn dispatch(
        &self,
        reminder: ReminderSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

//! Notifier that writes reminders to the log.
//!
//! Stands in for outbound email until a delivery provider is wired up.

use eventpass_core::notifier::{Notifier, NotifyError, ReminderSnapshot};
use std::future::Future;
use std::pin::Pin;

/// Logs each reminder at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(
        &self,
        reminder: ReminderSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                booking_id = %reminder.booking.id,
                user_id = %reminder.booking.user_id,
                event_id = %reminder.event.id,
                event = %reminder.event.title,
                venue = %reminder.event.venue.name,
                time = %reminder.event.time,
                date = %reminder.event.date,
                tickets = reminder.booking.tickets,
                "Event reminder"
            );
            Ok(())
        })
    }
}

//! Day-before reminder dispatch.
//!
//! Once a day the dispatcher looks at active events taking place tomorrow
//! (deployment local time), hands every completed, un-reminded booking to the
//! [`Notifier`] and marks it sent. A failed dispatch, or an event whose bookings
//! cannot be listed, is logged and left for the next run; it does not stop the others.

use crate::config::{ConfigError, ReminderConfig};
use crate::error::BookingError;
use crate::metrics;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use eventpass_core::booking::BookingStore;
use eventpass_core::environment::Clock;
use eventpass_core::inventory::EventCatalog;
use eventpass_core::notifier::{Notifier, ReminderSnapshot};
use std::sync::Arc;

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    /// Tomorrow 00:00 local.
    pub start: DateTime<Utc>,
    /// The day after tomorrow 00:00 local.
    pub end: DateTime<Utc>,
}

/// Counts from one reminder run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderReport {
    /// Events in the window.
    pub events: usize,
    /// Reminders delivered and marked.
    pub sent: usize,
    /// Dispatches that failed; retried next run.
    pub failed: usize,
    /// Events whose bookings could not be listed; retried next run.
    pub failed_events: usize,
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// The window covering the local calendar day after `now`.
#[must_use]
pub fn reminder_window(now: DateTime<Utc>, offset: FixedOffset) -> Option<ReminderWindow> {
    let today = now.with_timezone(&offset).date_naive();
    let tomorrow = today.checked_add_days(Days::new(1))?;
    let day_after = tomorrow.checked_add_days(Days::new(1))?;
    Some(ReminderWindow {
        start: local_midnight(tomorrow, offset)?,
        end: local_midnight(day_after, offset)?,
    })
}

/// First `hour:00` local strictly after `now`.
#[must_use]
pub fn next_run_after(now: DateTime<Utc>, hour: u32, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&offset).date_naive();
    let at = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let run_today = offset
        .from_local_datetime(&today.and_time(at))
        .single()?
        .with_timezone(&Utc);
    if run_today > now {
        return Some(run_today);
    }
    let tomorrow = today.checked_add_days(Days::new(1))?;
    offset
        .from_local_datetime(&tomorrow.and_time(at))
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Sends day-before reminders.
#[derive(Clone)]
pub struct ReminderDispatcher {
    catalog: Arc<dyn EventCatalog>,
    bookings: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    hour: u32,
    offset: FixedOffset,
}

impl ReminderDispatcher {
    /// Create a dispatcher on the schedule in `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the schedule is out of range.
    pub fn new(
        catalog: Arc<dyn EventCatalog>,
        bookings: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: ReminderConfig,
    ) -> Result<Self, ConfigError> {
        if config.hour > 23 {
            return Err(ConfigError::InvalidReminderHour(config.hour));
        }
        Ok(Self {
            catalog,
            bookings,
            notifier,
            clock,
            hour: config.hour,
            offset: config.offset()?,
        })
    }

    /// Run one pass over tomorrow's events.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the events in the window cannot be listed. Per-event
    /// listing failures and individual dispatch failures are counted in the report.
    pub async fn run_once(&self) -> Result<ReminderReport, BookingError> {
        let now = self.clock.now();
        let window = reminder_window(now, self.offset)
            .ok_or_else(|| BookingError::Internal(format!("no reminder window after {now}")))?;
        let events = self
            .catalog
            .list_active_between(window.start, window.end)
            .await?;

        let mut report = ReminderReport {
            events: events.len(),
            ..ReminderReport::default()
        };

        for event in events {
            let candidates = match self.bookings.list_reminder_candidates(event.id).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    tracing::error!(
                        event_id = %event.id,
                        error = %err,
                        "Could not list reminder candidates; skipping event until next run"
                    );
                    metrics::record_reminder("event_failed");
                    report.failed_events += 1;
                    continue;
                }
            };
            for booking in candidates {
                let booking_id = booking.id;
                let reminder = ReminderSnapshot {
                    booking,
                    event: event.clone(),
                };
                if let Err(err) = self.notifier.dispatch(reminder).await {
                    tracing::warn!(
                        booking_id = %booking_id,
                        event_id = %event.id,
                        error = %err,
                        "Reminder dispatch failed; will retry next run"
                    );
                    metrics::record_reminder("failed");
                    report.failed += 1;
                    continue;
                }
                match self.bookings.mark_reminder_sent(booking_id).await {
                    Ok(_) => {
                        metrics::record_reminder("sent");
                        report.sent += 1;
                    }
                    Err(err) => {
                        tracing::error!(
                            booking_id = %booking_id,
                            error = %err,
                            "Reminder sent but not marked"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            window_start = %window.start,
            events = report.events,
            sent = report.sent,
            failed = report.failed,
            failed_events = report.failed_events,
            "Reminder run finished"
        );
        Ok(report)
    }

    /// Run every day at the configured hour until the task is dropped.
    pub async fn run_daily(self) {
        loop {
            let now = self.clock.now();
            let Some(next) = next_run_after(now, self.hour, self.offset) else {
                tracing::error!(%now, "Cannot schedule next reminder run");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next_run = %next, "Reminder run scheduled");
            tokio::time::sleep(wait).await;

            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "Reminder run failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn window_is_next_local_day() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let window = reminder_window(at("2025-03-10T09:00:00Z"), utc).unwrap();
        assert_eq!(window.start, at("2025-03-11T00:00:00Z"));
        assert_eq!(window.end, at("2025-03-12T00:00:00Z"));
    }

    #[test]
    fn window_follows_local_offset() {
        // 02:00 UTC on the 10th is still the 9th in New York (UTC-5).
        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        let window = reminder_window(at("2025-03-10T02:00:00Z"), new_york).unwrap();
        assert_eq!(window.start, at("2025-03-10T05:00:00Z"));
        assert_eq!(window.end, at("2025-03-11T05:00:00Z"));
    }

    #[test]
    fn next_run_is_today_or_tomorrow() {
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(
            next_run_after(at("2025-03-10T08:59:59Z"), 9, utc),
            Some(at("2025-03-10T09:00:00Z"))
        );
        assert_eq!(
            next_run_after(at("2025-03-10T09:00:00Z"), 9, utc),
            Some(at("2025-03-11T09:00:00Z"))
        );

        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(
            next_run_after(at("2025-03-10T01:00:00Z"), 9, tokyo),
            Some(at("2025-03-11T00:00:00Z"))
        );
    }
}

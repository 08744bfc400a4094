//! Payment reconciliation engine.
//!
//! Every payment channel (webhook, client verify, manual sync) funnels into
//! [`ReconciliationEngine::apply`]. The engine asks [`decide`] what the signal
//! means, pushes the resulting transition through the booking store's
//! compare-and-set, and only the caller whose CAS moved the booking to
//! `completed` takes tickets out of the ledger.
//!
//! # Inventory commit states
//!
//! ```text
//! uncommitted ──decrement ok──────────► committed ──refund──► released
//!      │      ──event sold out────────► (booking failed, refund-eligible)
//!      │      ──event deleted─────────► orphaned
//!      └───── ──storage fault─────────► stranded ──repair sweep──► uncommitted
//! ```
//!
//! The ledger decrement is idempotent per booking, so the repair sweep may retry
//! a decrement whose acknowledgement was lost. The sweep also picks up completed
//! bookings left `uncommitted` for longer than [`UNSETTLED_GRACE_SECS`], which is
//! where a booking ends up when the commit marker itself could not be written.

use crate::error::BookingError;
use crate::metrics;
use eventpass_core::booking::{BookingStore, PaymentFields, Transition, TransitionError};
use eventpass_core::environment::Clock;
use eventpass_core::inventory::{InventoryError, InventoryLedger};
use eventpass_core::payment::{Decision, PaymentSignal, decide};
use eventpass_core::types::{Booking, BookingId, FailureReason, InventoryCommit, PaymentStatus};
use std::sync::Arc;

/// How long a completed booking may stay `uncommitted` before the repair sweep retries it.
pub const UNSETTLED_GRACE_SECS: i64 = 300;

/// Where a payment signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Processor notification.
    Webhook,
    /// Client polling after checkout.
    Verify,
    /// Owner or admin asked for a refresh.
    Sync,
    /// Simulated payment with no processor configured.
    Test,
    /// Stranded-inventory repair sweep.
    Repair,
}

impl Channel {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Verify => "verify",
            Self::Sync => "sync",
            Self::Test => "test",
            Self::Repair => "repair",
        }
    }
}

/// What reconciliation did with a signal. Every variant carries the booking as stored afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// This call completed the booking and committed its tickets.
    Completed(Booking),
    /// This call moved the booking to failed.
    Failed(Booking),
    /// The signal carried no new information, or another caller got there first.
    Unchanged(Booking),
    /// The booking was paid but the event had sold out; it is now failed and refund-eligible.
    InventoryConflict(Booking),
    /// The booking completed but its decrement hit a storage fault; the repair sweep retries it.
    InventoryStranded(Booking),
    /// The booking completed but its event no longer exists.
    Orphaned(Booking),
}

impl ReconciliationOutcome {
    /// The booking after reconciliation.
    #[must_use]
    pub const fn booking(&self) -> &Booking {
        match self {
            Self::Completed(b)
            | Self::Failed(b)
            | Self::Unchanged(b)
            | Self::InventoryConflict(b)
            | Self::InventoryStranded(b)
            | Self::Orphaned(b) => b,
        }
    }

    /// Take the booking.
    #[must_use]
    pub fn into_booking(self) -> Booking {
        match self {
            Self::Completed(b)
            | Self::Failed(b)
            | Self::Unchanged(b)
            | Self::InventoryConflict(b)
            | Self::InventoryStranded(b)
            | Self::Orphaned(b) => b,
        }
    }

    /// Whether this call changed the booking's payment status.
    #[must_use]
    pub const fn changed_status(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Unchanged(_) => "unchanged",
            Self::InventoryConflict(_) => "inventory_conflict",
            Self::InventoryStranded(_) => "inventory_stranded",
            Self::Orphaned(_) => "orphaned",
        }
    }
}

/// Counts from one repair sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Unsettled bookings found.
    pub found: usize,
    /// Bookings whose tickets are now committed.
    pub repaired: usize,
    /// Bookings that lost the event's last tickets.
    pub conflicts: usize,
    /// Bookings whose event has gone.
    pub orphaned: usize,
    /// Bookings still unsettled, or claimed by another sweep.
    pub remaining: usize,
}

/// Drives booking status and ticket inventory from payment signals.
#[derive(Clone)]
pub struct ReconciliationEngine {
    bookings: Arc<dyn BookingStore>,
    ledger: Arc<dyn InventoryLedger>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    /// Create an engine over the given stores.
    #[must_use]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<dyn InventoryLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bookings,
            ledger,
            clock,
        }
    }

    /// Apply a payment signal to `booking`.
    ///
    /// `booking` is the caller's last read; the compare-and-set guards against it being stale.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the booking vanished
    /// - `Internal` on storage faults in the booking store
    pub async fn apply(
        &self,
        booking: &Booking,
        signal: &PaymentSignal,
        channel: Channel,
    ) -> Result<ReconciliationOutcome, BookingError> {
        let outcome = match decide(booking, signal, self.clock.now()) {
            Decision::Ignore(reason) => {
                tracing::debug!(
                    booking_id = %booking.id,
                    channel = channel.as_str(),
                    status = %booking.payment_status,
                    reason = reason.as_str(),
                    "Payment signal carries no new information"
                );
                ReconciliationOutcome::Unchanged(booking.clone())
            }
            Decision::Fail(transition) => {
                match self.transition(booking.id, transition, channel).await? {
                    Ok(failed) => {
                        tracing::info!(
                            booking_id = %failed.id,
                            channel = channel.as_str(),
                            reason = failed.failure_reason.map_or("unknown", |r| r.as_str()),
                            "Booking payment failed"
                        );
                        metrics::record_booking_failed(
                            failed.failure_reason.map_or("unknown", |r| r.as_str()),
                        );
                        ReconciliationOutcome::Failed(failed)
                    }
                    Err(current) => ReconciliationOutcome::Unchanged(current),
                }
            }
            Decision::Complete(transition) => {
                match self.transition(booking.id, transition, channel).await? {
                    Ok(completed) => {
                        tracing::info!(
                            booking_id = %completed.id,
                            event_id = %completed.event_id,
                            channel = channel.as_str(),
                            tickets = completed.tickets,
                            "Booking payment completed"
                        );
                        self.commit_inventory(completed, channel).await?
                    }
                    Err(current) => ReconciliationOutcome::Unchanged(current),
                }
            }
        };

        metrics::record_payment_signal(channel.as_str(), outcome.as_str());
        Ok(outcome)
    }

    /// Run the CAS. `Ok(Err(current))` means another caller won or the state moved on.
    async fn transition(
        &self,
        id: BookingId,
        transition: Transition,
        channel: Channel,
    ) -> Result<Result<Booking, Booking>, BookingError> {
        match self.bookings.transition_payment_status(id, transition).await {
            Ok(booking) => Ok(Ok(booking)),
            Err(TransitionError::Stale(current)) => {
                tracing::debug!(
                    booking_id = %id,
                    channel = channel.as_str(),
                    status = %current.payment_status,
                    "Lost payment status race"
                );
                Ok(Err(*current))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Take the booking's tickets out of the ledger. Only the CAS winner calls this.
    async fn commit_inventory(
        &self,
        booking: Booking,
        channel: Channel,
    ) -> Result<ReconciliationOutcome, BookingError> {
        match self
            .ledger
            .decrement_once(booking.event_id, booking.tickets, booking.id)
            .await
        {
            Ok(event) => {
                let booking = self
                    .mark_commit(booking, InventoryCommit::Committed)
                    .await?;
                tracing::info!(
                    booking_id = %booking.id,
                    event_id = %event.id,
                    available = event.available_tickets,
                    status = event.status.as_str(),
                    "Tickets committed"
                );
                metrics::record_booking_completed(
                    booking.tickets,
                    booking
                        .total_amount
                        .to_minor_units()
                        .and_then(|cents| u64::try_from(cents).ok())
                        .unwrap_or(0),
                );
                Ok(ReconciliationOutcome::Completed(booking))
            }
            Err(InventoryError::InsufficientInventory {
                requested,
                available,
                ..
            }) => {
                tracing::error!(
                    booking_id = %booking.id,
                    event_id = %booking.event_id,
                    channel = channel.as_str(),
                    requested,
                    available,
                    "Paid booking lost the last tickets; marking failed and refund-eligible"
                );
                metrics::record_inventory_conflict();
                let failed = Transition::new([PaymentStatus::Completed], PaymentStatus::Failed)
                    .with_expected_commit(InventoryCommit::Uncommitted)
                    .with_fields(PaymentFields {
                        failure_reason: Some(FailureReason::InventoryExhausted),
                        refund_eligible: Some(true),
                        ..PaymentFields::default()
                    });
                let booking = self
                    .bookings
                    .transition_payment_status(booking.id, failed)
                    .await?;
                Ok(ReconciliationOutcome::InventoryConflict(booking))
            }
            Err(InventoryError::EventNotFound(event_id)) => {
                tracing::warn!(
                    booking_id = %booking.id,
                    event_id = %event_id,
                    "Paid booking references a deleted event; skipping decrement"
                );
                let booking = self.mark_commit(booking, InventoryCommit::Orphaned).await?;
                Ok(ReconciliationOutcome::Orphaned(booking))
            }
            Err(err @ (InventoryError::Storage(_) | InventoryError::InvalidTotal(_))) => {
                tracing::error!(
                    booking_id = %booking.id,
                    event_id = %booking.event_id,
                    channel = channel.as_str(),
                    error = %err,
                    "Booking completed but tickets were not decremented; left for repair"
                );
                metrics::record_inventory_stranded();
                let booking = self.mark_commit(booking, InventoryCommit::Stranded).await?;
                Ok(ReconciliationOutcome::InventoryStranded(booking))
            }
        }
    }

    async fn mark_commit(
        &self,
        booking: Booking,
        next: InventoryCommit,
    ) -> Result<Booking, BookingError> {
        match self
            .bookings
            .set_inventory_commit(booking.id, InventoryCommit::Uncommitted, next)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(err) => {
                tracing::error!(
                    booking_id = %booking.id,
                    commit = next.as_str(),
                    error = %err,
                    "Could not record inventory commit state"
                );
                Err(err.into())
            }
        }
    }

    /// Retry the decrement for completed bookings whose tickets never settled.
    ///
    /// Stranded bookings are claimed by a `stranded → uncommitted` compare-and-set
    /// first. Bookings idle in `uncommitted` past [`UNSETTLED_GRACE_SECS`] are retried
    /// directly. The ledger ignores a repeated decrement for the same booking.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the unsettled list cannot be read.
    pub async fn repair_stranded(&self) -> Result<RepairReport, BookingError> {
        let idle_since = self.clock.now() - chrono::Duration::seconds(UNSETTLED_GRACE_SECS);
        let unsettled = self.bookings.list_unsettled(idle_since).await?;
        let mut report = RepairReport {
            found: unsettled.len(),
            ..RepairReport::default()
        };

        for booking in unsettled {
            let booking_id = booking.id;
            let claimed = if booking.inventory_commit == InventoryCommit::Stranded {
                match self
                    .bookings
                    .set_inventory_commit(booking.id, InventoryCommit::Stranded, InventoryCommit::Uncommitted)
                    .await
                {
                    Ok(claimed) => claimed,
                    Err(err) => {
                        tracing::debug!(booking_id = %booking.id, error = %err, "Stranded booking not claimed");
                        report.remaining += 1;
                        continue;
                    }
                }
            } else {
                tracing::warn!(
                    booking_id = %booking.id,
                    updated_at = %booking.updated_at,
                    "Completed booking never recorded its inventory commit; retrying"
                );
                booking
            };

            match self.commit_inventory(claimed, Channel::Repair).await {
                Ok(ReconciliationOutcome::Completed(_)) => report.repaired += 1,
                Ok(ReconciliationOutcome::InventoryConflict(_)) => report.conflicts += 1,
                Ok(ReconciliationOutcome::Orphaned(_)) => report.orphaned += 1,
                Ok(_) => report.remaining += 1,
                Err(err) => {
                    tracing::error!(booking_id = %booking_id, error = %err, "Repair failed");
                    report.remaining += 1;
                }
            }
        }

        if report.found > 0 {
            tracing::info!(
                found = report.found,
                repaired = report.repaired,
                conflicts = report.conflicts,
                orphaned = report.orphaned,
                remaining = report.remaining,
                "Unsettled inventory sweep finished"
            );
        }
        Ok(report)
    }

    /// Administrative refund.
    ///
    /// - completed with committed tickets: refunded, tickets released
    /// - completed with a deleted event: refunded
    /// - failed and refund-eligible: refunded
    ///
    /// # Errors
    ///
    /// - `NotRefundable` for any other state, including a concurrent refund
    /// - `NotFound` / `Internal` from the store
    pub async fn refund(&self, booking: &Booking) -> Result<Booking, BookingError> {
        let transition = match (booking.payment_status, booking.inventory_commit) {
            (PaymentStatus::Completed, commit @ (InventoryCommit::Committed | InventoryCommit::Orphaned)) => {
                let released = if commit == InventoryCommit::Committed {
                    InventoryCommit::Released
                } else {
                    commit
                };
                Transition::new([PaymentStatus::Completed], PaymentStatus::Refunded)
                    .with_expected_commit(commit)
                    .with_fields(PaymentFields {
                        inventory_commit: Some(released),
                        ..PaymentFields::default()
                    })
            }
            (PaymentStatus::Failed, _) if booking.refund_eligible => {
                Transition::new([PaymentStatus::Failed], PaymentStatus::Refunded)
            }
            _ => return Err(BookingError::NotRefundable(booking.id)),
        };

        let refunded = match self.bookings.transition_payment_status(booking.id, transition).await {
            Ok(refunded) => refunded,
            Err(TransitionError::Stale(_)) => return Err(BookingError::NotRefundable(booking.id)),
            Err(err) => return Err(err.into()),
        };

        if refunded.inventory_commit == InventoryCommit::Released
            && booking.inventory_commit == InventoryCommit::Committed
        {
            match self
                .ledger
                .release(refunded.event_id, refunded.tickets, refunded.id)
                .await
            {
                Ok(_) => {}
                Err(InventoryError::EventNotFound(event_id)) => {
                    tracing::warn!(booking_id = %refunded.id, event_id = %event_id, "Refunded booking's event is gone");
                }
                Err(err) => {
                    tracing::error!(
                        booking_id = %refunded.id,
                        event_id = %refunded.event_id,
                        error = %err,
                        "Booking refunded but tickets were not released"
                    );
                }
            }
        }

        tracing::info!(booking_id = %refunded.id, "Booking refunded");
        metrics::record_refund();
        Ok(refunded)
    }
}

//! The booking payment state machine.
//!
//! [`decide`] is a pure function from the current booking and an incoming payment
//! signal to a [`Decision`]. It never touches storage; the returned
//! [`Transition`] is handed to [`BookingStore::transition_payment_status`], whose
//! compare-and-set makes the decision safe against concurrent signals.
//!
//! ```text
//!            paid                 unpaid / expired
//! pending ─────────► completed    pending ─────────► failed
//! failed  ─────────► completed    (refund-eligible failed bookings stay failed)
//! ```
//!
//! [`BookingStore::transition_payment_status`]: crate::booking::BookingStore::transition_payment_status

use crate::booking::{PaymentFields, Transition};
use crate::types::{Booking, FailureReason, InventoryCommit, PaymentStatus};
use chrono::{DateTime, Utc};

/// What a payment channel learned about a booking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentSignal {
    /// The processor reports the payment as settled.
    Paid {
        /// Processor payment reference, if known.
        payment_reference: Option<String>,
        /// Processor transaction id, if known.
        transaction_id: Option<String>,
    },
    /// The processor reports the payment as not going through.
    Unpaid {
        /// Why.
        reason: FailureReason,
    },
}

impl PaymentSignal {
    /// A paid signal.
    #[must_use]
    pub const fn paid(payment_reference: Option<String>, transaction_id: Option<String>) -> Self {
        Self::Paid {
            payment_reference,
            transaction_id,
        }
    }

    /// An unpaid signal.
    #[must_use]
    pub const fn unpaid(reason: FailureReason) -> Self {
        Self::Unpaid { reason }
    }
}

/// Why a signal carried no new information.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The booking is already completed.
    AlreadyCompleted,
    /// The booking was refunded.
    Refunded,
    /// The booking is failed and flagged for refund; it cannot be resurrected.
    AwaitingRefund,
    /// An unpaid signal for a booking that is not pending.
    NotPending,
}

impl IgnoreReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyCompleted => "already_completed",
            Self::Refunded => "refunded",
            Self::AwaitingRefund => "awaiting_refund",
            Self::NotPending => "not_pending",
        }
    }
}

/// Outcome of [`decide`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Move the booking to completed; the CAS winner must then commit inventory.
    Complete(Transition),
    /// Move the booking to failed.
    Fail(Transition),
    /// Nothing to do.
    Ignore(IgnoreReason),
}

/// Decide what a payment signal means for a booking.
///
/// # Examples
///
/// ```
/// use eventpass_core::payment::{decide, Decision, IgnoreReason, PaymentSignal};
/// use eventpass_core::types::{Booking, EventId, Money, PaymentStatus, UserId};
/// use chrono::Utc;
///
/// let mut booking = Booking::pending(UserId::new(), EventId::new(), 1, Money::ZERO, Utc::now());
/// let signal = PaymentSignal::paid(Some("pi_1".to_string()), Some("cs_1".to_string()));
/// assert!(matches!(decide(&booking, &signal, Utc::now()), Decision::Complete(_)));
///
/// booking.payment_status = PaymentStatus::Completed;
/// assert_eq!(
///     decide(&booking, &signal, Utc::now()),
///     Decision::Ignore(IgnoreReason::AlreadyCompleted)
/// );
/// ```
#[must_use]
pub fn decide(booking: &Booking, signal: &PaymentSignal, now: DateTime<Utc>) -> Decision {
    match signal {
        PaymentSignal::Paid {
            payment_reference,
            transaction_id,
        } => match booking.payment_status {
            PaymentStatus::Completed => Decision::Ignore(IgnoreReason::AlreadyCompleted),
            PaymentStatus::Refunded => Decision::Ignore(IgnoreReason::Refunded),
            PaymentStatus::Failed if booking.refund_eligible => {
                Decision::Ignore(IgnoreReason::AwaitingRefund)
            }
            PaymentStatus::Pending | PaymentStatus::Failed => Decision::Complete(
                Transition::new(
                    [PaymentStatus::Pending, PaymentStatus::Failed],
                    PaymentStatus::Completed,
                )
                .with_expected_commit(InventoryCommit::Uncommitted)
                .excluding_refund_eligible()
                .with_fields(PaymentFields {
                    payment_reference: payment_reference.clone(),
                    transaction_id: transaction_id.clone(),
                    payment_date: Some(now),
                    ..PaymentFields::default()
                }),
            ),
        },
        PaymentSignal::Unpaid { reason } => match booking.payment_status {
            PaymentStatus::Pending => Decision::Fail(
                Transition::new([PaymentStatus::Pending], PaymentStatus::Failed).with_fields(
                    PaymentFields {
                        failure_reason: Some(*reason),
                        ..PaymentFields::default()
                    },
                ),
            ),
            PaymentStatus::Completed => Decision::Ignore(IgnoreReason::AlreadyCompleted),
            PaymentStatus::Refunded => Decision::Ignore(IgnoreReason::Refunded),
            PaymentStatus::Failed => Decision::Ignore(IgnoreReason::NotPending),
        },
    }
}

//! Booking record store: the booking lifecycle and its compare-and-set primitive.
//!
//! Every change to `payment_status` goes through
//! [`BookingStore::transition_payment_status`]. A [`Transition`] names the set of
//! statuses it may start from; if the stored booking is not in that set the store
//! returns [`TransitionError::Stale`] with the current record and changes nothing.
//! Because the check and the write are one atomic step, exactly one of several
//! concurrent callers racing `{pending, failed} → completed` wins.

use crate::types::{
    Booking, BookingId, EventId, FailureReason, InventoryCommit, Money, PaymentStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from plain booking store reads and writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage fault.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors from a compare-and-set transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The booking was not in an expected state. Carries the current record.
    #[error("Stale transition for booking {}: current status {}", .0.id, .0.payment_status)]
    Stale(Box<Booking>),

    /// No booking with this id.
    #[error("Booking not found: {0}")]
    NotFound(BookingId),

    /// Storage fault.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for TransitionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Storage(msg) => Self::Storage(msg),
        }
    }
}

/// Payment fields written alongside a status change.
///
/// `None` leaves the stored value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentFields {
    /// Processor payment reference.
    pub payment_reference: Option<String>,
    /// Processor transaction id.
    pub transaction_id: Option<String>,
    /// Payment date; only written if the booking has none yet.
    pub payment_date: Option<DateTime<Utc>>,
    /// Failure reason; stored only when the next status is `failed`.
    pub failure_reason: Option<FailureReason>,
    /// Refund eligibility flag.
    pub refund_eligible: Option<bool>,
    /// Inventory commit state.
    pub inventory_commit: Option<InventoryCommit>,
}

/// A compare-and-set request on a booking's payment status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Statuses the booking may currently be in.
    pub expected: Vec<PaymentStatus>,
    /// Inventory commit state the booking must currently be in, if constrained.
    pub expected_commit: Option<InventoryCommit>,
    /// Refuse bookings flagged refund-eligible.
    pub exclude_refund_eligible: bool,
    /// Status to move to.
    pub next: PaymentStatus,
    /// Fields written with the status.
    pub fields: PaymentFields,
}

impl Transition {
    /// A transition from any of `expected` to `next`.
    #[must_use]
    pub fn new(expected: impl Into<Vec<PaymentStatus>>, next: PaymentStatus) -> Self {
        Self {
            expected: expected.into(),
            expected_commit: None,
            exclude_refund_eligible: false,
            next,
            fields: PaymentFields::default(),
        }
    }

    /// Also require the current inventory commit state.
    #[must_use]
    pub const fn with_expected_commit(mut self, commit: InventoryCommit) -> Self {
        self.expected_commit = Some(commit);
        self
    }

    /// Refuse refund-eligible bookings.
    #[must_use]
    pub const fn excluding_refund_eligible(mut self) -> Self {
        self.exclude_refund_eligible = true;
        self
    }

    /// Set the fields written with the status.
    #[must_use]
    pub fn with_fields(mut self, fields: PaymentFields) -> Self {
        self.fields = fields;
        self
    }

    /// Whether the transition may be applied to `booking` as it is now.
    #[must_use]
    pub fn permits(&self, booking: &Booking) -> bool {
        self.expected.contains(&booking.payment_status)
            && self
                .expected_commit
                .is_none_or(|commit| commit == booking.inventory_commit)
            && !(self.exclude_refund_eligible && booking.refund_eligible)
    }

    /// Write the transition into `booking`. Callers check [`Self::permits`] first.
    pub fn apply(&self, booking: &mut Booking, now: DateTime<Utc>) {
        let fields = &self.fields;
        booking.payment_status = self.next;
        if let Some(reference) = &fields.payment_reference {
            booking.external_payment_reference = Some(reference.clone());
        }
        if let Some(transaction) = &fields.transaction_id {
            booking.external_transaction_id = Some(transaction.clone());
        }
        if booking.payment_date.is_none() {
            booking.payment_date = fields.payment_date;
        }
        booking.failure_reason = if self.next == PaymentStatus::Failed {
            fields.failure_reason.or(booking.failure_reason)
        } else {
            None
        };
        if let Some(eligible) = fields.refund_eligible {
            booking.refund_eligible = eligible;
        }
        if let Some(commit) = fields.inventory_commit {
            booking.inventory_commit = commit;
        }
        booking.updated_at = now;
    }
}

/// Aggregate figures for the admin dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BookingSummary {
    /// Number of bookings.
    pub total_bookings: u64,
    /// Number of completed bookings.
    pub completed_bookings: u64,
    /// Sum of `total_amount` over completed bookings.
    pub revenue: Money,
}

/// Persistent booking records.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the store can be shared as
/// `Arc<dyn BookingStore>`.
pub trait BookingStore: Send + Sync {
    /// Persist a new booking. Validation happens before this call.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the insert fails.
    fn insert_booking(
        &self,
        booking: Booking,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, StoreError>> + Send + '_>>;

    /// Look up by booking id.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn find_by_id(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>>;

    /// Look up by processor checkout session id.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>>;

    /// Look up by processor transaction id.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>>;

    /// Look up by processor payment reference.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>>;

    /// A user's bookings, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>>;

    /// Every booking, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn list_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>>;

    /// Completed bookings for `event_id` that have not been reminded.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn list_reminder_candidates(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>>;

    /// Completed bookings whose inventory commit never settled, oldest first.
    ///
    /// That is every completed booking marked `Stranded`, plus completed bookings
    /// still `Uncommitted` whose last update is before `idle_since`. The latter
    /// are completions whose commit marker was never written.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn list_unsettled(
        &self,
        idle_since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>>;

    /// Atomically apply `transition` if the booking currently permits it.
    ///
    /// # Errors
    ///
    /// - `Stale`: the booking is not in an expected state; nothing changed
    /// - `NotFound`: no such booking
    /// - `Storage`: the update could not be performed
    fn transition_payment_status(
        &self,
        id: BookingId,
        transition: Transition,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>>;

    /// Compare-and-set on the inventory commit state alone.
    ///
    /// # Errors
    ///
    /// - `Stale`: the booking's commit state is not `expected`
    /// - `NotFound`: no such booking
    /// - `Storage`: the update could not be performed
    fn set_inventory_commit(
        &self,
        id: BookingId,
        expected: InventoryCommit,
        next: InventoryCommit,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>>;

    /// Record a new checkout session on a booking that is still payable
    /// (`pending` or `failed`, not refund-eligible).
    ///
    /// # Errors
    ///
    /// - `Stale`: the booking is no longer payable
    /// - `NotFound`: no such booking
    /// - `Storage`: the update could not be performed
    fn attach_session(
        &self,
        id: BookingId,
        session_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>>;

    /// Flip `reminder_sent` from false to true. Returns whether this call flipped it.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the update fails.
    fn mark_reminder_sent(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>>;

    /// Booking counts and revenue.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the read fails.
    fn summary(&self) -> Pin<Box<dyn Future<Output = Result<BookingSummary, StoreError>> + Send + '_>>;
}

/// Whether a booking may be handed a new checkout session.
#[must_use]
pub const fn is_payable(booking: &Booking) -> bool {
    matches!(
        booking.payment_status,
        PaymentStatus::Pending | PaymentStatus::Failed
    ) && !booking.refund_eligible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(status: PaymentStatus) -> Booking {
        let mut b = Booking::pending(
            UserId::new(),
            EventId::new(),
            2,
            Money::from_minor_units(5000),
            Utc::now(),
        );
        b.payment_status = status;
        b
    }

    #[test]
    fn permits_checks_expected_set() {
        let t = Transition::new([PaymentStatus::Pending, PaymentStatus::Failed], PaymentStatus::Completed);
        assert!(t.permits(&booking(PaymentStatus::Pending)));
        assert!(t.permits(&booking(PaymentStatus::Failed)));
        assert!(!t.permits(&booking(PaymentStatus::Completed)));
        assert!(!t.permits(&booking(PaymentStatus::Refunded)));
    }

    #[test]
    fn refund_eligible_bookings_can_be_excluded() {
        let mut b = booking(PaymentStatus::Failed);
        b.refund_eligible = true;
        let t = Transition::new([PaymentStatus::Failed], PaymentStatus::Completed);
        assert!(t.permits(&b));
        assert!(!t.clone().excluding_refund_eligible().permits(&b));
        assert!(!is_payable(&b));
    }

    #[test]
    fn expected_commit_is_checked() {
        let mut b = booking(PaymentStatus::Completed);
        b.inventory_commit = InventoryCommit::Committed;
        let t = Transition::new([PaymentStatus::Completed], PaymentStatus::Failed)
            .with_expected_commit(InventoryCommit::Uncommitted);
        assert!(!t.permits(&b));
    }

    #[test]
    fn payment_date_is_written_once() {
        let first = Utc::now();
        let later = first + chrono::Duration::hours(1);
        let mut b = booking(PaymentStatus::Pending);

        let complete = |date| {
            Transition::new([PaymentStatus::Pending, PaymentStatus::Failed], PaymentStatus::Completed)
                .with_fields(PaymentFields {
                    payment_date: Some(date),
                    ..PaymentFields::default()
                })
        };
        complete(first).apply(&mut b, first);
        b.payment_status = PaymentStatus::Failed;
        complete(later).apply(&mut b, later);

        assert_eq!(b.payment_date, Some(first));
        assert_eq!(b.updated_at, later);
    }

    #[test]
    fn failure_reason_cleared_on_completion() {
        let now = Utc::now();
        let mut b = booking(PaymentStatus::Pending);
        Transition::new([PaymentStatus::Pending], PaymentStatus::Failed)
            .with_fields(PaymentFields {
                failure_reason: Some(FailureReason::Unpaid),
                ..PaymentFields::default()
            })
            .apply(&mut b, now);
        assert_eq!(b.failure_reason, Some(FailureReason::Unpaid));

        Transition::new([PaymentStatus::Failed], PaymentStatus::Completed).apply(&mut b, now);
        assert_eq!(b.failure_reason, None);
    }
}

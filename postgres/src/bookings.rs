//! `bookings` table: the booking record store and its compare-and-set.

use crate::PostgresStore;
use crate::rows::{BOOKING_COLUMNS, count_to_db, row_to_booking};
use chrono::{DateTime, Utc};
use eventpass_core::booking::{BookingStore, BookingSummary, StoreError, Transition, TransitionError};
use eventpass_core::types::{Booking, BookingId, EventId, InventoryCommit, Money, UserId};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::future::Future;
use std::pin::Pin;

fn storage(e: impl ToString) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn transition_storage(e: impl ToString) -> TransitionError {
    TransitionError::Storage(e.to_string())
}

fn to_bookings(rows: &[PgRow]) -> Result<Vec<Booking>, StoreError> {
    rows.iter()
        .map(row_to_booking)
        .collect::<Result<_, _>>()
        .map_err(storage)
}

impl PostgresStore {
    async fn fetch_booking_by(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE {column} = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(self.pool())
        .await
        .map_err(storage)?;
        row.as_ref().map(row_to_booking).transpose().map_err(storage)
    }

    async fn fetch_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(storage)?;
        row.as_ref().map(row_to_booking).transpose().map_err(storage)
    }

    /// Turn "no row updated" into `NotFound` or `Stale` with the current record.
    async fn resolve_cas_miss(
        &self,
        id: BookingId,
        row: Option<PgRow>,
    ) -> Result<Booking, TransitionError> {
        if let Some(row) = row {
            return row_to_booking(&row).map_err(transition_storage);
        }
        match self.fetch_booking(id).await? {
            Some(current) => Err(TransitionError::Stale(Box::new(current))),
            None => Err(TransitionError::NotFound(id)),
        }
    }
}

impl BookingStore for PostgresStore {
    fn insert_booking(
        &self,
        booking: Booking,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "INSERT INTO bookings ({BOOKING_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
                 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(booking.id.as_uuid())
            .bind(booking.user_id.as_uuid())
            .bind(booking.event_id.as_uuid())
            .bind(count_to_db(booking.tickets).map_err(storage)?)
            .bind(booking.total_amount.amount())
            .bind(booking.payment_status.as_str())
            .bind(&booking.external_session_id)
            .bind(&booking.external_payment_reference)
            .bind(&booking.external_transaction_id)
            .bind(booking.payment_date)
            .bind(booking.reminder_sent)
            .bind(booking.inventory_commit.as_str())
            .bind(booking.failure_reason.map(|reason| reason.as_str()))
            .bind(booking.refund_eligible)
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .fetch_one(self.pool())
            .await
            .map_err(storage)?;
            row_to_booking(&row).map_err(storage)
        })
    }

    fn find_by_id(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        Box::pin(self.fetch_booking(id))
    }

    fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            self.fetch_booking_by("external_session_id", &session_id)
                .await
        })
    }

    fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        let transaction_id = transaction_id.to_string();
        Box::pin(async move {
            self.fetch_booking_by("external_transaction_id", &transaction_id)
                .await
        })
    }

    fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Booking>, StoreError>> + Send + '_>> {
        let reference = reference.to_string();
        Box::pin(async move {
            self.fetch_booking_by("external_payment_reference", &reference)
                .await
        })
    }

    fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC"
            ))
            .bind(user_id.as_uuid())
            .fetch_all(self.pool())
            .await
            .map_err(storage)?;
            to_bookings(&rows)
        })
    }

    fn list_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY created_at DESC"
            ))
            .fetch_all(self.pool())
            .await
            .map_err(storage)?;
            to_bookings(&rows)
        })
    }

    fn list_reminder_candidates(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings \
                 WHERE event_id = $1 AND payment_status = 'completed' AND NOT reminder_sent \
                 ORDER BY created_at"
            ))
            .bind(event_id.as_uuid())
            .fetch_all(self.pool())
            .await
            .map_err(storage)?;
            to_bookings(&rows)
        })
    }

    fn list_unsettled(
        &self,
        idle_since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Booking>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings \
                 WHERE payment_status = 'completed' \
                   AND (inventory_commit = 'stranded' \
                        OR (inventory_commit = 'uncommitted' AND updated_at < $1)) \
                 ORDER BY updated_at"
            ))
            .bind(idle_since)
            .fetch_all(self.pool())
            .await
            .map_err(storage)?;
            to_bookings(&rows)
        })
    }

    fn transition_payment_status(
        &self,
        id: BookingId,
        transition: Transition,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>> {
        Box::pin(async move {
            let expected: Vec<String> = transition
                .expected
                .iter()
                .map(|status| status.as_str().to_string())
                .collect();
            let fields = &transition.fields;
            let row = sqlx::query(&format!(
                "UPDATE bookings \
                 SET payment_status = $3, \
                     external_payment_reference = COALESCE($4, external_payment_reference), \
                     external_transaction_id = COALESCE($5, external_transaction_id), \
                     payment_date = COALESCE(payment_date, $6), \
                     failure_reason = CASE WHEN $3 = 'failed' \
                                           THEN COALESCE($7, failure_reason) \
                                           ELSE NULL END, \
                     refund_eligible = COALESCE($8, refund_eligible), \
                     inventory_commit = COALESCE($9, inventory_commit), \
                     updated_at = now() \
                 WHERE id = $1 \
                   AND payment_status = ANY($2) \
                   AND ($10::text IS NULL OR inventory_commit = $10) \
                   AND NOT ($11 AND refund_eligible) \
                 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(&expected)
            .bind(transition.next.as_str())
            .bind(&fields.payment_reference)
            .bind(&fields.transaction_id)
            .bind(fields.payment_date)
            .bind(fields.failure_reason.map(|reason| reason.as_str()))
            .bind(fields.refund_eligible)
            .bind(fields.inventory_commit.map(|commit| commit.as_str()))
            .bind(transition.expected_commit.map(|commit| commit.as_str()))
            .bind(transition.exclude_refund_eligible)
            .fetch_optional(self.pool())
            .await
            .map_err(transition_storage)?;

            let booking = self.resolve_cas_miss(id, row).await?;
            tracing::debug!(
                booking_id = %id,
                status = %booking.payment_status,
                "Booking payment status written"
            );
            Ok(booking)
        })
    }

    fn set_inventory_commit(
        &self,
        id: BookingId,
        expected: InventoryCommit,
        next: InventoryCommit,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE bookings SET inventory_commit = $3, updated_at = now() \
                 WHERE id = $1 AND inventory_commit = $2 \
                 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(expected.as_str())
            .bind(next.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(transition_storage)?;
            self.resolve_cas_miss(id, row).await
        })
    }

    fn attach_session(
        &self,
        id: BookingId,
        session_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, TransitionError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE bookings SET external_session_id = $2, updated_at = now() \
                 WHERE id = $1 \
                   AND payment_status IN ('pending', 'failed') \
                   AND NOT refund_eligible \
                 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(&session_id)
            .fetch_optional(self.pool())
            .await
            .map_err(transition_storage)?;
            self.resolve_cas_miss(id, row).await
        })
    }

    fn mark_reminder_sent(
        &self,
        id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE bookings SET reminder_sent = TRUE, updated_at = now() \
                 WHERE id = $1 AND NOT reminder_sent",
            )
            .bind(id.as_uuid())
            .execute(self.pool())
            .await
            .map_err(storage)?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn summary(&self) -> Pin<Box<dyn Future<Output = Result<BookingSummary, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT COUNT(*) AS total_bookings, \
                        COUNT(*) FILTER (WHERE payment_status = 'completed') AS completed_bookings, \
                        COALESCE(SUM(total_amount) FILTER (WHERE payment_status = 'completed'), 0) \
                            AS revenue \
                 FROM bookings",
            )
            .fetch_one(self.pool())
            .await
            .map_err(storage)?;

            let total: i64 = row.try_get("total_bookings").map_err(storage)?;
            let completed: i64 = row.try_get("completed_bookings").map_err(storage)?;
            let revenue: Decimal = row.try_get("revenue").map_err(storage)?;
            Ok(BookingSummary {
                total_bookings: u64::try_from(total).map_err(storage)?,
                completed_bookings: u64::try_from(completed).map_err(storage)?,
                revenue: Money::new(revenue),
            })
        })
    }
}

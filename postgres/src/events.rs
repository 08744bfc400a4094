//! `events` table: catalog and inventory ledger.

use crate::PostgresStore;
use crate::rows::{EVENT_COLUMNS, count_to_db, row_to_event};
use chrono::{DateTime, Utc};
use eventpass_core::inventory::{EventCatalog, InventoryError, InventoryLedger};
use eventpass_core::types::{BookingId, Event, EventFilter, EventId, EventStatus, EventUpdate};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

/// Status recomputed from the post-update availability; `cancelled` sticks.
macro_rules! derived_status_sql {
    ($available:literal) => {
        concat!(
            "CASE WHEN status = 'cancelled' THEN 'cancelled' WHEN ",
            $available,
            " = 0 THEN 'sold-out' ELSE 'active' END"
        )
    };
}

fn storage(e: impl ToString) -> InventoryError {
    InventoryError::Storage(e.to_string())
}

/// Escape `ILIKE` wildcards so a search term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl PostgresStore {
    async fn fetch_event(&self, event_id: EventId) -> Result<Option<Event>, InventoryError> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(event_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(storage)?;
        row.as_ref().map(row_to_event).transpose().map_err(storage)
    }

    async fn update_event_returning(
        &self,
        sql: &str,
        event_id: EventId,
        arg: i32,
    ) -> Result<Option<Event>, InventoryError> {
        let row = sqlx::query(sql)
            .bind(event_id.as_uuid())
            .bind(arg)
            .fetch_optional(self.pool())
            .await
            .map_err(storage)?;
        row.as_ref().map(row_to_event).transpose().map_err(storage)
    }
}

impl InventoryLedger for PostgresStore {
    fn decrement_once(
        &self,
        event_id: EventId,
        tickets: u32,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let requested = count_to_db(tickets).map_err(storage)?;
            let mut tx = self.pool().begin().await.map_err(storage)?;

            let recorded = sqlx::query(
                "INSERT INTO ticket_decrements (booking_id, event_id, tickets) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (booking_id) DO NOTHING",
            )
            .bind(booking_id.as_uuid())
            .bind(event_id.as_uuid())
            .bind(requested)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            if recorded.rows_affected() == 0 {
                let _ = tx.rollback().await;
                tracing::debug!(
                    event_id = %event_id,
                    booking_id = %booking_id,
                    "Decrement already recorded for booking"
                );
                return self
                    .fetch_event(event_id)
                    .await?
                    .ok_or(InventoryError::EventNotFound(event_id));
            }

            let sql = format!(
                "UPDATE events \
                 SET available_tickets = available_tickets - $2, \
                     status = {} \
                 WHERE id = $1 AND available_tickets >= $2 \
                 RETURNING {EVENT_COLUMNS}",
                derived_status_sql!("available_tickets - $2")
            );
            let row = sqlx::query(&sql)
                .bind(event_id.as_uuid())
                .bind(requested)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;

            let Some(row) = row else {
                let _ = tx.rollback().await;
                // Nothing matched: either the event is gone or it has too few tickets.
                return match self.fetch_event(event_id).await? {
                    None => Err(InventoryError::EventNotFound(event_id)),
                    Some(event) => {
                        metrics::counter!("eventpass_inventory_decrements_rejected_total")
                            .increment(1);
                        Err(InventoryError::InsufficientInventory {
                            event_id,
                            requested: tickets,
                            available: event.available_tickets,
                        })
                    }
                };
            };
            let event = row_to_event(&row).map_err(storage)?;
            tx.commit().await.map_err(storage)?;

            tracing::debug!(
                event_id = %event_id,
                booking_id = %booking_id,
                tickets,
                available = event.available_tickets,
                "Tickets decremented"
            );
            Ok(event)
        })
    }

    fn check_availability(
        &self,
        event_id: EventId,
        tickets: u32,
    ) -> Pin<Box<dyn Future<Output = Result<bool, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            self.fetch_event(event_id)
                .await?
                .map(|event| event.available_tickets >= tickets)
                .ok_or(InventoryError::EventNotFound(event_id))
        })
    }

    fn release(
        &self,
        event_id: EventId,
        tickets: u32,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self.pool().begin().await.map_err(storage)?;
            let entry = sqlx::query(
                "UPDATE ticket_decrements SET released_at = now() \
                 WHERE booking_id = $1 AND event_id = $2 AND released_at IS NULL \
                 RETURNING tickets",
            )
            .bind(booking_id.as_uuid())
            .bind(event_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

            let Some(entry) = entry else {
                let _ = tx.rollback().await;
                tracing::debug!(
                    event_id = %event_id,
                    booking_id = %booking_id,
                    "No unreleased decrement for booking"
                );
                return self
                    .fetch_event(event_id)
                    .await?
                    .ok_or(InventoryError::EventNotFound(event_id));
            };
            let recorded: i32 = entry.try_get("tickets").map_err(storage)?;
            if count_to_db(tickets).ok() != Some(recorded) {
                tracing::warn!(
                    booking_id = %booking_id,
                    tickets,
                    recorded,
                    "Release count differs from ledger; using ledger"
                );
            }

            let sql = format!(
                "UPDATE events \
                 SET available_tickets = LEAST(total_tickets, available_tickets + $2), \
                     status = {} \
                 WHERE id = $1 \
                 RETURNING {EVENT_COLUMNS}",
                derived_status_sql!("LEAST(total_tickets, available_tickets + $2)")
            );
            let row = sqlx::query(&sql)
                .bind(event_id.as_uuid())
                .bind(recorded)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
            let Some(row) = row else {
                let _ = tx.rollback().await;
                return Err(InventoryError::EventNotFound(event_id));
            };
            let event = row_to_event(&row).map_err(storage)?;
            tx.commit().await.map_err(storage)?;

            tracing::info!(
                event_id = %event_id,
                booking_id = %booking_id,
                tickets = recorded,
                available = event.available_tickets,
                "Tickets released"
            );
            Ok(event)
        })
    }

    fn resize(
        &self,
        event_id: EventId,
        new_total: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            if new_total == 0 {
                return Err(InventoryError::InvalidTotal(new_total));
            }
            let total = count_to_db(new_total).map_err(storage)?;
            let sql = format!(
                "UPDATE events \
                 SET total_tickets = $2, \
                     available_tickets = GREATEST(0, $2 - (total_tickets - available_tickets)), \
                     status = {} \
                 WHERE id = $1 \
                 RETURNING {EVENT_COLUMNS}",
                derived_status_sql!("GREATEST(0, $2 - (total_tickets - available_tickets))")
            );
            self.update_event_returning(&sql, event_id, total)
                .await?
                .ok_or(InventoryError::EventNotFound(event_id))
        })
    }
}

impl EventCatalog for PostgresStore {
    fn insert_event(
        &self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "INSERT INTO events ({EVENT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
                 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(event.id.as_uuid())
            .bind(&event.title)
            .bind(&event.description)
            .bind(event.category.as_str())
            .bind(event.date)
            .bind(&event.time)
            .bind(&event.venue.name)
            .bind(&event.venue.address)
            .bind(&event.venue.city)
            .bind(&event.image)
            .bind(&event.organizer)
            .bind(event.price.amount())
            .bind(count_to_db(event.total_tickets).map_err(storage)?)
            .bind(count_to_db(event.available_tickets).map_err(storage)?)
            .bind(event.status.as_str())
            .bind(event.featured)
            .bind(event.created_at)
            .fetch_one(self.pool())
            .await
            .map_err(storage)?;
            row_to_event(&row).map_err(storage)
        })
    }

    fn find_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, InventoryError>> + Send + '_>> {
        Box::pin(self.fetch_event(event_id))
    }

    fn list_events(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let pattern = filter.search_term().map(|term| format!("%{}%", escape_like(term)));
            let rows = sqlx::query(&format!(
                "SELECT {EVENT_COLUMNS} FROM events \
                 WHERE ($1::text IS NULL OR category = $1) \
                   AND (NOT $2 OR featured) \
                   AND ($3::text IS NULL OR status = $3) \
                   AND ($4::text IS NULL \
                        OR title ILIKE $4 OR description ILIKE $4 OR venue_name ILIKE $4) \
                 ORDER BY date"
            ))
            .bind(filter.category.map(|category| category.as_str()))
            .bind(filter.featured)
            .bind(filter.status.map(|status| status.as_str()))
            .bind(pattern)
            .fetch_all(self.pool())
            .await
            .map_err(storage)?;
            rows.iter()
                .map(row_to_event)
                .collect::<Result<_, _>>()
                .map_err(storage)
        })
    }

    fn update_event(
        &self,
        event_id: EventId,
        update: EventUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let venue = update.venue;
            let row = sqlx::query(&format!(
                "UPDATE events \
                 SET title = COALESCE($2, title), \
                     description = COALESCE($3, description), \
                     category = COALESCE($4, category), \
                     date = COALESCE($5, date), \
                     time = COALESCE($6, time), \
                     venue_name = COALESCE($7, venue_name), \
                     venue_address = COALESCE($8, venue_address), \
                     venue_city = COALESCE($9, venue_city), \
                     image = COALESCE($10, image), \
                     organizer = COALESCE($11, organizer), \
                     price = COALESCE($12, price), \
                     featured = COALESCE($13, featured) \
                 WHERE id = $1 \
                 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(event_id.as_uuid())
            .bind(update.title)
            .bind(update.description)
            .bind(update.category.map(|category| category.as_str()))
            .bind(update.date)
            .bind(update.time)
            .bind(venue.as_ref().map(|venue| venue.name.clone()))
            .bind(venue.as_ref().map(|venue| venue.address.clone()))
            .bind(venue.map(|venue| venue.city))
            .bind(update.image)
            .bind(update.organizer)
            .bind(update.price.map(|price| price.amount()))
            .bind(update.featured)
            .fetch_optional(self.pool())
            .await
            .map_err(storage)?;
            row.as_ref()
                .map(row_to_event)
                .transpose()
                .map_err(storage)?
                .ok_or(InventoryError::EventNotFound(event_id))
        })
    }

    fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> Pin<Box<dyn Future<Output = Result<Event, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE events \
                 SET status = CASE WHEN $2 = 'cancelled' THEN 'cancelled' \
                                   WHEN available_tickets = 0 THEN 'sold-out' \
                                   ELSE 'active' END \
                 WHERE id = $1 \
                 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(event_id.as_uuid())
            .bind(status.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(storage)?;
            row.as_ref()
                .map(row_to_event)
                .transpose()
                .map_err(storage)?
                .ok_or(InventoryError::EventNotFound(event_id))
        })
    }

    fn delete_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM events WHERE id = $1")
                .bind(event_id.as_uuid())
                .execute(self.pool())
                .await
                .map_err(storage)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn list_active_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {EVENT_COLUMNS} FROM events \
                 WHERE status = 'active' AND date >= $1 AND date < $2 \
                 ORDER BY date"
            ))
            .bind(start)
            .bind(end)
            .fetch_all(self.pool())
            .await
            .map_err(storage)?;
            rows.iter()
                .map(row_to_event)
                .collect::<Result<_, _>>()
                .map_err(storage)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("jazz"), "jazz");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}

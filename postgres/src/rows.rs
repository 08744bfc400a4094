//! Row mapping between the `events`/`bookings` tables and domain types.

use eventpass_core::types::{
    Booking, BookingId, Event, EventCategory, EventId, EventStatus, FailureReason,
    InventoryCommit, Money, PaymentStatus, UserId, Venue,
};
use sqlx::Row;
use sqlx::postgres::PgRow;

pub(crate) const EVENT_COLUMNS: &str = "id, title, description, category, date, time, \
     venue_name, venue_address, venue_city, image, organizer, price, total_tickets, \
     available_tickets, status, featured, created_at";

pub(crate) const BOOKING_COLUMNS: &str = "id, user_id, event_id, tickets, total_amount, \
     payment_status, external_session_id, external_payment_reference, external_transaction_id, \
     payment_date, reminder_sent, inventory_commit, failure_reason, refund_eligible, \
     created_at, updated_at";

/// Bind a ticket count as `INTEGER`.
pub(crate) fn count_to_db(count: u32) -> Result<i32, String> {
    i32::try_from(count).map_err(|_| format!("ticket count out of range: {count}"))
}

fn count_from_db(row: &PgRow, column: &str) -> Result<u32, String> {
    let value: i32 = row.try_get(column).map_err(|e| e.to_string())?;
    u32::try_from(value).map_err(|_| format!("negative {column}: {value}"))
}

fn text<T>(row: &PgRow, column: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, String> {
    let raw: String = row.try_get(column).map_err(|e| e.to_string())?;
    parse(&raw).ok_or_else(|| format!("invalid {column}: {raw}"))
}

pub(crate) fn row_to_event(row: &PgRow) -> Result<Event, String> {
    let get_err = |e: sqlx::Error| e.to_string();
    Ok(Event {
        id: EventId::from_uuid(row.try_get("id").map_err(get_err)?),
        title: row.try_get("title").map_err(get_err)?,
        description: row.try_get("description").map_err(get_err)?,
        category: text(row, "category", EventCategory::parse)?,
        date: row.try_get("date").map_err(get_err)?,
        time: row.try_get("time").map_err(get_err)?,
        venue: Venue {
            name: row.try_get("venue_name").map_err(get_err)?,
            address: row.try_get("venue_address").map_err(get_err)?,
            city: row.try_get("venue_city").map_err(get_err)?,
        },
        image: row.try_get("image").map_err(get_err)?,
        organizer: row.try_get("organizer").map_err(get_err)?,
        price: Money::new(row.try_get("price").map_err(get_err)?),
        total_tickets: count_from_db(row, "total_tickets")?,
        available_tickets: count_from_db(row, "available_tickets")?,
        status: text(row, "status", EventStatus::parse)?,
        featured: row.try_get("featured").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
    })
}

pub(crate) fn row_to_booking(row: &PgRow) -> Result<Booking, String> {
    let get_err = |e: sqlx::Error| e.to_string();
    let failure_reason: Option<String> = row.try_get("failure_reason").map_err(get_err)?;
    let failure_reason = match failure_reason {
        Some(raw) => Some(
            FailureReason::parse(&raw).ok_or_else(|| format!("invalid failure_reason: {raw}"))?,
        ),
        None => None,
    };

    Ok(Booking {
        id: BookingId::from_uuid(row.try_get("id").map_err(get_err)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(get_err)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(get_err)?),
        tickets: count_from_db(row, "tickets")?,
        total_amount: Money::new(row.try_get("total_amount").map_err(get_err)?),
        payment_status: text(row, "payment_status", PaymentStatus::parse)?,
        external_session_id: row.try_get("external_session_id").map_err(get_err)?,
        external_payment_reference: row
            .try_get("external_payment_reference")
            .map_err(get_err)?,
        external_transaction_id: row.try_get("external_transaction_id").map_err(get_err)?,
        payment_date: row.try_get("payment_date").map_err(get_err)?,
        reminder_sent: row.try_get("reminder_sent").map_err(get_err)?,
        inventory_commit: text(row, "inventory_commit", InventoryCommit::parse)?,
        failure_reason,
        refund_eligible: row.try_get("refund_eligible").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_beyond_integer_range_are_rejected() {
        assert_eq!(count_to_db(3), Ok(3));
        assert!(count_to_db(u32::MAX).is_err());
    }
}

//! Operator operations: event management, stats, refunds.

use crate::error::BookingError;
use crate::metrics;
use crate::reconciliation::RepairReport;
use crate::service::{BookingDetails, BookingService};
use eventpass_core::inventory::new_event;
use eventpass_core::types::{
    Booking, BookingId, Event, EventDraft, EventFilter, EventId, EventStatus, EventUpdate, Money,
    Principal,
};

/// Totals for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminStats {
    /// Events on record.
    pub total_events: usize,
    /// Bookings on record.
    pub total_bookings: u64,
    /// Completed bookings.
    pub completed_bookings: u64,
    /// Sum of completed bookings' totals.
    pub revenue: Money,
}

fn require_admin(principal: &Principal) -> Result<(), BookingError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(BookingError::Forbidden)
    }
}

fn check_price(price: Money) -> Result<(), BookingError> {
    if price.is_sign_negative() {
        return Err(BookingError::Validation(format!("price must not be negative, got {price}")));
    }
    Ok(())
}

impl BookingService {
    /// Every booking with its event, newest first. Orphaned bookings are included.
    ///
    /// # Errors
    ///
    /// - `Forbidden` unless the caller is an admin
    /// - `Internal` on storage faults
    pub async fn list_all_bookings(&self, principal: &Principal) -> Result<Vec<BookingDetails>, BookingError> {
        require_admin(principal)?;
        let bookings = self.storage.bookings.list_all().await?;
        self.with_events(bookings).await
    }

    /// Create an event with its full ticket pool available.
    ///
    /// # Errors
    ///
    /// - `Forbidden` unless the caller is an admin
    /// - `Validation` for an empty title, organizer or venue name, a negative price or zero tickets
    pub async fn create_event(&self, principal: &Principal, draft: EventDraft) -> Result<Event, BookingError> {
        require_admin(principal)?;
        for (field, value) in [
            ("title", &draft.title),
            ("organizer", &draft.organizer),
            ("venue name", &draft.venue.name),
        ] {
            if value.trim().is_empty() {
                return Err(BookingError::Validation(format!("{field} is required")));
            }
        }
        check_price(draft.price)?;

        let event = new_event(draft, self.clock.now())?;
        let event = self.storage.catalog.insert_event(event).await?;
        tracing::info!(
            event_id = %event.id,
            title = %event.title,
            category = event.category.as_str(),
            total_tickets = event.total_tickets,
            "Event created"
        );
        metrics::record_event_created();
        Ok(event)
    }

    /// Update an event's details and optionally resize its ticket pool.
    ///
    /// Resizing keeps tickets already sold: `available = max(0, new_total - booked)`.
    ///
    /// # Errors
    ///
    /// - `Forbidden` unless the caller is an admin
    /// - `EventNotFound`
    /// - `Validation` for a negative price or a zero pool
    pub async fn update_event(
        &self,
        principal: &Principal,
        event_id: EventId,
        update: EventUpdate,
        total_tickets: Option<u32>,
    ) -> Result<Event, BookingError> {
        require_admin(principal)?;
        if let Some(price) = update.price {
            check_price(price)?;
        }

        let mut event = if update == EventUpdate::default() {
            self.storage
                .catalog
                .find_event(event_id)
                .await?
                .ok_or(BookingError::EventNotFound(event_id))?
        } else {
            self.storage.catalog.update_event(event_id, update).await?
        };
        if let Some(total) = total_tickets {
            event = self.storage.ledger.resize(event_id, total).await?;
        }

        tracing::info!(
            event_id = %event.id,
            total_tickets = event.total_tickets,
            available = event.available_tickets,
            status = event.status.as_str(),
            "Event updated"
        );
        Ok(event)
    }

    /// Stop sales for an event.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller is an admin; `EventNotFound`.
    pub async fn cancel_event(&self, principal: &Principal, event_id: EventId) -> Result<Event, BookingError> {
        self.set_status(principal, event_id, EventStatus::Cancelled).await
    }

    /// Reopen a cancelled event; it comes back sold out if no tickets are left.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller is an admin; `EventNotFound`.
    pub async fn reactivate_event(&self, principal: &Principal, event_id: EventId) -> Result<Event, BookingError> {
        self.set_status(principal, event_id, EventStatus::Active).await
    }

    async fn set_status(
        &self,
        principal: &Principal,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<Event, BookingError> {
        require_admin(principal)?;
        let event = self.storage.catalog.set_event_status(event_id, status).await?;
        tracing::info!(event_id = %event_id, status = event.status.as_str(), "Event status set");
        Ok(event)
    }

    /// Delete an event. Its bookings stay, as orphans.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller is an admin; `EventNotFound`.
    pub async fn delete_event(&self, principal: &Principal, event_id: EventId) -> Result<(), BookingError> {
        require_admin(principal)?;
        if !self.storage.catalog.delete_event(event_id).await? {
            return Err(BookingError::EventNotFound(event_id));
        }
        tracing::warn!(event_id = %event_id, "Event deleted; its bookings are now orphaned");
        Ok(())
    }

    /// Dashboard totals.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller is an admin; `Internal` on storage faults.
    pub async fn stats(&self, principal: &Principal) -> Result<AdminStats, BookingError> {
        require_admin(principal)?;
        let total_events = self
            .storage
            .catalog
            .list_events(EventFilter::default())
            .await?
            .len();
        let summary = self.storage.bookings.summary().await?;
        Ok(AdminStats {
            total_events,
            total_bookings: summary.total_bookings,
            completed_bookings: summary.completed_bookings,
            revenue: summary.revenue,
        })
    }

    /// Refund a paid booking, returning its tickets to the pool. No processor call is made.
    ///
    /// # Errors
    ///
    /// - `Forbidden` unless the caller is an admin
    /// - `NotFound`, `NotRefundable`
    pub async fn refund_booking(&self, principal: &Principal, booking_id: BookingId) -> Result<Booking, BookingError> {
        require_admin(principal)?;
        let booking = self.load_booking(booking_id).await?;
        let refunded = self.engine.refund(&booking).await?;
        tracing::info!(booking_id = %booking_id, admin_id = %principal.id, "Refund recorded");
        Ok(refunded)
    }

    /// Run the stranded-inventory repair sweep now.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller is an admin; `Internal` on storage faults.
    pub async fn repair_stranded(&self, principal: &Principal) -> Result<RepairReport, BookingError> {
        require_admin(principal)?;
        self.engine.repair_stranded().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::AppEnv;
    use crate::service::{Payments, ServiceSettings, Storage};
    use crate::webhook::WebhookVerifier;
    use eventpass_core::Decimal;
    use eventpass_core::types::{EventCategory, UserId, Venue};
    use eventpass_testing::{InMemoryStore, test_clock};
    use std::sync::Arc;

    fn service(store: &InMemoryStore) -> BookingService {
        BookingService::new(
            Storage::shared(store.clone()),
            Payments::Disabled,
            Arc::new(test_clock()),
            ServiceSettings {
                app_env: AppEnv::Test,
                frontend_url: String::new(),
                verifier: WebhookVerifier::Skip,
            },
        )
    }

    fn draft(total: u32) -> EventDraft {
        EventDraft {
            title: "Jazz Night".to_string(),
            description: "Late set".to_string(),
            category: EventCategory::Concert,
            date: test_clock_date(),
            time: "22:00".to_string(),
            venue: Venue {
                name: "Blue Room".to_string(),
                address: "12 Harbour Rd".to_string(),
                city: "Portsmouth".to_string(),
            },
            image: String::new(),
            organizer: "Blue Room Presents".to_string(),
            price: Money::new(Decimal::new(2500, 2)),
            total_tickets: total,
            featured: false,
        }
    }

    fn test_clock_date() -> chrono::DateTime<chrono::Utc> {
        use eventpass_core::environment::Clock as _;
        test_clock().now() + chrono::Duration::days(30)
    }

    #[tokio::test]
    async fn only_admins_manage_events() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let user = Principal::user(UserId::new());
        assert!(matches!(
            service.create_event(&user, draft(10)).await,
            Err(BookingError::Forbidden)
        ));

        let admin = Principal::admin(UserId::new());
        let event = service.create_event(&admin, draft(10)).await.unwrap();
        assert_eq!(event.available_tickets, 10);
        assert_eq!(event.status, EventStatus::Active);
    }

    #[tokio::test]
    async fn catalog_lists_by_category_featured_and_search() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let admin = Principal::admin(UserId::new());

        let jazz = service.create_event(&admin, draft(10)).await.unwrap();
        let summit = service
            .create_event(
                &admin,
                EventDraft {
                    title: "Systems Summit".to_string(),
                    description: "Two days of talks".to_string(),
                    category: EventCategory::Conference,
                    featured: true,
                    ..draft(200)
                },
            )
            .await
            .unwrap();

        let all = service.list_events(EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let conferences = service
            .list_events(EventFilter {
                category: Some(EventCategory::Conference),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(conferences.len(), 1);
        assert_eq!(conferences[0].id, summit.id);

        let featured = service
            .list_events(EventFilter {
                featured: true,
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(featured.len(), 1);

        service.cancel_event(&admin, jazz.id).await.unwrap();
        let active = service
            .list_events(EventFilter {
                status: Some(EventStatus::Active),
                search: Some("blue room".to_string()),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, summit.id);

        assert_eq!(service.get_event(jazz.id).await.unwrap().status, EventStatus::Cancelled);
        assert!(matches!(
            service.get_event(EventId::new()).await,
            Err(BookingError::EventNotFound(_))
        ));
    }

    #[tokio::test]
    async fn drafts_need_title_organizer_and_venue() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let admin = Principal::admin(UserId::new());

        let mut no_organizer = draft(10);
        no_organizer.organizer = "  ".to_string();
        assert!(matches!(
            service.create_event(&admin, no_organizer).await,
            Err(BookingError::Validation(message)) if message == "organizer is required"
        ));

        let mut no_venue = draft(10);
        no_venue.venue.name = String::new();
        assert!(matches!(
            service.create_event(&admin, no_venue).await,
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn resize_keeps_sold_tickets() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let admin = Principal::admin(UserId::new());
        let user = Principal::user(UserId::new());

        let event = service.create_event(&admin, draft(10)).await.unwrap();
        let booking = service.create_booking(&user, event.id, 4).await.unwrap();
        service.confirm_test_payment(&user, booking.id).await.unwrap();

        let resized = service
            .update_event(&admin, event.id, EventUpdate::default(), Some(4))
            .await
            .unwrap();
        assert_eq!(resized.total_tickets, 4);
        assert_eq!(resized.available_tickets, 0);
        assert_eq!(resized.status, EventStatus::SoldOut);

        let renamed = service
            .update_event(
                &admin,
                event.id,
                EventUpdate {
                    title: Some("Late Jazz".to_string()),
                    ..EventUpdate::default()
                },
                Some(12),
            )
            .await
            .unwrap();
        assert_eq!(renamed.title, "Late Jazz");
        assert_eq!(renamed.available_tickets, 8);
        assert_eq!(renamed.status, EventStatus::Active);
    }

    #[tokio::test]
    async fn cancelled_events_refuse_bookings() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let admin = Principal::admin(UserId::new());
        let user = Principal::user(UserId::new());
        let event = service.create_event(&admin, draft(5)).await.unwrap();

        service.cancel_event(&admin, event.id).await.unwrap();
        assert!(matches!(
            service.create_booking(&user, event.id, 1).await,
            Err(BookingError::EventUnavailable(_))
        ));

        let reopened = service.reactivate_event(&admin, event.id).await.unwrap();
        assert_eq!(reopened.status, EventStatus::Active);
        service.create_booking(&user, event.id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn deleted_event_hides_bookings_from_owner_only() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let admin = Principal::admin(UserId::new());
        let user = Principal::user(UserId::new());
        let event = service.create_event(&admin, draft(5)).await.unwrap();
        let booking = service.create_booking(&user, event.id, 1).await.unwrap();

        service.delete_event(&admin, event.id).await.unwrap();
        assert!(matches!(
            service.delete_event(&admin, event.id).await,
            Err(BookingError::EventNotFound(_))
        ));

        assert!(service.list_bookings(&user).await.unwrap().is_empty());
        assert!(matches!(
            service.get_booking(&user, booking.id).await,
            Err(BookingError::NotFound(_))
        ));
        let all = service.list_all_bookings(&admin).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].event, None);
    }

    #[tokio::test]
    async fn stats_and_refunds() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let admin = Principal::admin(UserId::new());
        let user = Principal::user(UserId::new());
        let event = service.create_event(&admin, draft(5)).await.unwrap();

        let paid = service.create_booking(&user, event.id, 2).await.unwrap();
        service.confirm_test_payment(&user, paid.id).await.unwrap();
        service.create_booking(&user, event.id, 1).await.unwrap();

        let stats = service.stats(&admin).await.unwrap();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.total_bookings, 2);
        assert_eq!(stats.completed_bookings, 1);
        assert_eq!(stats.revenue.to_minor_units(), Some(5000));

        assert!(matches!(
            service.refund_booking(&user, paid.id).await,
            Err(BookingError::Forbidden)
        ));
        let refunded = service.refund_booking(&admin, paid.id).await.unwrap();
        assert_eq!(refunded.payment_status, eventpass_core::types::PaymentStatus::Refunded);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 5);
    }
}

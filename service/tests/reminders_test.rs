//! Reminder runs against the in-memory store with a recording notifier.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::{DateTime, Utc};
use eventpass::config::ReminderConfig;
use eventpass::{
    AppEnv, BookingService, Payments, ReminderDispatcher, ReminderReport, ServiceSettings, Storage,
    WebhookVerifier,
};
use eventpass_core::types::{
    Booking, Event, EventCategory, EventId, EventStatus, Money, PaymentStatus, Principal, UserId,
    Venue,
};
use eventpass_testing::helpers::init_test_tracing;
use eventpass_testing::{InMemoryStore, RecordingNotifier, test_clock};
use std::sync::Arc;

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

struct Fixture {
    store: InMemoryStore,
    notifier: RecordingNotifier,
    service: BookingService,
    reminders: ReminderDispatcher,
}

fn fixture() -> Fixture {
    init_test_tracing();
    let store = InMemoryStore::new();
    let notifier = RecordingNotifier::new();
    let storage = Storage::shared(store.clone());
    let service = BookingService::new(
        storage.clone(),
        Payments::Disabled,
        Arc::new(test_clock()),
        ServiceSettings {
            app_env: AppEnv::Test,
            frontend_url: "https://tix.example".to_string(),
            verifier: WebhookVerifier::Skip,
        },
    );
    let reminders = ReminderDispatcher::new(
        storage.catalog.clone(),
        storage.bookings.clone(),
        Arc::new(notifier.clone()),
        Arc::new(test_clock()),
        ReminderConfig {
            hour: 9,
            utc_offset_minutes: 0,
        },
    )
    .unwrap();
    Fixture {
        store,
        notifier,
        service,
        reminders,
    }
}

impl Fixture {
    fn event_on(&self, date: &str) -> Event {
        let event = Event {
            id: EventId::new(),
            title: format!("Show on {date}"),
            description: "Touring production".to_string(),
            category: EventCategory::Theater,
            date: at(date),
            time: "19:30".to_string(),
            venue: Venue {
                name: "Hall".to_string(),
                address: "5 Market Sq".to_string(),
                city: "Leeds".to_string(),
            },
            image: String::new(),
            organizer: "Hall Theatre Co".to_string(),
            price: Money::from_minor_units(1500),
            total_tickets: 50,
            available_tickets: 50,
            status: EventStatus::Active,
            featured: false,
            created_at: at("2024-12-01T00:00:00Z"),
        };
        self.store.put_event(event.clone());
        event
    }

    async fn paid_booking(&self, event: &Event) -> Booking {
        let user = Principal::user(UserId::new());
        let booking = self.service.create_booking(&user, event.id, 2).await.unwrap();
        self.service
            .confirm_test_payment(&user, booking.id)
            .await
            .unwrap();
        self.store.booking(booking.id).unwrap()
    }

    async fn pending_booking(&self, event: &Event) -> Booking {
        let user = Principal::user(UserId::new());
        self.service.create_booking(&user, event.id, 1).await.unwrap()
    }
}

#[tokio::test]
async fn reminds_completed_bookings_for_tomorrow_once() {
    let f = fixture();
    let tomorrow = f.event_on("2025-01-02T18:00:00Z");
    let first = f.paid_booking(&tomorrow).await;
    let second = f.paid_booking(&tomorrow).await;
    let flaky = f.paid_booking(&tomorrow).await;
    let pending = f.pending_booking(&tomorrow).await;
    assert_eq!(first.payment_status, PaymentStatus::Completed);

    f.notifier.fail_for(flaky.id);
    let report = f.reminders.run_once().await.unwrap();
    assert_eq!(
        report,
        ReminderReport {
            events: 1,
            sent: 2,
            failed: 1,
            failed_events: 0,
        }
    );
    assert!(f.store.booking(first.id).unwrap().reminder_sent);
    assert!(f.store.booking(second.id).unwrap().reminder_sent);
    assert!(!f.store.booking(flaky.id).unwrap().reminder_sent);
    assert!(!f.store.booking(pending.id).unwrap().reminder_sent);

    f.notifier.heal(flaky.id);
    let report = f.reminders.run_once().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 0);

    let report = f.reminders.run_once().await.unwrap();
    assert_eq!(report.sent, 0);

    let reminded: Vec<_> = f.notifier.sent().iter().map(|r| r.booking.id).collect();
    assert_eq!(reminded.len(), 3);
    assert!(!reminded.contains(&pending.id));
    assert!(f.notifier.sent().iter().all(|r| r.event.id == tomorrow.id));
}

#[tokio::test]
async fn one_unlistable_event_does_not_stop_the_run() {
    let f = fixture();
    let broken = f.event_on("2025-01-02T10:00:00Z");
    let healthy = f.event_on("2025-01-02T20:00:00Z");
    let stuck = f.paid_booking(&broken).await;
    let reminded = f.paid_booking(&healthy).await;

    f.store.fail_reminder_candidates_for(broken.id);
    let report = f.reminders.run_once().await.unwrap();
    assert_eq!(
        report,
        ReminderReport {
            events: 2,
            sent: 1,
            failed: 0,
            failed_events: 1,
        }
    );
    assert!(f.store.booking(reminded.id).unwrap().reminder_sent);
    assert!(!f.store.booking(stuck.id).unwrap().reminder_sent);
    assert_eq!(f.notifier.sent().len(), 1);
    assert_eq!(f.notifier.sent()[0].booking.id, reminded.id);
}

#[tokio::test]
async fn only_active_events_in_the_window_are_reminded() {
    let f = fixture();
    let cancelled = f.event_on("2025-01-02T12:00:00Z");
    let later = f.event_on("2025-01-03T00:00:00Z");
    let today = f.event_on("2025-01-01T20:00:00Z");
    let cancelled_booking = f.paid_booking(&cancelled).await;
    f.paid_booking(&later).await;
    f.paid_booking(&today).await;

    let admin = Principal::admin(UserId::new());
    f.service.cancel_event(&admin, cancelled.id).await.unwrap();

    let report = f.reminders.run_once().await.unwrap();
    assert_eq!(report, ReminderReport::default());
    assert!(f.notifier.sent().is_empty());
    assert!(!f.store.booking(cancelled_booking.id).unwrap().reminder_sent);
}

#[tokio::test]
async fn window_follows_deployment_offset() {
    let f = fixture();
    // 2025-01-02T02:00Z is still 2025-01-01 evening at UTC-5.
    let evening = f.event_on("2025-01-02T02:00:00Z");
    f.paid_booking(&evening).await;

    let eastern = ReminderDispatcher::new(
        Arc::new(f.store.clone()),
        Arc::new(f.store.clone()),
        Arc::new(f.notifier.clone()),
        Arc::new(test_clock()),
        ReminderConfig {
            hour: 9,
            utc_offset_minutes: -300,
        },
    )
    .unwrap();
    // Midnight UTC on Jan 1 is still Dec 31 locally.
    let report = eastern.run_once().await.unwrap();
    assert_eq!(report.sent, 1);

    assert_eq!(f.reminders.run_once().await.unwrap().sent, 0);
}

//! Business metrics for the booking service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `eventpass_bookings_total{status}` - Bookings created and paid
//! - `eventpass_payment_signals_total{channel, outcome}` - Payment signals by channel and outcome
//! - `eventpass_tickets_sold_total` - Tickets committed against inventory
//! - `eventpass_revenue_cents_total` - Revenue from completed bookings in cents
//! - `eventpass_inventory_conflicts_total` - Paid bookings that found the event sold out
//! - `eventpass_inventory_stranded_total` - Completions whose decrement hit a storage fault
//! - `eventpass_inventory_decrements_rejected_total` - Conditional decrements that found too few tickets
//! - `eventpass_webhooks_total{result}` - Processor notifications by result
//! - `eventpass_reminders_total{result}` - Reminder dispatches by result
//! - `eventpass_refunds_total` - Administrative refunds
//! - `eventpass_events_created_total` - Events created

use metrics::describe_counter;

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "eventpass_bookings_total",
        "Total number of bookings by status (created, completed, failed)"
    );
    describe_counter!(
        "eventpass_payment_signals_total",
        "Payment signals by channel (webhook, verify, sync) and outcome"
    );
    describe_counter!(
        "eventpass_tickets_sold_total",
        "Total number of tickets committed against inventory"
    );
    describe_counter!(
        "eventpass_revenue_cents_total",
        "Total revenue from completed bookings in cents"
    );
    describe_counter!(
        "eventpass_inventory_conflicts_total",
        "Paid bookings that could not be fulfilled because the event sold out"
    );
    describe_counter!(
        "eventpass_inventory_stranded_total",
        "Completed bookings whose inventory decrement hit a storage fault"
    );
    describe_counter!(
        "eventpass_inventory_decrements_rejected_total",
        "Conditional decrements refused for lack of tickets"
    );
    describe_counter!(
        "eventpass_webhooks_total",
        "Processor notifications by result (handled, ignored, rejected)"
    );
    describe_counter!(
        "eventpass_reminders_total",
        "Reminder dispatches by result (sent, failed)"
    );
    describe_counter!("eventpass_refunds_total", "Total administrative refunds");
    describe_counter!("eventpass_events_created_total", "Total number of events created");

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a booking created.
pub fn record_booking_created(tickets: u32) {
    metrics::counter!("eventpass_bookings_total", "status" => "created").increment(1);
    tracing::debug!(tickets, "Recorded booking_created metric");
}

/// Record the outcome of one payment signal.
///
/// # Arguments
///
/// * `channel` - Where the signal came from (webhook, verify, sync, test, repair)
/// * `outcome` - What reconciliation did with it
pub fn record_payment_signal(channel: &'static str, outcome: &'static str) {
    metrics::counter!(
        "eventpass_payment_signals_total",
        "channel" => channel,
        "outcome" => outcome
    )
    .increment(1);
    tracing::debug!(channel, outcome, "Recorded payment_signal metric");
}

/// Record a booking whose tickets were committed.
///
/// # Arguments
///
/// * `tickets` - Tickets taken from the pool
/// * `amount_cents` - Booking total in cents
pub fn record_booking_completed(tickets: u32, amount_cents: u64) {
    metrics::counter!("eventpass_bookings_total", "status" => "completed").increment(1);
    metrics::counter!("eventpass_tickets_sold_total").increment(u64::from(tickets));
    metrics::counter!("eventpass_revenue_cents_total").increment(amount_cents);
    tracing::debug!(tickets, amount_cents, "Recorded booking_completed metric");
}

/// Record a booking moved to failed.
pub fn record_booking_failed(reason: &'static str) {
    metrics::counter!("eventpass_bookings_total", "status" => "failed", "reason" => reason)
        .increment(1);
    tracing::debug!(reason, "Recorded booking_failed metric");
}

/// Record a paid booking that lost the race for the last tickets.
pub fn record_inventory_conflict() {
    metrics::counter!("eventpass_inventory_conflicts_total").increment(1);
    tracing::debug!("Recorded inventory_conflict metric");
}

/// Record a completion whose decrement could not be stored.
pub fn record_inventory_stranded() {
    metrics::counter!("eventpass_inventory_stranded_total").increment(1);
    tracing::debug!("Recorded inventory_stranded metric");
}

/// Record a processor notification.
///
/// # Arguments
///
/// * `result` - `applied`, `ignored`, `malformed`, `error` or `rejected`
pub fn record_webhook(result: &'static str) {
    metrics::counter!("eventpass_webhooks_total", "result" => result).increment(1);
    tracing::debug!(result, "Recorded webhook metric");
}

/// Record a reminder dispatch.
pub fn record_reminder(result: &'static str) {
    metrics::counter!("eventpass_reminders_total", "result" => result).increment(1);
    tracing::debug!(result, "Recorded reminder metric");
}

/// Record an administrative refund.
pub fn record_refund() {
    metrics::counter!("eventpass_refunds_total").increment(1);
    tracing::debug!("Recorded refund metric");
}

/// Record an event created.
pub fn record_event_created() {
    metrics::counter!("eventpass_events_created_total").increment(1);
    tracing::debug!("Recorded event_created metric");
}

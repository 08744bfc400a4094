//! Checkout session adapter.
//!
//! Translates bookings into processor checkout requests and processor session
//! objects back into [`PaymentSignal`]s. Amounts leave the system as integer
//! minor units, rounded to nearest.

use crate::error::BookingError;
use eventpass_core::payment::PaymentSignal;
use eventpass_core::processor::{CheckoutRequest, SessionPaymentStatus, SessionSnapshot, SessionState};
use eventpass_core::types::{Booking, BookingId, Event, FailureReason};
use std::str::FromStr;

/// Metadata key carrying the booking id on a checkout session.
pub const BOOKING_METADATA_KEY: &str = "bookingId";

/// Placeholder the processor replaces with the session id in the success URL.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Prefix of locally simulated payment references.
pub const TEST_REFERENCE_PREFIX: &str = "test_";

/// Build the checkout request for `booking`.
///
/// # Errors
///
/// Returns [`BookingError::Validation`] if the amount does not fit in minor units.
pub fn checkout_request(
    booking: &Booking,
    event: &Event,
    frontend_url: &str,
    currency: &str,
) -> Result<CheckoutRequest, BookingError> {
    let amount_minor = booking.total_amount.to_minor_units().ok_or_else(|| {
        BookingError::Validation(format!("amount out of range: {}", booking.total_amount))
    })?;
    let plural = if booking.tickets == 1 { "" } else { "s" };

    Ok(CheckoutRequest {
        booking_id: booking.id,
        amount_minor,
        currency: currency.to_string(),
        description: format!("{} ticket{plural} for {}", booking.tickets, event.title),
        tickets: booking.tickets,
        success_url: format!("{frontend_url}/booking-success?session_id={SESSION_ID_PLACEHOLDER}"),
        cancel_url: format!("{frontend_url}/events/{}", event.id),
    })
}

/// What a retrieved session says about its booking.
///
/// Only a session the processor reports as paid yields a paid signal.
#[must_use]
pub fn signal_from_session(session: &SessionSnapshot) -> PaymentSignal {
    match (session.payment_status, session.state) {
        (SessionPaymentStatus::Paid, _) => PaymentSignal::paid(
            session.payment_reference.clone(),
            Some(session.session_id.clone()),
        ),
        (_, Some(SessionState::Expired)) => PaymentSignal::unpaid(FailureReason::Expired),
        _ => PaymentSignal::unpaid(FailureReason::Unpaid),
    }
}

/// Parse a booking reference taken from session metadata.
#[must_use]
pub fn parse_booking_ref(raw: &str) -> Option<BookingId> {
    BookingId::from_str(raw.trim()).ok()
}

/// Booking id encoded in a simulated `test_<booking id>` reference.
#[must_use]
pub fn parse_test_reference(reference: &str) -> Option<BookingId> {
    reference
        .strip_prefix(TEST_REFERENCE_PREFIX)
        .and_then(parse_booking_ref)
}

/// Whether a reported amount falls short of what the booking costs.
///
/// An unreported amount is not treated as an underpayment.
#[must_use]
pub fn is_underpaid(booking: &Booking, received_minor: Option<i64>) -> bool {
    match (received_minor, booking.total_amount.to_minor_units()) {
        (Some(received), Some(expected)) => received < expected,
        _ => false,
    }
}

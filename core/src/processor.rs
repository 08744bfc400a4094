//! Payment processor contract.
//!
//! The processor hosts checkout sessions. A session carries the booking id in its
//! metadata, reports whether it has been paid, and links to a payment reference
//! (payment intent) once the customer has paid. Amounts cross this boundary in
//! integer minor units.

use crate::types::BookingId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the payment processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The processor answered with an error status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message returned by the processor.
        message: String,
    },

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The response could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Request to open a hosted checkout session for one booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Booking being paid; stored in the session metadata.
    pub booking_id: BookingId,
    /// Amount in minor units.
    pub amount_minor: i64,
    /// ISO currency code, lowercase.
    pub currency: String,
    /// Line item description.
    pub description: String,
    /// Number of tickets, used as the line item quantity label.
    pub tickets: u32,
    /// Where the processor sends the customer after paying.
    pub success_url: String,
    /// Where the processor sends the customer on cancel.
    pub cancel_url: String,
}

/// A freshly created checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Session id.
    pub session_id: String,
    /// Hosted payment page.
    pub url: String,
}

/// Payment state of a session as the processor reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    /// Funds captured.
    Paid,
    /// Not (yet) paid.
    Unpaid,
    /// Nothing to pay.
    NoPaymentRequired,
}

/// Session lifecycle state as the processor reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Customer can still pay.
    Open,
    /// Checkout finished.
    Complete,
    /// Session expired without completing.
    Expired,
}

/// A retrieved checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub session_id: String,
    /// Payment state.
    pub payment_status: SessionPaymentStatus,
    /// Session state, when reported.
    pub state: Option<SessionState>,
    /// Linked payment reference, once paid.
    pub payment_reference: Option<String>,
    /// Booking id from the session metadata, verbatim.
    pub booking_ref: Option<String>,
    /// Amount in minor units.
    pub amount_total: Option<i64>,
    /// Currency code.
    pub currency: Option<String>,
}

/// A retrieved payment reference (payment intent).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Payment reference.
    pub reference: String,
    /// Amount received, in minor units.
    pub amount_minor: Option<i64>,
    /// Currency code.
    pub currency: Option<String>,
}

/// The hosted-checkout payment processor.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the processor can be injected as
/// `Arc<dyn PaymentProcessor>`.
pub trait PaymentProcessor: Send + Sync {
    /// Open a hosted checkout session.
    ///
    /// # Errors
    ///
    /// Any [`ProcessorError`] reported by the transport or the processor.
    fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSession, ProcessorError>> + Send + '_>>;

    /// Fetch the current state of a session.
    ///
    /// # Errors
    ///
    /// Any [`ProcessorError`] reported by the transport or the processor.
    fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SessionSnapshot, ProcessorError>> + Send + '_>>;

    /// Fetch a payment reference's amount and currency.
    ///
    /// # Errors
    ///
    /// Any [`ProcessorError`] reported by the transport or the processor.
    fn retrieve_payment_reference(
        &self,
        reference: &str,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentDetails, ProcessorError>> + Send + '_>>;
}

//! Caller-facing error taxonomy.

use crate::config::AppEnv;
use eventpass_core::booking::{StoreError, TransitionError};
use eventpass_core::inventory::InventoryError;
use eventpass_core::processor::ProcessorError;
use eventpass_core::types::{BookingId, EventId};
use thiserror::Error;

/// Broad class of a [`BookingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input.
    Validation,
    /// Missing or hidden resource.
    NotFound,
    /// Caller may not act on the resource.
    Forbidden,
    /// Request conflicts with the current state.
    Conflict,
    /// Payment processor missing or failing.
    Upstream,
    /// Anything else.
    Internal,
}

/// Errors surfaced by [`crate::BookingService`].
#[derive(Error, Debug)]
pub enum BookingError {
    /// Input failed validation.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// No such booking, or the booking's event no longer exists.
    #[error("Booking not found: {0}")]
    NotFound(BookingId),

    /// No booking of the caller's carries this checkout session.
    #[error("No booking for checkout session {0}")]
    UnknownSession(String),

    /// Caller is neither the owner nor an admin.
    #[error("Access denied")]
    Forbidden,

    /// No such event.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The event is cancelled or sold out.
    #[error("Event is not available for booking: {0}")]
    EventUnavailable(EventId),

    /// Not enough tickets left.
    #[error("Not enough tickets: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Tickets asked for.
        requested: u32,
        /// Tickets left.
        available: u32,
    },

    /// The booking is already paid.
    #[error("Booking already paid: {0}")]
    AlreadyPaid(BookingId),

    /// The booking cannot be refunded in its current state.
    #[error("Booking cannot be refunded: {0}")]
    NotRefundable(BookingId),

    /// Payments are not configured on this deployment.
    #[error("Payment processing is not configured")]
    NotConfigured,

    /// The booking has never been sent to checkout.
    #[error("No checkout session for booking {0}")]
    NoSession(BookingId),

    /// The payment processor failed.
    #[error("Payment processor error: {0}")]
    Upstream(#[from] ProcessorError),

    /// Storage or invariant failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Broad class of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_)
            | Self::UnknownSession(_)
            | Self::EventNotFound(_)
            | Self::NoSession(_) => ErrorKind::NotFound,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::EventUnavailable(_)
            | Self::InsufficientInventory { .. }
            | Self::AlreadyPaid(_)
            | Self::NotRefundable(_) => ErrorKind::Conflict,
            Self::NotConfigured | Self::Upstream(_) => ErrorKind::Upstream,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) | Self::UnknownSession(_) => "BOOKING_NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::EventNotFound(_) => "EVENT_NOT_FOUND",
            Self::EventUnavailable(_) => "EVENT_UNAVAILABLE",
            Self::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            Self::AlreadyPaid(_) => "ALREADY_PAID",
            Self::NotRefundable(_) => "NOT_REFUNDABLE",
            Self::NotConfigured => "PAYMENTS_NOT_CONFIGURED",
            Self::NoSession(_) => "NO_CHECKOUT_SESSION",
            Self::Upstream(_) => "PAYMENT_PROCESSOR_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix this by changing the request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Forbidden | ErrorKind::Conflict
        )
    }

    /// Message safe to show the caller. Production hides upstream and internal detail.
    #[must_use]
    pub fn public_message(&self, env: AppEnv) -> String {
        if !env.is_production() || self.is_client_error() {
            return self.to_string();
        }
        match self {
            Self::NotConfigured => self.to_string(),
            Self::Upstream(_) => "Payment processor unavailable".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<InventoryError> for BookingError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientInventory {
                requested,
                available,
                ..
            } => Self::InsufficientInventory {
                requested,
                available,
            },
            InventoryError::EventNotFound(event_id) => Self::EventNotFound(event_id),
            InventoryError::InvalidTotal(total) => {
                Self::Validation(format!("total tickets must be at least 1, got {total}"))
            }
            InventoryError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<TransitionError> for BookingError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotFound(id) => Self::NotFound(id),
            TransitionError::Stale(_) | TransitionError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BookingError::Forbidden.code(), "FORBIDDEN");
        assert_eq!(BookingError::NotConfigured.code(), "PAYMENTS_NOT_CONFIGURED");
        assert_eq!(
            BookingError::InsufficientInventory {
                requested: 3,
                available: 1
            }
            .code(),
            "INSUFFICIENT_INVENTORY"
        );
    }

    #[test]
    fn conflicts_are_client_errors() {
        assert!(BookingError::AlreadyPaid(BookingId::new()).is_client_error());
        assert!(BookingError::EventUnavailable(EventId::new()).is_client_error());
        assert!(!BookingError::Upstream(ProcessorError::Timeout).is_client_error());
        assert!(!BookingError::Internal("db".to_string()).is_client_error());
    }

    #[test]
    fn production_hides_internal_detail() {
        let err = BookingError::Internal("connection refused on 10.0.0.3".to_string());
        assert!(err.public_message(AppEnv::Development).contains("10.0.0.3"));
        assert_eq!(err.public_message(AppEnv::Production), "Internal server error");

        let upstream = BookingError::Upstream(ProcessorError::Api {
            status: 500,
            message: "boom".to_string(),
        });
        assert_eq!(
            upstream.public_message(AppEnv::Production),
            "Payment processor unavailable"
        );

        let forbidden = BookingError::Forbidden;
        assert_eq!(forbidden.public_message(AppEnv::Production), "Access denied");
    }

    #[test]
    fn inventory_errors_map_to_conflicts() {
        let err: BookingError = InventoryError::InsufficientInventory {
            event_id: EventId::new(),
            requested: 4,
            available: 2,
        }
        .into();
        assert!(matches!(
            err,
            BookingError::InsufficientInventory {
                requested: 4,
                available: 2
            }
        ));
    }
}

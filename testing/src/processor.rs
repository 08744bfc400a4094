//! Scriptable payment processor and recording notifier.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use eventpass_core::notifier::{Notifier, NotifyError, ReminderSnapshot};
use eventpass_core::processor::{
    CheckoutRequest, CheckoutSession, PaymentDetails, PaymentProcessor, ProcessorError,
    SessionPaymentStatus, SessionSnapshot, SessionState,
};
use eventpass_core::types::BookingId;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ProcessorState {
    sessions: HashMap<String, SessionSnapshot>,
    payments: HashMap<String, PaymentDetails>,
    created: Vec<CheckoutRequest>,
    failure: Option<ProcessorError>,
}

/// In-memory payment processor whose sessions tests can move between states.
///
/// # Example
///
/// ```
/// use eventpass_testing::MockPaymentProcessor;
///
/// let processor = MockPaymentProcessor::new();
/// processor.insert_unpaid_session("cs_1", None, 2500);
/// processor.mark_paid("cs_1", "pi_1");
/// assert_eq!(processor.retrieve_count(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockPaymentProcessor {
    state: Arc<Mutex<ProcessorState>>,
    sequence: Arc<AtomicUsize>,
    retrievals: Arc<AtomicUsize>,
}

impl MockPaymentProcessor {
    /// Create a processor with no sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open, unpaid session.
    pub fn insert_unpaid_session(&self, session_id: &str, booking: Option<BookingId>, amount_minor: i64) {
        self.state.lock().unwrap().sessions.insert(
            session_id.to_string(),
            SessionSnapshot {
                session_id: session_id.to_string(),
                payment_status: SessionPaymentStatus::Unpaid,
                state: Some(SessionState::Open),
                payment_reference: None,
                booking_ref: booking.map(|id| id.to_string()),
                amount_total: Some(amount_minor),
                currency: Some("usd".to_string()),
            },
        );
    }

    /// Mark a session paid and link it to `payment_reference` for the full session amount.
    pub fn mark_paid(&self, session_id: &str, payment_reference: &str) {
        let mut state = self.state.lock().unwrap();
        let amount = state.sessions.get_mut(session_id).map(|session| {
            session.payment_status = SessionPaymentStatus::Paid;
            session.state = Some(SessionState::Complete);
            session.payment_reference = Some(payment_reference.to_string());
            session.amount_total
        });
        if let Some(amount_minor) = amount {
            state.payments.insert(
                payment_reference.to_string(),
                PaymentDetails {
                    reference: payment_reference.to_string(),
                    amount_minor,
                    currency: Some("usd".to_string()),
                },
            );
        }
    }

    /// Mark a session expired.
    pub fn mark_expired(&self, session_id: &str) {
        if let Some(session) = self.state.lock().unwrap().sessions.get_mut(session_id) {
            session.state = Some(SessionState::Expired);
        }
    }

    /// Register a payment reference with an explicit amount.
    pub fn insert_payment(&self, details: PaymentDetails) {
        self.state
            .lock()
            .unwrap()
            .payments
            .insert(details.reference.clone(), details);
    }

    /// Make every call fail with `error` until [`Self::recover`] is called.
    pub fn fail_with(&self, error: ProcessorError) {
        self.state.lock().unwrap().failure = Some(error);
    }

    /// Stop failing.
    pub fn recover(&self) {
        self.state.lock().unwrap().failure = None;
    }

    /// Session as currently scripted.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.state.lock().unwrap().sessions.get(session_id).cloned()
    }

    /// Checkout requests received, in order.
    #[must_use]
    pub fn created_requests(&self) -> Vec<CheckoutRequest> {
        self.state.lock().unwrap().created.clone()
    }

    /// Number of `retrieve_session` and `retrieve_payment_reference` calls.
    #[must_use]
    pub fn retrieve_count(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), ProcessorError> {
        self.state
            .lock()
            .unwrap()
            .failure
            .clone()
            .map_or(Ok(()), Err)
    }
}

impl PaymentProcessor for MockPaymentProcessor {
    fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSession, ProcessorError>> + Send + '_>> {
        Box::pin(async move {
            self.check_failure()?;
            let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let session_id = format!("cs_test_{n}");
            self.insert_unpaid_session(&session_id, Some(request.booking_id), request.amount_minor);
            self.state.lock().unwrap().created.push(request);
            Ok(CheckoutSession {
                url: format!("https://checkout.test/pay/{session_id}"),
                session_id,
            })
        })
    }

    fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SessionSnapshot, ProcessorError>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            self.retrievals.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            self.session(&session_id).ok_or_else(|| ProcessorError::Api {
                status: 404,
                message: format!("No such checkout session: {session_id}"),
            })
        })
    }

    fn retrieve_payment_reference(
        &self,
        reference: &str,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentDetails, ProcessorError>> + Send + '_>> {
        let reference = reference.to_string();
        Box::pin(async move {
            self.retrievals.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            self.state
                .lock()
                .unwrap()
                .payments
                .get(&reference)
                .cloned()
                .ok_or_else(|| ProcessorError::Api {
                    status: 404,
                    message: format!("No such payment: {reference}"),
                })
        })
    }
}

/// Notifier that records every reminder and can be told to fail for some bookings.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<ReminderSnapshot>>>,
    failing: Arc<Mutex<HashSet<BookingId>>>,
}

impl RecordingNotifier {
    /// Create a notifier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every dispatch for `booking_id`.
    pub fn fail_for(&self, booking_id: BookingId) {
        self.failing.lock().unwrap().insert(booking_id);
    }

    /// Accept dispatches for `booking_id` again.
    pub fn heal(&self, booking_id: BookingId) {
        self.failing.lock().unwrap().remove(&booking_id);
    }

    /// Reminders delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<ReminderSnapshot> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(
        &self,
        reminder: ReminderSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            if self.failing.lock().unwrap().contains(&reminder.booking.id) {
                return Err(NotifyError(format!(
                    "delivery refused for booking {}",
                    reminder.booking.id
                )));
            }
            self.sent.lock().unwrap().push(reminder);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_sessions_start_unpaid() {
        let processor = MockPaymentProcessor::new();
        let booking_id = BookingId::new();
        let session = processor
            .create_session(CheckoutRequest {
                booking_id,
                amount_minor: 5000,
                currency: "usd".to_string(),
                description: "2 tickets".to_string(),
                tickets: 2,
                success_url: "http://localhost/ok".to_string(),
                cancel_url: "http://localhost/cancel".to_string(),
            })
            .await
            .unwrap();

        let snapshot = processor.retrieve_session(&session.session_id).await.unwrap();
        assert_eq!(snapshot.payment_status, SessionPaymentStatus::Unpaid);
        assert_eq!(snapshot.booking_ref, Some(booking_id.to_string()));

        processor.mark_paid(&session.session_id, "pi_1");
        let details = processor.retrieve_payment_reference("pi_1").await.unwrap();
        assert_eq!(details.amount_minor, Some(5000));
    }

    #[tokio::test]
    async fn scripted_failures_apply_until_recovery() {
        let processor = MockPaymentProcessor::new();
        processor.insert_unpaid_session("cs_1", None, 100);
        processor.fail_with(ProcessorError::Timeout);
        assert_eq!(
            processor.retrieve_session("cs_1").await.unwrap_err(),
            ProcessorError::Timeout
        );
        processor.recover();
        assert!(processor.retrieve_session("cs_1").await.is_ok());
        assert_eq!(processor.retrieve_count(), 2);
    }
}

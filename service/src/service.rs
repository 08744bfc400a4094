//! Booking service: the operations callers invoke.
//!
//! One [`BookingService`] owns the stores, the payment processor (if any), the
//! reconciliation engine and the clock. Handlers clone it cheaply; every field
//! is shared behind an `Arc`.
//!
//! All three payment channels end in [`ReconciliationEngine::apply`]:
//! - [`BookingService::handle_processor_notification`] (signed webhook)
//! - [`BookingService::verify_payment`] (client polling after checkout)
//! - [`BookingService::sync_payment`] (owner or admin refresh)

use crate::checkout::{
    TEST_REFERENCE_PREFIX, checkout_request, is_underpaid, parse_booking_ref, parse_test_reference,
    signal_from_session,
};
use crate::config::{AppEnv, Config, ProcessorConfig};
use crate::error::BookingError;
use crate::metrics;
use crate::processor_http::HttpPaymentProcessor;
use crate::reconciliation::{Channel, ReconciliationEngine, ReconciliationOutcome};
use crate::webhook::{
    Acknowledgement, PaymentObject, ProcessorNotification, SessionObject, WebhookError,
    WebhookVerifier,
};
use eventpass_core::booking::{BookingStore, TransitionError, is_payable};
use eventpass_core::environment::Clock;
use eventpass_core::inventory::{EventCatalog, InventoryLedger};
use eventpass_core::payment::PaymentSignal;
use eventpass_core::processor::{
    CheckoutSession, PaymentProcessor, ProcessorError, SessionPaymentStatus, SessionSnapshot,
};
use eventpass_core::types::{
    Booking, BookingId, Event, EventFilter, EventId, FailureReason, PaymentStatus, Principal,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Sync message when the processor moved the booking to completed.
pub const SYNC_COMPLETED: &str = "Payment status synced successfully";
/// Sync message when the processor reported the payment as not going through.
pub const SYNC_FAILED: &str = "Payment status updated to failed";
/// Sync message when the booking was paid after its event sold out.
pub const SYNC_SOLD_OUT: &str = "Payment received but the event sold out; booking marked for refund";
/// Sync message when nothing changed.
pub const SYNC_UP_TO_DATE: &str = "Payment status is already up to date";
/// Sync message when the processor could not be reached.
pub const SYNC_UNAVAILABLE: &str = "Payment processor unavailable; showing stored status";

/// The three storage contracts the service needs.
#[derive(Clone)]
pub struct Storage {
    /// Event records.
    pub catalog: Arc<dyn EventCatalog>,
    /// Ticket counters.
    pub ledger: Arc<dyn InventoryLedger>,
    /// Booking records.
    pub bookings: Arc<dyn BookingStore>,
}

impl Storage {
    /// Use one store for all three contracts.
    #[must_use]
    pub fn shared<S>(store: S) -> Self
    where
        S: EventCatalog + InventoryLedger + BookingStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            catalog: store.clone(),
            ledger: store.clone(),
            bookings: store,
        }
    }
}

/// Whether this deployment can take real payments. Decided once at startup.
#[derive(Clone)]
pub enum Payments {
    /// A processor is configured.
    Enabled {
        /// Processor client.
        processor: Arc<dyn PaymentProcessor>,
        /// Lowercase ISO currency for new sessions.
        currency: String,
    },
    /// No processor; checkout reports `not configured`.
    Disabled,
}

impl Payments {
    /// Build from configuration, creating the HTTP client when configured.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ProcessorError> {
        match config {
            ProcessorConfig::Configured(credentials) => Ok(Self::Enabled {
                processor: Arc::new(HttpPaymentProcessor::new(credentials)?),
                currency: credentials.currency.clone(),
            }),
            ProcessorConfig::Unconfigured => Ok(Self::Disabled),
        }
    }

    /// Use an existing processor.
    #[must_use]
    pub fn with_processor(processor: Arc<dyn PaymentProcessor>, currency: impl Into<String>) -> Self {
        Self::Enabled {
            processor,
            currency: currency.into(),
        }
    }

    /// Whether a processor is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    fn processor(&self) -> Option<&Arc<dyn PaymentProcessor>> {
        match self {
            Self::Enabled { processor, .. } => Some(processor),
            Self::Disabled => None,
        }
    }
}

impl fmt::Debug for Payments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled { currency, .. } => f
                .debug_struct("Enabled")
                .field("currency", currency)
                .finish_non_exhaustive(),
            Self::Disabled => f.write_str("Disabled"),
        }
    }
}

/// Deployment settings the service reads on every call.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Deployment environment.
    pub app_env: AppEnv,
    /// Base URL for checkout success and cancel redirects.
    pub frontend_url: String,
    /// Signature policy for notifications.
    pub verifier: WebhookVerifier,
}

impl ServiceSettings {
    /// Settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            app_env: config.app_env,
            frontend_url: config.frontend_url.clone(),
            verifier: WebhookVerifier::from_config(&config.webhook, config.app_env),
        }
    }
}

/// A booking with its event, if the event still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDetails {
    /// The booking.
    pub booking: Booking,
    /// Its event; `None` once the event is deleted.
    pub event: Option<Event>,
}

/// Result of [`BookingService::begin_checkout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutStart {
    /// Redirect the customer to the hosted payment page.
    Session(CheckoutSession),
    /// No processor configured; the client may use a test payment instead.
    NotConfigured,
}

impl CheckoutStart {
    /// Message shown when payments are not configured.
    pub const NOT_CONFIGURED_MESSAGE: &'static str = "Payments not configured. Use test mode.";
}

/// Result of [`BookingService::verify_payment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentView {
    /// Payment status after verification.
    pub payment_status: PaymentStatus,
    /// The booking as stored.
    pub booking: Booking,
    /// What reconciliation did, if it ran.
    pub outcome: Option<&'static str>,
}

impl PaymentView {
    fn stored(booking: Booking) -> Self {
        Self {
            payment_status: booking.payment_status,
            booking,
            outcome: None,
        }
    }

    fn reconciled(outcome: ReconciliationOutcome) -> Self {
        let label = outcome.as_str();
        let booking = outcome.into_booking();
        Self {
            payment_status: booking.payment_status,
            booking,
            outcome: Some(label),
        }
    }
}

/// Result of [`BookingService::sync_payment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Human-readable summary.
    pub message: &'static str,
    /// Payment status after the sync.
    pub payment_status: PaymentStatus,
    /// The booking as stored.
    pub booking: Booking,
    /// What reconciliation did, if it ran.
    pub outcome: Option<&'static str>,
}

impl SyncReport {
    fn new(message: &'static str, booking: Booking, outcome: Option<&'static str>) -> Self {
        Self {
            message,
            payment_status: booking.payment_status,
            booking,
            outcome,
        }
    }
}

const fn sync_message(outcome: &ReconciliationOutcome) -> &'static str {
    match outcome {
        ReconciliationOutcome::Completed(_)
        | ReconciliationOutcome::InventoryStranded(_)
        | ReconciliationOutcome::Orphaned(_) => SYNC_COMPLETED,
        ReconciliationOutcome::Failed(_) => SYNC_FAILED,
        ReconciliationOutcome::InventoryConflict(_) => SYNC_SOLD_OUT,
        ReconciliationOutcome::Unchanged(_) => SYNC_UP_TO_DATE,
    }
}

/// Booking, checkout and payment operations.
#[derive(Clone)]
pub struct BookingService {
    pub(crate) storage: Storage,
    pub(crate) payments: Payments,
    pub(crate) engine: ReconciliationEngine,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: ServiceSettings,
}

impl BookingService {
    /// Create a service.
    #[must_use]
    pub fn new(
        storage: Storage,
        payments: Payments,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        let engine = ReconciliationEngine::new(
            storage.bookings.clone(),
            storage.ledger.clone(),
            clock.clone(),
        );
        Self {
            storage,
            payments,
            engine,
            clock,
            settings,
        }
    }

    /// The reconciliation engine, for background sweeps.
    #[must_use]
    pub const fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// The storage handles.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Create a pending booking.
    ///
    /// The availability check is advisory; tickets are only taken when payment completes.
    ///
    /// # Errors
    ///
    /// - `Validation` if `tickets` is zero or the total overflows
    /// - `EventNotFound`, `EventUnavailable`, `InsufficientInventory`
    pub async fn create_booking(
        &self,
        principal: &Principal,
        event_id: EventId,
        tickets: u32,
    ) -> Result<Booking, BookingError> {
        if tickets < 1 {
            return Err(BookingError::Validation(
                "tickets must be at least 1".to_string(),
            ));
        }

        let event = self
            .storage
            .catalog
            .find_event(event_id)
            .await?
            .ok_or(BookingError::EventNotFound(event_id))?;
        if !event.is_active() {
            return Err(BookingError::EventUnavailable(event_id));
        }
        if !self.storage.ledger.check_availability(event_id, tickets).await? {
            return Err(BookingError::InsufficientInventory {
                requested: tickets,
                available: event.available_tickets,
            });
        }

        let total = event.price.checked_mul(tickets).ok_or_else(|| {
            BookingError::Validation(format!("total for {tickets} tickets is out of range"))
        })?;
        let booking = self
            .storage
            .bookings
            .insert_booking(Booking::pending(
                principal.id,
                event_id,
                tickets,
                total,
                self.clock.now(),
            ))
            .await?;

        tracing::info!(
            booking_id = %booking.id,
            event_id = %event_id,
            user_id = %principal.id,
            tickets,
            total = %booking.total_amount,
            "Booking created"
        );
        metrics::record_booking_created(tickets);
        Ok(booking)
    }

    /// Public event catalog, soonest first.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on storage faults.
    pub async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, BookingError> {
        let events = self.storage.catalog.list_events(filter).await?;
        tracing::debug!(count = events.len(), "Events listed");
        Ok(events)
    }

    /// One event from the public catalog.
    ///
    /// # Errors
    ///
    /// `EventNotFound` if there is no such event; `Internal` on storage faults.
    pub async fn get_event(&self, event_id: EventId) -> Result<Event, BookingError> {
        self.storage
            .catalog
            .find_event(event_id)
            .await?
            .ok_or(BookingError::EventNotFound(event_id))
    }

    /// The caller's bookings, newest first. Bookings whose event is gone are left out.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on storage faults.
    pub async fn list_bookings(&self, principal: &Principal) -> Result<Vec<BookingDetails>, BookingError> {
        let bookings = self.storage.bookings.list_for_user(principal.id).await?;
        let details = self.with_events(bookings).await?;
        Ok(details
            .into_iter()
            .filter(|details| details.event.is_some())
            .collect())
    }

    /// One booking, visible to its owner or an admin.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no such booking or its event is gone
    /// - `Forbidden` if the caller is neither owner nor admin
    pub async fn get_booking(
        &self,
        principal: &Principal,
        booking_id: BookingId,
    ) -> Result<BookingDetails, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        if !principal.can_access(booking.user_id) {
            return Err(BookingError::Forbidden);
        }
        let event = self
            .storage
            .catalog
            .find_event(booking.event_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))?;
        Ok(BookingDetails {
            booking,
            event: Some(event),
        })
    }

    /// Start hosted checkout for a booking.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no such booking or its event is gone
    /// - `Forbidden` unless the caller owns the booking
    /// - `AlreadyPaid` if the booking can no longer be paid
    /// - `Upstream` if the processor refuses the session
    pub async fn begin_checkout(
        &self,
        principal: &Principal,
        booking_id: BookingId,
    ) -> Result<CheckoutStart, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        if booking.user_id != principal.id {
            return Err(BookingError::Forbidden);
        }
        if !is_payable(&booking) {
            return Err(BookingError::AlreadyPaid(booking_id));
        }

        let Payments::Enabled {
            processor,
            currency,
        } = &self.payments
        else {
            tracing::info!(booking_id = %booking_id, "Checkout requested but payments are not configured");
            return Ok(CheckoutStart::NotConfigured);
        };

        let event = self
            .storage
            .catalog
            .find_event(booking.event_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))?;
        let request = checkout_request(&booking, &event, &self.settings.frontend_url, currency)?;
        let session = processor.create_session(request).await.map_err(|err| {
            tracing::error!(booking_id = %booking_id, error = %err, "Checkout session creation failed");
            BookingError::from(err)
        })?;

        match self
            .storage
            .bookings
            .attach_session(booking_id, session.session_id.clone())
            .await
        {
            Ok(_) => {}
            Err(TransitionError::Stale(current)) => {
                tracing::info!(
                    booking_id = %booking_id,
                    status = %current.payment_status,
                    "Booking paid while its checkout session was being created"
                );
                return Err(BookingError::AlreadyPaid(booking_id));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            booking_id = %booking_id,
            session_id = %session.session_id,
            "Checkout started"
        );
        Ok(CheckoutStart::Session(session))
    }

    /// Mark a booking paid without a processor.
    ///
    /// Only available outside production and only while no processor is configured.
    /// The payment reference is `test_<booking id>`, which [`Self::verify_payment`] resolves.
    ///
    /// # Errors
    ///
    /// - `NotFound`, or `Forbidden` unless the caller owns the booking
    /// - `Forbidden` in production or when a processor is configured
    /// - `AlreadyPaid` if the booking is completed, refunded or refund-eligible
    pub async fn confirm_test_payment(
        &self,
        principal: &Principal,
        booking_id: BookingId,
    ) -> Result<Booking, BookingError> {
        if self.settings.app_env.is_production() {
            tracing::warn!(booking_id = %booking_id, user_id = %principal.id, "Test payment refused in production");
            return Err(BookingError::Forbidden);
        }
        if self.payments.is_enabled() {
            tracing::warn!(
                booking_id = %booking_id,
                user_id = %principal.id,
                "Test payment refused while a payment processor is configured"
            );
            return Err(BookingError::Forbidden);
        }
        let booking = self.load_booking(booking_id).await?;
        if booking.user_id != principal.id {
            return Err(BookingError::Forbidden);
        }
        if booking.payment_status.is_terminal_paid() || booking.refund_eligible {
            return Err(BookingError::AlreadyPaid(booking_id));
        }

        let signal = PaymentSignal::paid(Some(format!("{TEST_REFERENCE_PREFIX}{booking_id}")), None);
        let outcome = self.engine.apply(&booking, &signal, Channel::Test).await?;
        Ok(outcome.into_booking())
    }

    /// Check a booking's payment after the customer returns from checkout.
    ///
    /// `reference` is a checkout session id, or `test_<booking id>` for test payments.
    /// A booking that is not yet paid is refreshed from the processor; processor
    /// errors are logged and the stored state returned.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `UnknownSession` if nothing of the caller's matches
    /// - `Forbidden` for a test reference to someone else's booking
    /// - `Internal` on storage faults
    pub async fn verify_payment(
        &self,
        principal: &Principal,
        reference: &str,
    ) -> Result<PaymentView, BookingError> {
        if let Some(booking_id) = parse_test_reference(reference) {
            let booking = self.load_booking(booking_id).await?;
            if !principal.can_access(booking.user_id) {
                return Err(BookingError::Forbidden);
            }
            return Ok(PaymentView::stored(booking));
        }

        let booking = self
            .storage
            .bookings
            .find_by_session_id(reference)
            .await?
            .filter(|booking| principal.can_access(booking.user_id))
            .ok_or_else(|| BookingError::UnknownSession(reference.to_string()))?;

        if booking.payment_status.is_terminal_paid() || booking.refund_eligible {
            return Ok(PaymentView::stored(booking));
        }
        let Some(processor) = self.payments.processor() else {
            return Ok(PaymentView::stored(booking));
        };

        let snapshot = match processor.retrieve_session(reference).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(
                    booking_id = %booking.id,
                    session_id = reference,
                    error = %err,
                    "Could not verify session; returning stored status"
                );
                return Ok(PaymentView::stored(booking));
            }
        };

        let outcome = self.reconcile_session(&booking, &snapshot, Channel::Verify).await?;
        Ok(PaymentView::reconciled(outcome))
    }

    /// Refresh a booking's payment status from the processor.
    ///
    /// # Errors
    ///
    /// - `NotFound`, or `Forbidden` unless the caller is owner or admin
    /// - `NoSession` if the booking never went to checkout
    /// - `NotConfigured` without a processor
    /// - `Internal` on storage faults
    pub async fn sync_payment(
        &self,
        principal: &Principal,
        booking_id: BookingId,
    ) -> Result<SyncReport, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        if !principal.can_access(booking.user_id) {
            return Err(BookingError::Forbidden);
        }
        let session_id = booking
            .external_session_id
            .clone()
            .ok_or(BookingError::NoSession(booking_id))?;
        let processor = self.payments.processor().ok_or(BookingError::NotConfigured)?;

        let snapshot = match processor.retrieve_session(&session_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(
                    booking_id = %booking_id,
                    session_id = %session_id,
                    error = %err,
                    "Could not sync session; returning stored status"
                );
                return Ok(SyncReport::new(SYNC_UNAVAILABLE, booking, None));
            }
        };

        let outcome = self.reconcile_session(&booking, &snapshot, Channel::Sync).await?;
        let message = sync_message(&outcome);
        let label = outcome.as_str();
        Ok(SyncReport::new(message, outcome.into_booking(), Some(label)))
    }

    /// Apply a retrieved session to `booking`.
    async fn reconcile_session(
        &self,
        booking: &Booking,
        snapshot: &SessionSnapshot,
        channel: Channel,
    ) -> Result<ReconciliationOutcome, BookingError> {
        if let Some(raw) = snapshot.booking_ref.as_deref() {
            if parse_booking_ref(raw) != Some(booking.id) {
                tracing::warn!(
                    booking_id = %booking.id,
                    session_id = %snapshot.session_id,
                    booking_ref = raw,
                    channel = channel.as_str(),
                    "Session belongs to a different booking; ignoring"
                );
                return Ok(ReconciliationOutcome::Unchanged(booking.clone()));
            }
        }

        let signal = signal_from_session(snapshot);
        if matches!(signal, PaymentSignal::Paid { .. }) && is_underpaid(booking, snapshot.amount_total) {
            tracing::error!(
                booking_id = %booking.id,
                session_id = %snapshot.session_id,
                received = snapshot.amount_total,
                expected = %booking.total_amount,
                channel = channel.as_str(),
                "Session paid less than the booking total; not completing"
            );
            return Ok(ReconciliationOutcome::Unchanged(booking.clone()));
        }
        self.engine.apply(booking, &signal, channel).await
    }

    /// Handle a signed processor notification.
    ///
    /// Only a failed signature check is refused. Everything else is acknowledged:
    /// unparseable payloads, unknown bookings, redundant signals and storage faults
    /// are logged, and the booking is left for verify, sync or the repair sweep.
    ///
    /// # Errors
    ///
    /// Signature failures from [`WebhookVerifier::verify`].
    pub async fn handle_processor_notification(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<Acknowledgement, WebhookError> {
        if let Err(err) = self
            .settings
            .verifier
            .verify(raw_body, signature, self.clock.now().timestamp())
        {
            tracing::warn!(error = %err, "Webhook rejected");
            metrics::record_webhook("rejected");
            return Err(err);
        }

        let notification = match ProcessorNotification::parse(raw_body) {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!(error = %err, "Webhook payload not understood; acknowledged");
                metrics::record_webhook("malformed");
                return Ok(Acknowledgement::RECEIVED);
            }
        };
        tracing::debug!(kind = notification.kind(), "Webhook received");

        match self.dispatch_notification(&notification).await {
            Ok(true) => metrics::record_webhook("applied"),
            Ok(false) => metrics::record_webhook("ignored"),
            Err(err) => {
                tracing::error!(
                    kind = notification.kind(),
                    error = %err,
                    "Webhook not applied; acknowledged, booking left for verify or sync"
                );
                metrics::record_webhook("error");
            }
        }
        Ok(Acknowledgement::RECEIVED)
    }

    /// Route one notification. `Ok(false)` means acknowledged without effect.
    async fn dispatch_notification(
        &self,
        notification: &ProcessorNotification,
    ) -> Result<bool, BookingError> {
        let (booking, signal, received) = match notification {
            ProcessorNotification::SessionCompleted(session)
                if session.payment_status != Some(SessionPaymentStatus::Paid) =>
            {
                tracing::info!(
                    session_id = %session.id,
                    "Checkout completed without payment yet; waiting for async result"
                );
                return Ok(false);
            }
            ProcessorNotification::SessionCompleted(session)
            | ProcessorNotification::SessionAsyncSucceeded(session) => {
                let received = self.amount_received(session).await;
                (
                    self.booking_for_session(session).await?,
                    PaymentSignal::paid(session.payment_intent.clone(), Some(session.id.clone())),
                    received,
                )
            }
            ProcessorNotification::SessionAsyncFailed(session) => (
                self.booking_for_session(session).await?,
                PaymentSignal::unpaid(FailureReason::Unpaid),
                None,
            ),
            ProcessorNotification::SessionExpired(session) => (
                self.booking_for_session(session).await?,
                PaymentSignal::unpaid(FailureReason::Expired),
                None,
            ),
            ProcessorNotification::PaymentSucceeded(payment) => (
                self.booking_for_payment(payment).await?,
                PaymentSignal::paid(Some(payment.id.clone()), None),
                payment.amount_received,
            ),
            ProcessorNotification::PaymentFailed(payment) => (
                self.booking_for_payment(payment).await?,
                PaymentSignal::unpaid(FailureReason::Unpaid),
                None,
            ),
            ProcessorNotification::Other(kind) => {
                tracing::debug!(kind = %kind, "Webhook type not handled");
                return Ok(false);
            }
        };

        let Some(booking) = booking else {
            return Ok(false);
        };
        if matches!(signal, PaymentSignal::Paid { .. }) && is_underpaid(&booking, received) {
            tracing::error!(
                booking_id = %booking.id,
                kind = notification.kind(),
                received,
                expected = %booking.total_amount,
                "Payment is less than the booking total; not completing"
            );
            return Ok(false);
        }

        match self.engine.apply(&booking, &signal, Channel::Webhook).await {
            Ok(outcome) => Ok(outcome.changed_status()),
            Err(BookingError::NotFound(id)) => {
                tracing::warn!(booking_id = %id, "Booking vanished while applying webhook");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Amount paid for a session, preferring the payment reference's own record.
    async fn amount_received(&self, session: &SessionObject) -> Option<i64> {
        let (Some(processor), Some(reference)) =
            (self.payments.processor(), session.payment_intent.as_deref())
        else {
            return session.amount_total;
        };
        match processor.retrieve_payment_reference(reference).await {
            Ok(details) => details.amount_minor.or(session.amount_total),
            Err(err) => {
                tracing::warn!(
                    session_id = %session.id,
                    payment_reference = reference,
                    error = %err,
                    "Could not retrieve payment reference; using session amount"
                );
                session.amount_total
            }
        }
    }

    async fn booking_for_session(&self, session: &SessionObject) -> Result<Option<Booking>, BookingError> {
        let Some(raw) = session.booking_ref() else {
            tracing::warn!(session_id = %session.id, "Session has no booking reference; acknowledged");
            return Ok(None);
        };
        let Some(booking_id) = parse_booking_ref(raw) else {
            tracing::warn!(session_id = %session.id, booking_ref = raw, "Malformed booking reference; acknowledged");
            return Ok(None);
        };
        let booking = self.storage.bookings.find_by_id(booking_id).await?;
        if booking.is_none() {
            tracing::warn!(booking_id = %booking_id, session_id = %session.id, "Booking not found; acknowledged");
        }
        Ok(booking)
    }

    async fn booking_for_payment(&self, payment: &PaymentObject) -> Result<Option<Booking>, BookingError> {
        let bookings = &self.storage.bookings;

        if let Some(booking) = bookings.find_by_payment_reference(&payment.id).await? {
            return Ok(Some(booking));
        }
        if let Some(booking) = bookings.find_by_transaction_id(&payment.id).await? {
            return Ok(Some(booking));
        }
        if let Some(session_id) = payment.session_id() {
            if let Some(booking) = bookings.find_by_session_id(session_id).await? {
                return Ok(Some(booking));
            }
        }

        tracing::warn!(payment_reference = %payment.id, "No booking for payment reference; acknowledged");
        Ok(None)
    }

    pub(crate) async fn load_booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        self.storage
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))
    }

    /// Resolve each booking's event, reading every event once.
    pub(crate) async fn with_events(&self, bookings: Vec<Booking>) -> Result<Vec<BookingDetails>, BookingError> {
        let mut events: HashMap<EventId, Option<Event>> = HashMap::new();
        let mut details = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let event = match events.get(&booking.event_id) {
                Some(event) => event.clone(),
                None => {
                    let event = self.storage.catalog.find_event(booking.event_id).await?;
                    events.insert(booking.event_id, event.clone());
                    event
                }
            };
            details.push(BookingDetails { booking, event });
        }
        Ok(details)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use eventpass_core::types::UserId;
    use eventpass_testing::{InMemoryStore, test_clock};

    fn service(store: &InMemoryStore) -> BookingService {
        BookingService::new(
            Storage::shared(store.clone()),
            Payments::Disabled,
            Arc::new(test_clock()),
            ServiceSettings {
                app_env: AppEnv::Test,
                frontend_url: "https://tix.example".to_string(),
                verifier: WebhookVerifier::Skip,
            },
        )
    }

    #[tokio::test]
    async fn booking_snapshots_total() {
        let store = InMemoryStore::new();
        let event = store.seed_event(10, 2500);
        let user = Principal::user(UserId::new());

        let booking = service(&store).create_booking(&user, event.id, 3).await.unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.total_amount.to_minor_units(), Some(7500));
        assert_eq!(store.event(event.id).unwrap().available_tickets, 10);
    }

    #[tokio::test]
    async fn booking_validation_order() {
        let store = InMemoryStore::new();
        let event = store.seed_event(2, 1000);
        let user = Principal::user(UserId::new());
        let service = service(&store);

        assert!(matches!(
            service.create_booking(&user, event.id, 0).await,
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            service.create_booking(&user, EventId::new(), 1).await,
            Err(BookingError::EventNotFound(_))
        ));
        assert!(matches!(
            service.create_booking(&user, event.id, 3).await,
            Err(BookingError::InsufficientInventory {
                requested: 3,
                available: 2
            })
        ));
    }

    #[tokio::test]
    async fn checkout_without_processor_reports_not_configured() {
        let store = InMemoryStore::new();
        let event = store.seed_event(5, 1000);
        let user = Principal::user(UserId::new());
        let service = service(&store);
        let booking = service.create_booking(&user, event.id, 1).await.unwrap();

        assert_eq!(
            service.begin_checkout(&user, booking.id).await.unwrap(),
            CheckoutStart::NotConfigured
        );
        let admin = Principal::admin(UserId::new());
        assert!(matches!(
            service.begin_checkout(&admin, booking.id).await,
            Err(BookingError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_payment_completes_and_verifies() {
        let store = InMemoryStore::new();
        let event = store.seed_event(5, 1000);
        let user = Principal::user(UserId::new());
        let service = service(&store);
        let booking = service.create_booking(&user, event.id, 2).await.unwrap();

        let paid = service.confirm_test_payment(&user, booking.id).await.unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Completed);
        assert_eq!(store.event(event.id).unwrap().available_tickets, 3);

        let view = service
            .verify_payment(&user, &format!("test_{}", booking.id))
            .await
            .unwrap();
        assert_eq!(view.payment_status, PaymentStatus::Completed);
        assert_eq!(view.outcome, None);

        assert!(matches!(
            service.confirm_test_payment(&user, booking.id).await,
            Err(BookingError::AlreadyPaid(_))
        ));
    }

    #[tokio::test]
    async fn sync_requires_session_then_processor() {
        let store = InMemoryStore::new();
        let event = store.seed_event(5, 1000);
        let user = Principal::user(UserId::new());
        let service = service(&store);
        let booking = service.create_booking(&user, event.id, 1).await.unwrap();

        assert!(matches!(
            service.sync_payment(&user, booking.id).await,
            Err(BookingError::NoSession(_))
        ));
        assert!(matches!(
            service
                .sync_payment(&Principal::user(UserId::new()), booking.id)
                .await,
            Err(BookingError::Forbidden)
        ));
    }
}

//! HTTP client for a hosted-checkout processor API.
//!
//! Speaks the `/v1/checkout/sessions` and `/v1/payment_intents` resources with
//! form-encoded requests and bearer authentication.

use crate::checkout::BOOKING_METADATA_KEY;
use crate::config::ProcessorCredentials;
use eventpass_core::processor::{
    CheckoutRequest, CheckoutSession, PaymentDetails, PaymentProcessor, ProcessorError,
    SessionPaymentStatus, SessionSnapshot, SessionState,
};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SessionResource {
    id: String,
    #[serde(default)]
    url: Option<String>,
    payment_status: SessionPaymentStatus,
    #[serde(default)]
    status: Option<SessionState>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

impl From<SessionResource> for SessionSnapshot {
    fn from(mut resource: SessionResource) -> Self {
        Self {
            booking_ref: resource.metadata.remove(BOOKING_METADATA_KEY),
            session_id: resource.id,
            payment_status: resource.payment_status,
            state: resource.status,
            payment_reference: resource.payment_intent,
            amount_total: resource.amount_total,
            currency: resource.currency,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResource {
    id: String,
    #[serde(default)]
    amount_received: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// `reqwest`-backed [`PaymentProcessor`].
#[derive(Clone)]
pub struct HttpPaymentProcessor {
    http_client: Client,
    api_base: String,
    secret_key: String,
}

impl std::fmt::Debug for HttpPaymentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentProcessor")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl HttpPaymentProcessor {
    /// Create a client from credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Http`] if the HTTP client cannot be built.
    pub fn new(credentials: &ProcessorCredentials) -> Result<Self, ProcessorError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(credentials.timeout_secs))
            .build()
            .map_err(|e| ProcessorError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            api_base: credentials.api_base.trim_end_matches('/').to_string(),
            secret_key: credentials.secret_key.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProcessorError> {
        let response = self
            .http_client
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;
        handle_response(response).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, ProcessorError> {
        let response = self
            .http_client
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;
        handle_response(response).await
    }
}

fn transport_error(err: reqwest::Error) -> ProcessorError {
    if err.is_timeout() {
        ProcessorError::Timeout
    } else {
        ProcessorError::Http(err.to_string())
    }
}

/// Decode a success body or turn an error status into [`ProcessorError::Api`].
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProcessorError> {
    let status = response.status();

    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| ProcessorError::Parse(e.to_string()))
    } else {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|parsed| parsed.error.message)
            .unwrap_or(body);

        Err(ProcessorError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Ids are interpolated into the request path, so only plain tokens pass.
fn resource_id(id: &str) -> Result<&str, ProcessorError> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(id)
    } else {
        Err(ProcessorError::Api {
            status: 400,
            message: format!("invalid resource id: {id:?}"),
        })
    }
}

/// Form fields for a one-line-item payment session.
fn session_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            request.amount_minor.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            request.description.clone(),
        ),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            format!("metadata[{BOOKING_METADATA_KEY}]"),
            request.booking_id.to_string(),
        ),
        (
            "metadata[tickets]".to_string(),
            request.tickets.to_string(),
        ),
    ]
}

impl PaymentProcessor for HttpPaymentProcessor {
    fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSession, ProcessorError>> + Send + '_>> {
        Box::pin(async move {
            let resource: SessionResource = self
                .post_form("/v1/checkout/sessions", &session_form(&request))
                .await?;
            let url = resource
                .url
                .ok_or_else(|| ProcessorError::Parse("checkout session has no url".to_string()))?;
            tracing::info!(
                booking_id = %request.booking_id,
                session_id = %resource.id,
                amount_minor = request.amount_minor,
                "Checkout session created"
            );
            Ok(CheckoutSession {
                session_id: resource.id,
                url,
            })
        })
    }

    fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SessionSnapshot, ProcessorError>> + Send + '_>> {
        let path = resource_id(session_id).map(|id| format!("/v1/checkout/sessions/{id}"));
        Box::pin(async move {
            let resource: SessionResource = self.get(&path?).await?;
            Ok(resource.into())
        })
    }

    fn retrieve_payment_reference(
        &self,
        reference: &str,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentDetails, ProcessorError>> + Send + '_>> {
        let path = resource_id(reference).map(|id| format!("/v1/payment_intents/{id}"));
        Box::pin(async move {
            let resource: PaymentIntentResource = self.get(&path?).await?;
            Ok(PaymentDetails {
                reference: resource.id,
                amount_minor: resource.amount_received,
                currency: resource.currency,
            })
        })
    }
}

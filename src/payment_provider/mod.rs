//! Payment provider seam.
//!
//! The reconciler only talks to [`PaymentProvider`]; the Stripe client and the
//! in-memory mock both speak the Checkout Sessions vocabulary (sessions with a
//! `status` and a `payment_status`, signed `checkout.session.*` webhooks).

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AppConfig, PaymentProviderKind};

pub mod mock;
pub mod signature;
pub mod stripe;

pub use mock::MockPaymentProvider;
pub use stripe::{StripeConfig, StripePaymentProvider};

/// Event types that carry a checkout session whose status should be reconciled.
pub const SESSION_COMPLETED_EVENTS: [&str; 2] = [
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unknown payment session {0}")]
    UnknownSession(String),

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Parameters for opening a hosted payment session.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

/// What the provider reports about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session lifecycle: `open`, `complete` or `expired`
    pub status: String,
    pub payment_status: ProviderPaymentStatus,
}

impl SessionStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == ProviderPaymentStatus::Paid
    }
}

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub session_id: Option<String>,
    pub session_status: Option<SessionStatus>,
}

impl WebhookEvent {
    pub fn is_session_completion(&self) -> bool {
        SESSION_COMPLETED_EVENTS.contains(&self.event_type.as_str())
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError>;

    async fn get_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError>;

    /// Authenticates a raw webhook body against its signature header and parses it.
    fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, ProviderError>;
}

/// Webhook secret the mock provider signs with when none is configured.
pub const DEV_WEBHOOK_SECRET: &str = "whsec_storefront_dev";

/// The provider in use, plus a handle on the mock when it is the mock.
#[derive(Clone)]
pub struct PaymentBackend {
    pub provider: Arc<dyn PaymentProvider>,
    pub mock: Option<Arc<MockPaymentProvider>>,
}

impl PaymentBackend {
    pub fn mock(mock: Arc<MockPaymentProvider>) -> Self {
        Self {
            provider: mock.clone(),
            mock: Some(mock),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        match config.payment_provider {
            PaymentProviderKind::Mock => {
                let secret = config
                    .payment_webhook_secret
                    .clone()
                    .unwrap_or_else(|| DEV_WEBHOOK_SECRET.to_string());
                Ok(Self::mock(Arc::new(MockPaymentProvider::new(secret))))
            }
            PaymentProviderKind::Stripe => {
                let secret_key = config
                    .stripe_secret_key
                    .clone()
                    .ok_or_else(|| ProviderError::NotConfigured("stripe_secret_key".into()))?;
                let webhook_secret = config
                    .payment_webhook_secret
                    .clone()
                    .ok_or_else(|| ProviderError::NotConfigured("payment_webhook_secret".into()))?;
                let stripe = StripePaymentProvider::new(StripeConfig {
                    secret_key,
                    api_base: config.stripe_api_base.clone(),
                    webhook_secret,
                    webhook_tolerance_secs: config.payment_webhook_tolerance_secs,
                    request_timeout: config.provider_timeout(),
                })?;
                Ok(Self {
                    provider: Arc::new(stripe),
                    mock: None,
                })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.provider.name()
    }
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawSessionObject {
    id: String,
    status: Option<String>,
    payment_status: ProviderPaymentStatus,
}

/// Parses a checkout event body. Session fields are only extracted when the
/// event's object is a checkout session.
pub(crate) fn parse_checkout_event(body: &[u8]) -> Result<WebhookEvent, ProviderError> {
    let raw: RawEvent =
        serde_json::from_slice(body).map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

    let is_session = raw
        .data
        .object
        .get("object")
        .and_then(|v| v.as_str())
        .map_or(false, |kind| kind == "checkout.session");

    let (session_id, session_status) = if is_session {
        let session: RawSessionObject = serde_json::from_value(raw.data.object)
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;
        let status = SessionStatus {
            status: session.status.unwrap_or_else(|| "complete".to_string()),
            payment_status: session.payment_status,
        };
        (Some(session.id), Some(status))
    } else {
        (None, None)
    };

    Ok(WebhookEvent {
        event_id: raw.id,
        event_type: raw.event_type,
        session_id,
        session_status,
    })
}

/// Builds a checkout event body in the provider's wire format.
pub fn checkout_event_body(
    event_id: &str,
    event_type: &str,
    session_id: &str,
    status: &SessionStatus,
) -> Vec<u8> {
    serde_json::json!({
        "id": event_id,
        "object": "event",
        "type": event_type,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "status": status.status,
                "payment_status": status.payment_status,
            }
        }
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completed_session_event() {
        let status = SessionStatus {
            status: "complete".into(),
            payment_status: ProviderPaymentStatus::Paid,
        };
        let body = checkout_event_body("evt_1", "checkout.session.completed", "cs_1", &status);

        let event = parse_checkout_event(&body).unwrap();
        assert_eq!(event.event_id, "evt_1");
        assert!(event.is_session_completion());
        assert_eq!(event.session_id.as_deref(), Some("cs_1"));
        assert_eq!(event.session_status, Some(status));
    }

    #[test]
    fn non_session_events_have_no_session() {
        let body = br#"{"id":"evt_2","type":"charge.refunded","data":{"object":{"id":"ch_1","object":"charge"}}}"#;
        let event = parse_checkout_event(body).unwrap();
        assert!(!event.is_session_completion());
        assert!(event.session_id.is_none());
    }

    fn config(kind: PaymentProviderKind) -> AppConfig {
        let mut config = AppConfig::new(
            "sqlite::memory:".into(),
            "x".repeat(64),
            "development".into(),
        );
        config.payment_provider = kind;
        config
    }

    #[test]
    fn mock_backend_exposes_the_mock_handle() {
        let backend = PaymentBackend::from_config(&config(PaymentProviderKind::Mock)).unwrap();
        assert_eq!(backend.name(), "mock");
        assert!(backend.mock.is_some());
    }

    #[test]
    fn stripe_backend_requires_a_secret_key() {
        let result = PaymentBackend::from_config(&config(PaymentProviderKind::Stripe));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn malformed_body_is_invalid_payload() {
        assert!(matches!(
            parse_checkout_event(b"not json"),
            Err(ProviderError::InvalidPayload(_))
        ));
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    checkout_event_body, parse_checkout_event, signature, CheckoutSession,
    CheckoutSessionRequest, PaymentProvider, ProviderError, ProviderPaymentStatus, SessionStatus,
    WebhookEvent,
};

#[derive(Debug, Clone)]
struct MockSession {
    request: CheckoutSessionRequest,
    status: SessionStatus,
}

/// In-memory provider for development and tests.
///
/// Sessions start `open`/`unpaid` and only change through
/// [`MockPaymentProvider::complete_session`] or [`MockPaymentProvider::expire_session`].
/// Webhooks use the same signature scheme as the Stripe provider.
#[derive(Debug)]
pub struct MockPaymentProvider {
    sessions: DashMap<String, MockSession>,
    webhook_secret: String,
    webhook_tolerance_secs: u64,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    status_calls: AtomicUsize,
}

impl MockPaymentProvider {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            webhook_secret: webhook_secret.into(),
            webhook_tolerance_secs: 300,
            unavailable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Marks the session as paid, as if the shopper finished checkout.
    pub fn complete_session(&self, session_id: &str) -> Result<(), ProviderError> {
        self.set_status(session_id, "complete", ProviderPaymentStatus::Paid)
    }

    pub fn expire_session(&self, session_id: &str) -> Result<(), ProviderError> {
        self.set_status(session_id, "expired", ProviderPaymentStatus::Unpaid)
    }

    fn set_status(
        &self,
        session_id: &str,
        status: &str,
        payment_status: ProviderPaymentStatus,
    ) -> Result<(), ProviderError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProviderError::UnknownSession(session_id.to_string()))?;
        session.status = SessionStatus {
            status: status.to_string(),
            payment_status,
        };
        info!(session_id, status, %payment_status, "Mock session updated");
        Ok(())
    }

    /// Simulates an outage: every status query fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every status query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `get_status` calls served so far.
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn session_request(&self, session_id: &str) -> Option<CheckoutSessionRequest> {
        self.sessions
            .get(session_id)
            .map(|session| session.request.clone())
    }

    /// Builds a signed completion webhook for the session's current state.
    /// Returns the body and the signature header value.
    pub fn completion_webhook(
        &self,
        session_id: &str,
        event_id: &str,
    ) -> Result<(Vec<u8>, String), ProviderError> {
        let status = self
            .sessions
            .get(session_id)
            .map(|session| session.status.clone())
            .ok_or_else(|| ProviderError::UnknownSession(session_id.to_string()))?;
        let body = checkout_event_body(event_id, "checkout.session.completed", session_id, &status);
        let header = signature::sign(&self.webhook_secret, chrono::Utc::now().timestamp(), &body)?;
        Ok((body, header))
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let session_id = format!("cs_mock_{}", Uuid::new_v4().simple());
        let url = format!("https://checkout.mock.local/pay/{}", session_id);
        self.sessions.insert(
            session_id.clone(),
            MockSession {
                request,
                status: SessionStatus {
                    status: "open".to_string(),
                    payment_status: ProviderPaymentStatus::Unpaid,
                },
            },
        );
        debug!(%session_id, "Mock session created");
        Ok(CheckoutSession { session_id, url })
    }

    async fn get_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Http("mock provider unavailable".to_string()));
        }

        self.sessions
            .get(session_id)
            .map(|session| session.status.clone())
            .ok_or_else(|| ProviderError::UnknownSession(session_id.to_string()))
    }

    fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, ProviderError> {
        let header = signature_header
            .ok_or_else(|| ProviderError::InvalidSignature("missing signature header".into()))?;
        signature::verify(
            header,
            body,
            &self.webhook_secret,
            self.webhook_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )?;
        parse_checkout_event(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn request() -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            amount: dec!(200.00),
            currency: "usd".into(),
            success_url: "https://shop.example/order-success".into(),
            cancel_url: "https://shop.example/cart".into(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn sessions_start_unpaid_and_complete_on_demand() {
        let provider = MockPaymentProvider::new("whsec_mock");
        let session = provider.create_session(request()).await.unwrap();

        let status = provider.get_status(&session.session_id).await.unwrap();
        assert_eq!(status.status, "open");
        assert!(!status.is_paid());

        provider.complete_session(&session.session_id).unwrap();
        assert!(provider.get_status(&session.session_id).await.unwrap().is_paid());
        assert_eq!(provider.status_calls(), 2);
    }

    #[tokio::test]
    async fn outage_fails_status_queries() {
        let provider = MockPaymentProvider::new("whsec_mock");
        let session = provider.create_session(request()).await.unwrap();
        provider.set_unavailable(true);

        assert!(matches!(
            provider.get_status(&session.session_id).await,
            Err(ProviderError::Http(_))
        ));
    }

    #[tokio::test]
    async fn completion_webhook_round_trips_through_verification() {
        let provider = MockPaymentProvider::new("whsec_mock");
        let session = provider.create_session(request()).await.unwrap();
        provider.complete_session(&session.session_id).unwrap();

        let (body, header) = provider
            .completion_webhook(&session.session_id, "evt_1")
            .unwrap();
        let event = provider
            .verify_and_parse_webhook(&body, Some(&header))
            .unwrap();

        assert!(event.is_session_completion());
        assert_eq!(event.session_id.as_deref(), Some(session.session_id.as_str()));
        assert!(event.session_status.unwrap().is_paid());

        assert!(matches!(
            provider.verify_and_parse_webhook(&body, None),
            Err(ProviderError::InvalidSignature(_))
        ));
    }
}

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{
    parse_checkout_event, signature, CheckoutSession, CheckoutSessionRequest, PaymentProvider,
    ProviderError, SessionStatus, WebhookEvent,
};

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Base URL of the REST API, overridable for tests
    pub api_base: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: u64,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Checkout Sessions client
#[derive(Clone, Debug)]
pub struct StripePaymentProvider {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct SessionStatusResponse {
    status: Option<String>,
    payment_status: super::ProviderPaymentStatus,
}

impl StripePaymentProvider {
    pub fn new(config: StripeConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn read_error(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        warn!(status, "Stripe API error: {}", message);
        ProviderError::Rejected { status, message }
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(err.to_string())
    }
}

/// Converts a major-unit amount into the smallest currency unit.
pub(crate) fn to_minor_units(amount: Decimal) -> Result<i64, ProviderError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|cents| *cents > 0)
        .ok_or_else(|| ProviderError::InvalidPayload(format!("invalid amount {}", amount)))
}

#[async_trait]
impl PaymentProvider for StripePaymentProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let unit_amount = to_minor_units(request.amount)?;
        let product_name = request
            .metadata
            .get("order_id")
            .map(|id| format!("Order {}", id))
            .unwrap_or_else(|| "Storefront order".to_string());

        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("success_url".into(), request.success_url),
            ("cancel_url".into(), request.cancel_url),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                product_name,
            ),
        ];
        for (key, value) in request.metadata {
            params.push((format!("metadata[{}]", key), value));
        }

        let response = self
            .client
            .post(self.endpoint("checkout/sessions"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Http(format!("failed to parse session: {}", e)))?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(CheckoutSession {
            url: session.url.unwrap_or_default(),
            session_id: session.id,
        })
    }

    #[instrument(skip(self))]
    async fn get_status(&self, session_id: &str) -> Result<SessionStatus, ProviderError> {
        let response = self
            .client
            .get(self.endpoint(&format!("checkout/sessions/{}", session_id)))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::UnknownSession(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: SessionStatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Http(format!("failed to parse session: {}", e)))?;

        Ok(SessionStatus {
            status: body.status.unwrap_or_else(|| "open".to_string()),
            payment_status: body.payment_status,
        })
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
            &self.config.webhook_secret,
            self.config.webhook_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )?;
        parse_checkout_event(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(200.00)).unwrap(), 20000);
        assert_eq!(to_minor_units(dec!(0.125)).unwrap(), 13);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
    }

    #[test]
    fn zero_amount_is_rejected() {
        assert!(to_minor_units(Decimal::ZERO).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = StripeConfig {
            secret_key: "sk_live_very_secret".into(),
            api_base: "https://api.stripe.com".into(),
            webhook_secret: "whsec_very_secret".into(),
            webhook_tolerance_secs: 300,
            request_timeout: Duration::from_secs(10),
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("very_secret"));
    }
}

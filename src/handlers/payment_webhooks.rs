use crate::{
    handlers::common::success_response, payment_provider::signature::SIGNATURE_HEADER,
    services::payments::WebhookAck, ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, http::HeaderMap};
use bytes::Bytes;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body(content = String, description = "Raw provider event", content_type = "application/json"),
    params(("stripe-signature" = String, Header, description = "t=<unix>,v1=<hex hmac-sha256>")),
    responses(
        (status = 200, description = "Webhook accepted", body = ApiResponse<WebhookAck>),
        (status = 400, description = "Invalid payload or signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = state
        .services
        .payments
        .handle_notification(&body, signature)
        .await?;
    Ok(success_response(ack))
}

use crate::{
    auth::AuthUser,
    handlers::common::success_response,
    services::payments::{CheckoutSessionResponse, OpenSessionRequest, PaymentState},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    Json,
};

/// Open a hosted payment session for one of the user's orders
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = OpenSessionRequest,
    responses(
        (status = 200, description = "Session opened", body = ApiResponse<CheckoutSessionResponse>),
        (status = 400, description = "Invalid origin", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid or cancelled", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn open_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<OpenSessionRequest>,
) -> ApiResult<CheckoutSessionResponse> {
    let session = state
        .services
        .payments
        .open_session(&user, payload.order_id, &payload.origin_url)
        .await?;
    Ok(success_response(session))
}

/// Ask the provider for the session's status and reconcile the order
#[utoipa::path(
    get,
    path = "/api/v1/checkout/status/{session_id}",
    params(("session_id" = String, Path, description = "Provider session ID")),
    responses(
        (status = 200, description = "Payment state after reconciliation", body = ApiResponse<PaymentState>),
        (status = 403, description = "Session belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn session_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> ApiResult<PaymentState> {
    let payment = state
        .services
        .payments
        .poll_session(&user, &session_id)
        .await?;
    Ok(success_response(payment))
}

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::{
        orders::{OrderResponse, UpdateFulfillmentRequest},
        payments::PaymentState,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// Freeze the cart into a pending order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Cart is empty", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(&user).await?;
    Ok(created_response(order))
}

/// The signed-in user's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "Orders", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<OrderResponse>> {
    let orders = state.services.orders.list_own(&user).await?;
    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_order(&user, id).await?;
    Ok(success_response(order))
}

/// Pay an order through the mock provider, then reconcile it
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/mock-payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Reconciled payment", body = ApiResponse<PaymentState>),
        (status = 400, description = "Mock payments are disabled", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn mock_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentState> {
    let payment = state.services.payments.confirm_mock_payment(&user, id).await?;
    Ok(success_response(payment))
}

/// Every order in the store, newest first
#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    responses(
        (status = 200, description = "Orders", body = ApiResponse<Vec<OrderResponse>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn admin_list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<OrderResponse>> {
    let orders = state.services.orders.list_all(&user).await?;
    Ok(success_response(orders))
}

/// Move an order along the fulfillment track
#[utoipa::path(
    patch,
    path = "/api/v1/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateFulfillmentRequest,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn admin_update_fulfillment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateFulfillmentRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .update_fulfillment(&user, id, payload.status)
        .await?;
    Ok(success_response(order))
}

use crate::{
    auth::AuthUser,
    handlers::common::{success_response, validate_input},
    services::carts::{AddCartItemRequest, CartView},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

/// The signed-in user's cart, priced at current catalog values
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.carts.view(user.user_id).await?;
    Ok(success_response(cart))
}

/// Add a product to the cart, or replace its quantity
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddCartItemRequest>,
) -> ApiResult<CartView> {
    validate_input(&payload)?;
    let cart = state.services.carts.add_item(user.user_id, payload).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product to remove")),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>)
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .carts
        .remove_item(user.user_id, product_id)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Emptied cart", body = ApiResponse<CartView>)
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn clear_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    state.services.carts.clear(user.user_id).await?;
    let cart = state.services.carts.view(user.user_id).await?;
    Ok(success_response(cart))
}

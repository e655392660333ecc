use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::reviews::{CreateReviewRequest, ReviewResponse},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// Review a product. One review per shopper and product.
#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review created", body = ApiResponse<ReviewResponse>),
        (status = 400, description = "Already reviewed or invalid rating", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reviews"
)]
pub async fn create_review(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReviewResponse>>), ServiceError> {
    validate_input(&payload)?;
    let review = state.services.reviews.create_review(&user, payload).await?;
    Ok(created_response(review))
}

#[utoipa::path(
    get,
    path = "/api/v1/reviews/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Reviews, newest first", body = ApiResponse<Vec<ReviewResponse>>)
    ),
    tag = "reviews"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Vec<ReviewResponse>> {
    let reviews = state.services.reviews.list_for_product(product_id).await?;
    Ok(success_response(reviews))
}

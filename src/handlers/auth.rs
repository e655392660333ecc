use crate::{
    auth::{AuthResponse, AuthUser, LoginRequest, RegisterRequest, UserProfile},
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, http::StatusCode, Json};

/// Register a customer account and sign it in
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<AuthResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ServiceError> {
    validate_input(&payload)?;
    let response = state.auth.register(payload).await?;
    Ok(created_response(response))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Invalid email or password", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<AuthResponse> {
    validate_input(&payload)?;
    let response = state.auth.login(payload).await?;
    Ok(success_response(response))
}

/// The signed-in user's profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = ApiResponse<UserProfile>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<UserProfile> {
    let profile = state.auth.current_user(&user).await?;
    Ok(success_response(profile))
}

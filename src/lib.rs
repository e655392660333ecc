//! Storefront API Library
//!
//! Catalog, carts, orders, and the payment reconciler that turns a paid
//! checkout session into exactly one stock debit.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payment_provider;
pub mod services;
pub mod tracing;

use axum::{
    response::Json,
    routing::{delete, get, patch, post, put},
    Extension, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, Capability};
use crate::payment_provider::PaymentBackend;

/// Upper bound on a whole request, above the provider timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub auth: Arc<auth::AuthService>,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<db::DbPool>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
        payments: &PaymentBackend,
    ) -> Self {
        let auth = Arc::new(auth::AuthService::new(
            auth::AuthConfig::from(&config),
            db.clone(),
            event_sender.clone(),
        ));
        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), payments, &config);

        Self {
            db,
            config,
            event_sender,
            auth,
            services,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes under `/api/v1`.
///
/// Public, customer, and admin routers share paths and are merged, so each
/// method carries only the layers it needs.
pub fn api_v1_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/status", get(handlers::health::api_status))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/products", get(handlers::products::list_products))
        .route("/products/:id", get(handlers::products::get_product))
        .route("/categories", get(handlers::products::list_categories))
        .route(
            "/reviews/:product_id",
            get(handlers::reviews::list_reviews),
        )
        // Unauthenticated, but signature-verified
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        );

    let customer = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route(
            "/cart",
            get(handlers::carts::get_cart).delete(handlers::carts::clear_cart),
        )
        .route("/cart/items", post(handlers::carts::add_item))
        .route(
            "/cart/items/:product_id",
            delete(handlers::carts::remove_item),
        )
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/mock-payment",
            patch(handlers::orders::mock_payment),
        )
        .route("/reviews", post(handlers::reviews::create_review))
        .route("/checkout", post(handlers::checkout::open_session))
        .route(
            "/checkout/status/:session_id",
            get(handlers::checkout::session_status),
        )
        .with_auth();

    let catalog_admin = Router::new()
        .route("/products", post(handlers::products::create_product))
        .route(
            "/products/:id",
            put(handlers::products::update_product).delete(handlers::products::delete_product),
        )
        .with_capability(Capability::ManageCatalog);

    let orders_admin = Router::new()
        .route("/admin/orders", get(handlers::orders::admin_list_orders))
        .with_capability(Capability::ViewAllOrders);

    let fulfillment_admin = Router::new()
        .route(
            "/admin/orders/:id",
            patch(handlers::orders::admin_update_fulfillment),
        )
        .with_capability(Capability::ManageFulfillment);

    public
        .merge(customer)
        .merge(catalog_admin)
        .merge(orders_admin)
        .merge(fulfillment_admin)
}

/// Allowed origins from config; permissive in development when none are set.
fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<http::HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| http::HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else if config.is_development() {
        ::tracing::info!("Using permissive CORS because no origins are configured");
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("No CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

/// The full application router with its middleware stack.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let auth_service = state.auth.clone();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
        // AuthService for auth_middleware
        .layer(Extension(auth_service))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(crate::tracing::configure_http_tracing())
        // Outermost so every span and error body carries the request id
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}

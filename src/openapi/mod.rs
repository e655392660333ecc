use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Catalog browsing, per-user carts, orders priced from a frozen catalog snapshot, and hosted
checkout reconciled from both a status poll and a signed provider webhook.

## Authentication

Customer and admin endpoints take a JWT issued by `/api/v1/auth/login`:

```
Authorization: Bearer <your-jwt-token>
```

The payment webhook is unauthenticated and verified through its `stripe-signature` header.

## Error Handling

Errors share one body:

```json
{
  "error": "Unprocessable Entity",
  "message": "Insufficient stock for Espresso Machine",
  "request_id": "4f0c…",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration and sign-in"),
        (name = "products", description = "Catalog browsing and maintenance"),
        (name = "reviews", description = "Product reviews and ratings"),
        (name = "cart", description = "The signed-in user's cart"),
        (name = "orders", description = "Order creation and history"),
        (name = "checkout", description = "Hosted payment sessions and reconciliation"),
        (name = "payments", description = "Provider notifications"),
        (name = "admin", description = "Store administration"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::health::health_check,
        crate::handlers::health::api_status,

        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::me,

        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::list_categories,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,

        crate::handlers::reviews::create_review,
        crate::handlers::reviews::list_reviews,

        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,

        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::mock_payment,
        crate::handlers::orders::admin_list_orders,
        crate::handlers::orders::admin_update_fulfillment,

        crate::handlers::checkout::open_session,
        crate::handlers::checkout::session_status,

        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::errors::ErrorResponse,

            crate::auth::RegisterRequest,
            crate::auth::LoginRequest,
            crate::auth::UserProfile,
            crate::auth::AuthResponse,

            crate::services::catalog::ProductInput,
            crate::services::catalog::ProductResponse,

            crate::services::reviews::CreateReviewRequest,
            crate::services::reviews::ReviewResponse,

            crate::services::carts::AddCartItemRequest,
            crate::services::carts::CartItemView,
            crate::services::carts::CartView,

            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::UpdateFulfillmentRequest,
            crate::entities::order::FulfillmentStatus,
            crate::entities::order::PaymentStatus,

            crate::services::payments::OpenSessionRequest,
            crate::services::payments::CheckoutSessionResponse,
            crate::services::payments::PaymentState,
            crate::services::payments::ReconcileOutcome,
            crate::services::payments::WebhookAck,

            crate::handlers::health::HealthResponse,
            crate::handlers::health::ComponentHealth,
            crate::handlers::health::ComponentStatus,
            crate::handlers::health::ServiceStatus,
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serves the generated document at `/api-docs/openapi.json`
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_checkout_surface() {
        let doc = ApiDocV1::openapi();
        for path in [
            "/api/v1/orders",
            "/api/v1/checkout",
            "/api/v1/checkout/status/{session_id}",
            "/api/v1/payments/webhook",
            "/api/v1/admin/orders/{id}",
            "/api/v1/reviews",
            "/api/v1/reviews/{product_id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }

    #[test]
    fn mock_payment_is_a_patch() {
        let doc = ApiDocV1::openapi();
        let item = &doc.paths.paths["/api/v1/orders/{id}/mock-payment"];
        assert!(item.patch.is_some());
        assert!(item.post.is_none());
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDocV1::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}

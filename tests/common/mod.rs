#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::AuthUser,
    config::AppConfig,
    db,
    entities::{order, payment_transaction, product, user},
    events::{self, EventSender},
    payment_provider::{signature::SIGNATURE_HEADER, MockPaymentProvider, PaymentBackend},
    services::{carts::AddCartItemRequest, catalog::ProductInput},
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str =
    "integration-test-secret-0123456789abcdefghijklmnopqrstuvwxyz-ABCDEFGH";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// A user row plus a bearer token for it.
#[derive(Clone, Debug)]
pub struct TestUser {
    pub id: Uuid,
    pub token: String,
    pub actor: AuthUser,
}

/// Application state and router over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub mock: Arc<MockPaymentProvider>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_provider_timeout(Duration::from_secs(5)).await
    }

    pub async fn with_provider_timeout(timeout: Duration) -> Self {
        Self::build(timeout, 1).await
    }

    /// A pool with several connections, so concurrent reconcilers really
    /// overlap in the database instead of queueing for one connection.
    pub async fn with_pool_size(connections: u32) -> Self {
        Self::build(Duration::from_secs(5), connections).await
    }

    async fn build(timeout: Duration, connections: u32) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.payment_provider_timeout_secs = timeout.as_secs().max(1);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let mock = Arc::new(MockPaymentProvider::new(WEBHOOK_SECRET));
        let mut state = AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            &PaymentBackend::mock(mock.clone()),
        );
        if timeout < Duration::from_secs(1) {
            state.services = rebuild_with_timeout(&state, &mock, timeout);
        }

        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            mock,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw provider notification.
    pub async fn post_webhook(&self, body: Vec<u8>, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.send(builder.body(Body::from(body)).expect("webhook request"))
            .await
    }

    /// Inserts a user directly, skipping password hashing.
    pub async fn create_user(&self, name: &str, is_admin: bool) -> TestUser {
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(format!("{}-{}@example.com", name.to_lowercase(), Uuid::new_v4().simple())),
            password_hash: Set("not-a-real-hash".to_string()),
            is_admin: Set(is_admin),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert test user");

        let token = self
            .state
            .auth
            .generate_token(&model)
            .expect("token for test user");
        let claims = self
            .state
            .auth
            .validate_token(&token)
            .expect("fresh token validates");
        let actor = AuthUser::from_claims(claims).expect("claims map to a user");

        TestUser {
            id: model.id,
            token,
            actor,
        }
    }

    pub async fn customer(&self) -> TestUser {
        self.create_user("Shopper", false).await
    }

    pub async fn admin(&self) -> TestUser {
        self.create_user("Admin", true).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let created = self
            .state
            .services
            .catalog
            .create_product(ProductInput {
                name: name.to_string(),
                description: format!("{} for integration tests", name),
                price,
                category: "Test Appliances".to_string(),
                image_url: String::new(),
                brand: Some("Acme".to_string()),
                stock,
                features: vec![],
            })
            .await
            .expect("seed product for tests");
        self.product(created.id).await.expect("seeded product exists")
    }

    pub async fn product(&self, id: Uuid) -> Option<product::Model> {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load product")
    }

    pub async fn stock(&self, id: Uuid) -> i32 {
        self.product(id).await.expect("product exists").stock
    }

    pub async fn set_price(&self, id: Uuid, price: Decimal) {
        let current = self.product(id).await.expect("product exists");
        let mut active: product::ActiveModel = current.into();
        active.price = Set(price);
        active.update(&*self.state.db).await.expect("update price");
    }

    pub async fn add_to_cart(&self, user: &TestUser, product_id: Uuid, quantity: i32) {
        self.state
            .services
            .carts
            .add_item(
                user.id,
                AddCartItemRequest {
                    product_id,
                    quantity,
                },
            )
            .await
            .expect("add cart item");
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn transactions(&self) -> Vec<payment_transaction::Model> {
        payment_transaction::Entity::find()
            .all(&*self.state.db)
            .await
            .expect("load transactions")
    }
}

fn rebuild_with_timeout(
    state: &AppState,
    mock: &Arc<MockPaymentProvider>,
    timeout: Duration,
) -> storefront_api::handlers::AppServices {
    let mut services = state.services.clone();
    services.payments = Arc::new(storefront_api::services::PaymentService::new(
        state.db.clone(),
        mock.clone(),
        Some(mock.clone()),
        state.event_sender.clone(),
        timeout,
    ));
    services
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is JSON")
}

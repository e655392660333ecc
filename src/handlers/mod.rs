pub mod auth;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod products;
pub mod reviews;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::payment_provider::PaymentBackend;
use crate::services::{CartService, CatalogService, OrderService, PaymentService, ReviewService};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub reviews: Arc<ReviewService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        payments: &PaymentBackend,
        config: &AppConfig,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new(db_pool.clone(), event_sender.clone()));
        let carts = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let reviews = Arc::new(ReviewService::new(db_pool.clone(), event_sender.clone()));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            carts.clone(),
            event_sender.clone(),
            config.default_currency.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db_pool,
            payments.provider.clone(),
            payments.mock.clone(),
            event_sender,
            config.provider_timeout(),
        ));

        Self {
            catalog,
            carts,
            orders,
            payments,
            reviews,
        }
    }
}

// Catalog and cart
pub mod carts;
pub mod catalog;
pub mod reviews;

// Order lifecycle
pub mod orders;
pub mod payments;
pub mod pricing;

pub use carts::CartService;
pub use catalog::CatalogService;
pub use orders::OrderService;
pub use payments::PaymentService;
pub use reviews::ReviewService;

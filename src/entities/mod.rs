pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_transaction;
pub mod product;
pub mod review;
pub mod user;

pub use order::{FulfillmentStatus, PaymentStatus};

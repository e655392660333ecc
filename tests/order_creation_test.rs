mod common;

use std::str::FromStr;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use storefront_api::{
    entities::order::{self, FulfillmentStatus, PaymentStatus},
    errors::ServiceError,
};

#[tokio::test]
async fn order_freezes_cart_at_catalog_prices() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let toaster = app.seed_product("Toaster", dec!(250.50), 4).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    app.add_to_cart(&shopper, toaster.id, 1).await;

    let order = app
        .state
        .services
        .orders
        .create_order(&shopper.actor)
        .await
        .unwrap();

    assert_eq!(order.total_amount, dec!(450.50));
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Pending);
    assert!(order.session_id.is_none());
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.items[0].product_name, "Kettle");
    assert_eq!(order.items[0].line_total, dec!(200));

    // Nothing moves until payment
    assert_eq!(app.stock(kettle.id).await, 5);
    let cart = app.state.services.carts.view(shopper.id).await.unwrap();
    assert_eq!(cart.items.len(), 2);
}

#[tokio::test]
async fn later_price_changes_do_not_touch_existing_orders() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;

    let order = app
        .state
        .services
        .orders
        .create_order(&shopper.actor)
        .await
        .unwrap();
    app.set_price(kettle.id, dec!(175)).await;

    let reloaded = app
        .state
        .services
        .orders
        .get_order(&shopper.actor, order.id)
        .await
        .unwrap();
    assert_eq!(reloaded.total_amount, dec!(200));
    assert_eq!(reloaded.items[0].unit_price, dec!(100));
}

#[tokio::test]
async fn empty_cart_creates_no_order() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;

    let result = app.state.services.orders.create_order(&shopper.actor).await;

    assert_matches!(result, Err(ServiceError::EmptyCart));
    assert_eq!(order::Entity::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn insufficient_stock_leaves_cart_and_catalog_untouched() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let mixer = app.seed_product("Stand Mixer", dec!(300), 1).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    app.add_to_cart(&shopper, mixer.id, 3).await;

    let result = app.state.services.orders.create_order(&shopper.actor).await;

    assert_matches!(result, Err(ServiceError::InsufficientStock(name)) if name == "Stand Mixer");
    assert_eq!(order::Entity::find().count(&*app.state.db).await.unwrap(), 0);
    assert_eq!(app.stock(kettle.id).await, 5);
    assert_eq!(app.stock(mixer.id).await, 1);
    let cart = app.state.services.carts.view(shopper.id).await.unwrap();
    assert_eq!(cart.items.len(), 2);
}

#[tokio::test]
async fn lines_for_deleted_products_are_skipped() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let retired = app.seed_product("Retired Fryer", dec!(80), 5).await;
    app.add_to_cart(&shopper, kettle.id, 1).await;
    app.add_to_cart(&shopper, retired.id, 1).await;
    app.state
        .services
        .catalog
        .delete_product(retired.id)
        .await
        .unwrap();

    let order = app
        .state
        .services
        .orders
        .create_order(&shopper.actor)
        .await
        .unwrap();

    assert_eq!(order.items.len(), 1);
    assert_eq!(order.total_amount, dec!(100));
}

#[tokio::test]
async fn cart_of_only_deleted_products_counts_as_empty() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let retired = app.seed_product("Retired Fryer", dec!(80), 5).await;
    app.add_to_cart(&shopper, retired.id, 1).await;
    app.state
        .services
        .catalog
        .delete_product(retired.id)
        .await
        .unwrap();

    let result = app.state.services.orders.create_order(&shopper.actor).await;
    assert_matches!(result, Err(ServiceError::EmptyCart));
}

#[tokio::test]
async fn orders_are_private_to_their_owner() {
    let app = TestApp::new().await;
    let owner = app.customer().await;
    let stranger = app.customer().await;
    let admin = app.admin().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&owner, kettle.id, 1).await;
    let order = app
        .state
        .services
        .orders
        .create_order(&owner.actor)
        .await
        .unwrap();

    let uri = format!("/api/v1/orders/{}", order.id);
    let hidden = app.request(Method::GET, &uri, None, Some(&stranger.token)).await;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);

    let as_admin = app.request(Method::GET, &uri, None, Some(&admin.token)).await;
    assert_eq!(as_admin.status(), StatusCode::OK);

    let mine = app
        .request(Method::GET, "/api/v1/orders", None, Some(&stranger.token))
        .await;
    let body = body_json(mine).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn create_order_over_http_returns_created_order() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;

    let response = app
        .request(Method::POST, "/api/v1/orders", None, Some(&shopper.token))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let total = Decimal::from_str(body["data"]["total_amount"].as_str().unwrap()).unwrap();
    assert_eq!(total, dec!(200));
    assert_eq!(body["data"]["payment_status"], "pending");
}

#[tokio::test]
async fn insufficient_stock_over_http_names_the_product() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 1).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;

    let response = app
        .request(Method::POST, "/api/v1/orders", None, Some(&shopper.token))
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("Kettle"));
}

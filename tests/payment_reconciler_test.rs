mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{body_json, TestApp, TestUser};
use rust_decimal_macros::dec;
use storefront_api::{
    entities::order::{FulfillmentStatus, PaymentStatus},
    errors::ServiceError,
    payment_provider::{checkout_event_body, signature, ProviderPaymentStatus, SessionStatus},
    services::{orders::OrderResponse, payments::ReconcileOutcome},
};

async fn pending_order(app: &TestApp, shopper: &TestUser) -> OrderResponse {
    app.state
        .services
        .orders
        .create_order(&shopper.actor)
        .await
        .expect("order created")
}

async fn open_session(app: &TestApp, shopper: &TestUser, order: &OrderResponse) -> String {
    app.state
        .services
        .payments
        .open_session(&shopper.actor, order.id, "https://shop.example/")
        .await
        .expect("session opened")
        .session_id
}

#[tokio::test]
async fn paying_debits_stock_once_and_clears_the_cart() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    assert_eq!(order.total_amount, dec!(200));

    let session_id = open_session(&app, &shopper, &order).await;
    app.mock.complete_session(&session_id).unwrap();

    let state = app
        .state
        .services
        .payments
        .poll_session(&shopper.actor, &session_id)
        .await
        .unwrap();

    assert_eq!(state.outcome, ReconcileOutcome::Paid);
    assert_eq!(state.payment_status, PaymentStatus::Paid);
    assert_eq!(app.stock(kettle.id).await, 3);
    let paid = app.order(order.id).await;
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.fulfillment_status, FulfillmentStatus::Processing);
    let cart = app.state.services.carts.view(shopper.id).await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn session_request_carries_order_amount_and_redirects() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;

    let session_id = open_session(&app, &shopper, &order).await;

    let request = app.mock.session_request(&session_id).unwrap();
    assert_eq!(request.amount, dec!(200));
    assert_eq!(
        request.success_url,
        "https://shop.example/order-success?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(request.cancel_url, "https://shop.example/cart");
    assert_eq!(request.metadata["order_id"], order.id.to_string());
    assert_eq!(app.order(order.id).await.session_id, Some(session_id));
}

#[tokio::test]
async fn duplicate_webhooks_debit_exactly_once() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;
    app.mock.complete_session(&session_id).unwrap();

    let mut outcomes = Vec::new();
    for attempt in 0..4 {
        let (body, header) = app
            .mock
            .completion_webhook(&session_id, &format!("evt_{}", attempt))
            .unwrap();
        let response = app.post_webhook(body, Some(&header)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        outcomes.push(json["data"]["payment"]["outcome"].as_str().unwrap().to_string());
    }

    assert_eq!(outcomes, vec!["paid", "already_paid", "already_paid", "already_paid"]);
    assert_eq!(app.stock(kettle.id).await, 3);
}

#[tokio::test]
async fn poll_racing_a_webhook_debits_exactly_once() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let mixer = app.seed_product("Stand Mixer", dec!(300), 4).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    app.add_to_cart(&shopper, mixer.id, 1).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;
    app.mock.complete_session(&session_id).unwrap();
    let (body, header) = app.mock.completion_webhook(&session_id, "evt_race").unwrap();

    let payments = app.state.services.payments.clone();
    let (polled, notified) = tokio::join!(
        payments.poll_session(&shopper.actor, &session_id),
        payments.handle_notification(&body, Some(&header)),
    );

    let polled = polled.unwrap().outcome;
    let notified = notified.unwrap().payment.unwrap().outcome;
    let mut outcomes = vec![polled, notified];
    outcomes.sort_by_key(|o| o.to_string());
    assert_eq!(outcomes, vec![ReconcileOutcome::AlreadyPaid, ReconcileOutcome::Paid]);

    assert_eq!(app.stock(kettle.id).await, 3);
    assert_eq!(app.stock(mixer.id).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirmations_on_separate_connections_debit_once() {
    let app = TestApp::with_pool_size(4).await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 50).await;

    for round in 0..5 {
        app.add_to_cart(&shopper, kettle.id, 2).await;
        let order = pending_order(&app, &shopper).await;
        let session_id = open_session(&app, &shopper, &order).await;
        app.mock.complete_session(&session_id).unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for caller in 0..6 {
            let payments = app.state.services.payments.clone();
            let actor = shopper.actor.clone();
            let session_id = session_id.clone();
            let (body, header) = app
                .mock
                .completion_webhook(&session_id, &format!("evt_{}_{}", round, caller))
                .unwrap();
            tasks.spawn(async move {
                if caller % 2 == 0 {
                    payments.poll_session(&actor, &session_id).await.map(|s| s.outcome)
                } else {
                    payments
                        .handle_notification(&body, Some(&header))
                        .await
                        .map(|ack| ack.payment.expect("checkout event").outcome)
                }
            });
        }

        let mut paid = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap().unwrap() {
                ReconcileOutcome::Paid => paid += 1,
                ReconcileOutcome::AlreadyPaid => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(paid, 1, "round {} paid more than once", round);
        assert_eq!(app.stock(kettle.id).await, 50 - 2 * (round + 1));
        assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Paid);
    }
}

#[tokio::test]
async fn polling_an_unpaid_session_changes_nothing() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;

    for _ in 0..2 {
        let state = app
            .state
            .services
            .payments
            .poll_session(&shopper.actor, &session_id)
            .await
            .unwrap();
        assert_eq!(state.outcome, ReconcileOutcome::Pending);
        assert_eq!(state.provider_status, "open");
    }

    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Pending);
    assert_eq!(app.stock(kettle.id).await, 5);
    let cart = app.state.services.carts.view(shopper.id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn expired_session_records_provider_status_only() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 1).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;
    app.mock.expire_session(&session_id).unwrap();

    let state = app
        .state
        .services
        .payments
        .poll_session(&shopper.actor, &session_id)
        .await
        .unwrap();

    assert_eq!(state.outcome, ReconcileOutcome::Pending);
    assert_eq!(state.provider_status, "expired");
    assert_eq!(app.transactions().await[0].provider_status, "expired");
    assert_eq!(app.stock(kettle.id).await, 5);
}

#[tokio::test]
async fn provider_outage_leaves_state_untouched() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;
    app.mock.complete_session(&session_id).unwrap();
    app.mock.set_unavailable(true);

    let result = app
        .state
        .services
        .payments
        .poll_session(&shopper.actor, &session_id)
        .await;

    assert_matches!(result, Err(ServiceError::ProviderUnavailable(_)));
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Pending);
    assert_eq!(app.transactions().await[0].provider_status, "open");
    assert_eq!(app.stock(kettle.id).await, 5);

    // Retrying once the provider is back completes the payment
    app.mock.set_unavailable(false);
    let state = app
        .state
        .services
        .payments
        .poll_session(&shopper.actor, &session_id)
        .await
        .unwrap();
    assert_eq!(state.outcome, ReconcileOutcome::Paid);
    assert_eq!(app.stock(kettle.id).await, 3);
}

#[tokio::test]
async fn slow_provider_times_out_as_unavailable() {
    let app = TestApp::with_provider_timeout(Duration::from_millis(50)).await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;
    app.mock.complete_session(&session_id).unwrap();
    app.mock.set_latency(Duration::from_millis(500));

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/status/{}", session_id),
            None,
            Some(&shopper.token),
        )
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Pending);
    assert_eq!(app.stock(kettle.id).await, 5);
}

#[tokio::test]
async fn forged_webhook_is_rejected_without_state_change() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;

    let paid = SessionStatus {
        status: "complete".into(),
        payment_status: ProviderPaymentStatus::Paid,
    };
    let body = checkout_event_body("evt_forged", "checkout.session.completed", &session_id, &paid);
    let forged = signature::sign("whsec_wrong", chrono::Utc::now().timestamp(), &body).unwrap();

    let response = app.post_webhook(body.clone(), Some(&forged)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unsigned = app.post_webhook(body, None).await;
    assert_eq!(unsigned.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Pending);
    assert_eq!(app.stock(kettle.id).await, 5);
}

#[tokio::test]
async fn unrelated_event_types_are_acknowledged_and_ignored() {
    let app = TestApp::new().await;
    let body = br#"{"id":"evt_refund","type":"charge.refunded","data":{"object":{"id":"ch_1","object":"charge"}}}"#.to_vec();
    let header = signature::sign(common::WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &body).unwrap();

    let response = app.post_webhook(body, Some(&header)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["received"], true);
    assert!(json["data"]["payment"].is_null());
}

#[tokio::test]
async fn webhook_for_unknown_session_is_not_found() {
    let app = TestApp::new().await;
    let paid = SessionStatus {
        status: "complete".into(),
        payment_status: ProviderPaymentStatus::Paid,
    };
    let body = checkout_event_body("evt_ghost", "checkout.session.completed", "cs_ghost", &paid);
    let header = signature::sign(common::WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &body).unwrap();

    let response = app.post_webhook(body, Some(&header)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_paid_session_for_a_paid_order_is_refused() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    let first = open_session(&app, &shopper, &order).await;
    let second = open_session(&app, &shopper, &order).await;
    assert_eq!(app.order(order.id).await.session_id.as_deref(), Some(second.as_str()));
    app.mock.complete_session(&first).unwrap();
    app.mock.complete_session(&second).unwrap();

    let payments = &app.state.services.payments;
    let first_state = payments.poll_session(&shopper.actor, &first).await.unwrap();
    assert_eq!(first_state.outcome, ReconcileOutcome::Paid);

    let second_result = payments.poll_session(&shopper.actor, &second).await;
    assert_matches!(second_result, Err(ServiceError::InvariantViolation(_)));

    // The refused transition rolled back: one debit, second transaction still pending
    assert_eq!(app.stock(kettle.id).await, 3);
    let pending: Vec<_> = app
        .transactions()
        .await
        .into_iter()
        .filter(|t| t.session_id == second)
        .collect();
    assert_eq!(pending[0].payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn payment_is_recorded_when_a_product_was_deleted() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    let fryer = app.seed_product("Air Fryer", dec!(80), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    app.add_to_cart(&shopper, fryer.id, 1).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;
    app.state
        .services
        .catalog
        .delete_product(fryer.id)
        .await
        .unwrap();
    app.mock.complete_session(&session_id).unwrap();

    let state = app
        .state
        .services
        .payments
        .poll_session(&shopper.actor, &session_id)
        .await
        .unwrap();

    assert_eq!(state.outcome, ReconcileOutcome::Paid);
    assert_eq!(app.stock(kettle.id).await, 3);
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Paid);
    assert_eq!(app.transactions().await[0].payment_status, PaymentStatus::Paid);
    let cart = app.state.services.carts.view(shopper.id).await.unwrap();
    assert!(cart.items.is_empty());

    let again = app
        .state
        .services
        .payments
        .poll_session(&shopper.actor, &session_id)
        .await
        .unwrap();
    assert_eq!(again.outcome, ReconcileOutcome::AlreadyPaid);
    assert_eq!(app.stock(kettle.id).await, 3);
}

#[tokio::test]
async fn another_users_session_cannot_be_polled() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let stranger = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 1).await;
    let order = pending_order(&app, &shopper).await;
    let session_id = open_session(&app, &shopper, &order).await;
    app.mock.complete_session(&session_id).unwrap();

    let result = app
        .state
        .services
        .payments
        .poll_session(&stranger.actor, &session_id)
        .await;

    assert_matches!(result, Err(ServiceError::Forbidden(_)));
    assert_eq!(app.mock.status_calls(), 0);
}

#[tokio::test]
async fn mock_payment_route_pays_through_the_reconciler() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 2).await;
    let order = pending_order(&app, &shopper).await;
    let uri = format!("/api/v1/orders/{}/mock-payment", order.id);

    let posted = app.request(Method::POST, &uri, None, Some(&shopper.token)).await;
    assert_eq!(posted.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(app.stock(kettle.id).await, 5);

    let response = app.request(Method::PATCH, &uri, None, Some(&shopper.token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["outcome"], "paid");
    assert_eq!(app.stock(kettle.id).await, 3);

    let again = app.request(Method::POST, &uri, None, Some(&shopper.token)).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(app.stock(kettle.id).await, 3);
}

#[tokio::test]
async fn paid_orders_cannot_open_new_sessions() {
    let app = TestApp::new().await;
    let shopper = app.customer().await;
    let kettle = app.seed_product("Kettle", dec!(100), 5).await;
    app.add_to_cart(&shopper, kettle.id, 1).await;
    let order = pending_order(&app, &shopper).await;
    app.state
        .services
        .payments
        .confirm_mock_payment(&shopper.actor, order.id)
        .await
        .unwrap();

    let result = app
        .state
        .services
        .payments
        .open_session(&shopper.actor, order.id, "https://shop.example")
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));
}

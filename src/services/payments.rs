//! Payment sessions and the payment reconciler.
//!
//! Two entry points report a provider status for a session: the shopper's
//! status poll ([`PaymentService::poll_session`]) and the provider's signed
//! notification ([`PaymentService::handle_notification`]). Both funnel into
//! [`PaymentService::apply_provider_status`], which owns the single
//! pending -> paid transition. That transition runs in one database
//! transaction whose first statement is a conditional update of the payment
//! transaction row, so concurrent or repeated deliveries debit stock at most
//! once.

use crate::{
    auth::{policy, AuthUser},
    entities::{
        order::{self, Entity as OrderEntity, FulfillmentStatus, Model as OrderModel, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        payment_transaction::{self, Entity as PaymentTransactionEntity, Model as PaymentTransactionModel},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payment_provider::{
        CheckoutSessionRequest, MockPaymentProvider, PaymentProvider, ProviderError, SessionStatus,
    },
    services::carts,
};
use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Origin used when the mock confirmation has to open a session itself.
const MOCK_ORIGIN: &str = "http://localhost:3000";

/// What a reconcile call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReconcileOutcome {
    /// This call moved the order to paid and debited stock
    Paid,
    /// The transaction was already paid; nothing changed
    AlreadyPaid,
    /// The provider does not report the session as paid yet
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentState {
    pub session_id: String,
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    /// Session status last reported by the provider
    pub provider_status: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub outcome: ReconcileOutcome,
}

impl PaymentState {
    fn from_transaction(transaction: PaymentTransactionModel, outcome: ReconcileOutcome) -> Self {
        Self {
            session_id: transaction.session_id,
            order_id: transaction.order_id,
            payment_status: transaction.payment_status,
            provider_status: transaction.provider_status,
            amount: transaction.amount,
            currency: transaction.currency,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OpenSessionRequest {
    pub order_id: Uuid,
    /// Storefront origin the provider redirects back to, e.g. `https://shop.example`
    pub origin_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub order_id: Uuid,
    pub session_id: String,
    /// Hosted payment page
    pub url: String,
}

/// Acknowledgement returned to the provider for every verified notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    /// None for event types that do not concern checkout sessions
    pub payment: Option<PaymentState>,
}

/// Decrements stock for every line of a paid order.
///
/// Runs on the caller's connection, which must be the reconciler's open
/// transaction. A line whose product has since been deleted from the catalog
/// is skipped with an error log: the shopper has paid, so the payment is
/// recorded regardless. Stock may go negative when an order oversells.
pub async fn debit_stock<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    items: &[OrderItemModel],
) -> Result<(), ServiceError> {
    let now = Utc::now();
    for item in items {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(item.quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(now))
            .filter(product::Column::Id.eq(item.product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            error!(
                %order_id,
                product_id = %item.product_id,
                quantity = item.quantity,
                "Paid line refers to a deleted product; stock not debited"
            );
            counter!("storefront_stock_debit_skipped_total", 1);
            continue;
        }

        if let Some(remaining) = ProductEntity::find_by_id(item.product_id)
            .one(conn)
            .await?
            .map(|p| p.stock)
        {
            if remaining < 0 {
                warn!(%order_id, product_id = %item.product_id, remaining, "Stock oversold");
            }
        }
        counter!("storefront_stock_debited_units_total", item.quantity.max(0) as u64);
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn PaymentProvider>,
    mock: Option<Arc<MockPaymentProvider>>,
    event_sender: Arc<EventSender>,
    provider_timeout: Duration,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        mock: Option<Arc<MockPaymentProvider>>,
        event_sender: Arc<EventSender>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            db,
            provider,
            mock,
            event_sender,
            provider_timeout,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Bounds a provider call by the configured timeout.
    async fn call_provider<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ServiceError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.provider_timeout, call).await;
        histogram!(
            "storefront_payment_provider_call_seconds",
            started.elapsed().as_secs_f64(),
            "operation" => operation
        );

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(operation, provider = self.provider.name(), error = %err, "Payment provider call failed");
                counter!("storefront_payment_provider_errors_total", 1, "operation" => operation);
                Err(err.into())
            }
            Err(_) => {
                warn!(operation, provider = self.provider.name(), timeout = ?self.provider_timeout, "Payment provider call timed out");
                counter!("storefront_payment_provider_errors_total", 1, "operation" => operation);
                Err(ServiceError::ProviderUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.provider_timeout
                )))
            }
        }
    }

    async fn find_transaction(&self, session_id: &str) -> Result<PaymentTransactionModel, ServiceError> {
        PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::TransactionNotFound(session_id.to_string()))
    }

    async fn owned_order(&self, actor: &AuthUser, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|order| order.user_id == actor.user_id)
            .ok_or(ServiceError::OrderNotFound(order_id))
    }

    /// Opens a hosted payment session for one of the actor's unpaid orders.
    #[instrument(skip(self, actor, origin_url), fields(user_id = %actor.user_id))]
    pub async fn open_session(
        &self,
        actor: &AuthUser,
        order_id: Uuid,
        origin_url: &str,
    ) -> Result<CheckoutSessionResponse, ServiceError> {
        let order = self.owned_order(actor, order_id).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict("Order already paid".to_string()));
        }
        if order.fulfillment_status == FulfillmentStatus::Cancelled {
            return Err(ServiceError::Conflict("Order is cancelled".to_string()));
        }

        let origin = parse_origin(origin_url)?;
        let metadata = BTreeMap::from([
            ("order_id".to_string(), order.id.to_string()),
            ("user_id".to_string(), actor.user_id.to_string()),
        ]);
        let request = CheckoutSessionRequest {
            amount: order.total_amount,
            currency: order.currency.clone(),
            success_url: format!("{}/order-success?session_id={{CHECKOUT_SESSION_ID}}", origin),
            cancel_url: format!("{}/cart", origin),
            metadata: metadata.clone(),
        };

        let session = self
            .call_provider("create_session", self.provider.create_session(request))
            .await?;

        let now = Utc::now();
        let txn = self.db.begin().await?;
        payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            session_id: Set(session.session_id.clone()),
            user_id: Set(actor.user_id),
            order_id: Set(order.id),
            amount: Set(order.total_amount),
            currency: Set(order.currency.clone()),
            payment_status: Set(PaymentStatus::Pending),
            provider_status: Set("open".to_string()),
            metadata: Set(serde_json::json!(metadata)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        OrderEntity::update_many()
            .col_expr(order::Column::SessionId, Expr::value(session.session_id.clone()))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(%order_id, session_id = %session.session_id, provider = self.provider.name(), "Payment session opened");
        self.event_sender
            .send_or_log(Event::PaymentSessionOpened {
                order_id,
                session_id: session.session_id.clone(),
            })
            .await;

        Ok(CheckoutSessionResponse {
            order_id,
            session_id: session.session_id,
            url: session.url,
        })
    }

    /// Status-poll entry point.
    ///
    /// A provider failure or timeout returns `ProviderUnavailable` and leaves
    /// every persisted record as it was.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn poll_session(
        &self,
        actor: &AuthUser,
        session_id: &str,
    ) -> Result<PaymentState, ServiceError> {
        let transaction = self.find_transaction(session_id).await?;
        policy::require_owner(actor, transaction.user_id)?;

        if transaction.payment_status == PaymentStatus::Paid {
            return Ok(PaymentState::from_transaction(
                transaction,
                ReconcileOutcome::AlreadyPaid,
            ));
        }

        let status = self
            .call_provider("get_status", self.provider.get_status(session_id))
            .await?;
        self.apply_provider_status(session_id, &status).await
    }

    /// Notification entry point. `body` must be the raw request bytes the
    /// signature was computed over.
    #[instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn handle_notification(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, ServiceError> {
        let event = self
            .provider
            .verify_and_parse_webhook(body, signature)
            .map_err(|err| {
                warn!(error = %err, "Rejected payment notification");
                counter!("storefront_payment_webhooks_rejected_total", 1);
                ServiceError::from(err)
            })?;

        if !event.is_session_completion() {
            info!(event_id = %event.event_id, event_type = %event.event_type, "Ignoring payment notification");
            return Ok(WebhookAck {
                received: true,
                event_id: event.event_id,
                payment: None,
            });
        }

        let (Some(session_id), Some(status)) = (event.session_id, event.session_status) else {
            return Err(ServiceError::BadRequest(
                "Checkout event carries no session".to_string(),
            ));
        };

        let state = self.apply_provider_status(&session_id, &status).await?;
        Ok(WebhookAck {
            received: true,
            event_id: event.event_id,
            payment: Some(state),
        })
    }

    /// Applies a provider-reported status to the session's transaction.
    ///
    /// The only code path that marks an order paid, debits its stock and
    /// clears its owner's cart.
    #[instrument(skip(self, status), fields(provider_status = %status.status, paid = status.is_paid()))]
    pub async fn apply_provider_status(
        &self,
        session_id: &str,
        status: &SessionStatus,
    ) -> Result<PaymentState, ServiceError> {
        let started = Instant::now();
        let txn = self.db.begin().await?;

        let result = self.transition(&txn, session_id, status).await;
        let (state, paid_order) = match result {
            Ok(Some(outcome)) => {
                txn.commit().await?;
                outcome
            }
            Ok(None) => {
                txn.rollback().await?;
                let transaction = self.find_transaction(session_id).await?;
                (
                    PaymentState::from_transaction(transaction, ReconcileOutcome::AlreadyPaid),
                    None,
                )
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Rollback after failed reconcile also failed");
                }
                return Err(err);
            }
        };

        histogram!(
            "storefront_payment_reconcile_seconds",
            started.elapsed().as_secs_f64()
        );
        counter!("storefront_payments_reconciled_total", 1, "outcome" => state.outcome.to_string());

        if let Some((order, items)) = paid_order {
            info!(order_id = %order.id, session_id, "Order paid");
            self.event_sender
                .send_or_log(Event::OrderPaid {
                    order_id: order.id,
                    session_id: session_id.to_string(),
                })
                .await;
            for item in items {
                self.event_sender
                    .send_or_log(Event::StockDebited {
                        order_id: order.id,
                        product_id: item.product_id,
                        quantity: item.quantity,
                    })
                    .await;
            }
            self.event_sender
                .send_or_log(Event::CartCleared {
                    user_id: order.user_id,
                })
                .await;
        }

        Ok(state)
    }

    /// Body of the reconcile transaction. `Ok(None)` means the gate was closed:
    /// the transaction is already paid or does not exist.
    async fn transition(
        &self,
        txn: &DatabaseTransaction,
        session_id: &str,
        status: &SessionStatus,
    ) -> Result<Option<(PaymentState, Option<(OrderModel, Vec<OrderItemModel>)>)>, ServiceError>
    {
        let now = Utc::now();
        let reported = if status.is_paid() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        };

        // The gate. Re-reads the persisted status and claims the transition in
        // one statement; a concurrent caller blocks here and then sees `paid`.
        let gate = PaymentTransactionEntity::update_many()
            .col_expr(
                payment_transaction::Column::ProviderStatus,
                Expr::value(status.status.clone()),
            )
            .col_expr(payment_transaction::Column::PaymentStatus, Expr::value(reported))
            .col_expr(payment_transaction::Column::UpdatedAt, Expr::value(now))
            .filter(payment_transaction::Column::SessionId.eq(session_id))
            .filter(payment_transaction::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .exec(txn)
            .await?;
        if gate.rows_affected == 0 {
            return Ok(None);
        }

        let transaction = PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::SessionId.eq(session_id))
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::TransactionNotFound(session_id.to_string()))?;

        if reported != PaymentStatus::Paid {
            return Ok(Some((
                PaymentState::from_transaction(transaction, ReconcileOutcome::Pending),
                None,
            )));
        }

        let order_id = transaction.order_id;
        let updated = OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(
                order::Column::FulfillmentStatus,
                Expr::value(FulfillmentStatus::Processing),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(txn)
            .await?;
        if updated.rows_affected == 0 {
            error!(
                %order_id,
                session_id,
                "Second pending->paid transition for an order; refusing to debit stock again"
            );
            counter!("storefront_payment_invariant_violations_total", 1);
            return Err(ServiceError::InvariantViolation(format!(
                "order {} is already paid (session {})",
                order_id, session_id
            )));
        }

        let order = OrderEntity::find_by_id(order_id)
            .one(txn)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(txn)
            .await?;

        debit_stock(txn, order_id, &items).await?;
        let cleared = carts::clear_in(txn, order.user_id).await?;
        info!(%order_id, lines = items.len(), cart_lines_cleared = cleared, "Stock debited");

        Ok(Some((
            PaymentState::from_transaction(transaction, ReconcileOutcome::Paid),
            Some((order, items)),
        )))
    }

    /// Pays an order through the in-memory provider, then reconciles through
    /// the regular status poll.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn confirm_mock_payment(
        &self,
        actor: &AuthUser,
        order_id: Uuid,
    ) -> Result<PaymentState, ServiceError> {
        let mock = self
            .mock
            .clone()
            .ok_or_else(|| ServiceError::BadRequest("Mock payments are disabled".to_string()))?;

        let order = self.owned_order(actor, order_id).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict("Order already paid".to_string()));
        }

        // The mock forgets its sessions on restart; open a fresh one then.
        let session_id = match order.session_id {
            Some(existing) if mock.complete_session(&existing).is_ok() => existing,
            _ => {
                let opened = self.open_session(actor, order_id, MOCK_ORIGIN).await?;
                mock.complete_session(&opened.session_id)?;
                opened.session_id
            }
        };

        self.poll_session(actor, &session_id).await
    }
}

fn parse_origin(origin_url: &str) -> Result<String, ServiceError> {
    let parsed = url::Url::parse(origin_url.trim())
        .map_err(|e| ServiceError::BadRequest(format!("Invalid origin_url: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ServiceError::BadRequest(
            "origin_url must be an http(s) URL".to_string(),
        ));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

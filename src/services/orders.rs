use crate::{
    auth::{policy, AuthUser, Capability},
    entities::{
        order::{self, Entity as OrderEntity, FulfillmentStatus, Model as OrderModel, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::CartService,
        catalog::products_by_id,
        pricing::{price_cart, PricedCart},
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

impl From<OrderItemModel> for OrderItemResponse {
    fn from(item: OrderItemModel) -> Self {
        Self {
            line_total: item.line_total(),
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItemResponse>,
    #[schema(value_type = String, example = "200.00")]
    pub total_amount: Decimal,
    pub currency: String,
    pub fulfillment_status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    fn new(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            items: items.into_iter().map(OrderItemResponse::from).collect(),
            total_amount: order.total_amount,
            currency: order.currency,
            fulfillment_status: order.fulfillment_status,
            payment_status: order.payment_status,
            session_id: order.session_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateFulfillmentRequest {
    pub status: FulfillmentStatus,
}

/// Order ledger: creation from the cart, reads, and admin fulfillment moves.
///
/// Payment state is never written here; only the payment reconciler moves an
/// order from pending to paid.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    carts: Arc<CartService>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: Arc<CartService>,
        event_sender: Arc<EventSender>,
        currency: String,
    ) -> Self {
        Self {
            db,
            carts,
            event_sender,
            currency,
        }
    }

    /// Freezes the actor's cart into a pending order.
    ///
    /// The cart is left untouched and no stock moves: both happen only when
    /// the order is paid.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn create_order(&self, actor: &AuthUser) -> Result<OrderResponse, ServiceError> {
        let lines = self.carts.lines(actor.user_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
        let snapshot = products_by_id(&*self.db, &ids).await?;
        let priced = price_cart(&lines, &snapshot)?;
        if priced.is_empty() {
            warn!(skipped = priced.skipped.len(), "Every cart line refers to a missing product");
            return Err(ServiceError::EmptyCart);
        }

        let response = self.persist(actor.user_id, priced).await?;

        metrics::counter!("storefront_orders_created_total", 1);
        info!(order_id = %response.id, total = %response.total_amount, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: response.id,
                user_id: response.user_id,
                total_amount: response.total_amount,
            })
            .await;

        Ok(response)
    }

    async fn persist(&self, user_id: Uuid, priced: PricedCart) -> Result<OrderResponse, ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            total_amount: Set(priced.total_amount),
            currency: Set(self.currency.clone()),
            fulfillment_status: Set(FulfillmentStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            session_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(priced.items.len());
        for (position, line) in priced.items.into_iter().enumerate() {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                position: Set(position as i32),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderResponse::new(order, items))
    }

    async fn items_of(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await?)
    }

    async fn with_items(&self, orders: Vec<OrderModel>) -> Result<Vec<OrderResponse>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut grouped: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
        for item in OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await?
        {
            grouped.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = grouped.remove(&order.id).unwrap_or_default();
                OrderResponse::new(order, items)
            })
            .collect())
    }

    /// Orders are visible to their owner and to admins; everyone else gets
    /// `OrderNotFound`.
    pub async fn get_order(&self, actor: &AuthUser, id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .filter(|order| policy::can_access(actor, order.user_id))
            .ok_or(ServiceError::OrderNotFound(id))?;
        let items = self.items_of(id).await?;
        Ok(OrderResponse::new(order, items))
    }

    /// The actor's orders, newest first
    pub async fn list_own(&self, actor: &AuthUser) -> Result<Vec<OrderResponse>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(actor.user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.with_items(orders).await
    }

    pub async fn list_all(&self, actor: &AuthUser) -> Result<Vec<OrderResponse>, ServiceError> {
        policy::require(actor, Capability::ViewAllOrders)?;
        let orders = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.with_items(orders).await
    }

    /// Moves an order along the fulfillment track. Payment status is not
    /// reachable from here.
    #[instrument(skip(self, actor))]
    pub async fn update_fulfillment(
        &self,
        actor: &AuthUser,
        id: Uuid,
        next: FulfillmentStatus,
    ) -> Result<OrderResponse, ServiceError> {
        policy::require(actor, Capability::ManageFulfillment)?;

        let current = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::OrderNotFound(id))?;

        if !current.fulfillment_status.can_transition_to(next) {
            return Err(ServiceError::BadRequest(format!(
                "Cannot move order from {} to {}",
                current.fulfillment_status, next
            )));
        }

        // Conditional on the status we validated against; the reconciler may
        // have moved the order in between.
        let updated = OrderEntity::update_many()
            .col_expr(order::Column::FulfillmentStatus, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::FulfillmentStatus.eq(current.fulfillment_status))
            .exec(&*self.db)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order changed while updating, reload and retry".to_string(),
            ));
        }

        info!(order_id = %id, from = %current.fulfillment_status, to = %next, "Fulfillment status changed");
        self.event_sender
            .send_or_log(Event::OrderFulfillmentChanged {
                order_id: id,
                old_status: current.fulfillment_status.to_string(),
                new_status: next.to_string(),
            })
            .await;

        self.get_order(actor, id).await
    }
}

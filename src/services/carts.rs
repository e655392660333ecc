use crate::{
    entities::{
        cart::{self, Entity as CartEntity, Model as CartModel},
        cart_item::{self, Entity as CartItemEntity},
        product::Entity as ProductEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{catalog::products_by_id, pricing::CartLine},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    /// Replaces the quantity when the product is already in the cart
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartItemView {
    pub product_id: Uuid,
    pub quantity: i32,
    /// None when the product has been removed from the catalog
    pub product_name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub unit_price: Option<Decimal>,
    pub image_url: Option<String>,
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartItemView>,
    /// Sum over lines whose product still exists, at current prices
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Deletes every line of the user's cart on `conn`, so the reconciler can run
/// it inside its own transaction. Returns the number of lines removed.
pub async fn clear_in<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, DbErr> {
    let Some(cart) = CartEntity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(0);
    };

    let removed = CartItemEntity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(conn)
        .await?
        .rows_affected;

    CartEntity::update_many()
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart.id))
        .exec(conn)
        .await?;

    Ok(removed)
}

/// Per-user cart. Lines are unique per product and keep insertion order.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's cart, creating an empty one on first use.
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        if let Some(existing) = self.find_cart(user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let inserted = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match inserted {
            Ok(model) => {
                debug!(%user_id, cart_id = %model.id, "Cart created");
                Ok(model)
            }
            // Lost a race on the unique user_id; the other request's cart wins.
            Err(err) => self
                .find_cart(user_id)
                .await?
                .ok_or(ServiceError::DatabaseError(err)),
        }
    }

    async fn find_cart(&self, user_id: Uuid) -> Result<Option<CartModel>, ServiceError> {
        Ok(CartEntity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    async fn items_of(&self, cart_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::Position)
            .all(&*self.db)
            .await?)
    }

    /// The cart as order creation sees it.
    pub async fn lines(&self, user_id: Uuid) -> Result<Vec<CartLine>, ServiceError> {
        let Some(cart) = self.find_cart(user_id).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .items_of(cart.id)
            .await?
            .into_iter()
            .map(|item| CartLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn view(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(user_id).await?;
        let items = self.items_of(cart.id).await?;
        let ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = products_by_id(&*self.db, &ids).await?;

        let mut subtotal = Decimal::ZERO;
        let items = items
            .into_iter()
            .map(|item| {
                let product = products.get(&item.product_id);
                if let Some(product) = product {
                    subtotal += product.price * Decimal::from(item.quantity);
                }
                CartItemView {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    product_name: product.map(|p| p.name.clone()),
                    unit_price: product.map(|p| p.price),
                    image_url: product.map(|p| p.image_url.clone()),
                    stock: product.map(|p| p.stock),
                }
            })
            .collect();

        Ok(CartView {
            id: cart.id,
            user_id,
            items,
            subtotal,
            updated_at: cart.updated_at,
        })
    }

    /// Adds a product or replaces the quantity of an existing line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        request: AddCartItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;

        ProductEntity::find_by_id(request.product_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::ProductNotFound(request.product_id))?;

        let cart = self.get_or_create(user_id).await?;
        let now = Utc::now();
        let items = self.items_of(cart.id).await?;

        match items.iter().find(|item| item.product_id == request.product_id) {
            Some(existing) => {
                let mut active: cart_item::ActiveModel = existing.clone().into();
                active.quantity = Set(request.quantity);
                active.updated_at = Set(now);
                active.update(&*self.db).await?;
            }
            None => {
                let position = items.iter().map(|item| item.position).max().unwrap_or(0) + 1;
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(request.product_id),
                    quantity: Set(request.quantity),
                    position: Set(position),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        self.touch(cart.id).await?;
        info!(%user_id, product_id = %request.product_id, quantity = request.quantity, "Cart line set");
        self.view(user_id).await
    }

    /// Removing a product that is not in the cart is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(user_id).await?;
        let removed = CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?
            .rows_affected;

        if removed > 0 {
            self.touch(cart.id).await?;
        }
        self.view(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let removed = clear_in(&*self.db, user_id).await?;
        info!(%user_id, removed, "Cart cleared by user");
        self.event_sender
            .send_or_log(Event::CartCleared { user_id })
            .await;
        Ok(())
    }

    async fn touch(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        CartEntity::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}

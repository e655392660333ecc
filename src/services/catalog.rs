use crate::{
    entities::product::{self, Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Query parameters for catalog browsing
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductFilter {
    /// Exact category match
    pub category: Option<String>,
    /// Case-insensitive substring of name, description or brand
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom = "validate_price")]
    #[schema(value_type = String, example = "249.99")]
    pub price: Decimal,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[serde(default)]
    pub image_url: String,
    pub brand: Option<String>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub features: Vec<String>,
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("price_negative"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[schema(value_type = String, example = "249.99")]
    pub price: Decimal,
    pub category: String,
    pub image_url: String,
    pub brand: Option<String>,
    pub stock: i32,
    pub features: Vec<String>,
    #[schema(value_type = String, example = "4.5")]
    pub rating: Decimal,
    pub reviews_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductModel> for ProductResponse {
    fn from(model: ProductModel) -> Self {
        let features = model.feature_list();
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: model.price,
            category: model.category,
            image_url: model.image_url,
            brand: model.brand,
            stock: model.stock,
            features,
            rating: model.rating,
            reviews_count: model.reviews_count,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Loads the products with the given ids, keyed by id. Unknown ids are absent.
pub async fn products_by_id<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, ProductModel>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let products = ProductEntity::find()
        .filter(product::Column::Id.is_in(ids.iter().copied()))
        .all(conn)
        .await?;
    Ok(products.into_iter().map(|p| (p.id, p)).collect())
}

/// Product catalog reads and admin maintenance.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        filter: &ProductFilter,
    ) -> Result<Vec<ProductResponse>, ServiceError> {
        let mut query = ProductEntity::find();

        if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
            query = query.filter(product::Column::Category.eq(category));
        }

        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            let lowered = |column: product::Column| Expr::expr(Func::lower(Expr::col(column)));
            query = query.filter(
                Condition::any()
                    .add(lowered(product::Column::Name).like(pattern.as_str()))
                    .add(lowered(product::Column::Description).like(pattern.as_str()))
                    .add(lowered(product::Column::Brand).like(pattern.as_str())),
            );
        }

        let products = query
            .order_by_asc(product::Column::CreatedAt)
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(products.into_iter().map(ProductResponse::from).collect())
    }

    pub async fn get_product(&self, id: Uuid) -> Result<ProductResponse, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .map(ProductResponse::from)
            .ok_or(ServiceError::ProductNotFound(id))
    }

    /// Distinct categories, alphabetically
    pub async fn categories(&self) -> Result<Vec<String>, ServiceError> {
        let categories = ProductEntity::find()
            .select_only()
            .column(product::Column::Category)
            .distinct()
            .order_by_asc(product::Column::Category)
            .into_tuple::<String>()
            .all(&*self.db)
            .await?;
        Ok(categories)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: ProductInput) -> Result<ProductResponse, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let id = Uuid::new_v4();

        let model = product::ActiveModel {
            id: Set(id),
            name: Set(input.name),
            description: Set(input.description),
            price: Set(input.price),
            category: Set(input.category),
            image_url: Set(input.image_url),
            brand: Set(input.brand),
            stock: Set(input.stock),
            features: Set(serde_json::json!(input.features)),
            rating: Set(Decimal::ZERO),
            reviews_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %id, "Product created");
        self.event_sender.send_or_log(Event::ProductCreated(id)).await;
        Ok(model.into())
    }

    /// Replaces every editable field of a product.
    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        id: Uuid,
        input: ProductInput,
    ) -> Result<ProductResponse, ServiceError> {
        input.validate()?;
        let existing = ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::ProductNotFound(id))?;

        let mut active: product::ActiveModel = existing.into();
        active.name = Set(input.name);
        active.description = Set(input.description);
        active.price = Set(input.price);
        active.category = Set(input.category);
        active.image_url = Set(input.image_url);
        active.brand = Set(input.brand);
        active.stock = Set(input.stock);
        active.features = Set(serde_json::json!(input.features));
        active.updated_at = Set(Utc::now());
        let model = active.update(&*self.db).await?;

        info!(product_id = %id, "Product updated");
        self.event_sender.send_or_log(Event::ProductUpdated(id)).await;
        Ok(model.into())
    }

    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = ProductEntity::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ProductNotFound(id));
        }

        info!(product_id = %id, "Product deleted");
        self.event_sender.send_or_log(Event::ProductDeleted(id)).await;
        Ok(())
    }
}

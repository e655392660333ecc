use crate::{
    auth::AuthUser,
    entities::{
        product::{self, Entity as ProductEntity},
        review::{self, Entity as ReviewEntity, Model as ReviewModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const DUPLICATE_REVIEW: &str = "You have already reviewed this product";

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateReviewRequest {
    pub product_id: Uuid,
    /// Whole stars, 1 to 5
    #[validate(range(min = 1, max = 5))]
    pub rating: i16,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl From<ReviewModel> for ReviewResponse {
    fn from(model: ReviewModel) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            user_id: model.user_id,
            user_name: model.user_name,
            rating: model.rating,
            comment: model.comment,
            created_at: model.created_at,
        }
    }
}

/// Mean of `ratings` rounded half away from zero to one decimal place.
/// Zero when there are no ratings.
pub fn average_rating(ratings: &[i16]) -> Decimal {
    if ratings.is_empty() {
        return Decimal::ZERO;
    }
    let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
    (Decimal::from(sum) / Decimal::from(ratings.len()))
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

/// Product reviews and the rating summary kept on each product.
#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ReviewService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Records the actor's review and refreshes the product's `rating` and
    /// `reviews_count` in the same transaction.
    ///
    /// The product row is updated before the review is inserted, so
    /// concurrent reviews of one product recompute the summary one at a time.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id, product_id = %request.product_id))]
    pub async fn create_review(
        &self,
        actor: &AuthUser,
        request: CreateReviewRequest,
    ) -> Result<ReviewResponse, ServiceError> {
        request.validate()?;
        let product_id = request.product_id;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for review");
            ServiceError::DatabaseError(e)
        })?;

        let locked = ProductEntity::update_many()
            .col_expr(
                product::Column::ReviewsCount,
                Expr::col(product::Column::ReviewsCount).add(1),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(&txn)
            .await?;
        if locked.rows_affected == 0 {
            return Err(ServiceError::ProductNotFound(product_id));
        }

        let existing = ReviewEntity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .filter(review::Column::UserId.eq(actor.user_id))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::BadRequest(DUPLICATE_REVIEW.to_string()));
        }

        let model = review::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            user_id: Set(actor.user_id),
            user_name: Set(actor.name.clone().unwrap_or_else(|| "Anonymous".to_string())),
            rating: Set(request.rating),
            comment: Set(request.comment),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::BadRequest(DUPLICATE_REVIEW.to_string())
            }
            _ => ServiceError::DatabaseError(e),
        })?;

        let ratings: Vec<i16> = ReviewEntity::find()
            .select_only()
            .column(review::Column::Rating)
            .filter(review::Column::ProductId.eq(product_id))
            .into_tuple::<i16>()
            .all(&txn)
            .await?;
        let rating = average_rating(&ratings);

        ProductEntity::update_many()
            .col_expr(product::Column::Rating, Expr::value(rating))
            .col_expr(product::Column::ReviewsCount, Expr::value(ratings.len() as i32))
            .filter(product::Column::Id.eq(product_id))
            .exec(&txn)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %product_id, "Failed to commit review");
            ServiceError::DatabaseError(e)
        })?;

        metrics::counter!("storefront_reviews_created_total", 1);
        info!(review_id = %model.id, %rating, count = ratings.len(), "Review created");
        self.event_sender
            .send_or_log(Event::ReviewCreated {
                product_id,
                user_id: actor.user_id,
                rating: model.rating,
            })
            .await;

        Ok(model.into())
    }

    /// Reviews of a product, newest first. Unknown products have none.
    pub async fn list_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<ReviewResponse>, ServiceError> {
        let reviews = ReviewEntity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .order_by_desc(review::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(reviews.into_iter().map(ReviewResponse::from).collect())
    }
}

use async_trait::async_trait;

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Promotion, PromotionType};

/// Equality criteria for listing promotions. Set fields combine with AND;
/// an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionFilter {
    pub promotion_id: Option<String>,
    pub name: Option<String>,
    pub promotion_type: Option<PromotionType>,
}

impl PromotionFilter {
    pub fn matches(&self, promotion: &Promotion) -> bool {
        self.promotion_id
            .as_deref()
            .map_or(true, |v| promotion.promotion_id == v)
            && self.name.as_deref().map_or(true, |v| promotion.name == v)
            && self
                .promotion_type
                .map_or(true, |t| promotion.promotion_type == t)
    }
}

/// Persistence gateway for promotions.
///
/// Every mutating call runs in its own transaction. A failure rolls the
/// transaction back and surfaces as `AppError::Validation` carrying the
/// underlying cause, so callers never observe a partial write.
#[async_trait]
pub trait PromotionStore: Send + Sync {
    /// Inserts the promotion and assigns its store id. Any id already set
    /// on `promotion` is discarded.
    async fn create(&self, promotion: &mut Promotion) -> Result<()>;

    /// Writes every mutable field of an already persisted promotion.
    async fn update(&self, promotion: &Promotion) -> Result<()>;

    /// Reads the promotion, applies `data` onto it and writes it back as one
    /// atomic step. Returns `Ok(None)` when no promotion has this id.
    async fn replace(&self, id: i64, data: &Value) -> Result<Option<Promotion>>;

    /// Adds one to `usage_count` in place.
    async fn apply(&self, id: i64) -> Result<Option<Promotion>>;

    /// Moves an active promotion to `canceled`. Fails with
    /// `AppError::Conflict` when it is not active.
    async fn cancel(&self, id: i64) -> Result<Option<Promotion>>;

    /// Removes the row if present; a missing id is not an error.
    async fn delete_by_id(&self, id: i64) -> Result<()>;

    async fn delete(&self, promotion: &Promotion) -> Result<()> {
        match promotion.id {
            Some(id) => self.delete_by_id(id).await,
            None => Ok(()),
        }
    }

    /// Point lookup by store id. Absence is `Ok(None)`, never an error.
    async fn find(&self, id: i64) -> Result<Option<Promotion>>;

    async fn filter(&self, filter: &PromotionFilter) -> Result<Vec<Promotion>>;

    /// Releases the underlying connections at shutdown.
    async fn close(&self) {}

    async fn all(&self) -> Result<Vec<Promotion>> {
        self.filter(&PromotionFilter::default()).await
    }

    /// Exact, case-sensitive name match.
    async fn find_by_name(&self, name: &str) -> Result<Vec<Promotion>> {
        self.filter(&PromotionFilter {
            name: Some(name.to_string()),
            ..PromotionFilter::default()
        })
        .await
    }

    async fn find_by_type(&self, promotion_type: PromotionType) -> Result<Vec<Promotion>> {
        self.filter(&PromotionFilter {
            promotion_type: Some(promotion_type),
            ..PromotionFilter::default()
        })
        .await
    }

    async fn find_by_promotion_id(&self, promotion_id: &str) -> Result<Option<Promotion>> {
        let mut found = self
            .filter(&PromotionFilter {
                promotion_id: Some(promotion_id.to_string()),
                ..PromotionFilter::default()
            })
            .await?;

        Ok(found.pop())
    }
}

pub(crate) fn not_cancelable(promotion: &Promotion) -> AppError {
    AppError::Conflict(format!(
        "Promotion with id '{}' is {} and cannot be canceled",
        promotion.id.unwrap_or_default(),
        promotion.state
    ))
}

use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use super::store::{not_cancelable, PromotionFilter, PromotionStore};
use crate::error::{AppError, Result};
use crate::models::{Promotion, PromotionState};

/// Process-local promotion store.
///
/// Holds the same contract as the Postgres store: ids come from a counter
/// starting at 1, `promotion_id` is unique, and each operation is applied
/// whole under a single lock.
#[derive(Debug, Default)]
pub struct MemoryPromotionStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    rows: BTreeMap<i64, Promotion>,
}

impl MemoryState {
    fn check_unique(&self, promotion: &Promotion, own_id: Option<i64>) -> Result<()> {
        let taken = self
            .rows
            .values()
            .any(|row| row.promotion_id == promotion.promotion_id && row.id != own_id);

        if taken {
            return Err(AppError::Validation(format!(
                "duplicate key value violates unique constraint: promotion_id '{}' already exists",
                promotion.promotion_id
            )));
        }

        Ok(())
    }
}

impl MemoryPromotionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Promotion store lock poisoned")))
    }
}

#[async_trait]
impl PromotionStore for MemoryPromotionStore {
    async fn create(&self, promotion: &mut Promotion) -> Result<()> {
        tracing::info!(name = %promotion.name, promotion_id = %promotion.promotion_id, "Creating promotion");
        promotion.id = None;

        let mut state = self.state()?;
        if let Err(e) = state.check_unique(promotion, None) {
            tracing::error!(promotion_id = %promotion.promotion_id, error = %e, "Error creating promotion");
            return Err(e);
        }

        state.last_id += 1;
        let id = state.last_id;
        promotion.id = Some(id);
        state.rows.insert(id, promotion.clone());

        Ok(())
    }

    async fn update(&self, promotion: &Promotion) -> Result<()> {
        tracing::info!(id = ?promotion.id, name = %promotion.name, "Saving promotion");

        let mut state = self.state()?;
        let id = promotion
            .id
            .filter(|id| state.rows.contains_key(id))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Promotion '{}' does not exist in the store",
                    promotion.promotion_id
                ))
            })?;
        if let Err(e) = state.check_unique(promotion, Some(id)) {
            tracing::error!(id, error = %e, "Error updating promotion");
            return Err(e);
        }

        state.rows.insert(id, promotion.clone());

        Ok(())
    }

    async fn replace(&self, id: i64, data: &Value) -> Result<Option<Promotion>> {
        tracing::info!(id, "Replacing promotion");

        let mut state = self.state()?;
        let Some(existing) = state.rows.get(&id).cloned() else {
            return Ok(None);
        };

        let promotion = existing.deserialize(data)?;
        if let Err(e) = state.check_unique(&promotion, Some(id)) {
            tracing::error!(id, error = %e, "Error updating promotion");
            return Err(e);
        }
        state.rows.insert(id, promotion.clone());

        Ok(Some(promotion))
    }

    async fn apply(&self, id: i64) -> Result<Option<Promotion>> {
        tracing::info!(id, "Applying promotion");

        let mut state = self.state()?;
        let Some(promotion) = state.rows.get_mut(&id) else {
            return Ok(None);
        };

        promotion.usage_count = promotion.usage_count.checked_add(1).ok_or_else(|| {
            AppError::Validation(format!("Promotion with id '{}' cannot be applied again", id))
        })?;

        Ok(Some(promotion.clone()))
    }

    async fn cancel(&self, id: i64) -> Result<Option<Promotion>> {
        tracing::info!(id, "Canceling promotion");

        let mut state = self.state()?;
        let Some(promotion) = state.rows.get_mut(&id) else {
            return Ok(None);
        };

        if !promotion.is_active() {
            return Err(not_cancelable(promotion));
        }
        promotion.state = PromotionState::Canceled;

        Ok(Some(promotion.clone()))
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        tracing::info!(id, "Deleting promotion");

        self.state()?.rows.remove(&id);

        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Option<Promotion>> {
        tracing::info!(id, "Processing lookup");

        Ok(self.state()?.rows.get(&id).cloned())
    }

    async fn filter(&self, filter: &PromotionFilter) -> Result<Vec<Promotion>> {
        tracing::info!(?filter, "Processing promotion query");

        Ok(self
            .state()?
            .rows
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{promotion::parse_timestamp, PromotionType};
    use serde_json::json;
    use std::sync::Arc;

    fn promotion(promotion_id: &str, name: &str, promotion_type: PromotionType) -> Promotion {
        Promotion {
            id: None,
            name: name.to_string(),
            promotion_id: promotion_id.to_string(),
            start_date: parse_timestamp("2025-04-23").unwrap(),
            end_date: parse_timestamp("2025-04-30").unwrap(),
            promotion_type,
            promotion_amount: 10.0,
            promotion_description: "Seasonal discount".to_string(),
            ..Promotion::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_fresh_ids() {
        let store = MemoryPromotionStore::new();

        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        first.id = Some(99);
        store.create(&mut first).await.unwrap();
        assert_eq!(first.id, Some(1));

        let mut second = promotion("PROMO-0002", "Flash Friday", PromotionType::Flash);
        store.create(&mut second).await.unwrap();
        assert_eq!(second.id, Some(2));

        let found = store.find(1).await.unwrap().unwrap();
        assert_eq!(found, first);
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_promotion_id_rejected() {
        let store = MemoryPromotionStore::new();

        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        store.create(&mut first).await.unwrap();

        let mut duplicate = promotion("PROMO-0001", "Other", PromotionType::Coupon);
        let result = store.create(&mut duplicate).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(duplicate.id, None);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_unique_conflict() {
        let store = MemoryPromotionStore::new();

        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        let mut second = promotion("PROMO-0002", "Flash Friday", PromotionType::Flash);
        store.create(&mut first).await.unwrap();
        store.create(&mut second).await.unwrap();

        first.usage_count = 3;
        store.update(&first).await.unwrap();
        assert_eq!(store.find(1).await.unwrap().unwrap().usage_count, 3);

        second.promotion_id = "PROMO-0001".to_string();
        assert!(store.update(&second).await.is_err());
        assert_eq!(
            store.find(2).await.unwrap().unwrap().promotion_id,
            "PROMO-0002"
        );

        let unsaved = promotion("PROMO-0003", "Unsaved", PromotionType::Coupon);
        assert!(store.update(&unsaved).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryPromotionStore::new();

        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        store.create(&mut first).await.unwrap();

        store.delete(&first).await.unwrap();
        store.delete(&first).await.unwrap();
        assert_eq!(store.find(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_finders() {
        let store = MemoryPromotionStore::new();
        for (id, name, kind) in [
            ("PROMO-0001", "Spring Sale", PromotionType::Discount),
            ("PROMO-0002", "spring sale", PromotionType::Coupon),
            ("PROMO-0003", "Spring Sale", PromotionType::Coupon),
        ] {
            store.create(&mut promotion(id, name, kind)).await.unwrap();
        }

        assert_eq!(store.find_by_name("Spring Sale").await.unwrap().len(), 2);
        assert_eq!(
            store
                .find_by_type(PromotionType::Coupon)
                .await
                .unwrap()
                .len(),
            2
        );
        assert!(store
            .find_by_type(PromotionType::Flash)
            .await
            .unwrap()
            .is_empty());

        let both = store
            .filter(&PromotionFilter {
                name: Some("Spring Sale".to_string()),
                promotion_type: Some(PromotionType::Coupon),
                ..PromotionFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].promotion_id, "PROMO-0003");

        let by_business_key = store.find_by_promotion_id("PROMO-0002").await.unwrap();
        assert_eq!(by_business_key.unwrap().id, Some(2));
        assert_eq!(store.find_by_promotion_id("PROMO-9999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_keeps_counters_when_omitted() {
        let store = MemoryPromotionStore::new();
        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        store.create(&mut first).await.unwrap();
        store.apply(1).await.unwrap();

        let body = json!({
            "name": "Summer Sale",
            "promotion_id": "PROMO-0001",
            "start_date": "2025-06-01",
            "end_date": "2025-06-30",
            "promotion_type": "FLASH",
            "promotion_amount": 5,
            "promotion_description": "Summer"
        });
        let replaced = store.replace(1, &body).await.unwrap().unwrap();
        assert_eq!(replaced.name, "Summer Sale");
        assert_eq!(replaced.usage_count, 1);
        assert_eq!(store.find(1).await.unwrap().unwrap(), replaced);

        assert_eq!(store.replace(42, &body).await.unwrap(), None);
        assert!(matches!(
            store.replace(1, &json!({ "name": "x" })).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_and_cancel() {
        let store = MemoryPromotionStore::new();
        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        store.create(&mut first).await.unwrap();

        assert_eq!(store.apply(1).await.unwrap().unwrap().usage_count, 1);
        assert_eq!(store.apply(99).await.unwrap(), None);

        let canceled = store.cancel(1).await.unwrap().unwrap();
        assert_eq!(canceled.state, PromotionState::Canceled);
        assert!(matches!(store.cancel(1).await, Err(AppError::Conflict(_))));
        assert_eq!(store.cancel(99).await.unwrap(), None);

        first.usage_count = i32::MAX;
        first.state = PromotionState::Active;
        store.update(&first).await.unwrap();
        assert!(matches!(store.apply(1).await, Err(AppError::Validation(_))));
        assert_eq!(store.find(1).await.unwrap().unwrap().usage_count, i32::MAX);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_applies_are_all_counted() {
        let store = Arc::new(MemoryPromotionStore::new());
        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        store.create(&mut first).await.unwrap();

        let tasks: Vec<_> = (0..500)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.apply(1).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.find(1).await.unwrap().unwrap().usage_count, 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_cancels_succeed_once() {
        let store = Arc::new(MemoryPromotionStore::new());
        let mut first = promotion("PROMO-0001", "Spring Sale", PromotionType::Discount);
        store.create(&mut first).await.unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.cancel(1).await })
            })
            .collect();

        let mut canceled = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(Some(_)) => canceled += 1,
                Err(AppError::Conflict(_)) => {}
                other => panic!("unexpected cancel outcome: {:?}", other),
            }
        }

        assert_eq!(canceled, 1);
    }
}

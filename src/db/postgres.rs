use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::{postgres::PgQueryResult, FromRow, PgConnection, PgPool, Postgres, Transaction};

use super::store::{not_cancelable, PromotionFilter, PromotionStore};
use crate::error::{AppError, Result};
use crate::models::Promotion;

#[derive(Debug, FromRow)]
struct PromotionRow {
    id: i64,
    name: String,
    promotion_id: String,
    start_date: NaiveDateTime,
    end_date: NaiveDateTime,
    promotion_type: String,
    promotion_amount: f64,
    promotion_description: String,
    usage_count: i32,
    state: String,
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = AppError;

    fn try_from(row: PromotionRow) -> Result<Self> {
        let id = row.id;
        let corrupt = |e: AppError| {
            AppError::Internal(anyhow::anyhow!("Stored promotion {} is invalid: {}", id, e))
        };

        Ok(Promotion {
            id: Some(id),
            promotion_type: row.promotion_type.parse().map_err(corrupt)?,
            state: row.state.parse().map_err(corrupt)?,
            name: row.name,
            promotion_id: row.promotion_id,
            start_date: row.start_date,
            end_date: row.end_date,
            promotion_amount: row.promotion_amount,
            promotion_description: row.promotion_description,
            usage_count: row.usage_count,
        })
    }
}

/// Postgres-backed promotion store.
#[derive(Debug, Clone)]
pub struct PgPromotionStore {
    pool: PgPool,
}

impl PgPromotionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::Validation(format!("Could not open transaction: {}", e)))
    }
}

/// Commits on success; rolls back and wraps the cause as a validation error
/// on failure.
async fn finish<T>(
    tx: Transaction<'static, Postgres>,
    result: std::result::Result<T, sqlx::Error>,
    action: &str,
    id: Option<i64>,
) -> Result<T> {
    let failure = match result {
        Ok(value) => match tx.commit().await {
            Ok(()) => return Ok(value),
            Err(e) => e,
        },
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::error!(error = %rollback_error, "Rollback failed");
            }
            e
        }
    };

    tracing::error!(
        id = ?id,
        error = %failure,
        "Error {} promotion",
        action
    );

    Err(AppError::Validation(failure.to_string()))
}

async fn discard(tx: Transaction<'static, Postgres>) {
    if let Err(e) = tx.rollback().await {
        tracing::error!(error = %e, "Rollback failed");
    }
}

/// Builds `SELECT` over `promotions` with one numbered placeholder per set
/// criterion, in `promotion_id`, `name`, `promotion_type` order.
fn filter_query(filter: &PromotionFilter) -> String {
    let mut query = String::from("SELECT * FROM promotions");
    let mut clauses = Vec::new();

    if filter.promotion_id.is_some() {
        clauses.push(format!("promotion_id = ${}", clauses.len() + 1));
    }
    if filter.name.is_some() {
        clauses.push(format!("name = ${}", clauses.len() + 1));
    }
    if filter.promotion_type.is_some() {
        clauses.push(format!("promotion_type = ${}", clauses.len() + 1));
    }

    if !clauses.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&clauses.join(" AND "));
    }
    query.push_str(" ORDER BY id");

    query
}

async fn write_row(
    conn: &mut PgConnection,
    id: i64,
    promotion: &Promotion,
) -> std::result::Result<PgQueryResult, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE promotions
        SET name = $2,
            promotion_id = $3,
            start_date = $4,
            end_date = $5,
            promotion_type = $6,
            promotion_amount = $7,
            promotion_description = $8,
            usage_count = $9,
            state = $10
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&promotion.name)
    .bind(&promotion.promotion_id)
    .bind(promotion.start_date)
    .bind(promotion.end_date)
    .bind(promotion.promotion_type.as_str())
    .bind(promotion.promotion_amount)
    .bind(&promotion.promotion_description)
    .bind(promotion.usage_count)
    .bind(promotion.state.as_str())
    .execute(conn)
    .await
}

fn persisted_id(promotion: &Promotion) -> Result<i64> {
    promotion.id.ok_or_else(|| {
        AppError::Validation(format!(
            "Promotion '{}' has not been created yet",
            promotion.promotion_id
        ))
    })
}

#[async_trait]
impl PromotionStore for PgPromotionStore {
    async fn create(&self, promotion: &mut Promotion) -> Result<()> {
        tracing::info!(name = %promotion.name, promotion_id = %promotion.promotion_id, "Creating promotion");
        promotion.id = None;

        let mut tx = self.begin().await?;

        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO promotions (
                name, promotion_id, start_date, end_date, promotion_type,
                promotion_amount, promotion_description, usage_count, state
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&promotion.name)
        .bind(&promotion.promotion_id)
        .bind(promotion.start_date)
        .bind(promotion.end_date)
        .bind(promotion.promotion_type.as_str())
        .bind(promotion.promotion_amount)
        .bind(&promotion.promotion_description)
        .bind(promotion.usage_count)
        .bind(promotion.state.as_str())
        .fetch_one(&mut *tx)
        .await;

        let id = finish(tx, result, "creating", None).await?;
        promotion.id = Some(id);

        Ok(())
    }

    async fn update(&self, promotion: &Promotion) -> Result<()> {
        tracing::info!(id = ?promotion.id, name = %promotion.name, "Saving promotion");
        let id = persisted_id(promotion)?;

        let mut tx = self.begin().await?;

        let result = write_row(&mut *tx, id, promotion).await;

        let outcome: PgQueryResult = finish(tx, result, "updating", Some(id)).await?;
        if outcome.rows_affected() == 0 {
            return Err(AppError::Validation(format!(
                "Promotion with id '{}' no longer exists",
                id
            )));
        }

        Ok(())
    }

    async fn replace(&self, id: i64, data: &Value) -> Result<Option<Promotion>> {
        tracing::info!(id, "Replacing promotion");

        let mut tx = self.begin().await?;

        let locked = sqlx::query_as::<_, PromotionRow>(
            "SELECT * FROM promotions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await;

        let row = match locked {
            Ok(Some(row)) => row,
            Ok(None) => {
                discard(tx).await;
                return Ok(None);
            }
            Err(e) => return finish(tx, Err(e), "updating", Some(id)).await,
        };

        let promotion = match Promotion::try_from(row).and_then(|p| p.deserialize(data)) {
            Ok(promotion) => promotion,
            Err(e) => {
                discard(tx).await;
                return Err(e);
            }
        };

        let result = write_row(&mut *tx, id, &promotion).await;
        finish(tx, result, "updating", Some(id)).await?;

        Ok(Some(promotion))
    }

    async fn apply(&self, id: i64) -> Result<Option<Promotion>> {
        tracing::info!(id, "Applying promotion");

        let mut tx = self.begin().await?;

        let result = sqlx::query_as::<_, PromotionRow>(
            "UPDATE promotions SET usage_count = usage_count + 1 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await;

        finish(tx, result, "applying", Some(id))
            .await?
            .map(Promotion::try_from)
            .transpose()
    }

    async fn cancel(&self, id: i64) -> Result<Option<Promotion>> {
        tracing::info!(id, "Canceling promotion");

        let mut tx = self.begin().await?;

        let canceled = sqlx::query_as::<_, PromotionRow>(
            "UPDATE promotions SET state = 'canceled' WHERE id = $1 AND state = 'active' RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await;

        // No row updated: either the id is unknown or the promotion is not active
        let result = match canceled {
            Ok(None) => sqlx::query_as::<_, PromotionRow>("SELECT * FROM promotions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map(|row| row.map(|row| (false, row))),
            other => other.map(|row| row.map(|row| (true, row))),
        };

        match finish(tx, result, "canceling", Some(id)).await? {
            Some((true, row)) => Promotion::try_from(row).map(Some),
            Some((false, row)) => Err(not_cancelable(&Promotion::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        tracing::info!(id, "Deleting promotion");

        let mut tx = self.begin().await?;

        let result = sqlx::query("DELETE FROM promotions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await;

        finish(tx, result, "deleting", Some(id)).await?;

        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Option<Promotion>> {
        tracing::info!(id, "Processing lookup");

        let row = sqlx::query_as::<_, PromotionRow>("SELECT * FROM promotions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Promotion::try_from).transpose()
    }

    async fn filter(&self, filter: &PromotionFilter) -> Result<Vec<Promotion>> {
        tracing::info!(?filter, "Processing promotion query");

        let query = filter_query(filter);
        let mut query_builder = sqlx::query_as::<_, PromotionRow>(&query);

        if let Some(promotion_id) = &filter.promotion_id {
            query_builder = query_builder.bind(promotion_id);
        }
        if let Some(name) = &filter.name {
            query_builder = query_builder.bind(name);
        }
        if let Some(promotion_type) = filter.promotion_type {
            query_builder = query_builder.bind(promotion_type.as_str());
        }

        let rows = query_builder.fetch_all(&self.pool).await?;

        rows.into_iter().map(Promotion::try_from).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

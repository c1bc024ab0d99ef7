use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::sql_fragment;
use crate::db::prelude::{Appended, DailyStats, StoreResult, Tip, TipDraft, TipStore};

#[derive(Debug)]
pub struct TipRepository {
    pool: &'static Pool<Postgres>,
}

impl TipRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    async fn get_by_external_id(&self, external_id: &str) -> StoreResult<Tip> {
        Ok(sqlx::query_as::<_, Tip>(&format!(
            "SELECT {} FROM tip WHERE external_id = $1",
            sql_fragment::TIP_FIELDS
        ))
        .bind(external_id)
        .fetch_one(self.pool)
        .await?)
    }
}

#[async_trait]
impl TipStore for TipRepository {
    #[instrument(skip(self, draft), fields(external_id = ?draft.external_id))]
    async fn append(&self, draft: TipDraft) -> StoreResult<Appended> {
        let tip = draft.into_tip();

        // a NULL external id never conflicts, so only caller-identified tips are deduplicated
        let inserted = sqlx::query_as::<_, Tip>(&format!(
            r#"
            INSERT INTO tip (
                id,
                external_id,
                amount_minor,
                contributor_name,
                message,
                occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id)
            DO NOTHING
            RETURNING {}
            "#,
            sql_fragment::TIP_FIELDS
        ))
        .bind(tip.id)
        .bind(&tip.external_id)
        .bind(tip.amount)
        .bind(&tip.contributor_name)
        .bind(&tip.message)
        .bind(tip.occurred_at)
        .fetch_optional(self.pool)
        .await;

        match inserted {
            Ok(Some(tip)) => Ok(Appended::Inserted(tip)),
            Ok(None) => {
                let external_id = tip.external_id.as_deref().unwrap_or_default();
                tracing::info!(external_id, "tip already recorded");
                Ok(Appended::Duplicate(self.get_by_external_id(external_id).await?))
            }
            Err(e) => {
                tracing::error!(error = ?e, "failure during tip insertion");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn recent(&self, limit: i64) -> StoreResult<Vec<Tip>> {
        Ok(sqlx::query_as::<_, Tip>(&format!(
            "SELECT {} FROM tip ORDER BY occurred_at DESC, id DESC LIMIT $1",
            sql_fragment::TIP_FIELDS
        ))
        .bind(limit)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn stats_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<DailyStats> {
        Ok(sqlx::query_as::<_, DailyStats>(
            r#"
            SELECT
                COALESCE(SUM(amount_minor), 0)::BIGINT AS total_amount,
                COUNT(*) AS tip_count,
                COALESCE(MAX(amount_minor), 0)::BIGINT AS highest_tip
            FROM tip
            WHERE occurred_at >= $1
            AND occurred_at < $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn unmerged(&self, before: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Tip>> {
        Ok(sqlx::query_as::<_, Tip>(&format!(
            r#"
            SELECT {} FROM tip
            WHERE merged_at IS NULL
            AND occurred_at < $1
            ORDER BY occurred_at ASC
            LIMIT $2
            "#,
            sql_fragment::TIP_FIELDS
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(self.pool)
        .await?)
    }
}

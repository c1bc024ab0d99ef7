use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::sql_fragment;
use crate::db::prelude::{LeaderboardEntry, LeaderboardStore, StoreError, StoreResult, Tip};

#[derive(Debug)]
pub struct LeaderboardRepository {
    pool: &'static Pool<Postgres>,
}

impl LeaderboardRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaderboardStore for LeaderboardRepository {
    /// Marks the tip and applies its delta in one transaction.
    ///
    /// The `UPDATE ... WHERE merged_at IS NULL` row lock serializes a racing reconciliation of
    /// the same tip, and the upsert itself is the only write to the leaderboard row, so the
    /// increment never goes through application code.
    #[instrument(skip(self, tip), fields(tip_id = %tip.id, contributor = %tip.contributor_name))]
    async fn merge(&self, tip: &Tip) -> StoreResult<LeaderboardEntry> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE tip
            SET merged_at = NOW()
            WHERE id = $1
            AND merged_at IS NULL
            "#,
        )
        .bind(tip.id)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::debug!("tip already merged or unknown; leaving leaderboard untouched");

            let known = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM tip WHERE id = $1)")
                .bind(tip.id)
                .fetch_one(self.pool)
                .await?;

            return match (known, self.get(&tip.contributor_name).await?) {
                (true, Some(entry)) => Ok(entry),
                _ => Err(StoreError::UnknownTip(tip.id)),
            };
        }

        let entry = sqlx::query_as::<_, LeaderboardEntry>(&format!(
            r#"
            INSERT INTO leaderboard (
                contributor_name,
                total_minor,
                first_tip_at,
                last_message,
                last_tip_at
            )
            VALUES ($1, $2, $3, $4, $3)
            ON CONFLICT (contributor_name)
            DO UPDATE SET
                total_minor = leaderboard.total_minor + EXCLUDED.total_minor,
                last_message = CASE
                    WHEN EXCLUDED.last_tip_at >= leaderboard.last_tip_at THEN EXCLUDED.last_message
                    ELSE leaderboard.last_message
                END,
                last_tip_at = GREATEST(leaderboard.last_tip_at, EXCLUDED.last_tip_at)
            RETURNING {}
            "#,
            sql_fragment::LEADERBOARD_FIELDS
        ))
        .bind(&tip.contributor_name)
        .bind(tip.amount)
        .bind(tip.occurred_at)
        .bind(&tip.message)
        .fetch_one(&mut *tx)
        .await;

        match entry {
            Ok(entry) => {
                tx.commit().await?;
                Ok(entry)
            }
            Err(e) => {
                tracing::error!(error = ?e, "leaderboard merge failure");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn top_n(&self, limit: i64) -> StoreResult<Vec<LeaderboardEntry>> {
        Ok(sqlx::query_as::<_, LeaderboardEntry>(&format!(
            r#"
            SELECT {} FROM leaderboard
            ORDER BY total_minor DESC, first_tip_at ASC, contributor_name ASC
            LIMIT $1
            "#,
            sql_fragment::LEADERBOARD_FIELDS
        ))
        .bind(limit)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn get(&self, contributor_name: &str) -> StoreResult<Option<LeaderboardEntry>> {
        Ok(sqlx::query_as::<_, LeaderboardEntry>(&format!(
            "SELECT {} FROM leaderboard WHERE contributor_name = $1",
            sql_fragment::LEADERBOARD_FIELDS
        ))
        .bind(contributor_name)
        .fetch_optional(self.pool)
        .await?)
    }
}

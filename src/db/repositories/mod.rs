use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::prelude::{DailyStats, LeaderboardEntry, StoreResult, Tip, TipDraft};

pub mod leaderboard;
pub mod tip;

/// Result of appending to the tip log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    Inserted(Tip),
    /// A tip with the same external id already exists; nothing was written
    Duplicate(Tip),
}

/// Append-only log of accepted tips.
#[async_trait]
pub trait TipStore: Send + Sync {
    /// Appends a tip, assigning `id`/`occurred_at` if the draft lacks them. When the draft
    /// carries an external id that is already present, the existing tip is returned as
    /// [`Appended::Duplicate`] instead.
    async fn append(&self, draft: TipDraft) -> StoreResult<Appended>;

    /// Newest first
    async fn recent(&self, limit: i64) -> StoreResult<Vec<Tip>>;

    /// Aggregates over tips with `start <= occurred_at < end`
    async fn stats_between(&self, start: DateTime<Utc>, end: DateTime<Utc>)
    -> StoreResult<DailyStats>;

    /// Tips older than `before` whose leaderboard merge has not been applied, oldest first
    async fn unmerged(&self, before: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Tip>>;
}

/// Keyed per-contributor aggregate.
#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Atomically folds `tip` into its contributor's entry (create-or-increment) and marks the
    /// tip as merged. Merging a tip that is already marked changes nothing and returns the
    /// current entry.
    async fn merge(&self, tip: &Tip) -> StoreResult<LeaderboardEntry>;

    /// Highest totals first; see [`LeaderboardEntry::ranking_order`]
    async fn top_n(&self, limit: i64) -> StoreResult<Vec<LeaderboardEntry>>;

    async fn get(&self, contributor_name: &str) -> StoreResult<Option<LeaderboardEntry>>;
}

pub mod sql_fragment {
    pub const TIP_FIELDS: &str = r#"
        id,
        external_id,
        amount_minor AS amount,
        contributor_name,
        message,
        occurred_at
    "#;

    pub const LEADERBOARD_FIELDS: &str = r#"
        contributor_name,
        total_minor AS total,
        first_tip_at,
        last_message,
        last_tip_at
    "#;
}

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone};
    use sqlx::PgPool;

    use super::*;
    use crate::db::prelude::{Amount, LeaderboardRepository, StoreError, TipRepository};

    /// Repositories over the per-test database; the pool is closed by the harness when the test ends
    fn repositories(pool: PgPool) -> (TipRepository, LeaderboardRepository) {
        let pool: &'static PgPool = Box::leak(Box::new(pool));
        (TipRepository::new(pool), LeaderboardRepository::new(pool))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn draft(name: &str, minor: i64, secs: i64) -> TipDraft {
        TipDraft {
            id: None,
            external_id: None,
            amount: Amount(minor),
            contributor_name: name.into(),
            message: format!("{name} at {secs}"),
            occurred_at: Some(at(secs)),
        }
    }

    async fn append(tips: &TipRepository, draft: TipDraft) -> Tip {
        match tips.append(draft).await.unwrap() {
            Appended::Inserted(tip) => tip,
            Appended::Duplicate(tip) => panic!("unexpected duplicate {tip:?}"),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_merge_creates_then_increments(pool: PgPool) {
        let (tips, board) = repositories(pool);
        let first = append(&tips, draft("Alex", 1500, 0)).await;
        let second = append(&tips, draft("Alex", 500, 10)).await;

        let created = board.merge(&first).await.unwrap();
        assert_eq!(created.total, Amount(1500));
        assert_eq!(created.first_tip_at, first.occurred_at);
        assert_eq!(created.last_message, first.message);

        let updated = board.merge(&second).await.unwrap();
        assert_eq!(updated.total, Amount(2000));
        assert_eq!(updated.first_tip_at, first.occurred_at);
        assert_eq!(updated.last_tip_at, second.occurred_at);
        assert_eq!(updated.last_message, second.message);

        assert_eq!(board.get("Alex").await.unwrap(), Some(updated));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_older_tip_keeps_latest_message(pool: PgPool) {
        let (tips, board) = repositories(pool);
        let newer = append(&tips, draft("Robin", 300, 60)).await;
        let older = append(&tips, draft("Robin", 200, 0)).await;

        board.merge(&newer).await.unwrap();
        let entry = board.merge(&older).await.unwrap();

        assert_eq!(entry.total, Amount(500));
        assert_eq!(entry.last_message, newer.message);
        assert_eq!(entry.last_tip_at, newer.occurred_at);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_concurrent_merges_for_one_contributor(pool: PgPool) {
        let (tips, board) = repositories(pool);
        let ten = append(&tips, draft("Sam", 1000, 0)).await;
        let thirty = append(&tips, draft("Sam", 3000, 1)).await;

        let (a, b) = tokio::join!(board.merge(&ten), board.merge(&thirty));
        a.unwrap();
        b.unwrap();

        let entry = board.get("Sam").await.unwrap().unwrap();
        assert_eq!(entry.total, Amount(4000));
        assert_eq!(entry.last_message, thirty.message);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_merge_is_exactly_once_per_tip(pool: PgPool) {
        let (tips, board) = repositories(pool);
        let tip = append(&tips, draft("Sam", 1000, 0)).await;

        board.merge(&tip).await.unwrap();
        let again = board.merge(&tip).await.unwrap();
        assert_eq!(again.total, Amount(1000));

        let stray = draft("Ghost", 100, 0).into_tip();
        assert!(matches!(
            board.merge(&stray).await,
            Err(StoreError::UnknownTip(id)) if id == stray.id
        ));
        assert!(board.get("Ghost").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_duplicate_external_id(pool: PgPool) {
        let (tips, _) = repositories(pool);
        let mut original = draft("Alex", 1500, 0);
        original.external_id = Some("pay_123".into());
        let inserted = append(&tips, original.clone()).await;

        original.amount = Amount(9999);
        match tips.append(original).await.unwrap() {
            Appended::Duplicate(existing) => assert_eq!(existing, inserted),
            other => panic!("expected duplicate, got {other:?}"),
        }

        // tips without an external id never collide
        append(&tips, draft("Alex", 1500, 0)).await;
        append(&tips, draft("Alex", 1500, 0)).await;

        assert_eq!(tips.recent(10).await.unwrap().len(), 3);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_unmerged_excludes_merged_tips(pool: PgPool) {
        let (tips, board) = repositories(pool);
        let merged = append(&tips, draft("Alex", 100, 0)).await;
        let pending = append(&tips, draft("Sam", 200, 10)).await;
        let fresh = append(&tips, draft("Robin", 300, 120)).await;

        board.merge(&merged).await.unwrap();

        let found = tips.unmerged(at(60), 10).await.unwrap();
        assert_eq!(found, vec![pending.clone()]);

        let found = tips.unmerged(at(600), 10).await.unwrap();
        assert_eq!(found, vec![pending, fresh]);

        assert_eq!(tips.unmerged(at(600), 1).await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_recent_and_window_stats(pool: PgPool) {
        let (tips, _) = repositories(pool);
        for (minor, secs) in [(500, 0), (1250, 60), (10000, 120), (700, 86_400)] {
            append(&tips, draft("Anonymous", minor, secs)).await;
        }

        let recent = tips.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].amount, Amount(700));
        assert_eq!(recent[1].amount, Amount(10000));

        let stats = tips
            .stats_between(at(0), at(0) + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(stats.total_amount, Amount(11750));
        assert_eq!(stats.tip_count, 3);
        assert_eq!(stats.highest_tip, Amount(10000));

        let empty = tips.stats_between(at(-86_400), at(0)).await.unwrap();
        assert_eq!(empty, DailyStats::default());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_top_n_ranks_ties_by_first_tip(pool: PgPool) {
        let (tips, board) = repositories(pool);
        for (name, minor, secs) in [
            ("late", 500, 20),
            ("early", 500, 10),
            ("big", 900, 30),
            ("low", 100, 0),
        ] {
            let tip = append(&tips, draft(name, minor, secs)).await;
            board.merge(&tip).await.unwrap();
        }

        let names = |entries: Vec<LeaderboardEntry>| {
            entries
                .into_iter()
                .map(|e| e.contributor_name)
                .collect::<Vec<_>>()
        };

        assert_eq!(names(board.top_n(3).await.unwrap()), ["big", "early", "late"]);
        assert_eq!(
            names(board.top_n(10).await.unwrap()),
            ["big", "early", "late", "low"]
        );
    }
}

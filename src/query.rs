//! Read-only views over the tip log and leaderboard.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use tracing::instrument;

use crate::db::Stores;
use crate::db::models::MAX_LIMIT;
use crate::db::prelude::{DailyStats, LeaderboardEntry, StoreResult, Tip};

#[derive(Clone)]
pub struct QueryService {
    stores: Stores,
    reference_offset: FixedOffset,
}

impl QueryService {
    pub fn new(stores: Stores, reference_offset: FixedOffset) -> Self {
        Self {
            stores,
            reference_offset,
        }
    }

    /// Newest first; `n` is clamped to `1..=MAX_LIMIT`
    #[instrument(skip(self))]
    pub async fn recent_tips(&self, n: i64) -> StoreResult<Vec<Tip>> {
        self.stores.tips.recent(n.clamp(1, MAX_LIMIT)).await
    }

    #[instrument(skip(self))]
    pub async fn top_tippers(&self, n: i64) -> StoreResult<Vec<LeaderboardEntry>> {
        self.stores.leaderboard.top_n(n.clamp(1, MAX_LIMIT)).await
    }

    /// Totals over `day` as observed in the reference timezone
    #[instrument(skip(self))]
    pub async fn daily_stats(&self, day: NaiveDate) -> StoreResult<DailyStats> {
        match self.day_window(day) {
            Some((start, end)) => self.stores.tips.stats_between(start, end).await,
            // no tip can fall on a day outside the representable range
            None => Ok(DailyStats::default()),
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now()
            .with_timezone(&self.reference_offset)
            .date_naive()
    }

    /// `[day 00:00, day+1 00:00)` in the reference timezone, expressed in UTC
    pub fn day_window(&self, day: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let offset = TimeDelta::seconds(self.reference_offset.local_minus_utc().into());
        let to_utc = |date: NaiveDate| {
            date.and_time(NaiveTime::MIN)
                .checked_sub_signed(offset)
                .map(|naive| naive.and_utc())
        };

        Some((to_utc(day)?, to_utc(day.succ_opt()?)?))
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::db::prelude::{Amount, TipDraft};

    fn service(offset_minutes: i32) -> QueryService {
        QueryService::new(
            Stores::memory(),
            FixedOffset::east_opt(offset_minutes * 60).unwrap(),
        )
    }

    async fn tip_at(service: &QueryService, minor: i64, at: DateTime<Utc>) {
        service
            .stores
            .tips
            .append(TipDraft {
                id: None,
                external_id: None,
                amount: Amount(minor),
                contributor_name: "Anonymous".into(),
                message: String::new(),
                occurred_at: Some(at),
            })
            .await
            .unwrap();
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_daily_stats_totals() {
        let service = service(0);
        for (minor, hour) in [(500, 1), (1250, 12), (10000, 23)] {
            tip_at(&service, minor, Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap()).await;
        }

        let stats = service.daily_stats(day(2026, 3, 14)).await.unwrap();
        assert_eq!(stats.total_amount, Amount(11750));
        assert_eq!(stats.tip_count, 3);
        assert_eq!(stats.highest_tip, Amount(10000));

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["totalAmount"], 117.5);
        assert_eq!(json["tipCount"], 3);
        assert_eq!(json["highestTip"], 100.0);

        let empty = service.daily_stats(day(2026, 3, 15)).await.unwrap();
        assert_eq!(empty, DailyStats::default());
    }

    #[tokio::test]
    async fn test_day_window_boundaries() {
        let service = service(0);
        let midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();

        tip_at(&service, 100, midnight - TimeDelta::microseconds(1)).await;
        tip_at(&service, 200, midnight).await;

        let before = service.daily_stats(day(2026, 3, 14)).await.unwrap();
        let after = service.daily_stats(day(2026, 3, 15)).await.unwrap();
        assert_eq!(before.total_amount, Amount(100));
        assert_eq!(after.total_amount, Amount(200));
    }

    #[tokio::test]
    async fn test_reference_offset_shifts_the_day() {
        // UTC-05:00: local midnight on the 14th is 05:00 UTC
        let service = service(-300);
        tip_at(&service, 700, Utc.with_ymd_and_hms(2026, 3, 14, 4, 59, 0).unwrap()).await;
        tip_at(&service, 900, Utc.with_ymd_and_hms(2026, 3, 14, 5, 0, 0).unwrap()).await;

        let (start, end) = service.day_window(day(2026, 3, 14)).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 14, 5, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 15, 5, 0, 0).unwrap());

        assert_eq!(
            service.daily_stats(day(2026, 3, 13)).await.unwrap().total_amount,
            Amount(700)
        );
        assert_eq!(
            service.daily_stats(day(2026, 3, 14)).await.unwrap().total_amount,
            Amount(900)
        );
    }

    #[tokio::test]
    async fn test_limits_are_clamped() {
        let service = service(0);
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..120 {
            tip_at(&service, 100 + i, base + TimeDelta::seconds(i)).await;
        }

        let recent = service.recent_tips(500).await.unwrap();
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].amount, Amount(219));

        assert_eq!(service.recent_tips(0).await.unwrap().len(), 1);
        assert_eq!(service.recent_tips(-3).await.unwrap().len(), 1);
        assert!(service.top_tippers(10).await.unwrap().is_empty());
    }
}

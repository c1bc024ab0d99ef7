use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Amount;

/// Base leaderboard table model: one running aggregate per contributor name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    #[serde(rename = "name")]
    pub contributor_name: String,
    pub total: Amount,
    pub first_tip_at: DateTime<Utc>,
    pub last_message: String,
    pub last_tip_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    /// Ranking order: highest total first, earlier first tip wins a tie, then name so that the
    /// order is total.
    pub fn ranking_order(a: &Self, b: &Self) -> Ordering {
        b.total
            .cmp(&a.total)
            .then_with(|| a.first_tip_at.cmp(&b.first_tip_at))
            .then_with(|| a.contributor_name.cmp(&b.contributor_name))
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn entry(name: &str, total: i64, first_secs: i64) -> LeaderboardEntry {
        let first = Utc.timestamp_opt(first_secs, 0).unwrap();
        LeaderboardEntry {
            contributor_name: name.into(),
            total: Amount(total),
            first_tip_at: first,
            last_message: String::new(),
            last_tip_at: first,
        }
    }

    #[test]
    fn test_ranking_order() {
        let mut entries = vec![
            entry("late-tie", 500, 200),
            entry("low", 100, 0),
            entry("high", 900, 300),
            entry("early-tie", 500, 100),
        ];
        entries.sort_by(LeaderboardEntry::ranking_order);

        let names: Vec<_> = entries.iter().map(|e| e.contributor_name.as_str()).collect();
        assert_eq!(names, ["high", "early-tie", "late-tie", "low"]);
    }

    #[test]
    fn test_update_payload_shape() {
        let json = serde_json::to_value(entry("Sam", 4000, 0)).unwrap();
        assert_eq!(json["name"], "Sam");
        assert_eq!(json["total"], 40.0);
        assert!(json.get("lastMessage").is_some());
        assert!(json.get("lastTipAt").is_some());
    }
}

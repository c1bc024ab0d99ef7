use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Amount, TipId};

pub const ANONYMOUS: &str = "Anonymous";

/// Base tip table model; also the payload of a `new-tip` viewer event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tip {
    pub id: TipId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub amount: Amount,
    #[serde(rename = "name")]
    pub contributor_name: String,
    pub message: String,
    #[serde(rename = "timestamp")]
    pub occurred_at: DateTime<Utc>,
}

/// A validated tip that hasn't been appended yet. Missing `id`/`occurred_at` are assigned by
/// the store on append.
#[derive(Debug, Clone)]
pub struct TipDraft {
    pub id: Option<TipId>,
    pub external_id: Option<String>,
    pub amount: Amount,
    pub contributor_name: String,
    pub message: String,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl TipDraft {
    pub fn into_tip(self) -> Tip {
        Tip {
            id: self.id.unwrap_or_default(),
            external_id: self.external_id,
            amount: self.amount,
            contributor_name: self.contributor_name,
            message: self.message,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Blank or missing names collapse to [`ANONYMOUS`]; everything else is kept verbatim (after
/// trimming) since leaderboard keys are case-sensitive.
pub fn contributor_name(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => ANONYMOUS.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub total_amount: Amount,
    pub tip_count: i64,
    pub highest_tip: Amount,
}

impl DailyStats {
    pub fn from_tips<'a>(tips: impl IntoIterator<Item = &'a Tip>) -> Self {
        tips.into_iter().fold(Self::default(), |acc, tip| Self {
            total_amount: Amount(acc.total_amount.0.saturating_add(tip.amount.0)),
            tip_count: acc.tip_count + 1,
            highest_tip: acc.highest_tip.max(tip.amount),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_contributor_name_defaults() {
        assert_eq!(contributor_name(None), ANONYMOUS);
        assert_eq!(contributor_name(Some("")), ANONYMOUS);
        assert_eq!(contributor_name(Some("   ")), ANONYMOUS);
        assert_eq!(contributor_name(Some(" Alex ")), "Alex");
        assert_eq!(contributor_name(Some("alex")), "alex");
    }

    #[test]
    fn test_new_tip_payload_shape() {
        let tip = TipDraft {
            id: None,
            external_id: None,
            amount: Amount(1500),
            contributor_name: "Alex".into(),
            message: "nice ride".into(),
            occurred_at: None,
        }
        .into_tip();

        let json = serde_json::to_value(&tip).unwrap();
        assert_eq!(json["name"], "Alex");
        assert_eq!(json["amount"], 15.0);
        assert_eq!(json["message"], "nice ride");
        assert!(json["timestamp"].is_string());
        assert!(json.get("externalId").is_none());
    }

    #[test]
    fn test_daily_stats_fold() {
        let tips: Vec<Tip> = [500, 1250, 10000]
            .into_iter()
            .map(|minor| {
                TipDraft {
                    id: None,
                    external_id: None,
                    amount: Amount(minor),
                    contributor_name: ANONYMOUS.into(),
                    message: String::new(),
                    occurred_at: None,
                }
                .into_tip()
            })
            .collect();

        let stats = DailyStats::from_tips(&tips);
        assert_eq!(stats.total_amount, Amount(11750));
        assert_eq!(stats.tip_count, 3);
        assert_eq!(stats.highest_tip, Amount(10000));
        assert_eq!(DailyStats::from_tips(&[]), DailyStats::default());
    }
}

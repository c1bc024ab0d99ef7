use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Json, debug_handler};
use chrono::NaiveDate;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::aggregator::{IngestError, IngestOutcome, ReconcileReport};
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::models::{Limit, clamp_limit};
use crate::db::prelude::{DailyStats, LeaderboardEntry, Tip, TipId};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    pub tip_id: TipId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DayQuery {
    pub day: Option<String>,
}

/// Payment-completion webhook.
///
/// A tip that was recorded but not yet merged is still acknowledged (202) so the provider does
/// not redeliver and double-count it; reconciliation finishes the merge.
#[instrument(skip(state, body), fields(bytes = body.len()))]
#[debug_handler]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, RouteError> {
    match state.aggregator.ingest(&body).await {
        Ok(outcome) => {
            let ack = WebhookAck {
                success: true,
                tip_id: outcome.tip().id,
                duplicate: Some(matches!(outcome, IngestOutcome::Duplicate(_))),
                stale: None,
            };
            Ok((StatusCode::OK, Json(ack)).into_response())
        }
        Err(IngestError::PartialAggregationFailure { tip, .. }) => {
            let ack = WebhookAck {
                success: true,
                tip_id: tip.id,
                duplicate: None,
                stale: Some(true),
            };
            Ok((StatusCode::ACCEPTED, Json(ack)).into_response())
        }
        Err(e) => {
            tracing::warn!(error = %e, retryable = e.is_retryable(), "webhook rejected");
            Err(e.into())
        }
    }
}

#[instrument(skip(state))]
pub async fn recent_tips(
    Query(param): Query<Limit>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<Vec<Tip>> {
    let limit = clamp_limit(param.limit, state.settings.recent_tips_limit);
    Ok(Json(state.query.recent_tips(limit).await?))
}

#[instrument(skip(state))]
pub async fn top_tippers(
    Query(param): Query<Limit>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<Vec<LeaderboardEntry>> {
    let limit = clamp_limit(param.limit, state.settings.leaderboard_size);
    Ok(Json(state.query.top_tippers(limit).await?))
}

#[instrument(skip(state))]
pub async fn daily_stats(
    Query(param): Query<DayQuery>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<DailyStats> {
    let day = match param.day {
        Some(day) => NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
            .map_err(|_| RouteError::InvalidDay(day))?,
        None => state.query.today(),
    };

    Ok(Json(state.query.daily_stats(day).await?))
}

#[instrument(skip(state))]
pub async fn reconcile(State(state): State<Arc<AppState>>) -> JsonResult<ReconcileReport> {
    let report = state
        .aggregator
        .reconcile(state.settings.reconcile_grace)
        .await?;

    Ok(Json(report))
}

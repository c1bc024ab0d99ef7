//! Turns raw payment events into durable tips and leaderboard deltas.
//!
//! A successful ingestion is exactly two store operations (append, then merge) followed by a
//! fire-and-forget hand-off to the broadcaster; nothing here waits on viewers.

use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::broadcast::{Handoff, Publisher};
use crate::db::Stores;
use crate::db::models::tip::contributor_name;
use crate::db::prelude::{
    Appended, LeaderboardEntry, StoreError, StoreResult, Tip, TipDraft, TipId,
};
use crate::util::clock::MonotonicClock;

pub mod event;

pub use event::TipEvent;

/// Unmerged tips fetched per reconciliation round
const RECONCILE_BATCH: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub tip: Tip,
    pub entry: LeaderboardEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Aggregated(Aggregation),
    /// The external id was already recorded; nothing changed
    Duplicate(Tip),
}

impl IngestOutcome {
    pub fn tip(&self) -> &Tip {
        match self {
            IngestOutcome::Aggregated(aggregation) => &aggregation.tip,
            IngestOutcome::Duplicate(tip) => tip,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub repaired: usize,
    pub failed: usize,
}

pub struct Aggregator {
    stores: Stores,
    clock: MonotonicClock,
    publisher: Publisher,
}

impl Aggregator {
    pub fn new(stores: Stores, publisher: Publisher) -> Self {
        Self {
            stores,
            clock: MonotonicClock::new(),
            publisher,
        }
    }

    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn ingest(&self, raw: &[u8]) -> IngestResult<IngestOutcome> {
        let event = event::decode(raw).inspect_err(|e| {
            tracing::info!(error = %e, "rejected payment event");
        })?;

        self.ingest_event(event).await
    }

    #[instrument(skip(self, event), fields(external_id = ?event.external_id))]
    pub async fn ingest_event(&self, event: TipEvent) -> IngestResult<IngestOutcome> {
        if !event.amount.is_positive() {
            return Err(IngestError::InvalidAmount(format!(
                "amount must be positive, got {}",
                event.amount
            )));
        }

        let draft = TipDraft {
            id: Some(TipId::new()),
            external_id: event.external_id,
            amount: event.amount,
            contributor_name: contributor_name(event.contributor_name.as_deref()),
            message: event.message.unwrap_or_default(),
            occurred_at: Some(self.clock.now()),
        };

        let tip = match self
            .stores
            .tips
            .append(draft)
            .await
            .map_err(IngestError::PersistenceError)?
        {
            Appended::Inserted(tip) => tip,
            Appended::Duplicate(tip) => {
                tracing::info!(tip_id = %tip.id, "duplicate payment event ignored");
                return Ok(IngestOutcome::Duplicate(tip));
            }
        };

        let entry = match self.stores.leaderboard.merge(&tip).await {
            Ok(entry) => entry,
            Err(source) => {
                tracing::error!(
                    tip_id = %tip.id,
                    contributor = %tip.contributor_name,
                    error = %source,
                    "tip recorded but leaderboard merge failed; awaiting reconciliation"
                );
                return Err(IngestError::PartialAggregationFailure {
                    tip: Box::new(tip),
                    source,
                });
            }
        };

        tracing::info!(
            tip_id = %tip.id,
            contributor = %tip.contributor_name,
            amount = %tip.amount,
            total = %entry.total,
            "tip aggregated"
        );

        let aggregation = Aggregation { tip, entry };
        self.publisher
            .publish(Handoff::Aggregated(aggregation.clone()));

        Ok(IngestOutcome::Aggregated(aggregation))
    }

    /// Applies the merge for every tip older than `grace` that never got one.
    ///
    /// Repaired tips are not re-announced as new tips; viewers only get a fresh leaderboard.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, grace: Duration) -> StoreResult<ReconcileReport> {
        let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
        let before = self
            .clock
            .now()
            .checked_sub_signed(grace)
            .unwrap_or_default();

        let mut report = ReconcileReport::default();
        loop {
            let pending = self.stores.tips.unmerged(before, RECONCILE_BATCH).await?;
            let exhausted = (pending.len() as i64) < RECONCILE_BATCH;

            for tip in pending {
                match self.stores.leaderboard.merge(&tip).await {
                    Ok(_) => report.repaired += 1,
                    Err(e) => {
                        tracing::warn!(tip_id = %tip.id, error = %e, "reconciliation merge failed");
                        report.failed += 1;
                    }
                }
            }

            // a failing tip would be fetched again forever; leave it for the next run
            if exhausted || report.failed > 0 {
                break;
            }
        }

        if report.repaired > 0 {
            tracing::info!(?report, "reconciled unmerged tips");
            self.publisher.publish(Handoff::Reconciled);
        }

        Ok(report)
    }
}

pub type IngestResult<T> = core::result::Result<T, IngestError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("persistence error: {0}")]
    PersistenceError(#[source] StoreError),

    #[error("tip '{}' recorded but leaderboard merge failed: {source}", .tip.id)]
    PartialAggregationFailure {
        tip: Box<Tip>,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    /// Whether the caller may resubmit the same event
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::PersistenceError(_))
    }
}

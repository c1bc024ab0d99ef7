//! In-process backend for both store traits.
//!
//! Everything lives behind one `RwLock`; a merge is a single write-locked critical section,
//! which is this backend's equivalent of the conditional upsert the Postgres repositories use.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::prelude::{
    Appended, DailyStats, LeaderboardEntry, LeaderboardStore, StoreError, StoreResult, Tip,
    TipDraft, TipId, TipStore,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    tips: Vec<Tip>,
    by_id: HashMap<TipId, usize>,
    by_external: HashMap<String, usize>,
    merged: HashSet<TipId>,
    board: HashMap<String, LeaderboardEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl TipStore for MemoryStore {
    async fn append(&self, draft: TipDraft) -> StoreResult<Appended> {
        let tip = draft.into_tip();
        let mut state = self.write()?;

        if let Some(existing) = tip
            .external_id
            .as_ref()
            .and_then(|ext| state.by_external.get(ext))
        {
            return Ok(Appended::Duplicate(state.tips[*existing].clone()));
        }

        let idx = state.tips.len();
        state.by_id.insert(tip.id, idx);
        if let Some(ext) = &tip.external_id {
            state.by_external.insert(ext.clone(), idx);
        }
        state.tips.push(tip.clone());

        Ok(Appended::Inserted(tip))
    }

    async fn recent(&self, limit: i64) -> StoreResult<Vec<Tip>> {
        let state = self.read()?;
        let mut tips = state.tips.clone();
        tips.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        tips.truncate(limit.max(0) as usize);

        Ok(tips)
    }

    async fn stats_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<DailyStats> {
        let state = self.read()?;
        Ok(DailyStats::from_tips(
            state
                .tips
                .iter()
                .filter(|tip| tip.occurred_at >= start && tip.occurred_at < end),
        ))
    }

    async fn unmerged(&self, before: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Tip>> {
        let state = self.read()?;
        let mut pending: Vec<Tip> = state
            .tips
            .iter()
            .filter(|tip| tip.occurred_at < before && !state.merged.contains(&tip.id))
            .cloned()
            .collect();

        pending.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        pending.truncate(limit.max(0) as usize);

        Ok(pending)
    }
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    async fn merge(&self, tip: &Tip) -> StoreResult<LeaderboardEntry> {
        let mut state = self.write()?;

        if !state.by_id.contains_key(&tip.id) {
            return Err(StoreError::UnknownTip(tip.id));
        }

        if state.merged.contains(&tip.id) {
            return state
                .board
                .get(&tip.contributor_name)
                .cloned()
                .ok_or(StoreError::UnknownTip(tip.id));
        }

        let total = match state.board.get(&tip.contributor_name) {
            Some(entry) => entry
                .total
                .checked_add(tip.amount)
                .ok_or_else(|| StoreError::TotalOverflow(tip.contributor_name.clone()))?,
            None => tip.amount,
        };

        // the tip stays unmarked on any failure above, so reconciliation can retry it
        state.merged.insert(tip.id);

        let entry = state
            .board
            .entry(tip.contributor_name.clone())
            .and_modify(|entry| {
                entry.total = total;
                if tip.occurred_at >= entry.last_tip_at {
                    entry.last_message = tip.message.clone();
                    entry.last_tip_at = tip.occurred_at;
                }
            })
            .or_insert_with(|| LeaderboardEntry {
                contributor_name: tip.contributor_name.clone(),
                total,
                first_tip_at: tip.occurred_at,
                last_message: tip.message.clone(),
                last_tip_at: tip.occurred_at,
            });

        Ok(entry.clone())
    }

    async fn top_n(&self, limit: i64) -> StoreResult<Vec<LeaderboardEntry>> {
        let state = self.read()?;
        let mut entries: Vec<LeaderboardEntry> = state.board.values().cloned().collect();
        entries.sort_by(LeaderboardEntry::ranking_order);
        entries.truncate(limit.max(0) as usize);

        Ok(entries)
    }

    async fn get(&self, contributor_name: &str) -> StoreResult<Option<LeaderboardEntry>> {
        Ok(self.read()?.board.get(contributor_name).cloned())
    }
}

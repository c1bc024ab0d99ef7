//! Fan-out of tip and leaderboard events to connected viewers.
//!
//! The aggregator never talks to viewers directly: it drops a [`Handoff`] into an unbounded
//! channel and returns. A single broadcaster task drains that channel in order, so every
//! subscriber sees events in the order they were produced, and a slow subscriber only ever
//! costs one bounded send per event.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::aggregator::Aggregation;
use crate::db::prelude::{LeaderboardEntry, LeaderboardStore, Tip};

pub mod registry;

pub use registry::{DeliveryError, SubscriptionRegistry};

/// A frame sent to viewers, serialized as `{"event": "<kind>", "data": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ViewerEvent {
    InitLeaderboard(Vec<LeaderboardEntry>),
    NewTip(Tip),
    LeaderboardUpdate(Vec<LeaderboardEntry>),
}

impl ViewerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ViewerEvent::InitLeaderboard(_) => "init-leaderboard",
            ViewerEvent::NewTip(_) => "new-tip",
            ViewerEvent::LeaderboardUpdate(_) => "leaderboard-update",
        }
    }
}

/// What the aggregator hands over after a store mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    Aggregated(Aggregation),
    /// Reconciliation changed totals without producing new tips
    Reconciled,
}

pub type HandoffReceiver = mpsc::UnboundedReceiver<Handoff>;

#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Handoff>,
}

impl Publisher {
    pub fn channel() -> (Self, HandoffReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Never blocks; if the broadcaster has stopped the hand-off is dropped
    pub fn publish(&self, handoff: Handoff) {
        if self.tx.send(handoff).is_err() {
            tracing::debug!("broadcaster stopped; dropping hand-off");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub timed_out: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    pub send_timeout: Duration,
    pub leaderboard_size: i64,
}

pub struct Broadcaster {
    registry: SubscriptionRegistry,
    leaderboard: Arc<dyn LeaderboardStore>,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(
        registry: SubscriptionRegistry,
        leaderboard: Arc<dyn LeaderboardStore>,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            registry,
            leaderboard,
            config,
        }
    }

    /// Drains `rx` until every [`Publisher`] is gone
    pub fn spawn(self, mut rx: HandoffReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(handoff) = rx.recv().await {
                self.dispatch(handoff).await;
            }
            tracing::info!("all publishers dropped; broadcaster exiting");
        })
    }

    async fn dispatch(&self, handoff: Handoff) {
        if self.registry.is_empty() {
            return;
        }

        if let Handoff::Aggregated(aggregation) = handoff {
            self.publish(ViewerEvent::NewTip(aggregation.tip)).await;
        }

        match self.leaderboard.top_n(self.config.leaderboard_size).await {
            Ok(top) => {
                self.publish(ViewerEvent::LeaderboardUpdate(top)).await;
            }
            Err(e) => tracing::error!(error = %e, "unable to read leaderboard for broadcast"),
        }
    }

    /// Delivers `event` to every registered subscriber concurrently, each send bounded by the
    /// configured timeout. Closed subscribers are pruned.
    #[instrument(skip_all, fields(event = event.kind()))]
    pub async fn publish(&self, event: ViewerEvent) -> DeliveryReport {
        let event = Arc::new(event);
        let timeout = self.config.send_timeout;

        let mut deliveries = Vec::new();
        self.registry.for_each(|subscriber| {
            let subscriber = subscriber.clone();
            let event = event.clone();
            deliveries.push(async move { subscriber.deliver(event, timeout).await });
        });

        let mut report = DeliveryReport::default();
        for result in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e @ DeliveryError::DeliveryTimeout(_)) => {
                    tracing::warn!(error = %e, "subscriber missed event");
                    report.timed_out += 1;
                }
                Err(DeliveryError::Closed(id)) => {
                    self.registry.unregister(id);
                    report.closed += 1;
                }
            }
        }

        tracing::debug!(?report, "event published");
        report
    }
}

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::api::middleware::verify_external::WebhookKey;
use crate::api::middleware::{self as api_middleware, MiddlewareErr};
use crate::api::server::{AppState, RouteError};
use crate::db::{StoreError, Stores};
use crate::util::env::{self, EnvErr, Var};
use crate::util::telemetry;

mod aggregator;
mod api;
mod broadcast;
mod constants;
mod db;
mod query;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Middleware(#[from] MiddlewareErr),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry_registry = telemetry::Telemetry::new().await?.register();

    tracing::info!("starting tipboard server");

    let settings = env::env().await?.settings()?;
    let stores = Stores::connect(settings.backend).await?;

    let webhook_key = WebhookKey::from_env().await?;
    if webhook_key.is_none() {
        tracing::warn!("WEBHOOK_SIGNING_KEY unset; webhook signatures will not be verified");
    }
    let internal_token = var!(Var::InternalToken).await.ok().map(str::to_string);

    let (state, broadcaster) = AppState::new(stores, settings, webhook_key, internal_token);
    let reconciler = spawn_reconciler(state.clone());
    let cors = api_middleware::cors().await?;

    let served = api::server::start_server(state, cors, shutdown_signal()).await;

    if let Some(reconciler) = reconciler {
        reconciler.abort();
    }
    broadcaster.abort();

    telemetry_registry.shutdown();
    Ok(served?)
}

/// Periodically repairs tips whose leaderboard merge failed; disabled by a zero interval
fn spawn_reconciler(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let period = state.settings.reconcile_interval;
    if period == Duration::ZERO {
        tracing::info!("periodic reconciliation disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = state
                .aggregator
                .reconcile(state.settings.reconcile_grace)
                .await
            {
                tracing::error!(error = %e, "periodic reconciliation failed");
            }
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

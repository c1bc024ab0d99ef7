use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::aggregator::{Aggregator, IngestError};
use crate::api::handler::*;
use crate::api::middleware::verify_external::{WebhookKey, verify_sender_ident};
use crate::api::middleware::verify_internal::verify_internal_ident;
use crate::api::socket::viewer_socket;
use crate::broadcast::{BroadcastConfig, Broadcaster, Publisher, SubscriptionRegistry};
use crate::constants::WEBSOCKET_ROUTE;
use crate::db::Stores;
use crate::db::prelude::StoreError;
use crate::query::QueryService;
use crate::util::env::Settings;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

pub struct AppState {
    pub aggregator: Aggregator,
    pub query: QueryService,
    pub registry: SubscriptionRegistry,
    pub settings: Settings,
    pub webhook_key: Option<WebhookKey>,
    pub internal_token: Option<String>,
}

impl AppState {
    /// Wires the pipeline together and starts the broadcaster task, which runs until the state
    /// (and with it the aggregator's publisher) is dropped
    pub fn new(
        stores: Stores,
        settings: Settings,
        webhook_key: Option<WebhookKey>,
        internal_token: Option<String>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let registry = SubscriptionRegistry::new(settings.subscriber_queue_capacity);
        let (publisher, rx) = Publisher::channel();

        let broadcaster = Broadcaster::new(
            registry.clone(),
            stores.leaderboard.clone(),
            BroadcastConfig {
                send_timeout: settings.send_timeout,
                leaderboard_size: settings.leaderboard_size,
            },
        )
        .spawn(rx);

        let state = Arc::new(Self {
            aggregator: Aggregator::new(stores.clone(), publisher),
            query: QueryService::new(stores, settings.reference_offset),
            registry,
            settings,
            webhook_key,
            internal_token,
        });

        (state, broadcaster)
    }
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    //
    // provider webhook
    let external_post_routes = Router::new()
        .route("/webhook/payment", post(webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_sender_ident,
        ));

    let mut app = Router::new()
        .merge(external_post_routes)
        //
        // general
        .route("/", get(|| async { Response::new(Body::empty()) }))
        //
        // read-only views
        .route("/api/recent-tips", get(recent_tips))
        .route("/api/top-tippers", get(top_tippers))
        .route("/api/daily-stats", get(daily_stats))
        //
        // live viewers
        .route(WEBSOCKET_ROUTE, get(viewer_socket));

    if state.internal_token.is_some() {
        let internal_post_routes = Router::new()
            .route("/internal/reconcile", post(reconcile))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                verify_internal_ident,
            ));

        app = app.merge(internal_post_routes);
    }

    app.layer(
        TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched| matched.as_str());

            tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
        }),
    )
    .layer(cors)
    .layer(from_fn(log_route_errors))
    .with_state(state)
}

/// Custom error trace handler for `RouteError`-type responses
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

/// Serves until `shutdown` resolves, then lets in-flight requests finish
#[instrument(skip(state, cors, shutdown))]
pub async fn start_server<F>(
    state: Arc<AppState>,
    cors: CorsLayer,
    shutdown: F,
) -> Result<(), RouteError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = state.settings.port;
    let app = router(state, cors);

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        server_url = &format!("http://127.0.0.1:{}", listener.local_addr()?.port()),
        "server ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    IngestError(#[from] IngestError),

    #[error(transparent)]
    StoreError(#[from] StoreError),

    #[error("invalid day '{0}', expected YYYY-MM-DD")]
    InvalidDay(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message, err) = match &self {
            RouteError::IngestError(ingest_err) => match ingest_err {
                // the sender's problem, not ours
                IngestError::MalformedEvent(_) | IngestError::InvalidAmount(_) => {
                    (StatusCode::BAD_REQUEST, ingest_err.to_string(), None)
                }
                IngestError::PersistenceError(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    String::from("tip could not be recorded, retry later"),
                    Some(self),
                ),
                IngestError::PartialAggregationFailure { .. } => (
                    StatusCode::ACCEPTED,
                    String::from("tip recorded; leaderboard update pending"),
                    Some(self),
                ),
            },

            RouteError::StoreError(store_err) => match store_err {
                StoreError::SqlxError(_) | StoreError::Unavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    String::from("storage unavailable"),
                    Some(self),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    store_err.to_string(),
                    Some(self),
                ),
            },

            RouteError::InvalidDay(_) => (StatusCode::BAD_REQUEST, self.to_string(), None),

            RouteError::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                Some(self),
            ),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        if let Some(err) = err {
            response.extensions_mut().insert(Arc::new(err));
        }

        response
    }
}

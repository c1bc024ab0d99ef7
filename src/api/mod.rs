pub mod handler;
pub mod middleware;
pub mod server;
pub mod socket;

#[cfg(test)]
pub mod testing {
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use axum::Router;
    use tokio::net::TcpListener;
    use tower_http::cors::CorsLayer;

    use crate::api::middleware::verify_external::WebhookKey;
    use crate::api::server::{AppState, router};
    use crate::db::Stores;
    use crate::util::env;

    /// In-memory state with default settings and a running broadcaster
    pub fn test_state(
        webhook_key: Option<WebhookKey>,
        internal_token: Option<String>,
    ) -> Arc<AppState> {
        let settings = env::from_iter([("STORE_BACKEND".to_string(), "memory".to_string())])
            .unwrap()
            .settings()
            .unwrap();

        let (state, _broadcaster) =
            AppState::new(Stores::memory(), settings, webhook_key, internal_token);

        state
    }

    pub fn app(state: Arc<AppState>) -> Router {
        router(state, CorsLayer::permissive())
    }

    /// Binds `0.0.0.0` on an ephemeral port
    pub async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .await
            .unwrap();

        let addr = listener.local_addr().unwrap();

        (listener, addr)
    }
}

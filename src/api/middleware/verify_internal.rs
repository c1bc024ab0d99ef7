use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::api::server::AppState;
use crate::util::constant_time_cmp;

/// Gates the internal routes on `Authorization` matching `INTERNAL_TOKEN`
pub async fn verify_internal_ident(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let internal_token = state
        .internal_token
        .as_deref()
        .ok_or(StatusCode::NOT_FOUND)?;

    let authorized_header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(StatusCode::BAD_REQUEST)?
        .to_str()
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    if !constant_time_cmp(authorized_header, internal_token) {
        tracing::warn!("rejected internal request with a bad token");
        Err(StatusCode::UNAUTHORIZED)
    } else {
        Ok(next.run(req).await)
    }
}

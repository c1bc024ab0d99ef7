//! HMAC verification for the payment webhook.
//!
//! The provider signs the raw request body with the shared `WEBHOOK_SIGNING_KEY` and sends
//! `X-Tip-Signature: sha256=<hex digest>`. When no key is configured the route is open.

use core::fmt;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::{HeaderMap, StatusCode};
use ring::hmac::{self, Key};

use super::{MiddlewareErr, MiddlewareResult};
use crate::api::server::AppState;
use crate::constants::{HMAC_PREFIX, TIP_SIGNATURE_HEADER, WEBHOOK_BODY_LIMIT};
use crate::util::env::{EnvErr, Var};
use crate::var;

#[derive(Clone)]
pub struct WebhookKey(Arc<Key>);

impl WebhookKey {
    pub fn new(secret: &[u8]) -> MiddlewareResult<Self> {
        if secret.is_empty() {
            return Err(MiddlewareErr::EmptySigningKey);
        }

        Ok(Self(Arc::new(Key::new(hmac::HMAC_SHA256, secret))))
    }

    /// `None` when `WEBHOOK_SIGNING_KEY` is unset
    pub async fn from_env() -> MiddlewareResult<Option<Self>> {
        match var!(Var::WebhookSigningKey).await {
            Ok(secret) => Ok(Some(Self::new(secret.as_bytes())?)),
            Err(EnvErr::Missing(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Header value a sender would attach to `body`
    pub fn signature_for(&self, body: &[u8]) -> String {
        format!("{}{}", HMAC_PREFIX, hex::encode(hmac::sign(&self.0, body)))
    }

    /// Constant-time check of a `sha256=<hex>` header value against `body`
    pub fn verify(&self, signature: &str, body: &[u8]) -> Result<(), StatusCode> {
        let digest = signature
            .strip_prefix(HMAC_PREFIX)
            .ok_or(StatusCode::BAD_REQUEST)?;
        let tag = hex::decode(digest).map_err(|_| StatusCode::FORBIDDEN)?;

        hmac::verify(&self.0, body, &tag).map_err(|_| StatusCode::FORBIDDEN)
    }
}

impl fmt::Debug for WebhookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookKey(..)")
    }
}

pub async fn verify_sender_ident(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(key) = &state.webhook_key else {
        return Ok(next.run(req).await);
    };

    let signature = get_signature(req.headers())?.to_string();
    let body = extract_body(&mut req).await?;

    if let Err(status) = key.verify(&signature, &body) {
        tracing::error!(%status, "unable to verify webhook signature");
        return Err(status);
    }

    *req.body_mut() = Body::from(body);
    Ok(next.run(req).await)
}

async fn extract_body(request: &mut Request) -> Result<Bytes, StatusCode> {
    let body = std::mem::replace(request.body_mut(), Body::empty());
    axum::body::to_bytes(body, WEBHOOK_BODY_LIMIT)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)
}

fn get_signature(headers: &HeaderMap) -> Result<&str, StatusCode> {
    headers
        .get(TIP_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)
}

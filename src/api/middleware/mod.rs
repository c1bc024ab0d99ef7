pub mod verify_external;
pub mod verify_internal;

use http::request::Parts as ReqParts;
use http::{HeaderValue, Method};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::util::env::{EnvErr, Var};
use crate::var;

pub type MiddlewareResult<T> = core::result::Result<T, MiddlewareErr>;

#[derive(Debug, Error)]
pub enum MiddlewareErr {
    #[error(transparent)]
    EnvErr(#[from] EnvErr),

    #[error("webhook signing key must not be empty")]
    EmptySigningKey,
}

/// `CORS_ALLOW_ORIGINS` is either `*` or a host; origins on that host or any of its subdomains
/// are allowed
pub async fn cors() -> MiddlewareResult<CorsLayer> {
    let cors_allowed = var!(Var::CorsAllowOrigins).await?;
    Ok(cors_for(cors_allowed))
}

pub fn cors_for(cors_allowed: &'static str) -> CorsLayer {
    let allowed = if cors_allowed == "*" {
        AllowOrigin::any()
    } else {
        AllowOrigin::predicate(move |org: &HeaderValue, _: &ReqParts| {
            org.to_str()
                .is_ok_and(|origin| origin_matches(origin, cors_allowed))
        })
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(allowed)
}

/// Strips the scheme and port, leaving the host
fn origin_host(origin: &str) -> &str {
    let host = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    match host.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => host,
    }
}

/// `origin` is allowed when its host equals `allowed` or is a subdomain of it
fn origin_matches(origin: &str, allowed: &str) -> bool {
    let allowed = origin_host(allowed.trim()).trim_start_matches('.');
    if allowed.is_empty() {
        return false;
    }

    let host = origin_host(origin);
    if host.eq_ignore_ascii_case(allowed) {
        return true;
    }

    host.len()
        .checked_sub(allowed.len() + 1)
        .is_some_and(|dot| {
            host.as_bytes()[dot] == b'.' && host[dot + 1..].eq_ignore_ascii_case(allowed)
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_origin_matching() {
        assert!(origin_matches("https://example.com", "example.com"));
        assert!(origin_matches("https://overlay.example.com", "example.com"));
        assert!(origin_matches("http://EXAMPLE.com:8080", "example.com"));
        assert!(origin_matches("https://example.com", "https://example.com"));
        assert!(origin_matches("https://a.example.com", ".example.com"));

        assert!(!origin_matches("https://evil-example.com", "example.com"));
        assert!(!origin_matches("https://example.com.evil.net", "example.com"));
        assert!(!origin_matches("https://xample.com", "example.com"));
        assert!(!origin_matches("https://example.com", ""));
    }
}

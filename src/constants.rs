pub const HMAC_PREFIX: &str = "sha256=";
pub const TIP_SIGNATURE_HEADER: &str = "x-tip-signature";

/// Largest webhook body read for signature verification
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

pub const WEBSOCKET_ROUTE: &str = "/ws";

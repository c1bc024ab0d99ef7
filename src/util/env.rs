//! Process configuration, read once from the environment (and `.env`, when present).
//!
//! Raw values are kept as strings in [`Env`] and looked up with the [`var!`] macro; typed values
//! used by the pipeline are parsed into [`Settings`] at startup so that a bad value fails early.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);
pub async fn env() -> EnvResult<&'static Env> {
    ENV_VARS.get_or_try_init(|| async { Env::new() }).await
}

pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = env().await?;
    let value = match var {
        Var::DatabaseUrl => vars.database_url.as_ref(),
        Var::CorsAllowOrigins => Some(&vars.cors_allow_origins),
        Var::WebhookSigningKey => vars.webhook_signing_key.as_ref(),
        Var::InternalToken => vars.internal_token.as_ref(),
        Var::OtelExporterEndpoint => vars.otel_exporter_otlp_endpoint.as_ref(),
        Var::ApiServiceName => Some(&vars.api_service_name),
        Var::ApiTracerName => Some(&vars.api_tracer_name),
    };

    value
        .map(String::as_str)
        .ok_or_else(|| EnvErr::Missing(var.name()))
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    #[serde(default = "default_store_backend")]
    pub store_backend: String,
    pub database_url: Option<String>,
    #[serde(default = "default_port")]
    pub server_api_port: String,
    #[serde(default = "default_cors")]
    pub cors_allow_origins: String,
    pub webhook_signing_key: Option<String>,
    pub internal_token: Option<String>,
    #[serde(default = "default_zero")]
    pub reference_utc_offset_minutes: String,
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: String,
    #[serde(default = "default_recent_limit")]
    pub recent_tips_limit: String,
    #[serde(default = "default_send_timeout")]
    pub broadcast_send_timeout_ms: String,
    #[serde(default = "default_queue_capacity")]
    pub subscriber_queue_capacity: String,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: String,
    #[serde(default = "default_reconcile_grace")]
    pub reconcile_grace_secs: String,
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
    #[serde(default = "default_tracer_name")]
    pub api_tracer_name: String,
}

fn default_store_backend() -> String {
    String::from("postgres")
}

fn default_port() -> String {
    String::from("3000")
}

fn default_cors() -> String {
    String::from("*")
}

fn default_zero() -> String {
    String::from("0")
}

fn default_leaderboard_size() -> String {
    String::from("10")
}

fn default_recent_limit() -> String {
    String::from("10")
}

fn default_send_timeout() -> String {
    String::from("2000")
}

fn default_queue_capacity() -> String {
    String::from("64")
}

fn default_reconcile_interval() -> String {
    String::from("60")
}

fn default_reconcile_grace() -> String {
    String::from("30")
}

fn default_service_name() -> String {
    String::from("tipboard-server")
}

fn default_tracer_name() -> String {
    String::from("tipboard-tracer")
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        // a missing `.env` is fine; real deployments set variables directly
        _ = dotenvy::dotenv();
        from_iter(dotenvy::vars())
    }

    pub fn settings(&self) -> EnvResult<Settings> {
        let backend = match self.store_backend.as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => return Err(EnvErr::invalid("STORE_BACKEND", other)),
        };

        let offset_minutes: i32 = parse("REFERENCE_UTC_OFFSET_MINUTES", &self.reference_utc_offset_minutes)?;
        let reference_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                EnvErr::invalid("REFERENCE_UTC_OFFSET_MINUTES", &self.reference_utc_offset_minutes)
            })?;

        let subscriber_queue_capacity: usize =
            parse("SUBSCRIBER_QUEUE_CAPACITY", &self.subscriber_queue_capacity)?;
        if subscriber_queue_capacity == 0 {
            return Err(EnvErr::invalid("SUBSCRIBER_QUEUE_CAPACITY", "0"));
        }

        Ok(Settings {
            backend,
            port: parse("SERVER_API_PORT", &self.server_api_port)?,
            reference_offset,
            leaderboard_size: parse("LEADERBOARD_SIZE", &self.leaderboard_size)?,
            recent_tips_limit: parse("RECENT_TIPS_LIMIT", &self.recent_tips_limit)?,
            send_timeout: Duration::from_millis(parse(
                "BROADCAST_SEND_TIMEOUT_MS",
                &self.broadcast_send_timeout_ms,
            )?),
            subscriber_queue_capacity,
            reconcile_interval: Duration::from_secs(parse(
                "RECONCILE_INTERVAL_SECS",
                &self.reconcile_interval_secs,
            )?),
            reconcile_grace: Duration::from_secs(parse(
                "RECONCILE_GRACE_SECS",
                &self.reconcile_grace_secs,
            )?),
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> EnvResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| EnvErr::invalid(name, value))
}

/// Builds an [`Env`] from `(key, value)` pairs; unrecognised keys are ignored.
pub fn from_iter<Iter>(iter: Iter) -> EnvResult<Env>
where
    Iter: IntoIterator<Item = (String, String)>,
{
    let map: serde_json::Map<String, serde_json::Value> = iter
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();

    Ok(serde_json::from_value(serde_json::Value::Object(map))?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: StoreBackend,
    pub port: u16,
    pub reference_offset: FixedOffset,
    pub leaderboard_size: i64,
    pub recent_tips_limit: i64,
    pub send_timeout: Duration,
    pub subscriber_queue_capacity: usize,
    pub reconcile_interval: Duration,
    pub reconcile_grace: Duration,
}

#[derive(Debug, Clone, Copy)]
pub enum Var {
    DatabaseUrl,
    CorsAllowOrigins,
    WebhookSigningKey,
    InternalToken,
    OtelExporterEndpoint,
    ApiServiceName,
    ApiTracerName,
}

impl Var {
    pub fn name(&self) -> &'static str {
        match self {
            Var::DatabaseUrl => "DATABASE_URL",
            Var::CorsAllowOrigins => "CORS_ALLOW_ORIGINS",
            Var::WebhookSigningKey => "WEBHOOK_SIGNING_KEY",
            Var::InternalToken => "INTERNAL_TOKEN",
            Var::OtelExporterEndpoint => "OTEL_EXPORTER_OTLP_ENDPOINT",
            Var::ApiServiceName => "API_SERVICE_NAME",
            Var::ApiTracerName => "API_TRACER_NAME",
        }
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error("env deserialization error: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("missing required variable '{0}'")]
    Missing(&'static str),

    #[error("invalid value '{value}' for '{var}'")]
    Invalid { var: &'static str, value: String },
}

impl EnvErr {
    fn invalid(var: &'static str, value: &str) -> Self {
        EnvErr::Invalid {
            var,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_apply() {
        let env = from_iter(pairs(&[("PATH", "/usr/bin")])).unwrap();
        let settings = env.settings().unwrap();

        assert_eq!(settings.backend, StoreBackend::Postgres);
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.leaderboard_size, 10);
        assert_eq!(settings.send_timeout, Duration::from_millis(2000));
        assert_eq!(settings.reference_offset.local_minus_utc(), 0);
        assert!(env.database_url.is_none());
        assert_eq!(env.cors_allow_origins, "*");
    }

    #[test]
    fn test_overrides_parse() {
        let env = from_iter(pairs(&[
            ("STORE_BACKEND", "memory"),
            ("SERVER_API_PORT", "8080"),
            ("REFERENCE_UTC_OFFSET_MINUTES", "-300"),
            ("SUBSCRIBER_QUEUE_CAPACITY", "8"),
            ("INTERNAL_TOKEN", "hunter2"),
        ]))
        .unwrap();
        let settings = env.settings().unwrap();

        assert_eq!(settings.backend, StoreBackend::Memory);
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.reference_offset.local_minus_utc(), -300 * 60);
        assert_eq!(settings.subscriber_queue_capacity, 8);
        assert_eq!(env.internal_token.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_backend = from_iter(pairs(&[("STORE_BACKEND", "mongo")])).unwrap();
        assert!(matches!(
            bad_backend.settings(),
            Err(EnvErr::Invalid { var: "STORE_BACKEND", .. })
        ));

        let bad_port = from_iter(pairs(&[("SERVER_API_PORT", "not-a-port")])).unwrap();
        assert!(matches!(
            bad_port.settings(),
            Err(EnvErr::Invalid { var: "SERVER_API_PORT", .. })
        ));

        let empty_queue = from_iter(pairs(&[("SUBSCRIBER_QUEUE_CAPACITY", "0")])).unwrap();
        assert!(empty_queue.settings().is_err());

        for offset in ["1440", "-1440", "2147483647", "-40000000"] {
            let env = from_iter(pairs(&[("REFERENCE_UTC_OFFSET_MINUTES", offset)])).unwrap();
            assert!(
                matches!(
                    env.settings(),
                    Err(EnvErr::Invalid { var: "REFERENCE_UTC_OFFSET_MINUTES", .. })
                ),
                "offset {offset} should be rejected"
            );
        }
    }
}

use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::Var;
use crate::var;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

const DEFAULT_FILTER: &str = "tipboard_server=debug,tower_http=debug,axum=debug,sqlx=info,info";

#[derive(Debug, Clone)]
struct Providers {
    logger_provider: SdkLoggerProvider,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

/// Owns the tracing subscriber setup and, when a collector is configured, the OTLP providers
/// that must be flushed on shutdown.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub tracer_name: &'static str,
    pub collector_url: Option<&'static str>,

    providers: Option<Providers>,
}

impl Telemetry {
    pub async fn new() -> Result<Telemetry> {
        let tracer_name = var!(Var::ApiTracerName).await?;
        let service_name = var!(Var::ApiServiceName).await?;
        let collector_url = var!(Var::OtelExporterEndpoint).await.ok();
        let service_version = env!("CARGO_PKG_VERSION");

        let providers = match collector_url {
            Some(url) => {
                let base_resource = base_attrs(service_name, service_version);
                Some(Providers {
                    logger_provider: build_logger_provider(url, base_resource.clone())?,
                    tracer_provider: build_tracer_provider(url, base_resource.clone())?,
                    meter_provider: build_meter_provider(url, base_resource)?,
                })
            }
            None => None,
        };

        Ok(Self {
            tracer_name,
            collector_url,
            providers,
        })
    }

    pub fn register(self) -> Self {
        let (trace_layer, log_layer, meter_layer) = match &self.providers {
            Some(p) => {
                global::set_tracer_provider(p.tracer_provider.clone());
                let tracer = global::tracer(self.tracer_name);

                (
                    Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                    Some(OpenTelemetryTracingBridge::new(&p.logger_provider)),
                    Some(tracing_opentelemetry::MetricsLayer::new(
                        p.meter_provider.clone(),
                    )),
                )
            }
            None => (None, None, None),
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(log_layer)
            .with(meter_layer)
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        match self.collector_url {
            Some(url) => tracing::info!(collector_url = url, "otlp export enabled"),
            None => tracing::info!("otlp export disabled; logging to stdout only"),
        }

        self
    }

    pub fn shutdown(self) {
        let Some(p) = self.providers else {
            return;
        };

        if let Err(e) = p.meter_provider.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Err(e) = p.logger_provider.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Err(e) = p.tracer_provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

fn build_logger_provider(collector_url: &str, base_resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Logs.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_tracer_provider(collector_url: &str, base_resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Traces.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_meter_provider(collector_url: &str, base_resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Metrics.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: &'static str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name),
            KeyValue::new("service.version", version),
        ])
        .build()
}

enum Endpoint {
    Logs,
    Traces,
    Metrics,
}

impl Endpoint {
    fn to_url(&self, collector_endpoint: &str) -> String {
        let location: &str = match self {
            Endpoint::Logs => "/v1/logs",
            Endpoint::Traces => "/v1/traces",
            Endpoint::Metrics => "/v1/metrics",
        };

        format!("{}{location}", collector_endpoint.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(
            Endpoint::Traces.to_url("http://collector:4317"),
            "http://collector:4317/v1/traces"
        );
        assert_eq!(
            Endpoint::Logs.to_url("http://collector:4317/"),
            "http://collector:4317/v1/logs"
        );
    }
}

pub mod meter;

use anyhow::Context;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use serde::Deserialize;
use std::error::Error;
use std::time::Duration;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub service_name: String,
    pub logs: EnvFilterConfig,
    #[serde(default)]
    pub format: LogFormat,
    pub otlp: Option<OtlpConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvFilterConfig {
    pub default_level: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtlpConfig {
    pub url: String,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    15
}

/// Flushes exporters on drop. Keep it alive for the lifetime of the process.
#[derive(Default)]
pub struct MonitoringGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for MonitoringGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {e}");
            }
        }
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down meter provider: {e}");
            }
        }
    }
}

impl TryInto<EnvFilter> for EnvFilterConfig {
    type Error = anyhow::Error;

    fn try_into(self) -> Result<EnvFilter, Self::Error> {
        let default_level: LevelFilter = self
            .default_level
            .parse()
            .with_context(|| format!("Invalid default log level {:?}", self.default_level))?;

        Ok(EnvFilter::builder()
            .with_default_directive(default_level.into())
            .parse(self.filters.join(","))?)
    }
}

impl MonitoringConfig {
    pub fn init(&self) -> Result<MonitoringGuard, Box<dyn Error>> {
        let filter: EnvFilter = self.logs.clone().try_into()?;

        let pretty_layer = (self.format == LogFormat::Pretty).then(|| tracing_subscriber::fmt::layer());
        let json_layer = (self.format == LogFormat::Json)
            .then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));

        let Some(otlp) = &self.otlp else {
            tracing_subscriber::registry()
                .with(pretty_layer)
                .with(json_layer)
                .with(filter)
                .init();
            return Ok(MonitoringGuard::default());
        };

        let resource = Resource::builder()
            .with_attribute(KeyValue::new("service.name", self.service_name.clone()))
            .build();

        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::default());

        let tracer_provider = init_traces(resource.clone(), &otlp.url)?;
        let tracer = tracer_provider.tracer(self.service_name.clone());

        let meter_provider = init_metrics(resource, &otlp.url, Duration::from_secs(otlp.metrics_interval_secs))?;
        opentelemetry::global::set_meter_provider(meter_provider.clone());

        tracing_subscriber::registry()
            .with(pretty_layer)
            .with(json_layer)
            .with(OpenTelemetryLayer::new(tracer))
            .with(filter)
            .init();

        Ok(MonitoringGuard {
            tracer_provider: Some(tracer_provider),
            meter_provider: Some(meter_provider),
        })
    }
}

fn init_traces(resource: Resource, url: &str) -> Result<SdkTracerProvider, ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(url)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

fn init_metrics(resource: Resource, url: &str, interval: Duration) -> Result<SdkMeterProvider, ExporterBuildError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(url)
        .build()?;
    let reader = PeriodicReader::builder(exporter).with_interval(interval).build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}

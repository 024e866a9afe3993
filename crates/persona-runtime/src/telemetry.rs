//! Logging and trace export for the bot process.
//!
//! The chat driver opens one `chat_turn` span per handled message, tagged
//! with a random `turn_id` and the channel id; recall, generation and the
//! long-term write all log inside it.  This module decides where those spans
//! and events go:
//!
//! * to stderr, as compact human-readable lines or as newline-delimited JSON
//!   for log shippers;
//! * additionally to an OTLP/HTTP collector, so each mention shows up as a
//!   single trace.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Event filter, e.g. `persona_memory=debug` (default `info`). |
//! | `PERSONA_LOG_FORMAT` | `json` for JSON lines; anything else is compact. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector URL; export is off when unset. |
//!
//! The CLI calls [`init_tracing`] before it builds its Tokio runtime and
//! keeps the returned [`TelemetryGuard`] alive in `main`.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Shape of the stderr log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Parse a `PERSONA_LOG_FORMAT` value; unknown or missing means compact.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Everything [`init_tracing`] reads from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub service_name: String,
    pub filter: String,
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl TelemetrySettings {
    /// Resolve settings through `lookup`, which maps a variable name to its
    /// value.  Blank values count as unset.
    pub fn from_lookup(service_name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            service_name: service_name.to_string(),
            filter: get("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: LogFormat::from_env_value(get("PERSONA_LOG_FORMAT").as_deref()),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        }
    }

    pub fn from_env(service_name: &str) -> Self {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }
}

/// Install the global subscriber configured from the process environment.
///
/// Hold the returned guard until exit: dropping it flushes buffered spans
/// to the collector.  Calling this twice in one process panics inside
/// `tracing-subscriber`.
pub fn init_tracing(service_name: &str) -> TelemetryGuard {
    init_with(&TelemetrySettings::from_env(service_name))
}

/// Install the global subscriber from explicit settings.
pub fn init_with(settings: &TelemetrySettings) -> TelemetryGuard {
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|e| {
        eprintln!("[persona] invalid log filter {:?} ({e}); using {DEFAULT_FILTER}", settings.filter);
        EnvFilter::new(DEFAULT_FILTER)
    });

    let provider = settings
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| otlp_provider(&settings.service_name, endpoint));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(settings.service_name.clone())));

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);
    match settings.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
    }

    TelemetryGuard { provider }
}

/// Flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported to a collector.
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[persona] trace export shutdown failed: {e}");
        }
    }
}

/// Build an OTLP/HTTP provider, or `None` if the exporter cannot be created.
///
/// Uses the simple (synchronous) span processor, since no Tokio runtime
/// exists yet when the CLI sets up logging.
fn otlp_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("[persona] OTLP exporter for {endpoint} unavailable: {e}");
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(service_name.to_string()).build())
            .with_simple_exporter(exporter)
            .build(),
    )
}

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "gateway_requests_rate_limited_total",
            Unit::Count,
            "Total number of requests rejected by the per-address rate limiter."
        );
        describe_counter!(
            "gateway_auth_denied_total",
            Unit::Count,
            "Total number of requests denied by the cookie verifier."
        );
        describe_counter!(
            "gateway_fetch_failures_total",
            Unit::Count,
            "Total number of failed comment stream fetches."
        );
        describe_counter!(
            "gateway_conversions_total",
            Unit::Count,
            "Total number of conversion jobs by result (ok, error, skipped)."
        );
        describe_gauge!(
            "gateway_conversion_queue_depth",
            Unit::Count,
            "Current number of conversion jobs waiting for a worker."
        );
        describe_histogram!(
            "gateway_conversion_ms",
            Unit::Milliseconds,
            "Conversion latency on the worker pool in milliseconds."
        );
    });
}

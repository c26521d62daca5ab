use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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
            "docprint_cache_hit_total",
            Unit::Count,
            "Total number of print requests answered from a fresh cache entry."
        );
        describe_counter!(
            "docprint_cache_miss_total",
            Unit::Count,
            "Total number of cache lookups that found no usable entry."
        );
        describe_counter!(
            "docprint_cache_stale_total",
            Unit::Count,
            "Total number of cache lookups that found an entry past its TTL."
        );
        describe_counter!(
            "docprint_cache_write_failed_total",
            Unit::Count,
            "Total number of rendered PDFs that could not be persisted."
        );
        describe_counter!(
            "docprint_render_total",
            Unit::Count,
            "Total number of renderer invocations."
        );
        describe_counter!(
            "docprint_render_failed_total",
            Unit::Count,
            "Total number of renders that failed in the renderer or post-processing."
        );
        describe_counter!(
            "docprint_render_joined_total",
            Unit::Count,
            "Total number of requests that joined a render already in flight."
        );
        describe_histogram!(
            "docprint_render_ms",
            Unit::Milliseconds,
            "End-to-end render latency in milliseconds, post-processing included."
        );
    });
}

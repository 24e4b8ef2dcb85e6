use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry initialization failed: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
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
        .map_err(|err| TelemetryError(format!("failed to install tracing subscriber: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "scopa_purge_tag_total",
            Unit::Count,
            "Total number of tags purged successfully."
        );
        describe_counter!(
            "scopa_purge_fail_total",
            Unit::Count,
            "Total number of per-tag or per-URL purge failures."
        );
        describe_counter!(
            "scopa_index_record_total",
            Unit::Count,
            "Total number of URL renders recorded into the local tag index."
        );
        describe_counter!(
            "scopa_index_record_fail_total",
            Unit::Count,
            "Total number of failed local tag index record attempts."
        );
        describe_histogram!(
            "scopa_purge_ms",
            Unit::Milliseconds,
            "Purge batch latency in milliseconds."
        );
    });
}

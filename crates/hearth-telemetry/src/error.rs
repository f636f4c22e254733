//! Telemetry error type.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Failures while installing logging or operating the metrics registry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed by someone else.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Subscriber installation error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A log format name was not recognised.
    #[error("unknown log format")]
    UnknownLogFormat {
        /// Offending format name.
        value: String,
    },
    /// A collector could not be built or registered.
    #[error("failed to set up metric")]
    MetricSetup {
        /// Metric name.
        name: &'static str,
        /// Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// The text exposition could not be produced.
    #[error("failed to render metrics")]
    Render {
        /// Prometheus encoder error.
        #[source]
        source: PrometheusError,
    },
    /// The encoder produced bytes that are not UTF-8.
    #[error("rendered metrics are not utf-8")]
    RenderUtf8 {
        /// Conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn messages_stay_constant_and_keep_sources() {
        let setup = TelemetryError::MetricSetup {
            name: "hearth_events_total",
            source: PrometheusError::AlreadyReg,
        };
        assert_eq!(setup.to_string(), "failed to set up metric");
        assert!(setup.source().is_some());

        let utf8 = String::from_utf8(vec![0xff]).expect_err("invalid utf-8");
        let render = TelemetryError::RenderUtf8 { source: utf8 };
        assert_eq!(render.to_string(), "rendered metrics are not utf-8");
        assert!(render.source().is_some());

        let format = TelemetryError::UnknownLogFormat {
            value: "xml".into(),
        };
        assert_eq!(format.to_string(), "unknown log format");
        assert!(format.source().is_none());
    }
}

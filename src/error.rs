//! Error types for squall using snafu.
//!
//! This module defines the engine error taxonomy plus structured error types
//! for configuration loading.

use snafu::prelude::*;

// ============ Engine Errors ============

/// Errors produced by the pipeline engine and its operators.
///
/// This is the taxonomy that travels through diagnostics, node exit reasons,
/// and the builder's synchronous failures.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    /// An operator's declared or inferred element types do not chain.
    #[snafu(display("type mismatch: {message}"))]
    TypeMismatch { message: String },

    /// An operator or the pipeline rejected its options.
    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfiguration { message: String },

    /// An operator was combined with arguments it cannot accept.
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument { message: String },

    /// The textual pipeline or an operator argument is malformed.
    #[snafu(display("parse error: {message}"))]
    ParseError { message: String },

    /// An engine invariant was violated (concurrent pull, overflow push,
    /// empty push, double start).
    #[snafu(display("logic error: {message}"))]
    LogicError { message: String },

    /// A wrapped upstream or downstream failure.
    #[snafu(display("{message}"))]
    Unspecified { message: String },

    /// Sentinel: the underlying error was already reported as a diagnostic.
    #[snafu(display("error already reported"))]
    Silent,

    /// The peer node went away. Expected during shutdown; handled silently.
    #[snafu(display("receiver is down"))]
    ReceiverDown,
}

impl EngineError {
    /// Check whether this error was already surfaced as a diagnostic.
    pub fn is_silent(&self) -> bool {
        matches!(self, EngineError::Silent)
    }

    /// Check whether this error signals a vanished peer node.
    pub fn is_receiver_down(&self) -> bool {
        matches!(self, EngineError::ReceiverDown)
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// Verbosity level is not a known log level.
    #[snafu(display("Unknown console verbosity: {level}"))]
    UnknownVerbosity { level: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// The configured exposition address is not a socket address.
    #[snafu(display("Invalid metrics address: {address}"))]
    MetricsAddress {
        address: String,
        source: std::net::AddrParseError,
    },

    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_detection() {
        assert!(EngineError::Silent.is_silent());
        assert!(
            !EngineError::LogicError {
                message: "concurrent pull".into()
            }
            .is_silent()
        );
    }

    #[test]
    fn test_display_carries_taxonomy() {
        let err = EngineError::TypeMismatch {
            message: "`slice` expects events, got bytes".into(),
        };
        assert!(err.to_string().starts_with("type mismatch"));

        let err = EngineError::Unspecified {
            message: "upstream exited irregularly".into(),
        };
        assert_eq!(err.to_string(), "upstream exited irregularly");
    }
}

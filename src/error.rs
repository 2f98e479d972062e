//! Error taxonomy shared across subsystems.
//!
//! Each variant family maps to one failure kind an operator has to triage:
//! configuration, port binding, TLS material, upstream forwarding, and the
//! monitor's deliberate give-up signal.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::config::validation::ValidationError;

/// Malformed or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid host config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown api '{name}' requested by {host}{path}")]
    UnknownApi {
        name: String,
        host: String,
        path: String,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure to bring a listener up on a port.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("missing listen metadata: {}", .0.join(", "))]
    MissingMetadata(Vec<&'static str>),

    #[error("failed to bind port {port}: {source}")]
    Io {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("port cleanup failed for {port}: {reason}")]
    Cleanup { port: u16, reason: String },
}

/// Missing or unusable TLS material for one host.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("{host}: missing {artifact} at {path}")]
    Missing {
        host: String,
        artifact: &'static str,
        path: PathBuf,
    },

    #[error("{host}: unreadable {artifact}: {reason}")]
    Invalid {
        host: String,
        artifact: &'static str,
        reason: String,
    },

    #[error("certificate issuance failed for {host}: {reason}")]
    Issuance { host: String, reason: String },

    #[error("no valid certificate for any host on the TLS port")]
    Empty,

    #[error("tls configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Request-time forwarding failures, surfaced to the client as-is.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no route for {host}{path}")]
    NoRoute { host: String, path: String },

    #[error("upstream {target} unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("upstream {target} timed out")]
    Timeout { target: String },

    #[error("malformed upstream request: {0}")]
    Request(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute { .. } => StatusCode::NOT_FOUND,
            ProxyError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Request(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match status {
            StatusCode::NOT_FOUND => "No matching route found",
            StatusCode::BAD_GATEWAY => "Upstream request failed",
            StatusCode::GATEWAY_TIMEOUT => "Upstream request timed out",
            _ => "Bad request",
        };
        (status, body).into_response()
    }
}

/// Every monitored target is failing. Raised so a supervisor restarts the
/// deployment instead of the monitor retrying forever.
#[derive(Debug, thiserror::Error)]
#[error("all {total} monitored targets failing ({failed} in error)")]
pub struct MonitorFatal {
    pub failed: usize,
    pub total: usize,
}

/// Failure of the deploy-time smoke test.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("{action} failed for {instance}: {reason}")]
    Capability {
        action: &'static str,
        instance: String,
        reason: String,
    },

    #[error("{instance} did not become ready within {waited_secs}s")]
    NotReady { instance: String, waited_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_errors_map_to_gateway_statuses() {
        let no_route = ProxyError::NoRoute {
            host: "a.com".into(),
            path: "/x".into(),
        };
        assert_eq!(no_route.status(), StatusCode::NOT_FOUND);

        let refused = ProxyError::Unreachable {
            target: "http://localhost:1".into(),
            reason: "refused".into(),
        };
        assert_eq!(refused.status(), StatusCode::BAD_GATEWAY);

        let slow = ProxyError::Timeout {
            target: "http://localhost:1".into(),
        };
        assert_eq!(slow.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn missing_metadata_lists_every_field() {
        let err = BindError::MissingMetadata(vec!["host", "client"]);
        assert_eq!(err.to_string(), "missing listen metadata: host, client");
    }
}

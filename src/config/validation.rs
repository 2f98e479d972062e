//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check paths and replica aliases are absolute
//! - Check traffic splits line up with versions and sum to 100
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HostConfig → Result<(), Vec<ValidationError>>
//! - Ambiguous path ordering is not an error; the table builder warns instead

use crate::config::schema::HostConfig;

/// One semantic problem in a host config.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid host name '{0}'")]
    InvalidHost(String),

    #[error("{host}: path '{path}' must start with '/'")]
    RelativePath { host: String, path: String },

    #[error("{host}{path}: proxy port 0 is not bindable")]
    ZeroPort { host: String, path: String },

    #[error("{host}{path}: traffic has {traffic} entries for {versions} versions")]
    TrafficLength {
        host: String,
        path: String,
        traffic: usize,
        versions: usize,
    },

    #[error("{host}{path}: traffic sums to {sum}, expected 100")]
    TrafficSum { host: String, path: String, sum: u32 },

    #[error("{host}{path}: singleReplica set without replicas")]
    EmptyReplicaSet { host: String, path: String },

    #[error("{host}{path}: replica alias '{alias}' must start with '/'")]
    RelativeReplica {
        host: String,
        path: String,
        alias: String,
    },
}

/// Validate one deployment's host config.
pub fn validate_host_config(config: &HostConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (host, paths) in config.iter() {
        if host.is_empty() || host.contains(['/', ':', ' ']) {
            errors.push(ValidationError::InvalidHost(host.to_string()));
        }

        for (path, cfg) in paths.iter() {
            let at = || (host.to_string(), path.to_string());

            if !path.starts_with('/') {
                let (host, path) = at();
                errors.push(ValidationError::RelativePath { host, path });
            }

            if cfg.proxy_ports.contains(&0) {
                let (host, path) = at();
                errors.push(ValidationError::ZeroPort { host, path });
            }

            if !cfg.traffic.is_empty() {
                if cfg.traffic.len() != cfg.versions.len() {
                    let (host, path) = at();
                    errors.push(ValidationError::TrafficLength {
                        host,
                        path,
                        traffic: cfg.traffic.len(),
                        versions: cfg.versions.len(),
                    });
                }
                let sum: u32 = cfg.traffic.iter().sum();
                if sum != 100 {
                    let (host, path) = at();
                    errors.push(ValidationError::TrafficSum { host, path, sum });
                }
            }

            if cfg.single_replica && cfg.replicas.is_empty() {
                let (host, path) = at();
                errors.push(ValidationError::EmptyReplicaSet { host, path });
            }

            for alias in cfg.replicas.iter().filter(|a| !a.starts_with('/')) {
                let (host, path) = at();
                errors.push(ValidationError::RelativeReplica {
                    host,
                    path,
                    alias: alias.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

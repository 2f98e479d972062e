//! Configuration schema definitions.
//!
//! Two documents feed the proxy:
//! - per-deployment host configs (JSON, owned by deployment tooling), modelled
//!   by [`HostConfig`] and [`PathConfig`];
//! - the proxy's own settings (TOML), rooted at [`ProxySettings`].
//!
//! All settings fields have defaults so a minimal file only lists deployments.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ordered::OrderedMap;

/// host → path → path config, in file order.
pub type HostConfig = OrderedMap<OrderedMap<PathConfig>>;

/// Backend runtime flavour of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    #[default]
    Nodejs,
    Lampp,
    Xampp,
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Runtime::Nodejs => "nodejs",
            Runtime::Lampp => "lampp",
            Runtime::Xampp => "xampp",
        })
    }
}

/// One routed path under a host.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct PathConfig {
    /// External ports this path is reachable on (e.g. `[80, 443]`).
    pub proxy_ports: Vec<u16>,

    pub runtime: Runtime,

    /// API module names mounted by the backend instance.
    pub apis: Vec<String>,

    /// Replica aliases. Load-balanced under this path unless `single_replica`.
    pub replicas: Vec<String>,

    /// Expose each replica alias as its own path instead of balancing.
    pub single_replica: bool,

    /// Blue/green version names, one instance each.
    pub versions: Vec<String>,

    /// Per-version traffic percentages, parallel to `versions`.
    pub traffic: Vec<u32>,

    /// Allowed CORS origins for the backend instance.
    pub origins: Vec<String>,

    /// Answer with a permanent redirect to this URL instead of proxying.
    pub redirect: Option<String>,
}

impl PathConfig {
    pub fn is_single_replica(&self) -> bool {
        self.single_replica && !self.replicas.is_empty()
    }

    /// Instance variants behind this path; `None` is the plain instance.
    ///
    /// Single-replica paths expose their aliases as separate paths and are
    /// handled by the caller.
    pub fn variants(&self) -> Vec<Option<String>> {
        if !self.versions.is_empty() {
            self.versions.iter().cloned().map(Some).collect()
        } else if !self.replicas.is_empty() && !self.single_replica {
            self.replicas.iter().cloned().map(Some).collect()
        } else {
            vec![None]
        }
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    /// Port actually bound for a configured external port.
    pub fn listen_port(self, proxy_port: u16, ports: &PortSettings) -> u16 {
        match self {
            Environment::Production => proxy_port,
            Environment::Development => proxy_port.saturating_add(ports.dev_port_offset),
            Environment::Test => proxy_port.saturating_add(ports.test_port_offset),
        }
    }

    /// Port bound by proxy/dns deployments.
    pub fn canonical_port(self, ports: &PortSettings) -> u16 {
        self.listen_port(80, ports)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Test => "test",
        })
    }
}

/// A deployment whose host config takes part in port planning.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployDescriptor {
    pub id: String,

    /// Restrict this deployment to one host's replica instances.
    #[serde(default)]
    pub replica_host: Option<String>,

    /// Path to the deployment's host config JSON.
    pub config: PathBuf,
}

impl DeployDescriptor {
    /// Proxy and DNS deployments always sit on the canonical port.
    pub fn binds_canonical_port(&self) -> bool {
        self.id.contains("proxy") || self.id.contains("dns")
    }
}

/// Root settings for the proxy process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxySettings {
    pub environment: Environment,

    /// Deployments in planning order.
    #[serde(rename = "deploy")]
    pub deploys: Vec<DeployDescriptor>,

    pub listener: ListenerConfig,
    pub ports: PortSettings,
    pub tls: TlsConfig,
    pub routing: RoutingConfig,
    pub health_check: HealthCheckConfig,
    pub smoke_test: SmokeTestConfig,
    pub cleanup: CleanupConfig,
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface every port binds on.
    pub bind_ip: String,

    /// Configured external port served with TLS.
    pub tls_port: u16,

    /// Deadline for a single upstream exchange.
    pub upstream_timeout_secs: u64,

    /// Upgrade cleartext requests to HTTPS in production.
    pub ssl_redirect: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            tls_port: 443,
            upstream_timeout_secs: 30,
            ssl_redirect: true,
        }
    }
}

/// Port planning parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortSettings {
    /// First port handed to backend instances.
    pub base_port: u16,

    /// First port handed to single-replica aliases.
    pub replica_base_port: u16,

    pub dev_port_offset: u16,
    pub test_port_offset: u16,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            base_port: 3001,
            replica_base_port: 3501,
            dev_port_offset: 4000,
            test_port_offset: 5000,
        }
    }
}

/// TLS material lookup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Directory holding one sub-directory per host.
    pub cert_root: PathBuf,
    pub key_file: String,
    pub cert_file: String,
    pub ca_file: String,

    /// Issue missing certificates on the fly (development only).
    pub auto_tls: bool,

    /// Issuer argv; `{host}` and `{dir}` are substituted.
    pub issuer_command: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_root: PathBuf::from("./ssl"),
            key_file: "key.pem".to_string(),
            cert_file: "cert.pem".to_string(),
            ca_file: "ca_bundle.pem".to_string(),
            auto_tls: false,
            issuer_command: Vec::new(),
        }
    }
}

/// How weighted targets share traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    #[default]
    Random,
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RoutingConfig {
    pub split_strategy: SplitStrategy,

    /// Fixed seed for the random splitter.
    pub split_seed: Option<u64>,
}

/// Health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,

    /// Sleep between probe cycles in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 10,
        }
    }
}

/// Deploy-time smoke test budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmokeTestConfig {
    /// Minimum time before an instance may be declared ready.
    pub min_grace_secs: u64,

    /// Give up on an instance after this long.
    pub max_wait_secs: u64,

    pub poll_base_ms: u64,
    pub poll_max_ms: u64,

    /// Body substring that marks a live instance.
    pub ready_marker: String,

    /// Argv templates; `{id}`, `{host}` and `{path}` are substituted.
    pub delete_command: Vec<String>,
    pub start_command: Vec<String>,
}

impl Default for SmokeTestConfig {
    fn default() -> Self {
        Self {
            min_grace_secs: 20,
            max_wait_secs: 300,
            poll_base_ms: 1000,
            poll_max_ms: 10_000,
            ready_marker: "<title>".to_string(),
            delete_command: Vec::new(),
            start_command: Vec::new(),
        }
    }
}

/// Stale port holder cleanup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,

    /// Argv; `{port}` is substituted.
    pub command: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["fuser".to_string(), "-k".to_string(), "{port}/tcp".to_string()],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Force JSON logs on or off; defaults to on in production.
    pub json_logs: Option<bool>,

    pub metrics_enabled: bool,
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: None,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_config_reads_camel_case() {
        let cfg: PathConfig = serde_json::from_str(
            r#"{"proxyPorts": [80, 443], "runtime": "lampp", "singleReplica": true,
                "replicas": ["/r1"], "apis": ["health"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.proxy_ports, vec![80, 443]);
        assert_eq!(cfg.runtime, Runtime::Lampp);
        assert!(cfg.is_single_replica());
        assert_eq!(cfg.apis, vec!["health"]);
        assert!(cfg.origins.is_empty());
    }

    #[test]
    fn variants_prefer_versions() {
        let cfg = PathConfig {
            versions: vec!["blue".into(), "green".into()],
            replicas: vec!["/r".into()],
            ..Default::default()
        };
        assert_eq!(cfg.variants(), vec![Some("blue".into()), Some("green".into())]);
        assert_eq!(PathConfig::default().variants(), vec![None]);
    }

    #[test]
    fn listen_port_offsets_outside_production() {
        let ports = PortSettings::default();
        assert_eq!(Environment::Production.listen_port(443, &ports), 443);
        assert_eq!(Environment::Development.listen_port(80, &ports), 4080);
        assert_eq!(Environment::Test.canonical_port(&ports), 5080);
    }

    #[test]
    fn settings_default_from_empty_toml() {
        let settings: ProxySettings = toml::from_str("").unwrap();
        assert_eq!(settings.environment, Environment::Development);
        assert_eq!(settings.health_check.interval_secs, 30);
        assert_eq!(settings.health_check.timeout_secs, 10);
        assert_eq!(settings.smoke_test.min_grace_secs, 20);
        assert_eq!(settings.smoke_test.max_wait_secs, 300);
    }

    #[test]
    fn deploy_descriptors_parse() {
        let settings: ProxySettings = toml::from_str(
            r#"
            environment = "production"

            [[deploy]]
            id = "dd-proxy"
            config = "conf/dd-proxy.json"

            [[deploy]]
            id = "dd-shop"
            replicaHost = "shop.com"
            config = "conf/dd-shop.json"
            "#,
        )
        .unwrap();
        assert_eq!(settings.deploys.len(), 2);
        assert!(settings.deploys[0].binds_canonical_port());
        assert_eq!(settings.deploys[1].replica_host.as_deref(), Some("shop.com"));
    }
}

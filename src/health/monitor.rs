//! Periodic health monitor.
//!
//! # Responsibilities
//! - Every interval, probe each registered (host, path) at its local URL
//! - Keep an accumulator of failing targets and their recent errors
//! - Escalate with [`MonitorFatal`] once every target is failing
//!
//! # Design Decisions
//! - A 404 is alive: the instance answered, the route is just empty
//! - Any other answer below 500 is alive; timeouts, refusals and 5xx fail
//! - A target that answers again leaves the accumulator
//! - Cycles are skipped while the redeploy gate is held
//! - TLS targets are probed over TLS with their own host as SNI; the
//!   certificate is not verified, only the route behind it

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::sync::broadcast;

use crate::config::schema::HealthCheckConfig;
use crate::error::MonitorFatal;
use crate::health::gate::RedeployGate;
use crate::observability::metrics;
use crate::registry::{NetworkRegistration, NetworkRegistry};

/// Errors kept per target.
const MAX_ERRORS_PER_TARGET: usize = 10;

pub struct HealthMonitor {
    registry: Arc<NetworkRegistry>,
    gate: RedeployGate,
    config: HealthCheckConfig,
    client: reqwest::Client,
    failures: HashMap<String, VecDeque<String>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<NetworkRegistry>, gate: RedeployGate, config: HealthCheckConfig) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            registry,
            gate,
            config,
            client,
            failures: HashMap::new(),
        }
    }

    /// Targets currently in the accumulator.
    pub fn failing_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.failures.keys().map(String::as_str).collect();
        targets.sort_unstable();
        targets
    }

    /// Errors recorded for a target, oldest first.
    pub fn errors(&self, target: &str) -> Vec<&str> {
        self.failures
            .get(target)
            .map(|errors| errors.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Probe every registered target once.
    pub async fn check_cycle(&mut self) -> Result<(), MonitorFatal> {
        let registrations = self.registry.snapshot();
        let total = registrations.len();

        let live: Vec<String> = registrations.iter().map(target_key).collect();
        self.failures.retain(|key, _| live.contains(key));

        for registration in &registrations {
            let key = target_key(registration);
            match self.probe(registration).await {
                Ok(()) => {
                    if self.failures.remove(&key).is_some() {
                        tracing::info!(target_url = %key, "Target recovered");
                    }
                }
                Err(reason) => {
                    tracing::warn!(
                        host = %registration.host,
                        path = %registration.path,
                        port = registration.port,
                        error = %reason,
                        "Health probe failed"
                    );
                    metrics::record_probe_failure(&key);
                    let errors = self.failures.entry(key).or_default();
                    errors.push_back(reason);
                    if errors.len() > MAX_ERRORS_PER_TARGET {
                        errors.pop_front();
                    }
                }
            }
        }

        let failed = self.failures.len();
        metrics::record_failing_targets(failed);
        if total > 0 && failed >= total {
            tracing::error!(failed, total, "Every target is failing");
            return Err(MonitorFatal { failed, total });
        }
        Ok(())
    }

    async fn probe(&self, registration: &NetworkRegistration) -> Result<(), String> {
        let request = if registration.tls {
            let url = format!(
                "https://{}:{}{}",
                registration.host, registration.port, registration.path
            );
            tls_client(&registration.host, registration.port)
                .map_err(|e| e.to_string())?
                .get(url)
        } else {
            self.client
                .get(&registration.local)
                .header(reqwest::header::HOST, registration.host.as_str())
        };

        let response = request
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "timeout".to_string()
                } else {
                    e.to_string()
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || !status.is_server_error() {
            Ok(())
        } else {
            Err(format!("status {status}"))
        }
    }

    /// Loop until shutdown, or until every target fails in one cycle.
    ///
    /// A disabled monitor probes nothing but still only returns on shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), MonitorFatal> {
        if !self.config.enabled {
            tracing::info!("Health monitor disabled");
            let _ = shutdown.recv().await;
            return Ok(());
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout = self.config.timeout_secs,
            "Health monitor starting"
        );
        let interval = Duration::from_secs(self.config.interval_secs);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if self.gate.is_held() {
                        tracing::debug!("Redeploy in progress; health cycle skipped");
                        continue;
                    }
                    self.check_cycle().await?;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    return Ok(());
                }
            }
        }
    }
}

/// Client that reaches `host` on the loopback TLS listener, sending `host`
/// as SNI.
fn tls_client(host: &str, port: u16) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .resolve(host, SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .danger_accept_invalid_certs(true)
        .build()
}

fn target_key(registration: &NetworkRegistration) -> String {
    format!("{}{} ({})", registration.host, registration.path, registration.local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Runtime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn backend(status: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response =
                        format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    fn dead_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn register(registry: &NetworkRegistry, host: &str, port: u16) {
        registry.register(NetworkRegistration {
            host: host.into(),
            path: "/".into(),
            meta: "test".into(),
            client: "default".into(),
            runtime: Runtime::Nodejs,
            port,
            public_host: format!("http://{host}:{port}/"),
            local: format!("http://localhost:{port}/"),
            apis: Vec::new(),
            tls: false,
        });
    }

    fn monitor(registry: Arc<NetworkRegistry>) -> HealthMonitor {
        let config = HealthCheckConfig {
            timeout_secs: 2,
            ..Default::default()
        };
        HealthMonitor::new(registry, RedeployGate::new(), config)
    }

    #[tokio::test]
    async fn test_404_is_alive() {
        let registry = Arc::new(NetworkRegistry::new());
        register(&registry, "a.com", backend("404 Not Found").await);
        register(&registry, "b.com", backend("200 OK").await);

        let mut monitor = monitor(registry);
        for _ in 0..3 {
            assert!(monitor.check_cycle().await.is_ok());
        }
        assert!(monitor.failing_targets().is_empty());
    }

    #[tokio::test]
    async fn test_partial_outage_does_not_escalate() {
        let registry = Arc::new(NetworkRegistry::new());
        register(&registry, "a.com", dead_port());
        register(&registry, "b.com", backend("500 Internal Server Error").await);
        register(&registry, "c.com", backend("200 OK").await);

        let mut monitor = monitor(registry);
        assert!(monitor.check_cycle().await.is_ok());
        assert_eq!(monitor.failing_targets().len(), 2);
    }

    #[tokio::test]
    async fn test_escalates_when_all_fail() {
        let registry = Arc::new(NetworkRegistry::new());
        register(&registry, "a.com", dead_port());
        register(&registry, "b.com", backend("503 Service Unavailable").await);

        let mut monitor = monitor(registry);
        let fatal = monitor.check_cycle().await.unwrap_err();
        assert_eq!(fatal.failed, 2);
        assert_eq!(fatal.total, 2);
    }

    #[tokio::test]
    async fn test_skipped_while_gate_held() {
        let registry = Arc::new(NetworkRegistry::new());
        register(&registry, "a.com", dead_port());

        let gate = RedeployGate::new();
        let config = HealthCheckConfig {
            interval_secs: 0,
            timeout_secs: 1,
            enabled: true,
        };
        let monitor = HealthMonitor::new(registry, gate.clone(), config);
        let _guard = gate.hold();

        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(monitor.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_disabled_monitor_waits_for_shutdown() {
        let registry = Arc::new(NetworkRegistry::new());
        register(&registry, "a.com", dead_port());
        let config = HealthCheckConfig {
            enabled: false,
            interval_secs: 0,
            timeout_secs: 1,
        };
        let monitor = HealthMonitor::new(registry, RedeployGate::new(), config);

        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(monitor.run(rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());

        tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_error_history_is_bounded() {
        let registry = Arc::new(NetworkRegistry::new());
        register(&registry, "a.com", dead_port());
        register(&registry, "b.com", backend("200 OK").await);

        let mut monitor = monitor(registry);
        for _ in 0..MAX_ERRORS_PER_TARGET + 3 {
            assert!(monitor.check_cycle().await.is_ok());
        }
        let target = monitor.failing_targets()[0].to_string();
        assert_eq!(monitor.errors(&target).len(), MAX_ERRORS_PER_TARGET);
    }
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Load settings-named deployments, plan ports, build the routing table
//! - Assemble TLS contexts for the hosts on the TLS port
//! - Bring up the proxy listeners, then (optionally) the backend instances
//! - Start the config watcher and the health monitor
//!
//! # Data Flow
//! ```text
//! ProxySettings
//!     → load_deployments → plan_ports → build_routing_table
//!     → CertificateStore::build_sni
//!     → ProxyRuntime::start (listen controller per host/path)
//!     → InstanceServer::bring_up → DeployRunner (optional)
//!     → ConfigWatcher (table swap) + HealthMonitor
//! ```
//!
//! # Design Decisions
//! - Listeners start before the monitor so its first cycle sees a full
//!   registry
//! - A configuration error is fatal; a single failed bind is not

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::task::JoinHandle;

use crate::config::loader::load_deployments;
use crate::config::watcher::ConfigWatcher;
use crate::config::{Deployment, ProxySettings};
use crate::error::{ConfigError, MonitorFatal};
use crate::health::{CommandDeployer, DeployRunner, DeployTarget, HealthMonitor, RedeployGate};
use crate::http::ProxyRuntime;
use crate::instance::{ApiRegistry, InstanceServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{cleanup, CertIssuer, CertificateStore, CommandCertIssuer};
use crate::registry::{ListenController, NetworkRegistry};
use crate::routing::{build_routing_table, plan_ports, PortPlan, RoutingTable};

/// How long in-flight requests get once shutdown starts.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// What to bring up besides the proxy listeners.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupOptions {
    /// Serve every planned backend instance from this process.
    pub serve_instances: bool,
    /// Run the deploy smoke test once instances are up.
    pub deploy: bool,
}

/// A started proxy.
pub struct Running {
    runtime: Arc<ProxyRuntime>,
    instances: Option<InstanceServer>,
    registry: Arc<NetworkRegistry>,
    monitor: JoinHandle<Result<(), MonitorFatal>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Running {
    pub fn runtime(&self) -> &Arc<ProxyRuntime> {
        &self.runtime
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    /// Run until shutdown or a fatal monitor escalation, then drain.
    pub async fn wait(self, shutdown: &Shutdown) -> Result<(), MonitorFatal> {
        let mut signal = shutdown.subscribe();
        let outcome = tokio::select! {
            joined = self.monitor => match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Health monitor task failed");
                    Ok(())
                }
            },
            _ = signal.recv() => Ok(()),
        };

        if outcome.is_err() {
            shutdown.trigger();
        }
        self.runtime.shutdown(DRAIN_GRACE);
        if let Some(instances) = &self.instances {
            instances.shutdown(DRAIN_GRACE);
        }
        outcome
    }
}

/// Table for a deployment set.
pub fn compile(deployments: &[Deployment], settings: &ProxySettings) -> (PortPlan, RoutingTable) {
    let plan = plan_ports(deployments, settings.environment, &settings.ports);
    let table = build_routing_table(
        deployments,
        &plan,
        settings.environment,
        &settings.ports,
        &settings.routing,
    );
    (plan, table)
}

/// Smoke-test targets for every served instance.
pub fn deploy_targets(plan: &PortPlan) -> Vec<DeployTarget> {
    plan.instances()
        .iter()
        .filter(|i| !i.canonical)
        .map(|i| DeployTarget {
            id: i.deploy_id.clone(),
            host: i.key.host.clone(),
            path: i.key.path.clone(),
            url: format!("http://127.0.0.1:{}{}", i.port, i.key.path),
        })
        .collect()
}

/// Bring the whole proxy up.
pub async fn start(
    settings: ProxySettings,
    options: StartupOptions,
    shutdown: &Shutdown,
) -> Result<Running, ConfigError> {
    let bind_ip: IpAddr = settings
        .listener
        .bind_ip
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            field: "listener.bind_ip",
            reason: e.to_string(),
        })?;

    let deployments = load_deployments(&settings);
    if deployments.is_empty() {
        tracing::warn!("No deployment loaded; the proxy will answer 404 everywhere");
    }
    let (plan, table) = compile(&deployments, &settings);
    tracing::info!(
        environment = %settings.environment,
        deployments = deployments.len(),
        instances = plan.len(),
        ports = table.ports().count(),
        "Routing table built"
    );

    let registry = Arc::new(NetworkRegistry::new());
    let killer = Arc::from(cleanup::from_config(&settings.cleanup));
    let controller = Arc::new(ListenController::new(registry.clone(), killer, bind_ip));
    controller.begin_cycle();

    let mut runtime = ProxyRuntime::new(&settings, table, controller.clone());

    let store = CertificateStore::new(settings.tls.clone());
    let issuer = (!settings.tls.issuer_command.is_empty())
        .then(|| CommandCertIssuer::new(settings.tls.issuer_command.clone()));
    let sni = store
        .build_sni(
            &runtime.tls_hosts(),
            settings.environment,
            issuer.as_ref().map(|i| i as &dyn CertIssuer),
        )
        .await;

    let bound = runtime.start(&sni).await.to_vec();
    tracing::info!(ports = ?bound, "Proxy listeners up");
    let runtime = Arc::new(runtime);

    let gate = RedeployGate::new();
    let instances = if options.serve_instances {
        let mut server = InstanceServer::new(controller.clone(), ApiRegistry::builtin());
        server.bring_up(&deployments, &plan).await?;
        Some(server)
    } else {
        None
    };

    if options.deploy {
        let runner = DeployRunner::new(
            Arc::new(CommandDeployer::new(&settings.smoke_test)),
            gate.clone(),
            settings.smoke_test.clone(),
        );
        let report = runner.run(&deploy_targets(&plan)).await;
        tracing::info!(
            passed = report.passed.len(),
            failed = report.failed.len(),
            "Deploy smoke test finished"
        );
    }

    let watcher = spawn_reloader(&settings, runtime.clone(), shutdown);

    let monitor = HealthMonitor::new(registry.clone(), gate, settings.health_check.clone());
    let monitor = tokio::spawn(monitor.run(shutdown.subscribe()));

    Ok(Running {
        runtime,
        instances,
        registry,
        monitor,
        _watcher: watcher,
    })
}

fn spawn_reloader(
    settings: &ProxySettings,
    runtime: Arc<ProxyRuntime>,
    shutdown: &Shutdown,
) -> Option<RecommendedWatcher> {
    let (watcher, mut updates) = ConfigWatcher::new(settings.clone());
    let watcher = match watcher.run() {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable; hot reload disabled");
            return None;
        }
    };

    let settings = settings.clone();
    let mut signal = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(deployments) = updates.recv() => {
                    let (_, table) = compile(&deployments, &settings);
                    runtime.swap_table(table);
                }
                _ = signal.recv() => break,
                else => break,
            }
        }
    });
    Some(watcher)
}

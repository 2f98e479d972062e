//! Deploy-time smoke test.
//!
//! # Responsibilities
//! - Delete then start each instance through the [`InstanceDeployer`]
//! - Poll the instance until its landing page carries the ready marker
//! - Give a failing instance exactly one more delete/start/poll cycle
//!
//! # Design Decisions
//! - Success is never declared before the minimum grace period
//! - The budget here (grace floor, overall cap) is unrelated to the health
//!   monitor's per-probe timeout
//! - The redeploy gate is held for the whole run

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::schema::SmokeTestConfig;
use crate::error::DeployError;
use crate::health::gate::RedeployGate;
use crate::process;
use crate::resilience::Backoff;

/// One backend instance to (re)deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub id: String,
    pub host: String,
    pub path: String,
    /// URL the smoke test polls.
    pub url: String,
}

impl std::fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{} [{}]", self.host, self.path, self.id)
    }
}

/// Lifecycle control of backend instances.
#[async_trait]
pub trait InstanceDeployer: Send + Sync {
    async fn delete(&self, target: &DeployTarget) -> Result<(), DeployError>;
    async fn start(&self, target: &DeployTarget) -> Result<(), DeployError>;
}

/// Runs configured argv templates with `{id}`, `{host}` and `{path}`.
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    delete_command: Vec<String>,
    start_command: Vec<String>,
}

impl CommandDeployer {
    pub fn new(config: &SmokeTestConfig) -> Self {
        Self {
            delete_command: config.delete_command.clone(),
            start_command: config.start_command.clone(),
        }
    }

    async fn invoke(&self, action: &'static str, template: &[String], target: &DeployTarget) -> Result<(), DeployError> {
        if template.is_empty() {
            tracing::debug!(instance = %target, action, "No command configured");
            return Ok(());
        }
        let argv = process::render(
            template,
            &[("id", target.id.as_str()), ("host", target.host.as_str()), ("path", target.path.as_str())],
        );
        let capability = |reason: String| DeployError::Capability {
            action,
            instance: target.to_string(),
            reason,
        };
        let status = process::run(&argv).await.map_err(|e| capability(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(capability(format!("exited with {status}")))
        }
    }
}

#[async_trait]
impl InstanceDeployer for CommandDeployer {
    async fn delete(&self, target: &DeployTarget) -> Result<(), DeployError> {
        self.invoke("delete", &self.delete_command, target).await
    }

    async fn start(&self, target: &DeployTarget) -> Result<(), DeployError> {
        self.invoke("start", &self.start_command, target).await
    }
}

/// Outcome of a deploy run.
#[derive(Debug, Default)]
pub struct DeployReport {
    pub passed: Vec<DeployTarget>,
    pub failed: Vec<(DeployTarget, DeployError)>,
}

impl DeployReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct DeployRunner {
    deployer: Arc<dyn InstanceDeployer>,
    gate: RedeployGate,
    config: SmokeTestConfig,
    client: reqwest::Client,
}

impl DeployRunner {
    pub fn new(deployer: Arc<dyn InstanceDeployer>, gate: RedeployGate, config: SmokeTestConfig) -> Self {
        Self {
            deployer,
            gate,
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Redeploy and smoke test every target, in order.
    pub async fn run(&self, targets: &[DeployTarget]) -> DeployReport {
        let _guard = self.gate.hold();
        let mut report = DeployReport::default();

        for target in targets {
            let outcome = match self.deploy_once(target).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::warn!(instance = %target, error = %e, "Instance failed smoke test; retrying once");
                    self.deploy_once(target).await
                }
            };
            match outcome {
                Ok(()) => {
                    tracing::info!(instance = %target, "Instance passed smoke test");
                    report.passed.push(target.clone());
                }
                Err(e) => {
                    tracing::error!(instance = %target, error = %e, "Instance failed smoke test");
                    report.failed.push((target.clone(), e));
                }
            }
        }
        report
    }

    async fn deploy_once(&self, target: &DeployTarget) -> Result<(), DeployError> {
        self.deployer.delete(target).await?;
        self.deployer.start(target).await?;
        self.smoke_test(target).await
    }

    /// Poll `target` until it serves the ready marker, within the budget.
    pub async fn smoke_test(&self, target: &DeployTarget) -> Result<(), DeployError> {
        let started = Instant::now();
        let grace = Duration::from_secs(self.config.min_grace_secs);
        let budget = Duration::from_secs(self.config.max_wait_secs);
        let backoff = Backoff::new(
            Duration::from_millis(self.config.poll_base_ms),
            Duration::from_millis(self.config.poll_max_ms),
        );
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let ready = self.is_ready(target).await;
            let elapsed = started.elapsed();

            if ready && elapsed >= grace {
                return Ok(());
            }
            if elapsed >= budget {
                return Err(DeployError::NotReady {
                    instance: target.to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }

            let remaining = budget - elapsed;
            let delay = if ready {
                // alive but still inside the grace period
                (grace - elapsed).min(remaining)
            } else {
                backoff.delay(attempt, remaining)
            };
            tracing::debug!(instance = %target, attempt, ready, delay_ms = delay.as_millis() as u64, "Waiting on instance");
            tokio::time::sleep(delay).await;
        }
    }

    async fn is_ready(&self, target: &DeployTarget) -> bool {
        let response = self
            .client
            .get(&target.url)
            .header(reqwest::header::HOST, target.host.as_str())
            .timeout(Duration::from_millis(self.config.poll_max_ms.max(1000)))
            .send()
            .await;
        match response {
            Ok(response) => response
                .text()
                .await
                .map(|body| body.contains(&self.config.ready_marker))
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

//! Deterministic backend port assignment.
//!
//! # Responsibilities
//! - Give every (host, path, variant) instance a backend port
//! - Pin proxy/dns deployments to the canonical environment port
//! - Keep single-replica aliases on their own counter
//!
//! # Design Decisions
//! - Pure function of deployments, environment and port settings, so a
//!   restart with an unchanged config never reshuffles ports
//! - Iteration follows config-file order (see `config::ordered`)

use std::collections::BTreeMap;
use std::fmt;

use crate::config::{Deployment, Environment, PortSettings};

/// Identifies one backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub host: String,
    pub path: String,
    /// Version name or load-balanced replica alias.
    pub variant: Option<String>,
}

impl InstanceKey {
    pub fn new(host: impl Into<String>, path: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            variant,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)?;
        if let Some(variant) = &self.variant {
            write!(f, "@{variant}")?;
        }
        Ok(())
    }
}

/// One planned instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInstance {
    pub deploy_id: String,
    pub key: InstanceKey,
    /// Path of the config entry this instance came from. Differs from
    /// `key.path` for single-replica aliases.
    pub source_path: String,
    pub port: u16,
    /// Bound to the canonical proxy port.
    pub canonical: bool,
}

/// Port assignment for every instance of every deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPlan {
    environment: Environment,
    instances: Vec<PlannedInstance>,
    index: BTreeMap<InstanceKey, usize>,
}

impl PortPlan {
    fn new(environment: Environment) -> Self {
        Self {
            environment,
            instances: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    fn push(&mut self, instance: PlannedInstance) {
        if self.index.contains_key(&instance.key) {
            tracing::warn!(instance = %instance.key, deploy_id = %instance.deploy_id, "Instance planned twice; keeping first assignment");
            return;
        }
        self.index.insert(instance.key.clone(), self.instances.len());
        self.instances.push(instance);
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn port(&self, key: &InstanceKey) -> Option<u16> {
        self.get(key).map(|i| i.port)
    }

    pub fn get(&self, key: &InstanceKey) -> Option<&PlannedInstance> {
        self.index.get(key).map(|&i| &self.instances[i])
    }

    /// Instances in planning order.
    pub fn instances(&self) -> &[PlannedInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Assign ports to every instance.
pub fn plan_ports(deployments: &[Deployment], environment: Environment, ports: &PortSettings) -> PortPlan {
    let mut plan = PortPlan::new(environment);
    let canonical_port = environment.canonical_port(ports);
    let mut main = ports.base_port;
    let mut replica = ports.replica_base_port;

    for deployment in deployments {
        let descriptor = &deployment.descriptor;
        let canonical = descriptor.binds_canonical_port();

        for (host, paths) in deployment.hosts.iter() {
            if let Some(only) = &descriptor.replica_host {
                if only != host {
                    continue;
                }
            }

            if canonical {
                for (path, cfg) in paths.iter() {
                    for variant in cfg.variants() {
                        plan.push(PlannedInstance {
                            deploy_id: descriptor.id.clone(),
                            key: InstanceKey::new(host, path, variant),
                            source_path: path.to_string(),
                            port: canonical_port,
                            canonical: true,
                        });
                    }
                }
                continue;
            }

            let mut offset: u16 = 0;
            let mut extra_variants: u16 = 0;
            let mut single_replica_paths: u16 = 0;

            for (path, cfg) in paths.iter() {
                if cfg.is_single_replica() {
                    single_replica_paths += 1;
                    for alias in &cfg.replicas {
                        plan.push(PlannedInstance {
                            deploy_id: descriptor.id.clone(),
                            key: InstanceKey::new(host, alias, None),
                            source_path: path.to_string(),
                            port: replica,
                            canonical: false,
                        });
                        replica = replica.saturating_add(1);
                    }
                    continue;
                }

                let variants = cfg.variants();
                extra_variants += variants.len() as u16 - 1;
                for variant in variants {
                    plan.push(PlannedInstance {
                        deploy_id: descriptor.id.clone(),
                        key: InstanceKey::new(host, path, variant),
                        source_path: path.to_string(),
                        port: main.saturating_add(offset),
                        canonical: false,
                    });
                    offset += 1;
                }
            }

            // Single-replica paths count toward the host's span but were
            // served from the replica counter.
            let span = paths.len() as u16 + extra_variants - single_replica_paths;
            debug_assert_eq!(span, offset);
            main = main.saturating_add(span);
        }
    }

    tracing::debug!(
        environment = %environment,
        instances = plan.len(),
        next_port = main,
        next_replica_port = replica,
        "Ports planned"
    );
    plan
}

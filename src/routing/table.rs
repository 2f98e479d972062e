//! Routing table construction and lookup.
//!
//! # Responsibilities
//! - Group (host, path) entries under every listen port they are exposed on
//! - Order each host's paths longest first
//! - Expand versions and replicas into weighted targets
//!
//! # Design Decisions
//! - Immutable after construction; reloads build a fresh table
//! - O(1) host lookup via HashMap, O(n) path prefix scan per host
//! - Nothing is fatal at build time: ambiguity and unplanned instances are
//!   logged and the rest of the table is kept

use std::collections::{BTreeMap, HashMap};

use url::Url;

use crate::config::schema::RoutingConfig;
use crate::config::{Deployment, Environment, PathConfig, PortSettings};
use crate::load_balancer::{even_weights, splitter, Single, TrafficSplit};
use crate::routing::matcher::{normalize_host, path_matches};
use crate::routing::ports::{InstanceKey, PortPlan};

/// One concrete backend behind a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: Url,
    pub weight: u32,
}

/// A path under one host on one listen port.
#[derive(Debug)]
pub struct PathRoute {
    pub path: String,
    pub targets: Vec<Target>,
    /// Permanent redirect destination; such routes have no targets.
    pub redirect: Option<String>,
    splitter: Box<dyn TrafficSplit>,
}

impl PathRoute {
    fn proxied(path: impl Into<String>, targets: Vec<Target>, routing: &RoutingConfig) -> Self {
        let weights: Vec<u32> = targets.iter().map(|t| t.weight).collect();
        Self {
            path: path.into(),
            splitter: splitter(&weights, routing.split_strategy, routing.split_seed),
            targets,
            redirect: None,
        }
    }

    fn redirect(path: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            targets: Vec::new(),
            redirect: Some(location.into()),
            splitter: Box::new(Single),
        }
    }

    /// Target for the next request.
    pub fn pick(&self) -> Option<&Target> {
        match self.targets.len() {
            0 => None,
            1 => self.targets.first(),
            n => self.targets.get(self.splitter.next_index().min(n - 1)),
        }
    }
}

/// Flattened view of one routed target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    pub port: u16,
    pub host: String,
    pub path: String,
    pub target: Url,
    pub weight: u32,
}

/// Hosts served on one listen port.
#[derive(Debug, Default)]
pub struct PortTable {
    hosts: HashMap<String, Vec<PathRoute>>,
}

impl PortTable {
    /// Paths of a host, longest first.
    pub fn routes(&self, host: &str) -> Option<&[PathRoute]> {
        self.hosts.get(host).map(Vec::as_slice)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }
}

/// Listen port → host → ordered path routes.
#[derive(Debug, Default)]
pub struct RoutingTable {
    ports: BTreeMap<u16, PortTable>,
}

impl RoutingTable {
    /// Distinct listen ports, ascending.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.keys().copied()
    }

    pub fn port(&self, port: u16) -> Option<&PortTable> {
        self.ports.get(&port)
    }

    /// Route for a request arriving on `port`.
    pub fn resolve(&self, port: u16, host_header: &str, path: &str) -> Option<&PathRoute> {
        let host = normalize_host(host_header);
        self.ports
            .get(&port)?
            .routes(&host)?
            .iter()
            .find(|route| path_matches(&route.path, path))
    }

    /// Every proxied target, by port then host then path order.
    pub fn entries(&self) -> Vec<RoutingEntry> {
        let mut entries = Vec::new();
        for (&port, table) in &self.ports {
            let mut hosts: Vec<_> = table.hosts.iter().collect();
            hosts.sort_by(|a, b| a.0.cmp(b.0));
            for (host, routes) in hosts {
                for route in routes {
                    for target in &route.targets {
                        entries.push(RoutingEntry {
                            port,
                            host: host.clone(),
                            path: route.path.clone(),
                            target: target.url.clone(),
                            weight: target.weight,
                        });
                    }
                }
            }
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

fn local_target(port: u16) -> Option<Url> {
    Url::parse(&format!("http://127.0.0.1:{port}")).ok()
}

fn weighted_targets(
    host: &str,
    path: &str,
    cfg: &PathConfig,
    plan: &PortPlan,
) -> Vec<Target> {
    let variants = cfg.variants();
    let weights = if !cfg.versions.is_empty() && cfg.traffic.len() == cfg.versions.len() {
        cfg.traffic.clone()
    } else {
        even_weights(variants.len())
    };

    variants
        .into_iter()
        .zip(weights)
        .filter_map(|(variant, weight)| {
            let key = InstanceKey::new(host, path, variant);
            match plan.port(&key).and_then(local_target) {
                Some(url) => Some(Target { url, weight }),
                None => {
                    tracing::warn!(instance = %key, "Instance has no planned port; target skipped");
                    None
                }
            }
        })
        .collect()
}

fn build_routes(host: &str, path: &str, cfg: &PathConfig, plan: &PortPlan, routing: &RoutingConfig) -> Vec<PathRoute> {
    if let Some(location) = &cfg.redirect {
        return vec![PathRoute::redirect(path, location.clone())];
    }

    if cfg.is_single_replica() {
        return cfg
            .replicas
            .iter()
            .filter_map(|alias| {
                let key = InstanceKey::new(host, alias, None);
                let url = plan.port(&key).and_then(local_target)?;
                Some(PathRoute::proxied(alias.clone(), vec![Target { url, weight: 100 }], routing))
            })
            .collect();
    }

    let targets = weighted_targets(host, path, cfg, plan);
    if targets.is_empty() {
        tracing::error!(host = %host, path = %path, "No routable target; path left out of the table");
        return Vec::new();
    }
    vec![PathRoute::proxied(path, targets, routing)]
}

/// Build the per-port routing table from the deployments and their planned
/// ports.
pub fn build_routing_table(
    deployments: &[Deployment],
    plan: &PortPlan,
    environment: Environment,
    ports: &PortSettings,
    routing: &RoutingConfig,
) -> RoutingTable {
    let mut table: BTreeMap<u16, PortTable> = BTreeMap::new();

    for deployment in deployments {
        if deployment.descriptor.binds_canonical_port() {
            tracing::debug!(deploy_id = %deployment.descriptor.id, "Canonical deployment is not a proxy target");
            continue;
        }

        for (host, paths) in deployment.hosts.iter() {
            let host_key = host.to_ascii_lowercase();
            for (path, cfg) in paths.iter() {
                for &proxy_port in &cfg.proxy_ports {
                    let listen_port = environment.listen_port(proxy_port, ports);
                    let routes = build_routes(host, path, cfg, plan, routing);
                    table
                        .entry(listen_port)
                        .or_default()
                        .hosts
                        .entry(host_key.clone())
                        .or_default()
                        .extend(routes);
                }
            }
        }
    }

    for (port, port_table) in table.iter_mut() {
        for (host, routes) in port_table.hosts.iter_mut() {
            // stable: equal lengths keep insertion order
            routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
            for pair in routes.windows(2) {
                if pair[0].path.len() == pair[1].path.len() {
                    tracing::warn!(
                        port = *port,
                        host = %host,
                        first = %pair[0].path,
                        second = %pair[1].path,
                        "Paths tie in length; first configured wins"
                    );
                }
            }
        }
    }

    tracing::info!(ports = ?table.keys().collect::<Vec<_>>(), "Routing table built");
    RoutingTable { ports: table }
}

//! Host config watcher for hot reload of the routing table.

use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_all_deployments, Deployment};
use crate::config::schema::ProxySettings;

/// Reload every deployment, or nothing.
///
/// A set with a broken deployment is dropped whole so the current table
/// keeps serving with its port assignment intact.
pub fn reload(settings: &ProxySettings) -> Option<Vec<Deployment>> {
    match load_all_deployments(settings) {
        Ok(deployments) if deployments.is_empty() => {
            tracing::error!("No deployment configured after change; keeping current routing table");
            None
        }
        Ok(deployments) => Some(deployments),
        Err(e) => {
            tracing::error!(error = %e, "Host config reload rejected; keeping current routing table");
            None
        }
    }
}

/// Watches every deployment's host config file.
pub struct ConfigWatcher {
    settings: ProxySettings,
    update_tx: mpsc::UnboundedSender<Vec<Deployment>>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for reloaded deployment sets.
    pub fn new(settings: ProxySettings) -> (Self, mpsc::UnboundedReceiver<Vec<Deployment>>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (Self { settings, update_tx }, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let settings = self.settings.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(paths = ?event.paths, "Host config change detected, reloading");
                        if let Some(deployments) = reload(&settings) {
                            let _ = tx.send(deployments);
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for deploy in &self.settings.deploys {
            watcher.watch(&deploy.config, RecursiveMode::NonRecursive)?;
            tracing::info!(deploy_id = %deploy.id, path = ?deploy.config, "Watching host config");
        }

        Ok(watcher)
    }
}

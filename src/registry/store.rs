//! Process-wide record of bound (host, path) instances.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::Runtime;

/// Runtime metadata of one live (host, path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRegistration {
    pub host: String,
    pub path: String,
    pub meta: String,
    pub client: String,
    pub runtime: Runtime,
    pub port: u16,
    pub public_host: String,
    pub local: String,
    pub apis: Vec<String>,
    /// Reached over TLS; `local` is an `https` URL.
    pub tls: bool,
}

/// host → path → registration.
///
/// Readers are free-threaded; the only writer is the listen controller.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    entries: DashMap<String, BTreeMap<String, NetworkRegistration>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration. The first registration of a (host, path) in a
    /// cycle stays; later ones are refused.
    pub(crate) fn register(&self, registration: NetworkRegistration) -> bool {
        let mut paths = self.entries.entry(registration.host.clone()).or_default();
        if paths.contains_key(&registration.path) {
            return false;
        }
        paths.insert(registration.path.clone(), registration);
        true
    }

    /// Drop every registration ahead of a fresh bring-up.
    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub fn get(&self, host: &str, path: &str) -> Option<NetworkRegistration> {
        self.entries.get(host)?.get(path).cloned()
    }

    pub fn contains(&self, host: &str, path: &str) -> bool {
        self.entries
            .get(host)
            .is_some_and(|paths| paths.contains_key(path))
    }

    /// All registrations, ordered by host then path.
    pub fn snapshot(&self) -> Vec<NetworkRegistration> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by(|a, b| (&a.host, &a.path).cmp(&(&b.host, &b.path)));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(host: &str, path: &str, port: u16) -> NetworkRegistration {
        NetworkRegistration {
            host: host.into(),
            path: path.into(),
            meta: "test".into(),
            client: "default".into(),
            runtime: Runtime::Nodejs,
            port,
            public_host: format!("http://{host}{path}"),
            local: format!("http://localhost:{port}{path}"),
            apis: Vec::new(),
            tls: false,
        }
    }

    #[test]
    fn first_registration_wins() {
        let registry = NetworkRegistry::new();
        assert!(registry.register(registration("a.com", "/", 80)));
        assert!(!registry.register(registration("a.com", "/", 443)));
        assert_eq!(registry.get("a.com", "/").unwrap().port, 80);
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = NetworkRegistry::new();
        registry.register(registration("b.com", "/", 80));
        registry.register(registration("a.com", "/z", 80));
        registry.register(registration("a.com", "/", 80));

        let order: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| format!("{}{}", r.host, r.path))
            .collect();
        assert_eq!(order, vec!["a.com/", "a.com/z", "b.com/"]);
        assert_eq!(registry.len(), 3);

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("a.com", "/"));
    }
}

//! Per-API routers, resolved by name.
//!
//! A path's `apis` list names routers from a fixed table built at startup;
//! an unknown name is a configuration error, not a runtime lookup miss.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::ConfigError;
use crate::registry::{NetworkRegistration, NetworkRegistry};

/// What an API router gets to see about the instance mounting it.
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub host: String,
    pub path: String,
    pub registry: Arc<NetworkRegistry>,
}

pub type ApiConstructor = fn(&ApiContext) -> Router;

/// Name → router constructor.
#[derive(Clone)]
pub struct ApiRegistry {
    constructors: BTreeMap<&'static str, ApiConstructor>,
}

impl std::fmt::Debug for ApiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

impl Default for ApiRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ApiRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the `health` and `network` APIs.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("health", health_api);
        registry.register("network", network_api);
        registry
    }

    pub fn register(&mut self, name: &'static str, constructor: ApiConstructor) {
        self.constructors.insert(name, constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    /// Look up every requested API for one (host, path).
    pub fn resolve(
        &self,
        names: &[String],
        host: &str,
        path: &str,
    ) -> Result<Vec<(String, ApiConstructor)>, ConfigError> {
        names
            .iter()
            .map(|name| {
                self.constructors
                    .get(name.as_str())
                    .map(|&constructor| (name.clone(), constructor))
                    .ok_or_else(|| ConfigError::UnknownApi {
                        name: name.clone(),
                        host: host.to_string(),
                        path: path.to_string(),
                    })
            })
            .collect()
    }
}

fn health_api(ctx: &ApiContext) -> Router {
    let body = health_status(&ctx.host, &ctx.path);
    Router::new().route("/", get(move || async move { Json(body) }))
}

async fn network_snapshot(State(registry): State<Arc<NetworkRegistry>>) -> Json<Vec<NetworkRegistration>> {
    Json(registry.snapshot())
}

fn network_api(ctx: &ApiContext) -> Router {
    Router::new()
        .route("/", get(network_snapshot))
        .with_state(ctx.registry.clone())
}

/// Body served by the `health` API.
pub fn health_status(host: &str, path: &str) -> Value {
    json!({ "status": "ok", "host": host, "path": path })
}

//! Backend instance host.
//!
//! # Responsibilities
//! - Serve every planned non-proxy instance on its own backend port
//! - Landing page carrying `<title>{host}</title>`, which the smoke test
//!   looks for
//! - Mount the path's APIs under `{path}/api/{name}` with its CORS origins
//! - Register each instance through the listen controller
//!
//! # Design Decisions
//! - API names are resolved before anything binds, so a typo fails startup
//!   instead of leaving a half-served host

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use axum_server::Handle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::{Deployment, PathConfig};
use crate::error::ConfigError;
use crate::instance::api::{ApiConstructor, ApiContext, ApiRegistry};
use crate::registry::{ListenController, ListenMetadata, PortServer};
use crate::routing::ports::{PlannedInstance, PortPlan};

/// One instance ready to bind.
struct Prepared<'a> {
    instance: &'a PlannedInstance,
    config: &'a PathConfig,
    apis: Vec<(String, ApiConstructor)>,
}

pub struct InstanceServer {
    controller: Arc<ListenController>,
    apis: ApiRegistry,
    handles: Vec<Handle>,
}

impl InstanceServer {
    pub fn new(controller: Arc<ListenController>, apis: ApiRegistry) -> Self {
        Self {
            controller,
            apis,
            handles: Vec::new(),
        }
    }

    /// Bind and serve every non-canonical instance of the plan.
    ///
    /// Returns the instances that came up. An unknown API name fails the
    /// whole bring-up before any port is touched.
    pub async fn bring_up(
        &mut self,
        deployments: &[Deployment],
        plan: &PortPlan,
    ) -> Result<Vec<PlannedInstance>, ConfigError> {
        let mut prepared = Vec::new();
        for instance in plan.instances().iter().filter(|i| !i.canonical) {
            let Some(config) = path_config(deployments, instance) else {
                tracing::warn!(instance = %instance.key, "Planned instance has no config entry");
                continue;
            };
            let apis = self
                .apis
                .resolve(&config.apis, &instance.key.host, &instance.key.path)?;
            prepared.push(Prepared {
                instance,
                config,
                apis,
            });
        }

        let mut live = Vec::new();
        for Prepared {
            instance,
            config,
            apis,
        } in prepared
        {
            let key = &instance.key;
            let metadata = ListenMetadata {
                host: Some(key.host.clone()),
                path: Some(key.path.clone()),
                client: Some(instance.deploy_id.clone()),
                runtime: Some(config.runtime),
                meta: Some(key.variant.clone().unwrap_or_else(|| "main".to_string())),
                apis: config.apis.clone(),
                tls: false,
            };

            let mut server = PortServer::new();
            if !self
                .controller
                .listen_port(&mut server, instance.port, &metadata)
                .await
            {
                continue;
            }
            let Some(listener) = server.take_listener() else { continue };

            let context = ApiContext {
                host: key.host.clone(),
                path: key.path.clone(),
                registry: self.controller.registry().clone(),
            };
            let app = instance_router(&context, config, &apis);
            let handle = Handle::new();
            let server = axum_server::from_tcp(listener).handle(handle.clone());
            let port = instance.port;
            tokio::spawn(async move {
                if let Err(e) = server
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
                {
                    tracing::error!(port, error = %e, "Instance server stopped");
                }
            });

            self.handles.push(handle);
            live.push(instance.clone());
        }

        tracing::info!(instances = live.len(), "Instances serving");
        Ok(live)
    }

    pub fn shutdown(&self, grace: Duration) {
        for handle in &self.handles {
            handle.graceful_shutdown(Some(grace));
        }
    }
}

fn path_config<'a>(deployments: &'a [Deployment], instance: &PlannedInstance) -> Option<&'a PathConfig> {
    deployments
        .iter()
        .find(|d| d.descriptor.id == instance.deploy_id)?
        .hosts
        .get(&instance.key.host)?
        .get(&instance.source_path)
}

fn landing_page(host: &str, path: &str, runtime: &str) -> String {
    format!(
        "<!doctype html><html><head><title>{host}</title></head>\
         <body><h1>{host}{path}</h1><p>{runtime}</p></body></html>"
    )
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    Some(layer.allow_origin(AllowOrigin::list(allowed)))
}

/// Router of one instance: landing page plus its APIs.
pub fn instance_router(context: &ApiContext, config: &PathConfig, apis: &[(String, ApiConstructor)]) -> Router {
    let page = landing_page(&context.host, &context.path, &config.runtime.to_string());
    let base = context.path.trim_end_matches('/');

    let landing = get(move || async move { Html(page) });
    let mut router = Router::new().route(&context.path, landing.clone());
    if !base.is_empty() {
        router = router.route(&format!("{base}/"), landing);
    }

    for (name, constructor) in apis {
        router = router.nest(&format!("{base}/api/{name}"), constructor(context));
    }

    match cors_layer(&config.origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

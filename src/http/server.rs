//! Proxy runtime: one listener per routed port.
//!
//! # Responsibilities
//! - Bring every listen port of the routing table up through the listen
//!   controller, one (host, path) at a time
//! - Serve cleartext ports with `axum-server`, the TLS port with the SNI
//!   context
//! - Dispatch each request to its route: redirect, or forward to a picked
//!   target
//! - Swap in a rebuilt routing table on config reload
//!
//! # Data Flow
//! ```text
//! accept (axum-server, rustls on the TLS port)
//!     → request id → trace → [ssl redirect, cleartext ports]
//!     → proxy_handler
//!         → RoutingTable::resolve(port, host, path)
//!         → redirect route: 301
//!         → PathRoute::pick → Forwarder::forward → upstream
//! ```
//!
//! # Design Decisions
//! - The table sits behind `ArcSwap`; handlers load it per request
//! - Ports are bound sequentially so registry writes are ordered
//! - A port nobody could bind is logged and skipped; the rest keep serving

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::schema::ListenerConfig;
use crate::config::{Environment, PortSettings, ProxySettings, Runtime};
use crate::error::ProxyError;
use crate::http::forward::{ForwardContext, Forwarder};
use crate::http::redirect::{permanent_redirect, redirect_location, ssl_redirect, SslRedirect};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::net::SniContext;
use crate::observability::metrics;
use crate::registry::{ListenController, ListenMetadata, PortServer};
use crate::routing::matcher::request_host;
use crate::routing::RoutingTable;

/// Client name the proxy registers its listeners under.
pub const PROXY_CLIENT: &str = "proxy";

/// Per-port handler state.
#[derive(Clone)]
struct PortState {
    port: u16,
    tls: bool,
    table: Arc<ArcSwap<RoutingTable>>,
    forwarder: Forwarder,
}

enum Dispatch {
    Redirect(String),
    Forward(Url),
}

/// The reverse proxy front.
pub struct ProxyRuntime {
    environment: Environment,
    listener: ListenerConfig,
    ports: PortSettings,
    table: Arc<ArcSwap<RoutingTable>>,
    controller: Arc<ListenController>,
    forwarder: Forwarder,
    handles: Vec<Handle>,
    bound: Vec<u16>,
}

impl ProxyRuntime {
    pub fn new(settings: &ProxySettings, table: RoutingTable, controller: Arc<ListenController>) -> Self {
        Self {
            environment: settings.environment,
            listener: settings.listener.clone(),
            ports: settings.ports.clone(),
            table: Arc::new(ArcSwap::from_pointee(table)),
            controller,
            forwarder: Forwarder::new(Duration::from_secs(settings.listener.upstream_timeout_secs)),
            handles: Vec::new(),
            bound: Vec::new(),
        }
    }

    /// The listen port served with TLS in this environment.
    pub fn tls_port(&self) -> u16 {
        self.environment.listen_port(self.listener.tls_port, &self.ports)
    }

    /// Hosts routed on the TLS port, sorted.
    pub fn tls_hosts(&self) -> Vec<String> {
        let table = self.table.load();
        let mut hosts: Vec<String> = table
            .port(self.tls_port())
            .map(|t| t.hosts().map(str::to_string).collect())
            .unwrap_or_default();
        hosts.sort();
        hosts
    }

    pub fn routing_table(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Ports this runtime is serving, in bring-up order.
    pub fn bound_ports(&self) -> &[u16] {
        &self.bound
    }

    /// Replace the routing table. Ports that were not bound at startup stay
    /// unserved until restart.
    pub fn swap_table(&self, table: RoutingTable) {
        for port in table.ports().filter(|p| !self.bound.contains(p)) {
            tracing::warn!(port, "New listen port in reloaded config needs a restart");
        }
        self.table.store(Arc::new(table));
        tracing::info!("Routing table swapped");
    }

    /// Bind and serve every listen port of the current table.
    pub async fn start(&mut self, sni: &SniContext) -> &[u16] {
        let table = self.table.load_full();
        let tls_port = self.tls_port();
        let redirect = SslRedirect::new(self.environment, self.listener.ssl_redirect, sni);

        for port in table.ports() {
            if self.bound.contains(&port) {
                continue;
            }
            let tls = port == tls_port;
            if tls && sni.is_empty() {
                tracing::error!(port, "No valid certificate for any host; TLS listener not started");
                continue;
            }

            let mut server = PortServer::new();
            let Some(port_table) = table.port(port) else { continue };
            let mut hosts: Vec<&str> = port_table.hosts().collect();
            hosts.sort_unstable();

            for host in hosts {
                if tls && !sni.contains(host) {
                    tracing::warn!(host = %host, port, "Host has no certificate; not served over TLS");
                    continue;
                }
                for route in port_table.routes(host).unwrap_or_default() {
                    let metadata = ListenMetadata {
                        host: Some(host.to_string()),
                        path: Some(route.path.clone()),
                        client: Some(PROXY_CLIENT.to_string()),
                        runtime: Some(Runtime::Nodejs),
                        meta: Some(PROXY_CLIENT.to_string()),
                        apis: Vec::new(),
                        tls,
                    };
                    self.controller.listen_port(&mut server, port, &metadata).await;
                }
            }

            let Some(listener) = server.take_listener() else {
                tracing::error!(port, "Port could not be bound; skipped");
                continue;
            };

            let state = PortState {
                port,
                tls,
                table: self.table.clone(),
                forwarder: self.forwarder.clone(),
            };
            let app = port_router(state, (!tls).then(|| redirect.clone()));
            let handle = Handle::new();

            if tls {
                match sni.server_config() {
                    Ok(config) => {
                        let server = axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(config))
                            .handle(handle.clone());
                        tokio::spawn(async move {
                            if let Err(e) = server
                                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                                .await
                            {
                                tracing::error!(port, error = %e, "TLS listener stopped");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(port, error = %e, "TLS listener not started");
                        continue;
                    }
                }
            } else {
                let server = axum_server::from_tcp(listener).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server
                        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                        .await
                    {
                        tracing::error!(port, error = %e, "Listener stopped");
                    }
                });
            }

            tracing::info!(port, tls, "Proxy listening");
            self.handles.push(handle);
            self.bound.push(port);
        }

        &self.bound
    }

    /// Stop accepting and let in-flight requests finish within `grace`.
    pub fn shutdown(&self, grace: Duration) {
        for handle in &self.handles {
            handle.graceful_shutdown(Some(grace));
        }
    }
}

fn port_router(state: PortState, redirect: Option<SslRedirect>) -> Router {
    let mut router = Router::new().fallback(proxy_handler).with_state(state);
    if let Some(policy) = redirect.filter(SslRedirect::enabled) {
        router = router.layer(middleware::from_fn_with_state(policy, ssl_redirect));
    }
    router.layer(
        ServiceBuilder::new()
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id_layer()),
    )
}

async fn proxy_handler(
    State(state): State<PortState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let request_id = request_id(&request);

    let response = match dispatch(&state, client, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(request_id = %request_id, port = state.port, error = %e, "Request failed");
            e.into_response()
        }
    };

    metrics::record_request(state.port, response.status().as_u16(), start);
    response
}

async fn dispatch(state: &PortState, client: SocketAddr, request: Request<Body>) -> Result<Response, ProxyError> {
    let host = request_host(&request).unwrap_or_default();
    let path = request.uri().path().to_string();

    let decision = {
        let table = state.table.load();
        let route = table
            .resolve(state.port, &host, &path)
            .ok_or_else(|| ProxyError::NoRoute {
                host: host.clone(),
                path: path.clone(),
            })?;
        match &route.redirect {
            Some(location) => Dispatch::Redirect(redirect_location(&route.path, location, request.uri())),
            None => {
                let target = route.pick().ok_or_else(|| ProxyError::NoRoute {
                    host: host.clone(),
                    path: path.clone(),
                })?;
                Dispatch::Forward(target.url.clone())
            }
        }
    };

    match decision {
        Dispatch::Redirect(location) => Ok(permanent_redirect(location)),
        Dispatch::Forward(target) => {
            tracing::debug!(host = %host, path = %path, upstream = %target, "Forwarding");
            let context = ForwardContext {
                client,
                tls: state.tls,
            };
            state.forwarder.forward(request, &target, context).await
        }
    }
}

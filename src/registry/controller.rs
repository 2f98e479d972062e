//! Listen-port controller.
//!
//! # Responsibilities
//! - Validate the metadata a caller supplies for a (host, path)
//! - Free stale holders of the port, then bind it
//! - Record the live instance in the [`NetworkRegistry`]
//!
//! # Design Decisions
//! - Validation happens before any side effect, so a rejected request
//!   never touches the port or the registry
//! - All missing fields are reported together
//! - Binding an already bound server is a no-op success; several
//!   (host, path) pairs share one listener per port

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;

use crate::config::Runtime;
use crate::error::BindError;
use crate::net::PortKiller;
use crate::observability::metrics;
use crate::registry::store::{NetworkRegistration, NetworkRegistry};

/// What a caller says about the instance it is bringing up.
#[derive(Debug, Clone, Default)]
pub struct ListenMetadata {
    pub host: Option<String>,
    pub path: Option<String>,
    pub client: Option<String>,
    pub runtime: Option<Runtime>,
    pub meta: Option<String>,
    pub apis: Vec<String>,
    /// Served with TLS on this port.
    pub tls: bool,
}

impl ListenMetadata {
    /// Names of required fields that are absent or empty, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        fn blank(value: &Option<String>) -> bool {
            value.as_deref().map_or(true, |v| v.trim().is_empty())
        }

        let mut missing = Vec::new();
        if blank(&self.host) {
            missing.push("host");
        }
        if blank(&self.path) {
            missing.push("path");
        }
        if blank(&self.client) {
            missing.push("client");
        }
        if self.runtime.is_none() {
            missing.push("runtime");
        }
        if blank(&self.meta) {
            missing.push("meta");
        }
        missing
    }
}

/// Anything that can be told to listen on an address.
pub trait Bindable {
    fn is_bound(&self) -> bool;

    /// Bind to `addr`, returning the port actually bound.
    fn listen(&mut self, addr: SocketAddr) -> io::Result<u16>;
}

/// A lazily bound TCP listener, handed to the serving layer once bound.
#[derive(Debug, Default)]
pub struct PortServer {
    listener: Option<TcpListener>,
    port: Option<u16>,
}

impl PortServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Take the bound socket for serving. The server keeps reporting as bound.
    pub fn take_listener(&mut self) -> Option<TcpListener> {
        self.listener.take()
    }
}

impl Bindable for PortServer {
    fn is_bound(&self) -> bool {
        self.port.is_some()
    }

    fn listen(&mut self, addr: SocketAddr) -> io::Result<u16> {
        if let Some(port) = self.port {
            return Ok(port);
        }
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        self.listener = Some(listener);
        self.port = Some(port);
        Ok(port)
    }
}

fn scheme(tls: bool) -> &'static str {
    if tls {
        "https"
    } else {
        "http"
    }
}

/// Address a browser would use to reach (host, path) on `port`.
pub fn public_host(host: &str, path: &str, port: u16, tls: bool) -> String {
    let scheme = scheme(tls || port == 443);
    match (scheme, port) {
        ("http", 80) | ("https", 443) => format!("{scheme}://{host}{path}"),
        _ => format!("{scheme}://{host}:{port}{path}"),
    }
}

/// Loopback address of (path) on `port`.
pub fn local_url(path: &str, port: u16, tls: bool) -> String {
    format!("{}://localhost:{port}{path}", scheme(tls))
}

/// Sole writer of the network registry.
pub struct ListenController {
    registry: Arc<NetworkRegistry>,
    killer: Arc<dyn PortKiller>,
    bind_ip: IpAddr,
}

impl ListenController {
    pub fn new(registry: Arc<NetworkRegistry>, killer: Arc<dyn PortKiller>, bind_ip: IpAddr) -> Self {
        Self {
            registry,
            killer,
            bind_ip,
        }
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    /// Start a fresh bring-up: previous registrations are forgotten.
    pub fn begin_cycle(&self) {
        self.registry.clear();
    }

    /// Bind `server` to `port` on behalf of the described instance.
    ///
    /// Returns whether the instance is now live. Failures are logged and
    /// leave the registry untouched.
    pub async fn listen_port<B: Bindable + Send>(
        &self,
        server: &mut B,
        port: u16,
        metadata: &ListenMetadata,
    ) -> bool {
        match self.try_listen(server, port, metadata).await {
            Ok(registration) => {
                metrics::record_bind(registration.port, true);
                let (host, path) = (registration.host.clone(), registration.path.clone());
                if self.registry.register(registration) {
                    tracing::info!(host = %host, path = %path, port, "Instance listening");
                } else {
                    tracing::debug!(host = %host, path = %path, port, "Already registered this cycle");
                }
                true
            }
            Err(e) => {
                metrics::record_bind(port, false);
                tracing::error!(
                    host = metadata.host.as_deref().unwrap_or("-"),
                    path = metadata.path.as_deref().unwrap_or("-"),
                    port,
                    error = %e,
                    "listenPort failed"
                );
                false
            }
        }
    }

    async fn try_listen<B: Bindable + Send>(
        &self,
        server: &mut B,
        port: u16,
        metadata: &ListenMetadata,
    ) -> Result<NetworkRegistration, BindError> {
        let missing = metadata.missing_fields();
        if !missing.is_empty() {
            return Err(BindError::MissingMetadata(missing));
        }

        if !server.is_bound() && port != 0 {
            if let Err(e) = self.killer.free_port(port).await {
                tracing::warn!(port, error = %e, "Port cleanup failed, binding anyway");
            }
        }

        let bound = server
            .listen(SocketAddr::new(self.bind_ip, port))
            .map_err(|source| BindError::Io { port, source })?;

        let (host, path) = (
            metadata.host.clone().unwrap_or_default(),
            metadata.path.clone().unwrap_or_default(),
        );
        Ok(NetworkRegistration {
            public_host: public_host(&host, &path, bound, metadata.tls),
            local: local_url(&path, bound, metadata.tls),
            tls: metadata.tls,
            meta: metadata.meta.clone().unwrap_or_default(),
            client: metadata.client.clone().unwrap_or_default(),
            runtime: metadata.runtime.unwrap_or_default(),
            apis: metadata.apis.clone(),
            port: bound,
            host,
            path,
        })
    }
}

//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use vhost_proxy::config::schema::CleanupConfig;
use vhost_proxy::config::{DeployDescriptor, Deployment, Environment, HostConfig, ProxySettings};
use vhost_proxy::lifecycle::startup::compile;
use vhost_proxy::net::{CertificateStore, NoopPortKiller};
use vhost_proxy::registry::{ListenController, NetworkRegistry};
use vhost_proxy::ProxyRuntime;

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// First port of `len` consecutive free ports.
pub fn free_port_block(len: u16) -> u16 {
    for _ in 0..200 {
        let base = fastrand::u16(20_000..60_000);
        let all_free = (base..base + len).all(|p| StdTcpListener::bind(("127.0.0.1", p)).is_ok());
        if all_free {
            return base;
        }
    }
    panic!("no block of {len} free ports found");
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return;
                }
            }
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Serve a fixed 200 response on `addr`.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) {
    start_programmable_backend(addr, move || async move { (200, response.to_string()) }).await;
}

/// Serve responses produced by `f` on `addr`.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    serve_listener(listener, f);
}

/// Same as [`start_programmable_backend`] on an already bound socket.
pub fn serve_listener<F, Fut>(listener: TcpListener, f: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let f = Arc::new(f);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                read_request(&mut socket).await;
                let (status, body) = f().await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });
}

pub fn local(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// A deployment from inline host-config JSON.
pub fn deployment(id: &str, json: &str) -> Deployment {
    let hosts: HostConfig = serde_json::from_str(json).unwrap();
    Deployment {
        descriptor: DeployDescriptor {
            id: id.to_string(),
            replica_host: None,
            config: PathBuf::from(format!("{id}.json")),
        },
        hosts,
    }
}

/// Production settings on loopback with cleanup disabled; backend ports
/// start at `base_port`.
pub fn test_settings(base_port: u16) -> ProxySettings {
    let mut settings = ProxySettings {
        environment: Environment::Production,
        ..Default::default()
    };
    settings.listener.bind_ip = "127.0.0.1".to_string();
    settings.listener.tls_port = free_port();
    settings.listener.upstream_timeout_secs = 2;
    settings.ports.base_port = base_port;
    settings.ports.replica_base_port = base_port + 50;
    settings.cleanup = CleanupConfig {
        enabled: false,
        command: Vec::new(),
    };
    settings
}

/// GET `path` on the local `port` with a Host header.
pub async fn get(port: u16, host: &str, path: &str) -> reqwest::Response {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
        .get(format!("http://127.0.0.1:{port}{path}"))
        .header(reqwest::header::HOST, host)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap()
}

/// A started proxy runtime and the registry it wrote.
pub struct Harness {
    pub registry: Arc<NetworkRegistry>,
    pub runtime: ProxyRuntime,
}

/// Compile `deployments` and bring the proxy listeners up on loopback.
pub async fn start_proxy(settings: &ProxySettings, deployments: &[Deployment]) -> Harness {
    let (_, table) = compile(deployments, settings);

    let registry = Arc::new(NetworkRegistry::new());
    let controller = Arc::new(ListenController::new(
        registry.clone(),
        Arc::new(NoopPortKiller),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    ));
    controller.begin_cycle();

    let mut runtime = ProxyRuntime::new(settings, table, controller);
    let sni = CertificateStore::new(settings.tls.clone())
        .build_sni(&runtime.tls_hosts(), settings.environment, None)
        .await;
    runtime.start(&sni).await;

    Harness { registry, runtime }
}

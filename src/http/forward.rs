//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the chosen target
//! - Strip hop-by-hop headers, add `X-Forwarded-*`
//! - Send through the shared hyper client under the upstream deadline
//! - Hand upgrade handshakes to the WebSocket tunnel
//!
//! # Design Decisions
//! - Bodies stream through untouched in both directions
//! - The client's Host header is preserved
//! - Failures are never retried inline: the caller gets 502 or 504

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::error::ProxyError;
use crate::http::websocket;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Remove hop-by-hop headers, including any the Connection header names.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Append the client to `X-Forwarded-For` and record scheme and host.
pub fn add_forwarded_headers(headers: &mut HeaderMap, client: SocketAddr, host: Option<&str>, tls: bool) {
    let client_ip = client.ip().to_string();
    let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    headers.insert(
        X_FORWARDED_PROTO,
        HeaderValue::from_static(if tls { "https" } else { "http" }),
    );
    if let Some(value) = host.and_then(|h| HeaderValue::from_str(h).ok()) {
        headers.insert(X_FORWARDED_HOST, value);
    }
}

/// The original path and query on the target's origin.
pub fn upstream_uri(target: &Url, original: &Uri) -> Result<Uri, ProxyError> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{}{}", target.as_str().trim_end_matches('/'), path_and_query)
        .parse::<Uri>()
        .map_err(|e| ProxyError::Request(e.to_string()))
}

/// Where a request came from and how it arrived.
#[derive(Debug, Clone, Copy)]
pub struct ForwardContext {
    pub client: SocketAddr,
    pub tls: bool,
}

/// Shared upstream client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    /// Send `request` to `target` and return its response.
    pub async fn forward(
        &self,
        mut request: Request<Body>,
        target: &Url,
        context: ForwardContext,
    ) -> Result<Response<Body>, ProxyError> {
        let upgrade = websocket::upgrade_protocol(request.headers());
        let client_upgrade = upgrade.is_some().then(|| hyper::upgrade::on(&mut request));

        let (mut parts, body) = request.into_parts();
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));

        strip_hop_by_hop(&mut parts.headers);
        if let Some(protocol) = &upgrade {
            parts
                .headers
                .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
            parts.headers.insert(header::UPGRADE, protocol.clone());
        }
        add_forwarded_headers(&mut parts.headers, context.client, host.as_deref(), context.tls);
        if let Some(value) = host.as_deref().and_then(|h| HeaderValue::from_str(h).ok()) {
            parts.headers.insert(header::HOST, value);
        }
        parts.uri = upstream_uri(target, &parts.uri)?;
        parts.version = Version::HTTP_11;

        let target_name = target.as_str().trim_end_matches('/').to_string();
        let sent = tokio::time::timeout(self.timeout, self.client.request(Request::from_parts(parts, body))).await;
        let mut response = match sent {
            Err(_) => return Err(ProxyError::Timeout { target: target_name }),
            Ok(Err(e)) => {
                return Err(ProxyError::Unreachable {
                    target: target_name,
                    reason: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                let upstream_upgrade = hyper::upgrade::on(&mut response);
                websocket::tunnel(client_upgrade, upstream_upgrade, target_name);
                let (parts, _) = response.into_parts();
                return Ok(Response::from_parts(parts, Body::empty()));
            }
        }

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);
        assert!(headers.get("x-private").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get(header::CONTENT_TYPE).is_some());
    }

    #[test]
    fn test_forwarded_for_appends() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        let client: SocketAddr = "192.168.1.5:50000".parse().unwrap();

        add_forwarded_headers(&mut headers, client, Some("a.com"), true);
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1, 192.168.1.5");
        assert_eq!(headers[X_FORWARDED_PROTO], "https");
        assert_eq!(headers[X_FORWARDED_HOST], "a.com");
    }

    #[test]
    fn test_upstream_uri_keeps_path_and_query() {
        let target = Url::parse("http://127.0.0.1:3002").unwrap();
        let original: Uri = "/api/users?page=2".parse().unwrap();
        let uri = upstream_uri(&target, &original).unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:3002/api/users?page=2");
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let forwarder = Forwarder::new(Duration::from_secs(2));
        let target = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let request = Request::builder()
            .uri("/")
            .header(header::HOST, "a.com")
            .body(Body::empty())
            .unwrap();
        let context = ForwardContext {
            client: "127.0.0.1:1".parse().unwrap(),
            tls: false,
        };

        let err = forwarder.forward(request, &target, context).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}

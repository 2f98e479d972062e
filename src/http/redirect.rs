//! Redirect handling: configured path redirects and the HTTPS upgrade.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::Environment;
use crate::net::SniContext;
use crate::routing::matcher::request_host;

const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// `301` with a Location header.
pub fn permanent_redirect(location: String) -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

/// Destination of a redirect route: the configured location followed by
/// whatever the request path adds past the route prefix.
pub fn redirect_location(route_path: &str, redirect: &str, uri: &Uri) -> String {
    let path = uri.path();
    let rest = path
        .strip_prefix(route_path.trim_end_matches('/'))
        .unwrap_or("");
    let mut location = format!("{}{}", redirect.trim_end_matches('/'), rest);
    if location.is_empty() {
        location.push('/');
    }
    if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
    }
    location
}

/// When cleartext requests are sent to HTTPS.
#[derive(Debug, Clone)]
pub struct SslRedirect {
    enabled: bool,
    secure_hosts: Arc<HashSet<String>>,
}

impl SslRedirect {
    pub fn new(environment: Environment, ssl_redirect: bool, sni: &SniContext) -> Self {
        Self {
            enabled: environment.is_production() && ssl_redirect,
            secure_hosts: Arc::new(sni.host_set()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled && !self.secure_hosts.is_empty()
    }

    /// HTTPS location for a cleartext request, if it must be upgraded.
    pub fn location(&self, host: &str, uri: &Uri) -> Option<String> {
        if !self.enabled || uri.path().starts_with(ACME_CHALLENGE_PREFIX) {
            return None;
        }
        if !self.secure_hosts.contains(host) {
            return None;
        }
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Some(format!("https://{host}{path_and_query}"))
    }
}

/// Middleware for non-TLS ports.
pub async fn ssl_redirect(State(policy): State<SslRedirect>, request: Request<Body>, next: Next) -> Response {
    let location = request_host(&request).and_then(|host| policy.location(&host, request.uri()));
    match location {
        Some(location) => {
            tracing::debug!(location = %location, "Upgrading to HTTPS");
            permanent_redirect(location)
        }
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(enabled: bool) -> SslRedirect {
        SslRedirect {
            enabled,
            secure_hosts: Arc::new(["a.com".to_string()].into_iter().collect()),
        }
    }

    #[test]
    fn test_redirects_secure_host_in_production() {
        let uri: Uri = "/shop?item=1".parse().unwrap();
        assert_eq!(
            policy(true).location("a.com", &uri).as_deref(),
            Some("https://a.com/shop?item=1")
        );
    }

    #[test]
    fn test_no_redirect_without_certificate() {
        let uri: Uri = "/".parse().unwrap();
        assert!(policy(true).location("b.com", &uri).is_none());
    }

    #[test]
    fn test_acme_challenge_is_exempt() {
        let uri: Uri = "/.well-known/acme-challenge/token".parse().unwrap();
        assert!(policy(true).location("a.com", &uri).is_none());
    }

    #[tokio::test]
    async fn test_never_in_development() {
        let store = crate::net::CertificateStore::new(Default::default());
        let sni = store.build_sni(&[], Environment::Development, None).await;
        let uri: Uri = "/".parse().unwrap();
        assert!(!SslRedirect::new(Environment::Development, true, &sni).enabled());
        assert!(policy(false).location("a.com", &uri).is_none());
    }

    #[test]
    fn test_redirect_route_location() {
        let uri: Uri = "/old/page?x=1".parse().unwrap();
        assert_eq!(redirect_location("/old", "https://new.com/", &uri), "https://new.com/page?x=1");

        let uri: Uri = "/docs".parse().unwrap();
        assert_eq!(redirect_location("/", "/home", &uri), "/home/docs");
        assert_eq!(redirect_location("/docs", "/", &uri), "/");
    }
}

//! WebSocket proxy handling.
//!
//! # Data Flow
//! ```text
//! Client ──── upgrade ────→ Proxy ──── upgrade ────→ Backend
//!        ←─── 101 ─────────       ←─── 101 ─────────
//! Client ←════ raw bytes ═══→ Proxy ←═══ raw bytes ═══→ Backend
//! ```
//!
//! # Design Decisions
//! - The handshake is forwarded like any request; only a 101 from the
//!   backend starts the tunnel
//! - After the upgrade the connection is a byte pipe: no frame parsing,
//!   close and ping frames pass through unchanged

use axum::http::header::{self, HeaderMap, HeaderValue};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

/// The requested upgrade protocol when `Connection` asks for an upgrade.
pub fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wants_upgrade {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

/// Splice the two upgraded connections once both sides complete.
pub fn tunnel(client: OnUpgrade, upstream: OnUpgrade, target: String) {
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(upstream = %target, error = %e, "WebSocket upgrade failed");
                return;
            }
        };

        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((sent, received)) => {
                tracing::debug!(upstream = %target, sent, received, "WebSocket tunnel closed");
            }
            Err(e) => {
                tracing::debug!(upstream = %target, error = %e, "WebSocket tunnel aborted");
            }
        }
    });
}

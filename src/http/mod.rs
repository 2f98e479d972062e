//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (per-port axum router, bring-up, table swap)
//!     → request.rs (request id)
//!     → redirect.rs (HTTPS upgrade, redirect routes)
//!     → forward.rs (header rewrite, upstream client)
//!     → websocket.rs (byte tunnel after a 101)
//! ```

pub mod forward;
pub mod redirect;
pub mod request;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::ProxyRuntime;

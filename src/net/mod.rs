//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Before bind:
//!     cleanup.rs (free stale holders of the port)
//!
//! TLS port:
//!     tls.rs (per-host key/cert/ca_bundle → SNI resolver → rustls ServerConfig)
//!     issuer.rs (development auto-TLS: issue missing material once)
//! ```
//!
//! # Design Decisions
//! - Shell-outs sit behind capability traits so tests swap in fakes
//! - TLS failures degrade per host, never per listener

pub mod cleanup;
pub mod issuer;
pub mod tls;

pub use cleanup::{NoopPortKiller, PortKiller, ShellPortKiller};
pub use issuer::{CertIssuer, CommandCertIssuer};
pub use tls::{CertificateStore, SniContext};

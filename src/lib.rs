//! Multi-host reverse proxy core.
//!
//! Hosts and paths from per-deployment JSON configs are planned onto backend
//! ports, grouped into a per-listen-port routing table, and served by one
//! listener per port with SNI-selected certificates on the TLS port. Every
//! live (host, path) lands in the network registry, which the health
//! monitor probes.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod registry;
pub mod routing;

// Traffic management
pub mod health;
pub mod instance;
pub mod load_balancer;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

mod process;

pub use config::ProxySettings;
pub use http::ProxyRuntime;
pub use lifecycle::Shutdown;
pub use registry::{ListenController, NetworkRegistry};
pub use routing::RoutingTable;

//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route compilation (at startup and on config reload):
//!     Vec<Deployment>
//!     → ports.rs (deterministic backend port per instance)
//!     → table.rs (group by listen port, order paths, weight targets)
//!     → Freeze as immutable RoutingTable
//!
//! Incoming request (listen port, host, path)
//!     → matcher.rs (normalize host, prefix match)
//!     → Return: matched PathRoute or NoMatch
//! ```
//!
//! # Design Decisions
//! - Longest path first per host, so a specific path never hides behind `/`
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same config always yields the same ports and order

pub mod matcher;
pub mod ports;
pub mod table;

pub use ports::{plan_ports, InstanceKey, PlannedInstance, PortPlan};
pub use table::{build_routing_table, PathRoute, RoutingEntry, RoutingTable, Target};

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML)             host config files (JSON, one per deployment)
//!     → loader.rs (parse)              → loader.rs (parse, key order kept by ordered.rs)
//!                                      → validation.rs (semantic checks)
//!     → ProxySettings                  → Vec<Deployment>
//!
//! On host config change:
//!     watcher.rs detects change
//!     → loader.rs reloads every deployment
//!     → routing table rebuilt and swapped atomically
//! ```
//!
//! # Design Decisions
//! - The proxy only reads host configs; deployment tooling owns writes
//! - All settings fields have defaults to allow minimal files
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod ordered;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::Deployment;
pub use ordered::OrderedMap;
pub use schema::{
    DeployDescriptor, Environment, HostConfig, PathConfig, PortSettings, ProxySettings, Runtime,
    SplitStrategy,
};

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Plan ports → Build table → TLS → Listeners → Monitor
//!
//! Shutdown (shutdown.rs):
//!     SIGTERM/SIGINT or monitor escalation → Stop accepting → Drain → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listeners, then background tasks
//! - Shutdown has a drain deadline

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, Running, StartupOptions};

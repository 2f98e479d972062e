//! Backend instance subsystem.
//!
//! # Data Flow
//! ```text
//! PortPlan (non-canonical instances)
//!     → api.rs (resolve `apis` names to router constructors)
//!     → server.rs (landing page + APIs + CORS, bind via listen controller)
//! ```

pub mod api;
pub mod server;

pub use api::{ApiContext, ApiRegistry};
pub use server::InstanceServer;

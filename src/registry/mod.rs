//! Network registry subsystem.
//!
//! # Data Flow
//! ```text
//! proxy bring-up / instance servers
//!     → controller.rs (validate metadata, free port, bind)
//!     → store.rs (host → path → registration)
//!     → health monitor, `network` api (readers)
//! ```

pub mod controller;
pub mod store;

pub use controller::{Bindable, ListenController, ListenMetadata, PortServer};
pub use store::{NetworkRegistration, NetworkRegistry};

//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Monitor (monitor.rs):
//!     sleep interval
//!     → gate.rs held? skip
//!     → probe every registry target
//!     → accumulator full? MonitorFatal
//!
//! Deploy (deploy.rs):
//!     hold gate
//!     → delete → start → poll for ready marker
//!     → failed? one more cycle for that instance
//! ```

pub mod deploy;
pub mod gate;
pub mod monitor;

pub use deploy::{CommandDeployer, DeployReport, DeployRunner, DeployTarget, InstanceDeployer};
pub use gate::RedeployGate;
pub use monitor::HealthMonitor;

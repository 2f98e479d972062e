//! Resilience subsystem.
//!
//! # Design Decisions
//! - Forwarding is never retried inline; retries live in the deploy runner
//!   on a much longer time horizon
//! - Every poll loop has a hard budget, the backoff never overshoots it

pub mod backoff;

pub use backoff::Backoff;

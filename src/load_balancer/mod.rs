//! Weighted traffic splitting subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → PathRoute with N weighted targets
//!     → TrafficSplit::next_index()
//!         - weighted.rs (seeded weighted random)
//!         - round_robin.rs (smooth weighted round robin)
//!     → target URL for this request
//! ```
//!
//! # Design Decisions
//! - Weights are integers summing to 100 per route
//! - Strategy is a configuration choice, both converge to weight/100
//! - Random splitter takes an explicit seed so tests are deterministic

pub mod round_robin;
pub mod weighted;

use crate::config::SplitStrategy;

/// Picks which of a route's targets serves the next request.
pub trait TrafficSplit: Send + Sync + std::fmt::Debug {
    fn next_index(&self) -> usize;
}

/// Splitter for a route with a single target.
#[derive(Debug, Default)]
pub struct Single;

impl TrafficSplit for Single {
    fn next_index(&self) -> usize {
        0
    }
}

/// Build the splitter for a set of weights.
pub fn splitter(weights: &[u32], strategy: SplitStrategy, seed: Option<u64>) -> Box<dyn TrafficSplit> {
    if weights.len() <= 1 {
        return Box::new(Single);
    }
    match strategy {
        SplitStrategy::Random => Box::new(weighted::WeightedRandom::new(weights, seed)),
        SplitStrategy::RoundRobin => Box::new(round_robin::WeightedRoundRobin::new(weights)),
    }
}

/// Split 100 evenly across `n` targets; the remainder goes to the first ones.
pub fn even_weights(n: usize) -> Vec<u32> {
    if n == 0 {
        return Vec::new();
    }
    let n32 = n as u32;
    let base = 100 / n32;
    let remainder = (100 % n32) as usize;
    (0..n).map(|i| base + u32::from(i < remainder)).collect()
}

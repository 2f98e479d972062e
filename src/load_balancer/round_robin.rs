//! Smooth weighted round-robin strategy.

use std::sync::Mutex;

use crate::load_balancer::TrafficSplit;

/// Weighted round-robin selector.
/// Every pick raises each target's running score by its weight, takes the
/// highest score and lowers it by the total, which interleaves targets instead
/// of sending bursts to the heaviest one.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    weights: Vec<i64>,
    total: i64,
    current: Mutex<Vec<i64>>,
}

impl WeightedRoundRobin {
    pub fn new(weights: &[u32]) -> Self {
        let weights: Vec<i64> = weights.iter().map(|&w| i64::from(w)).collect();
        let total = weights.iter().sum();
        Self {
            current: Mutex::new(vec![0; weights.len()]),
            weights,
            total,
        }
    }
}

impl TrafficSplit for WeightedRoundRobin {
    fn next_index(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let mut best = 0;
        for (i, weight) in self.weights.iter().enumerate() {
            current[i] += weight;
            if current[i] > current[best] {
                best = i;
            }
        }
        current[best] -= self.total;
        best
    }
}

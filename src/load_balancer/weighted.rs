//! Seeded weighted-random selection.

use std::sync::Mutex;

use crate::load_balancer::TrafficSplit;

/// Weighted random selector.
/// Rolls a number in `0..total` and maps it onto cumulative weights.
#[derive(Debug)]
pub struct WeightedRandom {
    cumulative: Vec<u32>,
    total: u32,
    rng: Mutex<fastrand::Rng>,
}

impl WeightedRandom {
    pub fn new(weights: &[u32], seed: Option<u64>) -> Self {
        let cumulative: Vec<u32> = weights
            .iter()
            .scan(0u32, |acc, w| {
                *acc += w;
                Some(*acc)
            })
            .collect();
        let total = cumulative.last().copied().unwrap_or(0);
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            cumulative,
            total,
            rng: Mutex::new(rng),
        }
    }
}

impl TrafficSplit for WeightedRandom {
    fn next_index(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        let roll = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.u32(0..self.total)
        };
        // first bucket whose upper bound exceeds the roll
        self.cumulative.partition_point(|&upper| upper <= roll)
    }
}

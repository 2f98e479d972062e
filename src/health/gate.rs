//! Redeploy gate shared by the deploy runner and the health monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set while a redeploy is in progress; monitor cycles are skipped.
#[derive(Debug, Clone, Default)]
pub struct RedeployGate {
    held: Arc<AtomicBool>,
}

impl RedeployGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Hold the gate until the returned guard is dropped.
    pub fn hold(&self) -> GateGuard {
        self.held.store(true, Ordering::Release);
        GateGuard {
            held: self.held.clone(),
        }
    }
}

#[must_use = "the gate is released when the guard drops"]
#[derive(Debug)]
pub struct GateGuard {
    held: Arc<AtomicBool>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let gate = RedeployGate::new();
        let observer = gate.clone();
        {
            let _guard = gate.hold();
            assert!(observer.is_held());
        }
        assert!(!observer.is_held());
    }
}

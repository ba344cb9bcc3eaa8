use std::collections::HashMap;
use std::sync::Mutex;

/// Consecutive failed passes per cell, keyed by `namespace/name`.
#[derive(Default, Debug)]
pub struct FailureTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl FailureTracker {
    /// Records a failure and returns the new streak length.
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let n = counts.entry(key.to_string()).or_default();
        *n = n.saturating_add(1);
        *n
    }

    pub fn reset(&self, key: &str) {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streak_grows_and_resets_per_cell() {
        let t = FailureTracker::default();
        assert_eq!(t.record_failure("monitoring/demo"), 1);
        assert_eq!(t.record_failure("monitoring/demo"), 2);
        assert_eq!(t.record_failure("monitoring/other"), 1);
        t.reset("monitoring/demo");
        assert_eq!(t.failures("monitoring/demo"), 0);
        assert_eq!(t.failures("monitoring/other"), 1);
    }
}

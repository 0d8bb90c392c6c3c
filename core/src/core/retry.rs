use std::collections::HashMap;
use std::sync::Mutex;

use super::Attempt;

/// Bounded per-pair retry budget shared by every worker.
pub struct RetryTracker {
    limit: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one more retry for the pair. True while the count stays within the
    /// limit; once exceeded the entry is dropped and the pair is given up.
    pub fn should_retry(&self, attempt: &Attempt) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let key = attempt.key();
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;

        if *count > self.limit {
            counts.remove(&key);
            return false;
        }
        true
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Pairs currently holding retry budget.
    pub fn pending(&self) -> usize {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_limit_then_give_up() {
        let tracker = RetryTracker::new(3);
        let a = Attempt::new("alice", "hunter2");

        for _ in 0..3 {
            assert!(tracker.should_retry(&a));
        }
        assert!(!tracker.should_retry(&a));
        assert_eq!(tracker.pending(), 0);

        // counter was dropped, so the count restarts at 1
        assert!(tracker.should_retry(&a));
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn test_zero_limit_never_retries() {
        let tracker = RetryTracker::new(0);
        assert!(!tracker.should_retry(&Attempt::new("a", "b")));
    }

    #[test]
    fn test_pairs_are_independent() {
        let tracker = RetryTracker::new(1);
        let a = Attempt::new("alice", "x");
        let b = Attempt::new("bob", "x");
        assert!(tracker.should_retry(&a));
        assert!(tracker.should_retry(&b));
        assert!(!tracker.should_retry(&a));
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn test_concurrent_budget_is_exact() {
        let tracker = Arc::new(RetryTracker::new(50));
        let attempt = Attempt::new("alice", "pw");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let attempt = attempt.clone();
                thread::spawn(move || {
                    (0..10).filter(|_| tracker.should_retry(&attempt)).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 80 calls: 50 allowed, the 51st resets, the remaining 29 start over
        assert_eq!(allowed, 50 + 29);
    }
}

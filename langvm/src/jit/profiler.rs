//! C5: per-function hotness counters.
//!
//! One atomic counter per function, incremented on every call dispatched by
//! the interpreter. No locking: concurrent increments from nested calls
//! within the single-threaded user program are just sequential stores, and
//! the JIT scheduler only ever reads these counters from its own thread.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct Profiler {
    counters: Vec<AtomicU64>,
    threshold: u64,
}

impl Profiler {
    pub fn new(function_count: usize, threshold: u64) -> Self {
        let mut counters = Vec::with_capacity(function_count);
        counters.resize_with(function_count, AtomicU64::default);
        Self {
            counters,
            threshold,
        }
    }

    /// Record one call to `index`, returning the post-increment count.
    pub fn record_call(&self, index: u32) -> u64 {
        self.counters[index as usize].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn count(&self, index: u32) -> u64 {
        self.counters[index as usize].load(Ordering::Relaxed)
    }

    pub fn is_hot(&self, count: u64) -> bool {
        count >= self.threshold
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_function() {
        let profiler = Profiler::new(2, 3);
        assert_eq!(profiler.record_call(0), 1);
        assert_eq!(profiler.record_call(0), 2);
        assert_eq!(profiler.record_call(1), 1);
        assert_eq!(profiler.count(0), 2);
        assert_eq!(profiler.count(1), 1);
    }

    #[test]
    fn hotness_threshold() {
        let profiler = Profiler::new(1, 3);
        assert!(!profiler.is_hot(profiler.record_call(0)));
        assert!(!profiler.is_hot(profiler.record_call(0)));
        assert!(profiler.is_hot(profiler.record_call(0)));
    }
}

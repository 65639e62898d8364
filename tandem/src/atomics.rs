use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared by the clock, the workers and the collector of one run.
#[derive(Clone, Default)]
pub(crate) struct RunAtomics {
    ticks: Arc<AtomicU64>,
    missed: Arc<AtomicU64>,
    lost: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl RunAtomics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_scheduled(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_missed(&self) {
        self.missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks_missed(&self, count: u64) {
        self.missed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn sample_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    /// A sample offered after the collector closed. Also counted as lost.
    pub fn sample_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.sample_lost();
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_samples_count_as_lost() {
        let atomics = RunAtomics::new();
        let clone = atomics.clone();
        clone.sample_rejected();
        clone.sample_lost();
        assert_eq!(atomics.lost(), 2);
        assert_eq!(atomics.rejected(), 1);
    }
}

use mock_backend::MockBackend;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tandem::prelude::*;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        // `traced_test` may already own the global subscriber.
        let _ = FmtSubscriber::builder()
            .with_env_filter("tandem=debug,mock_backend=debug")
            .try_init();
    });
}

#[allow(unused)]
pub fn config(backend_id: &str, rate: f64) -> RunConfig {
    RunConfig::new(backend_id, Workload::new("point-lookup", "SELECT v FROM kv WHERE k = $1"))
        .rate(rate)
        .progress_interval(Duration::from_millis(100))
}

#[allow(unused)]
pub fn mock(latency_ms: u64) -> Arc<MockBackend> {
    Arc::new(MockBackend::fixed(Duration::from_millis(latency_ms)))
}

/// Every tick accounted for, and no (worker, sequence) pair seen twice.
#[allow(unused)]
pub fn assert_accounted(result: &RunResult) {
    assert_eq!(
        result.accounted_ticks(),
        result.ticks_scheduled(),
        "samples={} lost={} missed={} scheduled={}",
        result.samples().len(),
        result.lost_samples(),
        result.missed_ticks(),
        result.ticks_scheduled()
    );

    let mut keys: Vec<_> = result
        .samples()
        .iter()
        .map(|s| (s.worker_id, s.sequence))
        .collect();
    keys.sort();
    let total = keys.len();
    keys.dedup();
    assert_eq!(keys.len(), total, "duplicate samples");

    // Per-worker arrival order is issue order.
    for worker in result.workers() {
        let sequences: Vec<_> = result
            .samples()
            .iter()
            .filter(|s| s.worker_id == worker.worker_id)
            .map(|s| s.sequence)
            .collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }
}

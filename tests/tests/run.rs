mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;
    use mock_backend::MockBackend;
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tandem::core::{ConfigError, ErrorClass, RunFault};
    use tandem::prelude::*;

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn steady_rate_is_fully_honored() {
        let backend = mock(5);
        let result = Benchmark::shared(
            config("steady", 10.)
                .duration(Duration::from_secs(2))
                .workers(2),
            backend.clone(),
        )
        .await
        .unwrap();

        assert_eq!(result.ticks_scheduled(), 20);
        let samples = result.samples().len();
        assert!((18..=20).contains(&samples), "{samples} samples");
        assert_eq!(result.lost_samples(), 0);
        assert_eq!(result.missed_ticks(), 0);
        assert_eq!(result.failure_count(), 0);
        assert_eq!(backend.calls(), samples as u64);
        assert!(!result.is_degraded());
        assert_accounted(&result);

        // Requests go out on schedule, not back to back.
        let by_issue = result.samples_by_issue();
        let last = by_issue.last().unwrap();
        assert!(last.issued >= Duration::from_millis(1_800));
        assert!(result.elapsed() >= Duration::from_secs(2));
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn alternating_outcomes_are_both_recorded() {
        let backend = Arc::new(MockBackend::fixed(Duration::from_millis(5)).alternating());
        let result = Benchmark::shared(
            config("alternating", 10.)
                .duration(Duration::from_secs(2))
                .workers(2),
            backend,
        )
        .await
        .unwrap();

        let ok = result.success_count();
        let failed = result.failure_count();
        assert!((9..=11).contains(&ok), "{ok} successes");
        assert!((9..=11).contains(&failed), "{failed} failures");
        assert_eq!(result.lost_samples(), 0);
        assert!(result
            .samples()
            .iter()
            .filter(|s| !s.is_success())
            .all(|s| s.outcome.error_class() == Some(ErrorClass::Backend)));
        assert_accounted(&result);
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn overload_is_reported_as_missed_ticks() {
        let result = Benchmark::shared(
            config("overloaded", 1_000.)
                .duration(Duration::from_secs(1))
                .workers(1),
            mock(50),
        )
        .await
        .unwrap();

        assert_eq!(result.ticks_scheduled(), 1_000);
        assert!(result.missed_ticks() > 900);
        // One worker at 50ms per request can't issue much more than 20 in a second.
        let samples = result.samples().len();
        assert!((10..=25).contains(&samples), "{samples} samples");
        assert_accounted(&result);
        let stats = RunStatistics::from_result(&result);
        assert!(stats.actual_rate < 30.);
    }

    #[tokio::test]
    async fn zero_rate_is_rejected_before_anything_runs() {
        let backend = mock(5);
        let res = Benchmark::shared(
            config("zero", 0.).duration(Duration::from_secs(1)),
            backend.clone(),
        )
        .start();

        assert!(matches!(
            res,
            Err(RunError::Config(ConfigError::NonPositiveRate(_)))
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.calls(), 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn stop_lets_in_flight_requests_finish() {
        let backend = mock(50);
        let handle = Benchmark::shared(
            config("stopped", 20.)
                .duration(Duration::from_secs(30))
                .workers(2),
            backend.clone(),
        )
        .start()
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.phase(), RunPhase::Running);
        let stopper = handle.stopper();
        assert!(handle.stop());
        assert!(!stopper.stop());

        let result = handle.await.unwrap();
        let stopped_at = result.stopped_at().unwrap();
        assert!(stopped_at < Duration::from_secs(2));
        assert!(result.elapsed() < Duration::from_secs(2));

        // Nothing is cancelled, and nothing new starts after the stop.
        let slack = Duration::from_millis(50 + 100);
        for sample in result.samples() {
            assert!(sample.is_success());
            assert!(sample.completed() <= stopped_at + slack);
        }
        assert_eq!(backend.calls(), result.samples().len() as u64);
        assert!(!result.is_degraded());
        assert_accounted(&result);
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn request_count_bound_is_exact() {
        let backend = mock(1);
        let result = Benchmark::shared(
            config("counted", 100.).max_requests(15).workers(3),
            backend.clone(),
        )
        .await
        .unwrap();

        assert_eq!(result.ticks_scheduled(), 15);
        assert_eq!(result.samples().len(), 15);
        assert_eq!(backend.calls(), 15);
        assert_accounted(&result);
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn warmup_samples_are_discarded() {
        let backend = mock(2);
        let result = Benchmark::shared(
            config("warm", 20.)
                .duration(Duration::from_millis(500))
                .warmup(Duration::from_millis(500))
                .workers(2),
            backend.clone(),
        )
        .await
        .unwrap();

        assert_eq!(result.ticks_scheduled(), 10);
        assert_eq!(result.samples().len(), 10);
        assert!(backend.calls() >= 18, "{} calls", backend.calls());
        assert!(result
            .samples()
            .iter()
            .all(|s| s.issued < Duration::from_millis(600)));
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn stop_during_warmup_skips_the_measured_window() -> Result<(), anyhow::Error> {
        let backend = mock(2);
        let handle = Benchmark::shared(
            config("warm", 50.)
                .duration(Duration::from_secs(30))
                .warmup(Duration::from_secs(30))
                .workers(2),
            backend.clone(),
        )
        .start()?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.stop());

        let result = handle.await?;
        assert!(result.is_degraded());
        assert!(result.faults().contains(&RunFault::CancelledDuringWarmup));
        assert_eq!(result.ticks_scheduled(), 0);
        assert!(result.samples().is_empty());
        assert_eq!(result.accounted_ticks(), result.ticks_scheduled());
        assert!(backend.calls() > 0, "warmup never issued a request");
        assert!(logs_contain("Run stopped during warmup"));
        Ok(())
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn unavailable_backend_degrades_but_seals() {
        let backend = Arc::new(MockBackend::fixed(Duration::from_millis(1)).unavailable_after(5));
        let result = Benchmark::shared(
            config("flaky", 50.)
                .duration(Duration::from_secs(1))
                .workers(2),
            backend,
        )
        .await
        .unwrap();

        assert!(result.is_degraded());
        assert!(result
            .faults()
            .iter()
            .any(|f| matches!(f, RunFault::WorkerUnavailable { .. })));
        assert!(result.faults().contains(&RunFault::AllWorkersStopped));
        assert_eq!(result.success_count(), 5);
        assert_eq!(result.failure_count(), 2);
        assert_accounted(&result);
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn burst_policy_catches_up_on_queued_ticks() {
        let backend = mock(20);
        let result = Benchmark::shared(
            config("bursty", 100.)
                .duration(Duration::from_millis(500))
                .workers(1)
                .tick_policy(TickPolicy::Burst {
                    backlog: NonZeroUsize::new(100).unwrap(),
                }),
            backend,
        )
        .await
        .unwrap();

        assert_eq!(result.ticks_scheduled(), 50);
        assert_eq!(result.samples().len(), 50);
        assert_eq!(result.missed_ticks(), 0);
        let max_lag = result.samples().iter().map(|s| s.lag()).max().unwrap();
        assert!(max_lag > Duration::from_millis(200), "max lag {max_lag:?}");
        assert_accounted(&result);
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn timeouts_are_failed_samples() {
        let result = Benchmark::shared(
            config("slow", 20.)
                .max_requests(5)
                .request_timeout(Duration::from_millis(20))
                .workers(5),
            mock(200),
        )
        .await
        .unwrap();

        assert_eq!(result.samples().len(), 5);
        assert!(result
            .samples()
            .iter()
            .all(|s| s.outcome.error_class() == Some(ErrorClass::Timeout)));
        assert!(result
            .samples()
            .iter()
            .all(|s| s.latency < Duration::from_millis(150)));
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(10_000)]
    async fn progress_is_observable_while_running() {
        let handle = Benchmark::shared(
            config("observed", 50.)
                .duration(Duration::from_secs(1))
                .workers(2),
            mock(2),
        )
        .start()
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let progress = handle.progress();
        assert!(progress.samples > 0);
        assert!(progress.ticks_scheduled >= progress.samples);
        assert!(!handle.partial_samples().is_empty());

        let run_id = handle.run_id();
        let mut phases = handle.phases();
        let result = handle.wait().await.unwrap();
        assert_eq!(result.run_id(), run_id);
        assert_eq!(*phases.borrow_and_update(), RunPhase::Sealed);
        assert!(result.samples().len() >= 45);
    }
}

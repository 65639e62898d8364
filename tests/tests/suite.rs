mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;
    use mock_backend::MockBackend;
    use std::time::Duration;
    use tandem::prelude::*;
    use tandem::SuiteError;

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(20_000)]
    async fn suite_runs_every_rate_in_order() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let template = config("pg", 1.)
            .duration(Duration::from_millis(500))
            .workers(2);

        let report = Suite::new(template, MockBackend::fixed(Duration::from_millis(2)))
            .rates([10., 20.])
            .output_dir(dir.path())
            .run()
            .await
            .unwrap();

        let rates: Vec<_> = report.statistics.iter().map(|s| s.target_rate).collect();
        assert_eq!(rates, vec![10., 20.]);
        assert_eq!(report.results[0].samples().len(), 5);
        assert_eq!(report.results[1].samples().len(), 10);
        // Runs never overlap.
        assert!(report.results[0].ended_at() <= report.results[1].started_at());

        assert!(dir.path().join("pg_point-lookup_10rps.jsonl").exists());
        assert!(dir.path().join("pg_point-lookup_20rps.jsonl").exists());
        let summary = std::fs::read_to_string(dir.path().join("pg_point-lookup_summary.csv")).unwrap();
        assert_eq!(summary.lines().count(), 3);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(5_000)]
    async fn failed_probe_runs_nothing() {
        let backend = MockBackend::fixed(Duration::from_millis(2)).failing_probe();
        let res = Suite::new(config("down", 1.).max_requests(5), backend)
            .rates([10.])
            .run()
            .await;

        assert!(matches!(res, Err(SuiteError::Probe(BackendError::Network(_)))));
    }
}

mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;
    use mock_backend::MockBackend;
    use std::sync::Arc;
    use std::time::Duration;
    use tandem::export::{export_summary_csv, CsvExporter, JsonLinesExporter};
    use tandem::prelude::*;

    async fn sealed_run() -> Result<RunResult, anyhow::Error> {
        let backend = Arc::new(MockBackend::fixed(Duration::from_millis(3)).fail_every(4));
        let result = Benchmark::shared(
            config("export", 40.)
                .duration(Duration::from_millis(500))
                .workers(2),
            backend,
        )
        .await?;
        Ok(result)
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[ntest::timeout(10_000)]
    async fn repeated_exports_are_identical() -> Result<(), anyhow::Error> {
        let result = sealed_run().await?;
        let dir = tempfile::tempdir()?;

        let first = dir.path().join("first.jsonl");
        let second = dir.path().join("second.jsonl");
        JsonLinesExporter.export(&result, &first)?;
        JsonLinesExporter.export(&result, &second)?;
        let first = std::fs::read(first)?;
        assert_eq!(first, std::fs::read(second)?);

        let a = CsvExporter.export(&result, dir.path(), "a")?;
        let b = CsvExporter.export(&result, dir.path(), "b")?;
        assert_eq!(std::fs::read(a.samples)?, std::fs::read(b.samples)?);
        assert_eq!(std::fs::read(a.run)?, std::fs::read(b.run)?);

        // Only the destinations are left behind.
        let mut names = vec![];
        for entry in std::fs::read_dir(dir.path())? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(
            names,
            vec![
                "a.run.csv",
                "a.samples.csv",
                "b.run.csv",
                "b.samples.csv",
                "first.jsonl",
                "second.jsonl"
            ]
        );
        Ok(())
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[ntest::timeout(10_000)]
    async fn json_lines_match_the_sealed_result() -> Result<(), anyhow::Error> {
        let result = sealed_run().await?;
        let mut out = vec![];
        JsonLinesExporter.write(&result, &mut out)?;
        let lines = String::from_utf8(out)?
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<Vec<serde_json::Value>, _>>()?;

        let run = &lines[0];
        assert_eq!(run["record"], "run");
        assert_eq!(run["run_id"], result.run_id().to_string());
        assert_eq!(run["sample_count"], result.samples().len() as u64);
        assert_eq!(run["ticks_scheduled"], result.ticks_scheduled());
        assert_eq!(run["tick_policy"], "skip");
        assert_eq!(run["degraded"], false);
        assert_eq!(lines.len(), result.samples().len() + 1);

        let failures = lines[1..]
            .iter()
            .filter(|l| l["outcome"] == "failure")
            .count() as u64;
        assert_eq!(failures, result.failure_count());
        assert!(lines[1..].iter().all(|l| l["record"] == "sample"));
        Ok(())
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[ntest::timeout(10_000)]
    async fn summary_table_has_one_row_per_run() -> Result<(), anyhow::Error> {
        let result = sealed_run().await?;
        let stats = RunStatistics::from_result(&result);
        assert_eq!(stats.successful + stats.failed, result.samples().len() as u64);

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("summary.csv");
        export_summary_csv(&[stats.clone(), stats], &path)?;
        let text = std::fs::read_to_string(path)?;
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).is_some_and(|row| row.starts_with("export,40,")));
        Ok(())
    }
}

use anyhow::Result;
use mock_backend::MockBackend;
use std::time::Duration;
use tandem::export::{write_summary_csv, JsonLinesExporter};
use tandem::prelude::*;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("tandem=info,compare=info")
        .init();

    let workload =
        Workload::new("point-lookup", "SELECT v FROM kv WHERE k = $1").key_range(1, 100_000);
    let config = |backend_id: &str| {
        RunConfig::new(backend_id, workload.clone())
            .rate(200.)
            .workers(16)
            .duration(Duration::from_secs(20))
            .warmup(Duration::from_secs(2))
    };

    let fast = Benchmark::new(config("fast"), MockBackend::skew_normal(4., 1., 4.)?).await?;
    let slow = Benchmark::new(config("slow"), MockBackend::skew_normal(25., 8., 6.)?).await?;

    let mut stats = vec![];
    for result in [fast, slow] {
        JsonLinesExporter.export(&result, format!("{}.jsonl", result.backend_id()))?;
        stats.push(RunStatistics::from_result(&result));
    }

    info!("Comparison:");
    write_summary_csv(&stats, std::io::stdout())?;
    Ok(())
}

//! Sweep a capacity-limited backend across increasing rates. Ctrl-C stops the current run.
//!
//! Pass a JSON run configuration as the first argument to override the built-in template.
use anyhow::{Context, Result};
use mock_backend::MockBackend;
use std::num::NonZeroU32;
use std::time::Duration;
use tandem::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("tandem=info,sweep=info,mock_backend=warn")
        .init();

    let template = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str::<RunConfig>(&text).with_context(|| format!("parsing {path}"))?
        }
        None => RunConfig::new("limited", Workload::new("scan", "SELECT count(*) FROM kv"))
            .workers(32)
            .duration(Duration::from_secs(10))
            .request_timeout(Duration::from_millis(500)),
    };

    let backend = MockBackend::fixed(Duration::from_millis(10))
        .capacity(NonZeroU32::new(700).context("capacity")?);

    let handle = Benchmark::new(template.clone().rate(100.), backend).start()?;
    let stopper = handle.stopper();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping run");
            stopper.stop();
        }
    });
    let baseline = handle.await?;
    info!(
        "Baseline: {:?}",
        RunStatistics::from_result(&baseline)
    );

    let backend = MockBackend::fixed(Duration::from_millis(10))
        .capacity(NonZeroU32::new(700).context("capacity")?);
    let report = Suite::new(template, backend)
        .rates([250., 500., 750., 1_000.])
        .output_dir(".")
        .run()
        .await?;

    for stats in &report.statistics {
        info!(
            "{}/s -> {:.1}/s, p99 {:?}, missed {}",
            stats.target_rate, stats.actual_rate, stats.latency_p99, stats.missed
        );
    }
    Ok(())
}

//! Rate sweeps: the same backend and workload across a list of target rates.
use crate::error::SuiteError;
use crate::export::{export_summary_csv, JsonLinesExporter};
use crate::run::Benchmark;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_core::{Backend, RunConfig, RunResult, RunStatistics};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Runs of a completed suite, in rate order.
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub results: Vec<RunResult>,
    pub statistics: Vec<RunStatistics>,
}

/// Sequence of runs at increasing (or any) target rates against one backend.
///
/// The backend is probed once before the first run. Runs never overlap.
pub struct Suite<B> {
    backend: Arc<B>,
    template: RunConfig,
    rates: Vec<f64>,
    output: Option<PathBuf>,
}

impl<B> Suite<B>
where
    B: Backend + Sync + 'static,
{
    /// `template` supplies everything but the rate: backend id, workload, bounds, workers.
    pub fn new(template: RunConfig, backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            template,
            rates: vec![],
            output: None,
        }
    }

    pub fn rates(mut self, rates: impl IntoIterator<Item = f64>) -> Self {
        self.rates = rates.into_iter().collect();
        self
    }

    /// Export every run as JSON Lines, plus the summary table, into `dir`.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output = Some(dir.into());
        self
    }

    /// Configurations for each run, all validated before anything is started.
    pub fn configs(&self) -> Result<Vec<RunConfig>, SuiteError> {
        if self.rates.is_empty() {
            return Err(SuiteError::NoRates);
        }

        self.rates
            .iter()
            .map(|&rate| {
                let config = self.template.clone().rate(rate);
                config
                    .validate()
                    .map(|_| config)
                    .map_err(|source| SuiteError::Config { rate, source })
            })
            .collect()
    }

    #[instrument(name = "suite", skip_all, fields(backend = %self.template.backend_id))]
    pub async fn run(self) -> Result<SuiteReport, SuiteError> {
        let configs = self.configs()?;

        if let Err(err) = self.backend.probe().await {
            error!("Connectivity probe failed: {err}");
            return Err(SuiteError::Probe(err));
        }
        info!("Probe succeeded, running {} rates", configs.len());

        let mut results = Vec::with_capacity(configs.len());
        let mut statistics = Vec::with_capacity(configs.len());
        for config in configs {
            let rate = config.rate;
            let result = Benchmark::shared(config, self.backend.clone()).await?;
            let stats = RunStatistics::from_result(&result);
            info!(
                "Rate {rate}: achieved {:.2}/s, p99 {:?}, {} failed, {} missed, {} lost",
                stats.actual_rate, stats.latency_p99, stats.failed, stats.missed, stats.lost
            );

            if let Some(dir) = &self.output {
                JsonLinesExporter.export(&result, run_path(dir, &result))?;
            }
            results.push(result);
            statistics.push(stats);
        }

        if let Some(dir) = &self.output {
            export_summary_csv(&statistics, summary_path(dir, &self.template))?;
        }

        Ok(SuiteReport {
            results,
            statistics,
        })
    }
}

/// `<backend>_<workload>_<rate>rps.jsonl`
pub fn run_path(dir: &Path, result: &RunResult) -> PathBuf {
    let config = result.config();
    dir.join(format!(
        "{}_{}_{}rps.jsonl",
        file_safe(&config.backend_id),
        file_safe(&config.workload.name),
        config.rate
    ))
}

/// `<backend>_<workload>_summary.csv`
pub fn summary_path(dir: &Path, template: &RunConfig) -> PathBuf {
    dir.join(format!(
        "{}_{}_summary.csv",
        file_safe(&template.backend_id),
        file_safe(&template.workload.name)
    ))
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

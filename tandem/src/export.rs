//! Persisting sealed runs.
//!
//! Exports are derived only from the sealed [`RunResult`], carry no export-time data, and are
//! written through a temporary file that is renamed into place, so exporting the same result
//! twice produces byte-identical files and a reader never sees a partial file.
use crate::error::ExportError;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tandem_core::{RunResult, RunStatistics, Sample};
use tempfile::NamedTempFile;
use time::format_description::well_known::Rfc3339;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// One row per sample.
#[derive(Debug, Serialize)]
pub struct SampleRecord<'a> {
    pub run_id: &'a str,
    pub backend_id: &'a str,
    /// RFC 3339 issue time.
    pub timestamp: String,
    /// End-to-end latency in nanoseconds.
    pub latency: u64,
    pub outcome: &'static str,
    /// Empty for successful samples.
    pub error_class: &'static str,
    pub worker_id: u32,
    pub sequence: u64,
    pub tick: u64,
    /// Scheduling lag in nanoseconds.
    pub lag: u64,
    pub rows: Option<u64>,
    pub error: &'a str,
}

impl<'a> SampleRecord<'a> {
    pub fn new(
        result: &RunResult,
        run_id: &'a str,
        sample: &'a Sample,
    ) -> Result<Self, ExportError> {
        let (rows, error) = match &sample.outcome {
            tandem_core::Outcome::Success { rows, .. } => (*rows, ""),
            tandem_core::Outcome::Failure { message, .. } => (None, message.as_str()),
        };
        Ok(Self {
            run_id,
            backend_id: &sample.backend_id,
            timestamp: result.timestamp_of(sample).format(&Rfc3339)?,
            latency: nanos(sample.latency),
            outcome: sample.outcome.label(),
            error_class: sample.outcome.error_class().map_or("", |c| c.as_str()),
            worker_id: sample.worker_id,
            sequence: sample.sequence,
            tick: sample.tick,
            lag: nanos(sample.lag()),
            rows,
            error,
        })
    }
}

/// Run-level metadata record.
#[derive(Debug, Serialize)]
pub struct RunRecord<'a> {
    pub run_id: &'a str,
    pub backend_id: &'a str,
    pub workload: &'a str,
    pub target_rate: f64,
    pub worker_count: usize,
    /// Configured duration bound in seconds.
    pub duration: Option<f64>,
    pub request_limit: Option<u64>,
    pub tick_policy: String,
    pub start_time: String,
    pub end_time: String,
    pub ticks_scheduled: u64,
    pub sample_count: u64,
    pub missed_tick_count: u64,
    pub lost_sample_count: u64,
    pub degraded: bool,
    /// Faults separated by `"; "`.
    pub faults: String,
}

impl<'a> RunRecord<'a> {
    pub fn new(result: &'a RunResult, run_id: &'a str) -> Result<Self, ExportError> {
        let config = result.config();
        Ok(Self {
            run_id,
            backend_id: result.backend_id(),
            workload: &config.workload.name,
            target_rate: config.rate,
            worker_count: config.workers,
            duration: config.duration.map(|d| d.as_secs_f64()),
            request_limit: config.max_requests,
            tick_policy: config.tick_policy.to_string(),
            start_time: result.started_at().format(&Rfc3339)?,
            end_time: result.ended_at().format(&Rfc3339)?,
            ticks_scheduled: result.ticks_scheduled(),
            sample_count: result.samples().len() as u64,
            missed_tick_count: result.missed_ticks(),
            lost_sample_count: result.lost_samples(),
            degraded: result.is_degraded(),
            faults: result
                .faults()
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Line<'a> {
    Run(RunRecord<'a>),
    Sample(SampleRecord<'a>),
}

/// Writes a run as JSON Lines: the run record first, then one line per sample in issue order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesExporter;

impl JsonLinesExporter {
    pub fn write<W: Write>(&self, result: &RunResult, mut writer: W) -> Result<(), ExportError> {
        let run_id = result.run_id().to_string();
        serde_json::to_writer(&mut writer, &Line::Run(RunRecord::new(result, &run_id)?))?;
        writer.write_all(b"\n")?;
        for sample in result.samples_by_issue() {
            let line = Line::Sample(SampleRecord::new(result, &run_id, sample)?);
            serde_json::to_writer(&mut writer, &line)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Write the run to `path`, replacing any existing file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn export(&self, result: &RunResult, path: impl AsRef<Path>) -> Result<(), ExportError> {
        write_atomically(path.as_ref(), |writer| self.write(result, writer))?;
        debug!("Exported {} samples", result.samples().len());
        Ok(())
    }

    /// Add the run to the end of `path`, creating it if needed. The file is still replaced
    /// atomically, so a failed append leaves the previous contents intact.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn append(&self, result: &RunResult, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let mut existing = vec![];
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut existing)?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        write_atomically(path, |writer| {
            writer.write_all(&existing)?;
            self.write(result, writer)
        })?;
        debug!("Appended {} samples", result.samples().len());
        Ok(())
    }
}

/// Paths written by [`CsvExporter::export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFiles {
    pub samples: PathBuf,
    pub run: PathBuf,
}

/// Writes a run as two CSV tables, `<stem>.samples.csv` and `<stem>.run.csv`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExporter;

impl CsvExporter {
    pub fn write_samples<W: Write>(&self, result: &RunResult, writer: W) -> Result<(), ExportError> {
        let run_id = result.run_id().to_string();
        let mut wtr = csv::Writer::from_writer(writer);
        for sample in result.samples_by_issue() {
            wtr.serialize(SampleRecord::new(result, &run_id, sample)?)?;
        }
        if result.samples().is_empty() {
            wtr.write_record(SAMPLE_HEADERS)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_run<W: Write>(&self, result: &RunResult, writer: W) -> Result<(), ExportError> {
        let run_id = result.run_id().to_string();
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.serialize(RunRecord::new(result, &run_id)?)?;
        wtr.flush()?;
        Ok(())
    }

    #[instrument(skip_all, fields(dir = %dir.as_ref().display(), stem = %stem))]
    pub fn export(
        &self,
        result: &RunResult,
        dir: impl AsRef<Path>,
        stem: &str,
    ) -> Result<CsvFiles, ExportError> {
        let dir = dir.as_ref();
        let files = CsvFiles {
            samples: dir.join(format!("{stem}.samples.csv")),
            run: dir.join(format!("{stem}.run.csv")),
        };
        write_atomically(&files.samples, |writer| self.write_samples(result, writer))?;
        write_atomically(&files.run, |writer| self.write_run(result, writer))?;
        debug!("Exported {} samples", result.samples().len());
        Ok(files)
    }
}

// Header row for a run without samples; serde only emits headers alongside the first record.
const SAMPLE_HEADERS: [&str; 12] = [
    "run_id",
    "backend_id",
    "timestamp",
    "latency",
    "outcome",
    "error_class",
    "worker_id",
    "sequence",
    "tick",
    "lag",
    "rows",
    "error",
];

/// Write the cross-backend comparison table, one row per run.
///
/// Latencies are in seconds with four decimals, rates with two.
pub fn write_summary_csv<W: Write>(stats: &[RunStatistics], writer: W) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "backend_id",
        "target_rate",
        "actual_rate",
        "min",
        "avg",
        "median",
        "p90",
        "p95",
        "p99",
        "max",
        "successful",
        "failed",
        "lost",
        "missed",
    ])?;
    for s in stats {
        wtr.write_record([
            s.backend_id.clone(),
            s.target_rate.to_string(),
            format!("{:.2}", s.actual_rate),
            secs(s.latency_min),
            secs(s.latency_mean),
            secs(s.latency_median),
            secs(s.latency_p90),
            secs(s.latency_p95),
            secs(s.latency_p99),
            secs(s.latency_max),
            s.successful.to_string(),
            s.failed.to_string(),
            s.lost.to_string(),
            s.missed.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn export_summary_csv(stats: &[RunStatistics], path: impl AsRef<Path>) -> Result<(), ExportError> {
    write_atomically(path.as_ref(), |writer| write_summary_csv(stats, writer))?;
    debug!("Exported summary of {} runs", stats.len());
    Ok(())
}

fn write_atomically<F>(path: &Path, write: F) -> Result<(), ExportError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), ExportError>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| ExportError::Io(err.error))?;
    Ok(())
}

fn nanos(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn secs(d: std::time::Duration) -> String {
    format!("{:.4}", d.as_secs_f64())
}

use crate::backend::{BackendError, Execution};
use crate::config::RunConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Classification of a failed request. The string forms are part of the export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    Network,
    Backend,
    Unavailable,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::Network => "network",
            ErrorClass::Backend => "backend",
            ErrorClass::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        rows: Option<u64>,
        reported: Option<Duration>,
    },
    Failure {
        class: ErrorClass,
        message: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { class, .. } => Some(*class),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Failure { .. } => "failure",
        }
    }
}

impl From<Result<Execution, BackendError>> for Outcome {
    fn from(res: Result<Execution, BackendError>) -> Self {
        match res {
            Ok(Execution { rows, elapsed }) => Outcome::Success {
                rows,
                reported: elapsed,
            },
            Err(err) => Outcome::Failure {
                class: err.class(),
                message: err.to_string(),
            },
        }
    }
}

/// One measured request.
///
/// All offsets are relative to the start of the measured window and taken from the monotonic
/// clock, so they are unaffected by wall-clock adjustments during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub backend_id: Arc<str>,
    pub worker_id: u32,
    /// Position of this sample in its worker's issue order, starting at 0.
    pub sequence: u64,
    /// Index of the clock tick this request was issued for.
    pub tick: u64,
    pub scheduled: Duration,
    pub issued: Duration,
    pub latency: Duration,
    pub outcome: Outcome,
}

impl Sample {
    pub fn completed(&self) -> Duration {
        self.issued + self.latency
    }

    /// Scheduling error: how long after its tick this request actually went out.
    pub fn lag(&self) -> Duration {
        self.issued.saturating_sub(self.scheduled)
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Lifecycle of a run. Transitions only ever move one step forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Idle,
    Running,
    Draining,
    Sealed,
}

impl RunPhase {
    pub fn next(&self) -> Option<RunPhase> {
        match self {
            RunPhase::Idle => Some(RunPhase::Running),
            RunPhase::Running => Some(RunPhase::Draining),
            RunPhase::Draining => Some(RunPhase::Sealed),
            RunPhase::Sealed => None,
        }
    }

    pub fn can_advance_to(&self, to: RunPhase) -> bool {
        self.next() == Some(to)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Draining => "draining",
            RunPhase::Sealed => "sealed",
        };
        f.write_str(s)
    }
}

/// Infrastructure problems a run survived. A run carrying faults is still sealed with every sample
/// collected up to the fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFault {
    WorkerUnavailable { worker_id: u32, message: String },
    WorkerPanicked { worker_id: u32, message: String },
    CollectorRejected { count: u64 },
    CollectorFailed { message: String },
    AllWorkersStopped,
    CancelledDuringWarmup,
}

impl fmt::Display for RunFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFault::WorkerUnavailable { worker_id, message } => {
                write!(f, "worker {worker_id} stopped: {message}")
            }
            RunFault::WorkerPanicked { worker_id, message } => {
                write!(f, "worker {worker_id} panicked: {message}")
            }
            RunFault::CollectorRejected { count } => {
                write!(f, "collector rejected {count} samples after close")
            }
            RunFault::CollectorFailed { message } => write!(f, "collector failed: {message}"),
            RunFault::AllWorkersStopped => write!(f, "all workers stopped before the run bound"),
            RunFault::CancelledDuringWarmup => write!(f, "run stopped during warmup"),
        }
    }
}

/// Per-worker bookkeeping, returned when a worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: u32,
    pub issued: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Ticks dequeued too late to honor under the skip policy.
    pub stale_ticks: u64,
    pub lost: u64,
    /// Handoffs that found the collector saturated and had to wait.
    pub handoff_waits: u64,
    pub handoff_wait: Duration,
}

/// Everything the coordinator hands over when sealing a run.
#[derive(Debug)]
pub struct RunParts {
    pub run_id: Uuid,
    pub config: Arc<RunConfig>,
    pub samples: Vec<Sample>,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
    pub ticks_scheduled: u64,
    pub missed_ticks: u64,
    pub lost_samples: u64,
    pub stopped_at: Option<Duration>,
    pub faults: Vec<RunFault>,
    pub workers: Vec<WorkerReport>,
}

/// The sealed outcome of a run.
///
/// There is no way to mutate a `RunResult` once built; every accessor hands out shared
/// references, so repeated reads always observe the same data.
#[derive(Debug, Clone)]
pub struct RunResult {
    run_id: Uuid,
    config: Arc<RunConfig>,
    samples: Vec<Sample>,
    started_at: OffsetDateTime,
    ended_at: OffsetDateTime,
    elapsed: Duration,
    ticks_scheduled: u64,
    missed_ticks: u64,
    lost_samples: u64,
    stopped_at: Option<Duration>,
    faults: Vec<RunFault>,
    workers: Vec<WorkerReport>,
}

impl RunResult {
    pub fn seal(parts: RunParts) -> Self {
        let RunParts {
            run_id,
            config,
            samples,
            started_at,
            elapsed,
            ticks_scheduled,
            missed_ticks,
            lost_samples,
            stopped_at,
            faults,
            mut workers,
        } = parts;

        workers.sort_by_key(|w| w.worker_id);

        Self {
            run_id,
            config,
            samples,
            started_at,
            ended_at: started_at + elapsed,
            elapsed,
            ticks_scheduled,
            missed_ticks,
            lost_samples,
            stopped_at,
            faults,
            workers,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn backend_id(&self) -> &str {
        &self.config.backend_id
    }

    /// Samples in the order the collector received them. Order is preserved per worker only; use
    /// [`RunResult::samples_by_issue`] when cross-worker order matters.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn samples_by_issue(&self) -> Vec<&Sample> {
        let mut samples: Vec<_> = self.samples.iter().collect();
        samples.sort_by_key(|s| (s.issued, s.worker_id, s.sequence));
        samples
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn ended_at(&self) -> OffsetDateTime {
        self.ended_at
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Wall-clock issue time of a sample.
    pub fn timestamp_of(&self, sample: &Sample) -> OffsetDateTime {
        self.started_at + sample.issued
    }

    pub fn ticks_scheduled(&self) -> u64 {
        self.ticks_scheduled
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks
    }

    pub fn lost_samples(&self) -> u64 {
        self.lost_samples
    }

    /// Offset at which an external stop was acknowledged, if the run was stopped early.
    pub fn stopped_at(&self) -> Option<Duration> {
        self.stopped_at
    }

    pub fn faults(&self) -> &[RunFault] {
        &self.faults
    }

    pub fn is_degraded(&self) -> bool {
        !self.faults.is_empty()
    }

    pub fn workers(&self) -> &[WorkerReport] {
        &self.workers
    }

    pub fn success_count(&self) -> u64 {
        self.samples.iter().filter(|s| s.is_success()).count() as u64
    }

    pub fn failure_count(&self) -> u64 {
        self.samples.len() as u64 - self.success_count()
    }

    /// Samples, lost samples and missed ticks together. Equal to [`RunResult::ticks_scheduled`]
    /// for every run.
    pub fn accounted_ticks(&self) -> u64 {
        self.samples.len() as u64 + self.lost_samples + self.missed_ticks
    }

    /// Length of the window the offered load was applied over.
    pub fn window(&self) -> Duration {
        let window = match (self.stopped_at, self.config.duration) {
            (Some(stopped), _) => stopped,
            (None, Some(duration)) => duration,
            (None, None) => self.elapsed,
        };
        window.min(self.elapsed)
    }
}

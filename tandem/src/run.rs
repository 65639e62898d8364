//! Run coordination: lifecycle, cancellation and sealing.
use crate::atomics::RunAtomics;
use crate::collector::{Collector, CollectorView, SampleSink};
use crate::error::RunError;
use crate::measurement::Progress;
use crate::scheduler::Clock;
use crate::worker::{panic_message, Worker, WorkerContext, WorkerExit};
use pin_project::pin_project;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tandem_core::{
    Backend, RunConfig, RunFault, RunParts, RunPhase, RunResult, Sample, TickPolicy,
    WorkerReport,
};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};
use uuid::Uuid;

/// A single load run against a single backend.
///
/// Either `.await` it directly to run to completion, or call [`Benchmark::start`] to get a
/// [`RunHandle`] for observing and stopping the run while it is in flight.
///
/// # Example
/// ```no_run
/// use tandem::prelude::*;
/// use std::time::Duration;
///
/// struct Noop;
///
/// impl Backend for Noop {
///     async fn execute(&self, _query: &Query) -> Result<Execution, BackendError> {
///         Ok(Execution::rows(1))
///     }
///
///     async fn probe(&self) -> Result<(), BackendError> {
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let config = RunConfig::new("noop", Workload::new("point-lookup", "SELECT 1"));
///     let result = Benchmark::new(config, Noop)
///         .rate(250.)
///         .workers(8)
///         .duration(Duration::from_secs(30))
///         .await
///         .unwrap();
///     println!("{}", RunStatistics::from_result(&result).actual_rate);
/// }
/// ```
pub struct Benchmark<B> {
    backend: Arc<B>,
    config: RunConfig,
}

impl<B> Benchmark<B>
where
    B: Backend + Sync + 'static,
{
    pub fn new(config: RunConfig, backend: B) -> Self {
        Self::shared(config, Arc::new(backend))
    }

    /// Build a benchmark around a backend that is also used elsewhere, e.g. by a suite.
    pub fn shared(config: RunConfig, backend: Arc<B>) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Target requests per second across all workers.
    pub fn rate(mut self, rate: f64) -> Self {
        self.config.rate = rate;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.config.duration = Some(duration);
        self
    }

    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.config.max_requests = Some(max_requests);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn tick_policy(mut self, tick_policy: TickPolicy) -> Self {
        self.config.tick_policy = tick_policy;
        self
    }

    /// Load the backend for this long before measuring. Warmup samples are discarded.
    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.config.warmup = Some(warmup);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Validate the configuration and start the run.
    ///
    /// Nothing is spawned when the configuration is rejected, which is reported as
    /// [`RunError::Config`]. Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<RunHandle, RunError> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let config = Arc::new(self.config);
        let (phase, phase_rx) = PhaseCell::new();
        let stop = StopHandle::new();
        let atomics = RunAtomics::new();
        let (collector, sink) = Collector::new(&config, atomics.clone());
        let view = collector.view();

        phase.advance(RunPhase::Running)?;

        let span = info_span!("run", %run_id, backend = %config.backend_id);
        let task = tokio::spawn(
            coordinate(RunContext {
                backend: self.backend,
                config,
                phase,
                stop: stop.clone(),
                collector,
                sink,
                atomics,
                run_id,
            })
            .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            phase: phase_rx,
            stop,
            view,
            task,
        })
    }
}

impl<B> IntoFuture for Benchmark<B>
where
    B: Backend + Sync + 'static,
{
    type Output = Result<RunResult, RunError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.start()?.await })
    }
}

/// Handle to an in-flight run. Resolves to the sealed [`RunResult`].
///
/// Dropping the handle does not stop the run; use [`RunHandle::stop`] for that.
#[pin_project]
pub struct RunHandle {
    run_id: Uuid,
    phase: watch::Receiver<RunPhase>,
    stop: StopHandle,
    view: CollectorView,
    #[pin]
    task: JoinHandle<Result<RunResult, RunError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase change of this run.
    pub fn phases(&self) -> watch::Receiver<RunPhase> {
        self.phase.clone()
    }

    /// Latest progress snapshot published by the collector.
    pub fn progress(&self) -> Arc<Progress> {
        self.view.progress()
    }

    /// Copy of the samples collected so far. Only meaningful before the run is sealed; the sealed
    /// sample set is owned by the [`RunResult`].
    pub fn partial_samples(&self) -> Vec<Sample> {
        self.view.partial_samples()
    }

    /// Request the run to stop. Returns `true` if this call initiated the stop.
    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    pub fn stopper(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the run to be sealed.
    pub async fn wait(self) -> Result<RunResult, RunError> {
        self.await
    }
}

impl Future for RunHandle {
    type Output = Result<RunResult, RunError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().task.poll(cx)) {
            Ok(res) => Poll::Ready(res),
            Err(err) => Poll::Ready(Err(RunError::Coordinator(err.to_string()))),
        }
    }
}

/// Cloneable, idempotent stop signal for a run.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` if this call initiated the stop, `false` if the run was already stopping.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Owner of the phase of a run. Only ever moves one step forward.
struct PhaseCell(watch::Sender<RunPhase>);

impl PhaseCell {
    fn new() -> (Self, watch::Receiver<RunPhase>) {
        let (tx, rx) = watch::channel(RunPhase::Idle);
        (Self(tx), rx)
    }

    fn advance(&self, to: RunPhase) -> Result<(), InvalidTransition> {
        let mut res = Ok(());
        self.0.send_if_modified(|phase| {
            if phase.can_advance_to(to) {
                debug!("Run phase {phase} -> {to}");
                *phase = to;
                true
            } else {
                res = Err(InvalidTransition { from: *phase, to });
                false
            }
        });
        res
    }
}

#[derive(Debug)]
struct InvalidTransition {
    from: RunPhase,
    to: RunPhase,
}

impl From<InvalidTransition> for RunError {
    fn from(err: InvalidTransition) -> Self {
        RunError::InvalidTransition {
            from: err.from,
            to: err.to,
        }
    }
}

struct RunContext<B> {
    run_id: Uuid,
    backend: Arc<B>,
    config: Arc<RunConfig>,
    phase: PhaseCell,
    stop: StopHandle,
    collector: Collector,
    sink: SampleSink,
    atomics: RunAtomics,
}

async fn coordinate<B>(ctx: RunContext<B>) -> Result<RunResult, RunError>
where
    B: Backend + Sync + 'static,
{
    let RunContext {
        run_id,
        backend,
        config,
        phase,
        stop,
        collector,
        sink,
        atomics,
    } = ctx;
    info!("Starting run: {config}");

    let mut faults = vec![];

    if let Some(warmup) = config.warmup_config() {
        let warmup = Arc::new(warmup);
        info!(
            "Warming up for {}",
            humantime::format_duration(warmup.duration.unwrap_or_default())
        );
        let warmup_atomics = RunAtomics::new();
        let (warmup_collector, warmup_sink) = Collector::new(&warmup, warmup_atomics.clone());
        let discarded = drive(
            &backend,
            &warmup,
            warmup_collector,
            warmup_sink,
            warmup_atomics,
            &stop,
            None,
        )
        .instrument(info_span!("warmup"))
        .await?;
        debug!("Warmup finished, discarding {} samples", discarded.samples.len());
        faults.extend(discarded.faults);

        if stop.is_stopped() {
            warn!("Run stopped during warmup");
            faults.push(RunFault::CancelledDuringWarmup);
        }
    }

    let window = if stop.is_stopped() {
        // Nothing of the measured window ran.
        phase.advance(RunPhase::Draining)?;
        sink.close();
        Window::skipped(atomics)
    } else {
        drive(
            &backend,
            &config,
            collector,
            sink,
            atomics,
            &stop,
            Some(&phase),
        )
        .await?
    };
    faults.extend(window.faults);

    let result = RunResult::seal(RunParts {
        run_id,
        config,
        samples: window.samples,
        started_at: window.started_at,
        elapsed: window.elapsed,
        ticks_scheduled: window.ticks_scheduled,
        missed_ticks: window.missed_ticks,
        lost_samples: window.lost_samples,
        stopped_at: window.stopped_at,
        faults,
        workers: window.workers,
    });
    phase.advance(RunPhase::Sealed)?;

    info!(
        "Run sealed after {}: {} samples ({} failed), {} missed ticks, {} lost samples",
        humantime::format_duration(Duration::from_millis(result.elapsed().as_millis() as u64)),
        result.samples().len(),
        result.failure_count(),
        result.missed_ticks(),
        result.lost_samples(),
    );
    for fault in result.faults() {
        warn!("Run degraded: {fault}");
    }

    Ok(result)
}

/// Outcome of one measured (or warmup) window.
struct Window {
    samples: Vec<Sample>,
    started_at: OffsetDateTime,
    elapsed: Duration,
    ticks_scheduled: u64,
    missed_ticks: u64,
    lost_samples: u64,
    stopped_at: Option<Duration>,
    faults: Vec<RunFault>,
    workers: Vec<WorkerReport>,
}

impl Window {
    fn skipped(atomics: RunAtomics) -> Self {
        Self {
            samples: vec![],
            started_at: OffsetDateTime::now_utc(),
            elapsed: Duration::ZERO,
            ticks_scheduled: atomics.ticks(),
            missed_ticks: atomics.missed(),
            lost_samples: atomics.lost(),
            stopped_at: Some(Duration::ZERO),
            faults: vec![],
            workers: vec![],
        }
    }
}

/// Apply load for one window: start the collector, the workers and the clock, wait for the bound
/// or a stop, drain, then collect.
async fn drive<B>(
    backend: &Arc<B>,
    config: &Arc<RunConfig>,
    collector: Collector,
    sink: SampleSink,
    atomics: RunAtomics,
    stop: &StopHandle,
    phase: Option<&PhaseCell>,
) -> Result<Window, RunError>
where
    B: Backend + Sync + 'static,
{
    let (tick_tx, tick_rx) =
        async_channel::bounded(config.tick_policy.queue_capacity(config.workers));
    let view = collector.view();
    let started_at = OffsetDateTime::now_utc();
    let start = Instant::now();

    let collector_task = tokio::spawn(collector.run(start).in_current_span());

    let ctx = WorkerContext {
        backend: backend.clone(),
        config: config.clone(),
        ticks: tick_rx.clone(),
        sink: sink.clone(),
        stop: stop.subscribe(),
        atomics: atomics.clone(),
        start,
    };
    let mut workers = JoinSet::new();
    for id in 0..config.workers as u32 {
        workers.spawn(Worker::new(id, ctx.clone()).run().in_current_span());
    }
    drop(ctx);

    let mut clock = tokio::spawn(
        Clock::new(config.clone(), tick_tx, atomics.clone(), stop.subscribe())
            .run(start)
            .in_current_span(),
    );

    let mut exits = Exits::default();
    let mut stop_rx = stop.subscribe();
    let mut stopped_at = None;
    let mut workers_gone = false;

    // Stop comes first so a stop that also ended the clock is still acknowledged. The clock comes
    // before worker exits so workers leaving a closed queue are not mistaken for a dead pool.
    let clock_report = loop {
        tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopped| *stopped), if stopped_at.is_none() && !workers_gone => {
                let at = start.elapsed();
                info!("Stop acknowledged at {}", humantime::format_duration(at));
                stopped_at = Some(at);
            }
            res = &mut clock => match res {
                Ok(report) => break report,
                Err(err) => {
                    stop.stop();
                    return Err(RunError::Coordinator(format!("clock task failed: {err}")));
                }
            },
            Some(joined) = workers.join_next() => {
                exits.record(joined);
                if workers.is_empty() && !tick_rx.is_closed() && !stop.is_stopped() {
                    warn!("Every worker has stopped; ending the run early");
                    exits.faults.push(RunFault::AllWorkersStopped);
                    workers_gone = true;
                    stop.stop();
                }
            }
        }
    };

    if let Some(phase) = phase {
        phase.advance(RunPhase::Draining)?;
    }
    debug!("Draining {} workers", workers.len());
    while let Some(joined) = workers.join_next().await {
        exits.record(joined);
    }

    // Ticks still queued when the workers left were never honored.
    let mut unhonored = 0;
    while tick_rx.try_recv().is_ok() {
        unhonored += 1;
    }
    if unhonored > 0 {
        debug!("{unhonored} queued ticks were never picked up");
        atomics.ticks_missed(unhonored);
    }

    sink.close();
    let Exits {
        reports,
        mut faults,
        panics,
    } = exits;

    let samples = match collector_task.await {
        Ok(samples) => samples,
        Err(err) => {
            error!("Collector task failed: {err}");
            faults.push(RunFault::CollectorFailed {
                message: err.to_string(),
            });
            view.take_samples()
        }
    };
    let elapsed = start.elapsed();

    // Workers that never reported back are the ones that panicked.
    let mut silent = (0..config.workers as u32)
        .filter(|id| !reports.iter().any(|r| r.worker_id == *id));
    for message in panics {
        let worker_id = silent.next().unwrap_or(u32::MAX);
        error!("Worker {worker_id} panicked: {message}");
        faults.push(RunFault::WorkerPanicked { worker_id, message });
    }

    let rejected = atomics.rejected();
    if rejected > 0 {
        faults.push(RunFault::CollectorRejected { count: rejected });
    }

    let ticks_scheduled = clock_report.ticks_scheduled;
    let missed_ticks = atomics.missed();
    let mut lost_samples = atomics.lost();
    let accounted = samples.len() as u64 + missed_ticks + lost_samples;
    if accounted < ticks_scheduled {
        // Requests in flight on a worker that died never produced a sample.
        let unaccounted = ticks_scheduled - accounted;
        warn!("{unaccounted} in-flight requests were lost with their workers");
        lost_samples += unaccounted;
    }

    Ok(Window {
        samples,
        started_at,
        elapsed,
        ticks_scheduled,
        missed_ticks,
        lost_samples,
        stopped_at,
        faults,
        workers: reports,
    })
}

#[derive(Default)]
struct Exits {
    reports: Vec<WorkerReport>,
    faults: Vec<RunFault>,
    panics: Vec<String>,
}

impl Exits {
    fn record(&mut self, joined: Result<WorkerExit, JoinError>) {
        match joined {
            Ok(WorkerExit { report, fault }) => {
                self.reports.push(report);
                self.faults.extend(fault);
            }
            Err(err) if err.is_panic() => self.panics.push(panic_message(&*err.into_panic())),
            Err(err) => self.panics.push(err.to_string()),
        }
    }
}

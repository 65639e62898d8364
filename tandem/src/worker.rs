use crate::atomics::RunAtomics;
use crate::collector::{Delivery, SampleSink};
use crate::scheduler::Tick;
use async_channel::Receiver;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tandem_core::{
    Backend, BackendError, Execution, Outcome, Query, RunConfig, RunFault, Sample, WorkerReport,
};
use tokio::sync::watch;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// What a worker hands back when it exits.
#[derive(Debug)]
pub(crate) struct WorkerExit {
    pub report: WorkerReport,
    /// Set when the worker shut down because its backend became unavailable.
    pub fault: Option<RunFault>,
}

/// Everything a worker needs, shared by all workers of a run.
pub(crate) struct WorkerContext<B> {
    pub backend: Arc<B>,
    pub config: Arc<RunConfig>,
    pub ticks: Receiver<Tick>,
    pub sink: SampleSink,
    pub stop: watch::Receiver<bool>,
    pub atomics: RunAtomics,
    pub start: Instant,
}

impl<B> Clone for WorkerContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
            ticks: self.ticks.clone(),
            sink: self.sink.clone(),
            stop: self.stop.clone(),
            atomics: self.atomics.clone(),
            start: self.start,
        }
    }
}

/// A concurrent request issuer.
///
/// Pulls ticks from the shared queue, issues exactly one request per honored tick and hands the
/// resulting sample to the collector. Exits when the queue is closed and empty, when the run is
/// stopped, or when its backend reports itself unavailable.
pub(crate) struct Worker<B> {
    id: u32,
    ctx: WorkerContext<B>,
    backend_id: Arc<str>,
    workload: Arc<tandem_core::Workload>,
    rng: SmallRng,
}

impl<B> Worker<B>
where
    B: Backend + Sync + 'static,
{
    pub fn new(id: u32, ctx: WorkerContext<B>) -> Self {
        let rng = match ctx.config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => SmallRng::from_entropy(),
        };
        Self {
            id,
            backend_id: Arc::from(ctx.config.backend_id.as_str()),
            workload: Arc::new(ctx.config.workload.clone()),
            ctx,
            rng,
        }
    }

    #[instrument(name = "worker", skip_all, fields(worker_id = self.id))]
    pub async fn run(mut self) -> WorkerExit {
        let period = self.ctx.config.interval();
        let drops_stale = self.ctx.config.tick_policy.drops_stale_ticks();
        let mut report = WorkerReport {
            worker_id: self.id,
            ..Default::default()
        };
        let mut fault = None;

        loop {
            let tick = tokio::select! {
                biased;
                _ = self.ctx.stop.wait_for(|stopped| *stopped) => {
                    trace!("Worker stopped");
                    break;
                }
                tick = self.ctx.ticks.recv() => match tick {
                    Ok(tick) => tick,
                    Err(_) => break,
                },
            };

            if drops_stale && tick.is_stale(Instant::now(), period) {
                trace!("Skipping stale tick {}", tick.index);
                report.stale_ticks += 1;
                self.ctx.atomics.tick_missed();
                crate::telemetry::record_missed(&self.backend_id);
                continue;
            }

            let query = self.query();
            let issued = Instant::now();
            let res = self.execute(&query).await;
            let latency = issued.elapsed();

            let unavailable = match &res {
                Err(err @ BackendError::Unavailable(_)) => Some(err.to_string()),
                _ => None,
            };

            let sample = Sample {
                backend_id: self.backend_id.clone(),
                worker_id: self.id,
                sequence: report.issued,
                tick: tick.index,
                scheduled: tick.scheduled.saturating_duration_since(self.ctx.start),
                issued: issued.saturating_duration_since(self.ctx.start),
                latency,
                outcome: Outcome::from(res),
            };
            report.issued += 1;
            if sample.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            crate::telemetry::record_sample(&sample);

            match self.ctx.sink.deliver(sample).await {
                Ok(Delivery::Immediate) => {}
                Ok(Delivery::Waited(wait)) => {
                    report.handoff_waits += 1;
                    report.handoff_wait += wait;
                }
                Err(err) => {
                    report.lost += 1;
                    crate::telemetry::record_lost(&self.backend_id);
                    warn!("Sample for tick {} lost: {err}", tick.index);
                }
            }

            if let Some(message) = unavailable {
                error!("Backend unavailable, worker shutting down: {message}");
                fault = Some(RunFault::WorkerUnavailable {
                    worker_id: self.id,
                    message,
                });
                break;
            }
        }

        debug!(
            "Worker exiting after {} requests ({} stale ticks, {} lost)",
            report.issued, report.stale_ticks, report.lost
        );
        WorkerExit { report, fault }
    }

    fn query(&mut self) -> Query {
        let key = self
            .workload
            .key_range
            .map(|range| self.rng.gen_range(range.min..=range.max));
        Query {
            workload: self.workload.clone(),
            key,
        }
    }

    async fn execute(&self, query: &Query) -> Result<Execution, BackendError> {
        match self.ctx.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.ctx.backend.execute(query))
                .await
                .unwrap_or(Err(BackendError::Timeout)),
            None => self.ctx.backend.execute(query).await,
        }
    }
}

/// Pull the message out of a panic payload, if it carries one.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

use crate::atomics::RunAtomics;
use crate::error::CollectorError;
use crate::measurement::{Measurement, Progress};
use arc_swap::ArcSwap;
use async_channel::{Receiver, Sender, TrySendError};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tandem_core::{RunConfig, Sample, HANDOFF_INITIAL_BACKOFF};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// How a sample reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Immediate,
    Waited(Duration),
}

/// Worker side of the handoff channel.
#[derive(Clone)]
pub(crate) struct SampleSink {
    tx: Sender<Sample>,
    atomics: RunAtomics,
    timeout: Duration,
}

impl SampleSink {
    /// Hand a sample to the collector.
    ///
    /// When the channel is full the handoff is retried with exponential backoff until the
    /// configured handoff timeout. A sample that still cannot be delivered, or that is offered
    /// after the collector was closed, is counted as lost and never silently dropped.
    pub async fn deliver(&self, sample: Sample) -> Result<Delivery, CollectorError> {
        let mut sample = match self.tx.try_send(sample) {
            Ok(()) => return Ok(Delivery::Immediate),
            Err(TrySendError::Closed(_)) => {
                self.atomics.sample_rejected();
                return Err(CollectorError::Closed);
            }
            Err(TrySendError::Full(sample)) => sample,
        };

        let started = Instant::now();
        let mut backoff = HANDOFF_INITIAL_BACKOFF;
        loop {
            let waited = started.elapsed();
            let remaining = self.timeout.saturating_sub(waited);
            if remaining.is_zero() {
                self.atomics.sample_lost();
                return Err(CollectorError::Saturated(waited));
            }

            tokio::time::sleep(backoff.min(remaining)).await;
            backoff = backoff.saturating_mul(2);

            sample = match self.tx.try_send(sample) {
                Ok(()) => return Ok(Delivery::Waited(started.elapsed())),
                Err(TrySendError::Closed(_)) => {
                    self.atomics.sample_rejected();
                    return Err(CollectorError::Closed);
                }
                Err(TrySendError::Full(sample)) => sample,
            };
        }
    }

    /// Stop accepting samples. Samples already in the channel are still drained.
    pub fn close(&self) {
        self.tx.close();
    }
}

/// Read side shared with the run handle while a run is in flight.
#[derive(Clone)]
pub(crate) struct CollectorView {
    samples: Arc<RwLock<Vec<Sample>>>,
    progress: Arc<ArcSwap<Progress>>,
}

impl CollectorView {
    /// Snapshot of every sample collected so far.
    pub fn partial_samples(&self) -> Vec<Sample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.load_full()
    }

    /// Take whatever was collected, for when the collector task itself is gone.
    pub fn take_samples(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.samples.write().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Sole writer of a run's sample set.
pub(crate) struct Collector {
    rx: Receiver<Sample>,
    view: CollectorView,
    atomics: RunAtomics,
    backend_id: String,
    progress_interval: Duration,
}

impl Collector {
    pub fn new(config: &RunConfig, atomics: RunAtomics) -> (Self, SampleSink) {
        let (tx, rx) = async_channel::bounded(config.handoff_capacity);
        let view = CollectorView {
            samples: Arc::new(RwLock::new(Vec::with_capacity(
                config
                    .expected_ticks()
                    .map_or(0, |n| n.min(1 << 20) as usize),
            ))),
            progress: Arc::new(ArcSwap::from_pointee(Progress::default())),
        };
        let sink = SampleSink {
            tx,
            atomics: atomics.clone(),
            timeout: config.handoff_timeout,
        };
        let collector = Self {
            rx,
            view,
            atomics,
            backend_id: config.backend_id.clone(),
            progress_interval: config.progress_interval,
        };
        (collector, sink)
    }

    pub fn view(&self) -> CollectorView {
        self.view.clone()
    }

    /// Collect until the channel is closed and drained, then hand back every sample.
    #[instrument(name = "collector", skip_all)]
    pub async fn run(self, start: Instant) -> Vec<Sample> {
        let mut reports = interval_at(start + self.progress_interval, self.progress_interval);
        reports.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut window = Measurement::new();
        let mut totals = Totals::default();
        debug!(
            "Collector started, reporting progress every {}",
            humantime::format_duration(self.progress_interval)
        );

        loop {
            tokio::select! {
                sample = self.rx.recv() => match sample {
                    Ok(sample) => {
                        window.record(&sample);
                        totals.record(&sample);
                        self.view
                            .samples
                            .write()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(sample);
                    }
                    Err(_) => break,
                },
                _ = reports.tick() => {
                    let progress = self.publish(&window, &totals, start);
                    info!("Progress at {}: {progress}", humantime::format_duration(truncate(progress.elapsed)));
                    crate::telemetry::record_rate(&self.backend_id, progress.rate);
                    window = Measurement::new();
                }
            }
        }

        self.publish(&window, &totals, start);
        debug!("Collector drained {} samples", totals.samples);
        self.view.take_samples()
    }

    fn publish(
        &self,
        window: &Measurement,
        totals: &Totals,
        start: Instant,
    ) -> Arc<Progress> {
        let elapsed = start.elapsed();
        // The window runs from the previous snapshot, however late the report tick fired.
        let window_len = elapsed.saturating_sub(self.view.progress().elapsed);
        let progress = Arc::new(Progress {
            elapsed,
            ticks_scheduled: self.atomics.ticks(),
            samples: totals.samples,
            successes: totals.successes,
            failures: totals.samples - totals.successes,
            missed_ticks: self.atomics.missed(),
            lost_samples: self.atomics.lost(),
            rate: window.rate(window_len),
            error_rate: window.error_rate(),
            latency_p50: window.latency(0.5),
            latency_p90: window.latency(0.9),
            latency_p99: window.latency(0.99),
        });
        self.view.progress.store(progress.clone());
        progress
    }
}

#[derive(Debug, Default)]
struct Totals {
    samples: u64,
    successes: u64,
}

impl Totals {
    fn record(&mut self, sample: &Sample) {
        self.samples += 1;
        if sample.is_success() {
            self.successes += 1;
        }
    }
}

fn truncate(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

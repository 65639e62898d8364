use crate::atomics::RunAtomics;
use async_channel::{Sender, TrySendError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::RunConfig;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// A point in time at which one request is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tick {
    pub index: u64,
    pub scheduled: Instant,
}

impl Tick {
    /// A tick is stale once its successor is already due.
    pub fn is_stale(&self, now: Instant, period: Duration) -> bool {
        now >= self.scheduled + period
    }
}

/// Clock anchored at the start of the measured window. Tick `k` is due at `start + k * period`,
/// independent of how long earlier ticks took to be handled. Late ticks are still yielded, each
/// with its original due instant, so lateness is visible to whoever consumes them.
pub(crate) struct Ticker {
    interval: Interval,
    period: Duration,
    next_index: u64,
}

impl Ticker {
    pub fn new(start: Instant, period: Duration) -> Self {
        let mut interval = interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        Self {
            interval,
            period,
            next_index: 0,
        }
    }

    pub async fn tick(&mut self) -> Tick {
        let scheduled = self.interval.tick().await;
        let tick = Tick {
            index: self.next_index,
            scheduled,
        };
        self.next_index += 1;
        tick
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {}", humantime::format_duration(self.period))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ClockReport {
    pub ticks_scheduled: u64,
    /// Ticks that found every worker busy and the queue full.
    pub undeliverable: u64,
}

/// The single source of ticks for a run.
///
/// The clock never waits on a worker. A tick that cannot be queued right away is counted as
/// missed and the clock moves on, so a slow backend lowers the achieved rate instead of shifting
/// the schedule.
pub(crate) struct Clock {
    config: Arc<RunConfig>,
    ticks: Sender<Tick>,
    atomics: RunAtomics,
    stop: watch::Receiver<bool>,
}

impl Clock {
    pub fn new(
        config: Arc<RunConfig>,
        ticks: Sender<Tick>,
        atomics: RunAtomics,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            ticks,
            atomics,
            stop,
        }
    }

    #[instrument(name = "clock", skip_all)]
    pub async fn run(mut self, start: Instant) -> ClockReport {
        let mut ticker = Ticker::new(start, self.config.interval());
        debug!("Clock started, ticking {ticker}");

        let mut report = ClockReport::default();
        loop {
            if self
                .config
                .max_requests
                .is_some_and(|max| report.ticks_scheduled >= max)
            {
                debug!("Request limit reached");
                break;
            }

            let tick = tokio::select! {
                biased;
                _ = self.stop.wait_for(|stopped| *stopped) => {
                    debug!("Clock stopped");
                    break;
                }
                tick = ticker.tick() => tick,
            };

            if self.config.past_duration(tick.index) {
                debug!("Run duration reached");
                break;
            }

            report.ticks_scheduled += 1;
            self.atomics.tick_scheduled();

            match self.ticks.try_send(tick) {
                Ok(()) => trace!("Dispatched tick {}", tick.index),
                Err(TrySendError::Full(tick)) => {
                    if report.undeliverable == 0 {
                        warn!(
                            "No worker available for tick {}; the backend is not keeping up with the target rate",
                            tick.index
                        );
                    }
                    report.undeliverable += 1;
                    self.atomics.tick_missed();
                    crate::telemetry::record_missed(&self.config.backend_id);
                }
                Err(TrySendError::Closed(_)) => {
                    report.undeliverable += 1;
                    self.atomics.tick_missed();
                    crate::telemetry::record_missed(&self.config.backend_id);
                    debug!("Tick queue closed; no workers left");
                    break;
                }
            }
        }

        self.ticks.close();
        debug!(
            "Clock finished: {} ticks scheduled, {} undeliverable",
            report.ticks_scheduled, report.undeliverable
        );
        report
    }
}

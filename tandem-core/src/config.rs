use crate::constants::{
    DEFAULT_BURST_BACKLOG, DEFAULT_HANDOFF_CAPACITY, DEFAULT_HANDOFF_TIMEOUT,
    DEFAULT_PROGRESS_INTERVAL, MAX_RATE, MIN_RATE,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSecondsWithFrac};
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;

/// The query a run offers to a backend.
///
/// `statement` is opaque to the harness and handed to the backend as-is. When a `key_range` is
/// present a key is drawn uniformly from it for every request, so that repeated requests do not
/// hit the same row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub statement: String,
    #[serde(default)]
    pub key_range: Option<KeyRange>,
}

impl Workload {
    pub fn new(name: &str, statement: &str) -> Self {
        Self {
            name: name.to_string(),
            statement: statement.to_string(),
            key_range: None,
        }
    }

    pub fn key_range(mut self, min: u64, max: u64) -> Self {
        self.key_range = Some(KeyRange { min, max });
        self
    }
}

/// Inclusive range of lookup keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub min: u64,
    pub max: u64,
}

/// What happens to a tick that no worker was free to honor on time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickPolicy {
    /// A tick whose successor is already due when a worker picks it up is dropped and counted as
    /// missed. Workers realign on the next scheduled tick.
    #[default]
    Skip,

    /// Late ticks queue up (to `backlog`) and are issued as soon as a worker frees up. Only ticks
    /// overflowing the backlog are counted as missed.
    Burst { backlog: NonZeroUsize },
}

impl TickPolicy {
    pub fn burst() -> Self {
        Self::Burst {
            backlog: DEFAULT_BURST_BACKLOG,
        }
    }

    /// Depth of the queue between the clock and the workers.
    pub fn queue_capacity(&self, workers: usize) -> usize {
        match self {
            TickPolicy::Skip => workers.max(1),
            TickPolicy::Burst { backlog } => backlog.get(),
        }
    }

    pub fn drops_stale_ticks(&self) -> bool {
        matches!(self, TickPolicy::Skip)
    }
}

impl fmt::Display for TickPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickPolicy::Skip => write!(f, "skip"),
            TickPolicy::Burst { backlog } => write!(f, "burst({backlog})"),
        }
    }
}

/// Configuration for a single run against a single backend.
///
/// Immutable once a run starts; the coordinator publishes it behind an `Arc` and every task reads
/// it without synchronization.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub backend_id: String,
    pub workload: Workload,
    /// Target requests per second across all workers.
    pub rate: f64,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    #[serde(default)]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub max_requests: Option<u64>,
    pub workers: usize,
    #[serde(default)]
    pub tick_policy: TickPolicy,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    #[serde(default)]
    pub warmup: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default)]
    pub request_timeout: Option<Duration>,
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_handoff_timeout")]
    pub handoff_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_progress_interval")]
    pub progress_interval: Duration,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_handoff_capacity() -> usize {
    DEFAULT_HANDOFF_CAPACITY
}

fn default_handoff_timeout() -> Duration {
    DEFAULT_HANDOFF_TIMEOUT
}

fn default_progress_interval() -> Duration {
    DEFAULT_PROGRESS_INTERVAL
}

impl RunConfig {
    pub fn new(backend_id: &str, workload: Workload) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            workload,
            rate: 0.,
            duration: None,
            max_requests: None,
            workers: 1,
            tick_policy: TickPolicy::default(),
            warmup: None,
            request_timeout: None,
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            seed: None,
        }
    }

    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn tick_policy(mut self, tick_policy: TickPolicy) -> Self {
        self.tick_policy = tick_policy;
        self
    }

    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.warmup = Some(warmup);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = capacity;
        self
    }

    pub fn handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Time between two consecutive ticks of the shared clock.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(1. / self.rate).unwrap_or(Duration::MAX)
    }

    /// Whether tick `index`, due at `index / rate` seconds, falls past the duration bound.
    ///
    /// Compared on the exact offset rather than on multiples of [`RunConfig::interval`], which is
    /// rounded to whole nanoseconds.
    pub fn past_duration(&self, index: u64) -> bool {
        self.duration
            .is_some_and(|duration| index as f64 / self.rate >= duration.as_secs_f64())
    }

    /// Number of ticks the clock will schedule for this config, assuming it is not stopped early.
    pub fn expected_ticks(&self) -> Option<u64> {
        let paced = self.rate.is_finite() && self.rate > 0.;
        let by_duration = self.duration.filter(|_| paced).map(|duration| {
            let mut ticks = (duration.as_secs_f64() * self.rate).ceil() as u64;
            // Settle float rounding against the clock's own cut-off.
            while ticks > 0 && self.past_duration(ticks - 1) {
                ticks -= 1;
            }
            while !self.past_duration(ticks) {
                ticks += 1;
            }
            ticks
        });

        match (by_duration, self.max_requests) {
            (Some(ticks), Some(max)) => Some(ticks.min(max)),
            (ticks, max) => ticks.or(max),
        }
    }

    /// A copy of this config for the warmup window: same cadence, duration bound only.
    pub fn warmup_config(&self) -> Option<RunConfig> {
        let warmup = self.warmup.filter(|w| !w.is_zero())?;
        let mut config = self.clone();
        config.duration = Some(warmup);
        config.max_requests = None;
        config.warmup = None;
        Some(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_id.trim().is_empty() {
            return Err(ConfigError::EmptyBackendId);
        }

        if !self.rate.is_finite() || self.rate <= 0. {
            return Err(ConfigError::NonPositiveRate(self.rate));
        }

        if self.rate > MAX_RATE {
            return Err(ConfigError::RateTooHigh(self.rate));
        }

        if self.rate < MIN_RATE {
            return Err(ConfigError::RateTooLow(self.rate));
        }

        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        match (self.duration, self.max_requests) {
            (None, None) => return Err(ConfigError::Unbounded),
            (Some(d), _) if d.is_zero() => return Err(ConfigError::ZeroDuration),
            (_, Some(0)) => return Err(ConfigError::ZeroRequests),
            _ => {}
        }

        if matches!(self.request_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::ZeroTimeout);
        }

        if self.handoff_capacity == 0 {
            return Err(ConfigError::ZeroHandoffCapacity);
        }

        if self.progress_interval.is_zero() {
            return Err(ConfigError::ZeroProgressInterval);
        }

        if let Some(KeyRange { min, max }) = self.workload.key_range {
            if min > max {
                return Err(ConfigError::InvalidKeyRange { min, max });
            }
        }

        Ok(())
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backend={}, workload={}, rate={}/s, workers={}, policy={}",
            self.backend_id, self.workload.name, self.rate, self.workers, self.tick_policy
        )?;
        if let Some(duration) = self.duration {
            write!(f, ", duration={}", humantime::format_duration(duration))?;
        }
        if let Some(max) = self.max_requests {
            write!(f, ", max_requests={max}")?;
        }
        Ok(())
    }
}

/// Rejections raised before a run starts. Nothing has been spawned when one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("backend identifier must not be empty")]
    EmptyBackendId,

    #[error("target rate must be a positive number of requests per second, got {0}")]
    NonPositiveRate(f64),

    #[error("target rate {0} exceeds the supported maximum of {MAX_RATE} requests per second")]
    RateTooHigh(f64),

    #[error("target rate {0} is below the supported minimum of {MIN_RATE} requests per second")]
    RateTooLow(f64),

    #[error("worker concurrency must be at least 1")]
    NoWorkers,

    #[error("a run needs a duration or a request-count bound")]
    Unbounded,

    #[error("run duration must be greater than zero")]
    ZeroDuration,

    #[error("request-count bound must be greater than zero")]
    ZeroRequests,

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("handoff capacity must be at least 1")]
    ZeroHandoffCapacity,

    #[error("progress interval must be greater than zero")]
    ZeroProgressInterval,

    #[error("key range is empty: {min} > {max}")]
    InvalidKeyRange { min: u64, max: u64 },
}

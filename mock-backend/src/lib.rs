//! In-process backends with controllable latency, outcomes and capacity, for exercising the
//! harness without a real data service.
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand_distr::{Distribution, SkewNormal, SkewNormalError};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tandem_core::{Backend, BackendError, Execution, Query};
use tracing::debug;

#[derive(Debug, Clone)]
enum Latency {
    Fixed(Duration),
    /// Skew-normal distribution over milliseconds, clamped at zero.
    SkewNormal(SkewNormal<f64>),
}

impl Latency {
    fn sample(&self) -> Duration {
        match self {
            Latency::Fixed(latency) => *latency,
            Latency::SkewNormal(distr) => {
                let ms = distr.sample(&mut rand::thread_rng()).max(0.);
                Duration::from_secs_f64(ms / 1_000.)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    AlwaysOk,
    /// Every `n`-th call (1-based) fails with a backend error.
    FailEvery(u64),
}

/// A configurable mock backend.
///
/// Every call sleeps for the configured latency, then optionally waits on a capacity limiter
/// before answering. Calls are counted, including failed ones.
pub struct MockBackend {
    latency: Latency,
    pattern: Pattern,
    unavailable_after: Option<u64>,
    limiter: Option<DefaultDirectRateLimiter>,
    probe_ok: bool,
    calls: AtomicU64,
}

impl MockBackend {
    pub fn fixed(latency: Duration) -> Self {
        Self {
            latency: Latency::Fixed(latency),
            pattern: Pattern::AlwaysOk,
            unavailable_after: None,
            limiter: None,
            probe_ok: true,
            calls: AtomicU64::new(0),
        }
    }

    /// Noisy latency in milliseconds, e.g. `skew_normal(10., 2., 3.)` for a long right tail.
    pub fn skew_normal(location_ms: f64, scale_ms: f64, shape: f64) -> Result<Self, SkewNormalError> {
        let distr = SkewNormal::new(location_ms, scale_ms, shape)?;
        Ok(Self {
            latency: Latency::SkewNormal(distr),
            ..Self::fixed(Duration::ZERO)
        })
    }

    /// Alternate success and failure, starting with a success.
    pub fn alternating(self) -> Self {
        self.fail_every(2)
    }

    pub fn fail_every(mut self, n: u64) -> Self {
        self.pattern = Pattern::FailEvery(n.max(1));
        self
    }

    /// Serve `n` calls, then report the backend as unavailable on every call after.
    pub fn unavailable_after(mut self, n: u64) -> Self {
        self.unavailable_after = Some(n);
        self
    }

    /// Cap the backend at `per_second` answered requests; extra requests queue on the limiter.
    pub fn capacity(mut self, per_second: NonZeroU32) -> Self {
        self.limiter = Some(RateLimiter::direct(Quota::per_second(per_second)));
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_ok = false;
        self
    }

    /// Number of `execute` calls seen so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Backend for MockBackend {
    async fn execute(&self, query: &Query) -> Result<Execution, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;

        if self.unavailable_after.is_some_and(|n| call > n) {
            debug!("Mock call {call} refused");
            return Err(BackendError::Unavailable("mock backend shut down".into()));
        }

        let delay = self.latency.sample();
        tokio::time::sleep(delay).await;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        match self.pattern {
            Pattern::FailEvery(n) if call % n == 0 => {
                Err(BackendError::Backend(format!("mock failure on call {call}")))
            }
            _ => Ok(Execution::rows(query.key.unwrap_or(1)).with_elapsed(delay)),
        }
    }

    async fn probe(&self) -> Result<(), BackendError> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(BackendError::Network("mock probe refused".into()))
        }
    }
}

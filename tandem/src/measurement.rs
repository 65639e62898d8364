use pdatastructs::tdigest::{TDigest, K1};
use std::fmt;
use std::time::Duration;
use tandem_core::Sample;
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Live view of a run, refreshed by the collector every progress interval.
///
/// Counts are cumulative since the start of the measured window. Rate, error rate and latency
/// quantiles cover the most recent interval only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub elapsed: Duration,
    pub ticks_scheduled: u64,
    pub samples: u64,
    pub successes: u64,
    pub failures: u64,
    pub missed_ticks: u64,
    pub lost_samples: u64,
    pub rate: f64,
    pub error_rate: f64,
    pub latency_p50: Duration,
    pub latency_p90: Duration,
    pub latency_p99: Duration,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={}, missed={}, lost={}, RPS={:.2}, ErrorRate={:.2}, p50={:?}, p90={:?}, p99={:?}",
            self.samples,
            self.missed_ticks,
            self.lost_samples,
            self.rate,
            self.error_rate,
            self.latency_p50,
            self.latency_p90,
            self.latency_p99,
        )
    }
}

/// Samples seen during one progress interval.
#[derive(Debug, Clone)]
pub(crate) struct Measurement {
    success: u64,
    error: u64,
    latency: TDigest<K1>,
}

impl Measurement {
    pub fn new() -> Self {
        Self {
            success: 0,
            error: 0,
            latency: default_tdigest(),
        }
    }

    pub fn record(&mut self, sample: &Sample) {
        if sample.is_success() {
            self.success += 1;
            self.latency.insert(sample.latency.as_secs_f64());
        } else {
            self.error += 1;
        }
    }

    pub fn rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0. {
            (self.success + self.error) as f64 / secs
        } else {
            0.
        }
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.success + self.error;
        if total > 0 {
            self.error as f64 / total as f64
        } else {
            0.
        }
    }

    pub fn latency(&self, quantile: f64) -> Duration {
        if self.success == 0 {
            return Duration::ZERO;
        }

        let secs = self.latency.quantile(quantile);
        // TDigest can hand back NaN for degenerate inputs.
        let secs = if secs.is_finite() && secs >= 0. {
            secs
        } else {
            error!("NaN latency calculation for quantile {quantile}");
            0.
        };

        Duration::from_secs_f64(secs)
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tandem_core::{ErrorClass, Outcome};

    fn sample(latency_ms: u64, ok: bool) -> Sample {
        Sample {
            backend_id: Arc::from("mock"),
            worker_id: 0,
            sequence: 0,
            tick: 0,
            scheduled: Duration::ZERO,
            issued: Duration::ZERO,
            latency: Duration::from_millis(latency_ms),
            outcome: if ok {
                Outcome::Success {
                    rows: None,
                    reported: None,
                }
            } else {
                Outcome::Failure {
                    class: ErrorClass::Backend,
                    message: "no".into(),
                }
            },
        }
    }

    #[test]
    fn empty_measurement_reports_zeroes() {
        let m = Measurement::new();
        assert_eq!(m.latency(0.99), Duration::ZERO);
        assert_eq!(m.error_rate(), 0.);
        assert_eq!(m.rate(Duration::ZERO), 0.);
    }

    #[test]
    fn measurement_tracks_rates_and_quantiles() {
        let mut m = Measurement::new();
        for _ in 0..9 {
            m.record(&sample(10, true));
        }
        m.record(&sample(500, false));

        assert_eq!(m.rate(Duration::from_secs(2)), 5.);
        assert!((m.error_rate() - 0.1).abs() < 1e-9);
        let p50 = m.latency(0.5).as_secs_f64();
        assert!((p50 - 0.010).abs() < 1e-3, "p50 was {p50}");
    }
}

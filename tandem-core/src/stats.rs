use crate::data::RunResult;
use std::time::Duration;

/// Run Statistics for a sealed run.
///
/// Latency figures only cover successful requests, matching how the comparison tables have always
/// been built. All values are zero when there were no successful requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub backend_id: String,
    pub target_rate: f64,
    pub actual_rate: f64,
    pub successful: u64,
    pub failed: u64,
    pub lost: u64,
    pub missed: u64,
    pub error_rate: f64,
    pub latency_min: Duration,
    pub latency_mean: Duration,
    pub latency_median: Duration,
    pub latency_p90: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    pub latency_max: Duration,
}

impl RunStatistics {
    pub fn from_result(result: &RunResult) -> Self {
        let mut secs: Vec<f64> = result
            .samples()
            .iter()
            .filter(|s| s.is_success())
            .map(|s| s.latency.as_secs_f64())
            .collect();
        secs.sort_by(f64::total_cmp);

        let successful = secs.len() as u64;
        let failed = result.failure_count();
        let total = successful + failed;

        let window = result.window().as_secs_f64();
        let actual_rate = if window > 0. {
            successful as f64 / window
        } else {
            0.
        };
        let error_rate = if total > 0 {
            failed as f64 / total as f64
        } else {
            0.
        };

        let (mean, median) = if secs.is_empty() {
            (0., 0.)
        } else {
            (statistical::mean(&secs), statistical::median(&secs))
        };

        Self {
            backend_id: result.backend_id().to_string(),
            target_rate: result.config().rate,
            actual_rate,
            successful,
            failed,
            lost: result.lost_samples(),
            missed: result.missed_ticks(),
            error_rate,
            latency_min: secs.first().copied().map_or(Duration::ZERO, to_duration),
            latency_mean: to_duration(mean),
            latency_median: to_duration(median),
            latency_p90: to_duration(percentile(&secs, 90.)),
            latency_p95: to_duration(percentile(&secs, 95.)),
            latency_p99: to_duration(percentile(&secs, 99.)),
            latency_max: secs.last().copied().map_or(Duration::ZERO, to_duration),
        }
    }
}

/// p-th percentile of already sorted data, interpolating linearly between the closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.,
        1 => sorted[0],
        n => {
            let rank = (p / 100.).clamp(0., 1.) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

fn to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0. {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::{result, sample};
    use crate::data::{ErrorClass, Outcome};

    #[test]
    fn percentile_interpolates_between_ranks() {
        let data = [1., 2., 3., 4., 5.];
        assert_eq!(percentile(&data, 50.), 3.);
        assert!((percentile(&data, 90.) - 4.6).abs() < 1e-9);
        assert_eq!(percentile(&data, 100.), 5.);
        assert_eq!(percentile(&[], 99.), 0.);
        assert_eq!(percentile(&[7.], 99.), 7.);
    }

    #[test]
    fn statistics_cover_successes_only() {
        let mut failed = sample(1, 0, 10, 900);
        failed.outcome = Outcome::Failure {
            class: ErrorClass::Backend,
            message: "boom".into(),
        };
        let samples = vec![
            sample(0, 0, 0, 10),
            sample(0, 1, 100, 20),
            sample(0, 2, 200, 30),
            sample(0, 3, 300, 40),
            failed,
        ];

        let stats = RunStatistics::from_result(&result(samples));
        assert_eq!(stats.successful, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.error_rate, 0.2);
        assert_eq!(stats.actual_rate, 2.);
        assert_eq!(stats.latency_min, Duration::from_millis(10));
        assert_eq!(stats.latency_max, Duration::from_millis(40));
        assert!((stats.latency_median.as_secs_f64() - 0.025).abs() < 1e-6);
        assert!((stats.latency_mean.as_secs_f64() - 0.025).abs() < 1e-6);
    }

    #[test]
    fn empty_run_is_all_zero() {
        let stats = RunStatistics::from_result(&result(vec![]));
        assert_eq!(stats.successful, 0);
        assert_eq!(stats.actual_rate, 0.);
        assert_eq!(stats.latency_p99, Duration::ZERO);
    }
}

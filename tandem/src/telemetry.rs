//! Optional `metrics` facade output. Every function is a no-op without the `metrics` feature.
#[cfg(feature = "metrics")]
use tandem_core::Sample;

#[cfg(feature = "metrics")]
pub(crate) fn record_sample(sample: &Sample) {
    let base = &sample.backend_id;
    metrics::describe_histogram!(
        format!("{base}_latency"),
        metrics::Unit::Nanoseconds,
        "End-to-end request latency"
    );
    metrics::histogram!(format!("{base}_latency")).record(sample.latency.as_nanos() as f64);
    if sample.is_success() {
        metrics::counter!(format!("{base}_success")).increment(1);
    } else {
        metrics::counter!(format!("{base}_error")).increment(1);
    }
}

#[cfg(feature = "metrics")]
pub(crate) fn record_missed(backend_id: &str) {
    metrics::counter!(format!("{backend_id}_missed_ticks")).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_lost(backend_id: &str) {
    metrics::counter!(format!("{backend_id}_lost_samples")).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_rate(backend_id: &str, rate: f64) {
    metrics::gauge!(format!("{backend_id}_rate")).set(rate);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_sample(_sample: &tandem_core::Sample) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_missed(_backend_id: &str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_lost(_backend_id: &str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_rate(_backend_id: &str, _rate: f64) {}

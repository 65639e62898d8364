use tandem_core::{BackendError, ConfigError, RunPhase};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("run cannot move from {from} to {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },

    #[error("run coordinator failed: {0}")]
    Coordinator(String),
}

/// Handoff failures between a worker and the collector. Either way the sample is counted as lost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorError {
    #[error("collector is closed and no longer accepts samples")]
    Closed,

    #[error("collector stayed saturated for {0:?}")]
    Saturated(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error while exporting: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error while exporting: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error while exporting: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("suite has no target rates")]
    NoRates,

    #[error("invalid configuration for rate {rate}: {source}")]
    Config { rate: f64, source: ConfigError },

    #[error("backend failed its connectivity probe: {0}")]
    Probe(BackendError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

use crate::config::Workload;
use crate::data::ErrorClass;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A single request handed to a backend.
#[derive(Debug, Clone)]
pub struct Query {
    pub workload: Arc<Workload>,
    /// Lookup key drawn from the workload's key range, if it has one.
    pub key: Option<u64>,
}

/// What a backend reports for a successful request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Execution {
    /// Rows (or bytes, depending on the backend) returned by the request.
    pub rows: Option<u64>,
    /// Server-side execution time, when the backend exposes one. The harness always measures its
    /// own end-to-end latency regardless.
    pub elapsed: Option<Duration>,
}

impl Execution {
    pub fn rows(rows: u64) -> Self {
        Self {
            rows: Some(rows),
            elapsed: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("backend error: {0}")]
    Backend(String),

    /// The backend cannot serve any further requests. Workers shut down when they see this.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Timeout => ErrorClass::Timeout,
            BackendError::Network(_) => ErrorClass::Network,
            BackendError::Backend(_) => ErrorClass::Backend,
            BackendError::Unavailable(_) => ErrorClass::Unavailable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Capability every benchmarked data service exposes to the harness.
///
/// Implement [`Backend`]; the harness never looks at connection state and only ever calls these
/// two methods. Implementations are shared by every worker of a run, so any per-connection state
/// has to be pooled or synchronized inside the adapter.
#[trait_variant::make(Backend: Send)]
pub trait LocalBackend {
    /// Execute one representative query.
    async fn execute(&self, query: &Query) -> Result<Execution, BackendError>;

    /// Cheap connectivity check run once before a suite starts.
    async fn probe(&self) -> Result<(), BackendError>;
}

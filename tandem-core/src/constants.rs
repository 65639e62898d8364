use std::num::NonZeroUsize;
use std::time::Duration;

/// Samples buffered between the workers and the collector before a handoff has to wait.
pub const DEFAULT_HANDOFF_CAPACITY: usize = 4_096;

/// Longest a worker retries a saturated handoff before the sample is counted as lost.
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);

/// First backoff step for a saturated handoff. Doubles on every retry.
pub const HANDOFF_INITIAL_BACKOFF: Duration = Duration::from_millis(1);

/// How often the collector publishes a progress snapshot.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Default queue depth for [`crate::TickPolicy::Burst`].
pub const DEFAULT_BURST_BACKLOG: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(64) };

/// Highest accepted target rate. Above this the tick interval drops under a microsecond.
pub const MAX_RATE: f64 = 1_000_000.;

/// Lowest accepted target rate, one request every eleven and a half days or so.
pub const MIN_RATE: f64 = 1e-6;

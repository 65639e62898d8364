#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod error;
pub mod export;
pub mod suite;

mod atomics;
mod collector;
mod measurement;
mod run;
mod scheduler;
mod telemetry;
mod worker;

pub use error::{CollectorError, ExportError, RunError, SuiteError};
pub use measurement::Progress;
pub use run::{Benchmark, RunHandle, StopHandle};
pub use suite::{Suite, SuiteReport};

#[doc(hidden)]
pub use tandem_core as core;

pub mod prelude {
    pub use crate::export::{CsvExporter, JsonLinesExporter};
    pub use crate::{Benchmark, Progress, RunError, RunHandle, StopHandle, Suite};
    pub use tandem_core::{
        Backend, BackendError, Execution, Query, RunConfig, RunPhase, RunResult, RunStatistics,
        TickPolicy, Workload,
    };
}

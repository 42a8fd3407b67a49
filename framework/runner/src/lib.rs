mod cli;
mod context;
mod definition;
mod executor;
mod monitor;
mod progress;
mod run;
mod run_id;
mod schedule;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::{parse_duration, GaleScenarioCli};
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{CallerContext, RunnerContext};
    pub use crate::definition::{
        init_logging, HookResult, InvalidDefinitionError, ScenarioDefinitionBuilder,
    };
    pub use crate::executor::Executor;
    pub use crate::run::{run, RunReport, ServiceUnavailableError};
    pub use crate::schedule::{RampSchedule, Stage};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownSignalError};
    pub use crate::types::GaleResult;

    pub use gale_instruments::{
        MetricsRegistry, MetricsSnapshot, OperationRecord, OutcomeRecord, Threshold,
        ThresholdOutcome, ThresholdStatus, WorkflowMetrics, CHECKS, HTTP_REQ_DURATION,
        HTTP_REQ_FAILED, REAL_ERRORS,
    };
}

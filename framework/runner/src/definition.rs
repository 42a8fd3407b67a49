use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gale_instruments::Threshold;

use crate::cli::GaleScenarioCli;
use crate::context::{CallerContext, RunnerContext, UserValuesConstraint};
use crate::run_id::generate_run_id;
use crate::schedule::{RampSchedule, Stage};

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type GlobalHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;
pub type ReadinessHookMut<RV> = fn(&mut RunnerContext<RV>) -> anyhow::Result<bool>;
pub type CallerHookMut<RV, V> = fn(&mut CallerContext<RV, V>) -> HookResult;

const DEFAULT_TICK: Duration = Duration::from_millis(100);

#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("Invalid scenario definition: {reason}")]
pub struct InvalidDefinitionError {
    reason: String,
}

impl InvalidDefinitionError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// How the runner decides that the service under test is up before starting setup.
#[derive(Debug)]
pub struct ReadinessCheck<RV: UserValuesConstraint> {
    pub(crate) probe: ReadinessHookMut<RV>,
    pub(crate) max_attempts: usize,
    pub(crate) delay: Duration,
}

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// Command line configuration. Stages and thresholds given here take precedence over, or add
    /// to, the defaults set on the builder.
    cli: GaleScenarioCli,
    /// Stages used when none were given on the command line.
    default_stages: Vec<Stage>,
    /// Thresholds that always apply to this scenario.
    default_thresholds: Vec<Threshold>,
    /// Initial scenario values, made available to every hook through the [RunnerContext].
    values: RV,
    /// Polled until it returns `true` before any setup is done. If the service never becomes
    /// ready then the run fails without generating any load.
    readiness: Option<ReadinessCheck<RV>>,
    /// Global setup hook for this scenario. It will be run once, before any callers are started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// The behaviour that every virtual caller runs in a loop until it is retired.
    caller_behaviour: Option<CallerHookMut<RV, V>>,
    /// Global teardown hook, run once after every caller has stopped. This is best effort,
    /// failures are logged and do not fail the run.
    teardown_fn: Option<GlobalHook<RV>>,
    /// How often the ramp controller adjusts the number of callers.
    tick: Duration,
}

pub struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub name: String,
    pub run_id: String,
    pub connection_string: String,
    pub no_progress: bool,
    pub schedule: RampSchedule,
    pub thresholds: Vec<Threshold>,
    pub values: RV,
    pub readiness: Option<ReadinessCheck<RV>>,
    pub setup_fn: Option<GlobalHookMut<RV>>,
    pub caller_behaviour: CallerHookMut<RV, V>,
    pub teardown_fn: Option<GlobalHook<RV>>,
    pub tick: Duration,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: GaleScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_stages: Vec::new(),
            default_thresholds: Vec::new(),
            values: Default::default(),
            readiness: None,
            setup_fn: None,
            caller_behaviour: None,
            teardown_fn: None,
            tick: DEFAULT_TICK,
        }
    }

    /// Initialise logging, parse the standard command line and create the builder.
    ///
    /// Scenarios with their own command line flags should flatten [GaleScenarioCli] into their
    /// own parser, call [init_logging] and then use [ScenarioDefinitionBuilder::new].
    pub fn new_with_init(name: &str) -> Self {
        init_logging();
        Self::new(name, GaleScenarioCli::parse())
    }

    /// Stages to run when none are given on the command line.
    pub fn with_default_stages(mut self, stages: Vec<Stage>) -> Self {
        self.default_stages = stages;
        self
    }

    /// Thresholds that the run is evaluated against, in addition to any from the command line.
    pub fn with_default_thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.default_thresholds = thresholds;
        self
    }

    /// Seed the scenario values before setup runs.
    pub fn use_values(mut self, values: RV) -> Self {
        self.values = values;
        self
    }

    /// Poll `probe` up to `max_attempts` times, waiting `delay` between attempts, before setup.
    pub fn use_readiness_check(
        mut self,
        probe: ReadinessHookMut<RV>,
        max_attempts: usize,
        delay: Duration,
    ) -> Self {
        self.readiness = Some(ReadinessCheck {
            probe,
            max_attempts: max_attempts.max(1),
            delay,
        });
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the caller behaviour hook [ScenarioDefinitionBuilder::caller_behaviour].
    pub fn use_caller_behaviour(mut self, behaviour: CallerHookMut<RV, V>) -> Self {
        self.caller_behaviour = Some(behaviour);
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    /// Change how often the ramp controller runs. Mostly useful for short test runs.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<RV, V>> {
        let caller_behaviour = self
            .caller_behaviour
            .ok_or_else(|| InvalidDefinitionError::new("no caller behaviour was set"))?;

        if self.tick.is_zero() {
            return Err(InvalidDefinitionError::new("the ramp tick must be non-zero").into());
        }

        let stages = if self.cli.stage.is_empty() {
            self.default_stages
        } else {
            self.cli.stage
        };
        let schedule = RampSchedule::new(stages)?;

        let mut thresholds = self.default_thresholds;
        thresholds.extend(self.cli.threshold);

        Ok(ScenarioDefinition {
            name: self.name,
            run_id: self.cli.run_id.unwrap_or_else(generate_run_id),
            connection_string: self.cli.connection_string,
            no_progress: self.cli.no_progress,
            schedule,
            thresholds,
            values: self.values,
            readiness: self.readiness,
            setup_fn: self.setup_fn,
            caller_behaviour,
            teardown_fn: self.teardown_fn,
            tick: self.tick,
        })
    }
}

/// Initialise `env_logger`, defaulting to `info` when `RUST_LOG` is not set.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

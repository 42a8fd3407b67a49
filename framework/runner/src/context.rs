use std::time::Duration;
use std::{fmt::Debug, sync::Arc};

use gale_instruments::MetricsRegistry;

use crate::definition::HookResult;
use crate::executor::Executor;
use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// State shared by the whole run.
///
/// The setup hook gets mutable access to fill in the scenario values. After setup the context is
/// moved behind an [Arc] and is read-only for the rest of the run.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    metrics: MetricsRegistry,
    shutdown_handle: ShutdownHandle,
    connection_string: String,
    run_id: String,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        metrics: MetricsRegistry,
        shutdown_handle: ShutdownHandle,
        connection_string: String,
        run_id: String,
        value: RV,
    ) -> Self {
        Self {
            executor,
            metrics,
            shutdown_handle,
            connection_string,
            run_id,
            value,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// The base URL of the service under test.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Identifier of this run, unique across runs. Use it to namespace anything created on the
    /// service under test.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stop the run early. Callers are stopped and in-flight work is cancelled, then teardown and
    /// reporting proceed as normal.
    pub fn force_stop_scenario(&self) {
        self.shutdown_handle.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_handle.is_shutdown()
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// State owned by a single virtual caller.
pub struct CallerContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    caller_id: String,
    runner_context: Arc<RunnerContext<RV>>,
    retire_listener: DelegatedShutdownListener,
    shutdown_listener: DelegatedShutdownListener,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> CallerContext<RV, V> {
    pub(crate) fn new(
        caller_index: usize,
        runner_context: Arc<RunnerContext<RV>>,
        retire_listener: DelegatedShutdownListener,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            caller_id: format!("caller-{caller_index}"),
            runner_context,
            retire_listener,
            shutdown_listener,
            value: Default::default(),
        }
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    /// True once this caller has been retired by the ramp or the run is shutting down.
    pub fn should_stop(&self) -> bool {
        self.retire_listener.should_shutdown() || self.shutdown_listener.should_shutdown()
    }

    /// Pace the caller. Returns a [ShutdownSignalError] early if the caller is retired or the run
    /// shuts down while waiting, which the runner treats as a normal way to end an iteration.
    pub fn pause(&mut self, duration: Duration) -> HookResult {
        let retire_listener = self.retire_listener.clone();
        self.runner_context.executor().execute_in_place(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = retire_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                }
            }
        })
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }
}

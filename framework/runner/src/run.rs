use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use gale_instruments::{print_report, MetricsRegistry, MetricsSnapshot, ThresholdOutcome};

use crate::definition::{CallerHookMut, ReadinessCheck};
use crate::schedule::RampSchedule;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::{
    context::{CallerContext, RunnerContext, UserValuesConstraint},
    definition::ScenarioDefinitionBuilder,
    executor::Executor,
    shutdown::{start_shutdown_listener, ShutdownHandle, ShutdownSignalError},
};

/// The service under test never reported itself as ready, so no load was generated.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("Service did not become ready after {attempts} attempts")]
pub struct ServiceUnavailableError {
    pub attempts: usize,
}

/// Everything the run measured, returned once the report has been printed.
#[derive(Debug)]
pub struct RunReport {
    pub scenario_name: String,
    pub run_id: String,
    pub metrics: MetricsSnapshot,
    pub thresholds: Vec<ThresholdOutcome>,
    /// Highest number of callers that were active at the same time.
    pub peak_callers: usize,
    /// Total number of caller threads started over the run.
    pub callers_started: usize,
    /// True if the run was stopped before the schedule completed.
    pub interrupted: bool,
}

impl RunReport {
    /// True when every threshold passed. A run with no thresholds passes.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(ThresholdOutcome::passed)
    }
}

struct ActiveCaller {
    retire_handle: ShutdownHandle,
    join_handle: JoinHandle<()>,
}

pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> anyhow::Result<RunReport> {
    let definition = definition.build()?;

    log::info!(
        "Running scenario {} with run id {} against {}",
        definition.name,
        definition.run_id,
        definition.connection_string
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = ShutdownHandle::new();
    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));
    start_shutdown_listener(&executor, shutdown_handle.clone());

    let metrics = MetricsRegistry::start()?;
    let mut runner_context = RunnerContext::new(
        executor,
        metrics,
        shutdown_handle.clone(),
        definition.connection_string.clone(),
        definition.run_id.clone(),
        definition.values,
    );

    if let Some(readiness) = &definition.readiness {
        wait_for_readiness(&mut runner_context, readiness)?;
    }

    if let Some(setup_fn) = &definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let runner_context = Arc::new(runner_context);

    // Progress and monitoring outlive the callers and the teardown, so they get their own stop
    // signal rather than the run's shutdown handle.
    let background_handle = ShutdownHandle::new();
    if !definition.no_progress {
        if let Err(e) = start_progress(
            definition.schedule.clone(),
            background_handle.new_listener(),
        ) {
            log::warn!("Could not start the progress bar: {e:?}");
        }
    }
    if let Err(e) = start_monitor(background_handle.new_listener()) {
        log::warn!("Could not start the resource monitor: {e:?}");
    }

    let ramp = drive_ramp(
        &definition.schedule,
        definition.tick,
        definition.caller_behaviour,
        runner_context.clone(),
        &shutdown_handle,
    );

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting and runner
        // shutdown to happen cleanly. The hook is documented as 'best effort'
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    background_handle.shutdown();

    let ramp = ramp?;

    let metrics = runner_context.metrics().snapshot()?;
    let thresholds = definition
        .thresholds
        .iter()
        .map(|threshold| threshold.evaluate(&metrics))
        .collect::<Vec<_>>();

    print_report(&metrics, &thresholds);

    let report = RunReport {
        scenario_name: definition.name,
        run_id: definition.run_id,
        metrics,
        thresholds,
        peak_callers: ramp.peak_callers,
        callers_started: ramp.callers_started,
        interrupted: ramp.interrupted,
    };

    if report.passed() {
        log::info!("All thresholds passed");
    } else {
        log::warn!("One or more thresholds failed");
    }

    Ok(report)
}

fn wait_for_readiness<RV: UserValuesConstraint>(
    runner_context: &mut RunnerContext<RV>,
    readiness: &ReadinessCheck<RV>,
) -> anyhow::Result<()> {
    for attempt in 1..=readiness.max_attempts {
        match (readiness.probe)(runner_context) {
            Ok(true) => {
                log::info!("Service is ready after {attempt} attempt(s)");
                return Ok(());
            }
            Ok(false) => {
                log::debug!(
                    "Service not ready, attempt {attempt}/{}",
                    readiness.max_attempts
                );
            }
            Err(e) if e.is::<ShutdownSignalError>() => return Err(e),
            Err(e) => {
                log::debug!(
                    "Readiness check failed, attempt {attempt}/{}: {e:?}",
                    readiness.max_attempts
                );
            }
        }

        if attempt < readiness.max_attempts {
            let delay = readiness.delay;
            runner_context
                .executor()
                .execute_in_place(async move {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })?;
        }
    }

    log::error!(
        "Service did not become ready after {} attempts",
        readiness.max_attempts
    );

    Err(ServiceUnavailableError {
        attempts: readiness.max_attempts,
    }
    .into())
}

struct RampResult {
    peak_callers: usize,
    callers_started: usize,
    interrupted: bool,
}

/// Adjust the number of running callers to follow the schedule until it completes or the run is
/// shut down, then wait for every caller to stop.
fn drive_ramp<RV: UserValuesConstraint, V: UserValuesConstraint>(
    schedule: &RampSchedule,
    tick: Duration,
    behaviour: CallerHookMut<RV, V>,
    runner_context: Arc<RunnerContext<RV>>,
    shutdown_handle: &ShutdownHandle,
) -> anyhow::Result<RampResult> {
    let start = Instant::now();

    let mut active: Vec<ActiveCaller> = Vec::new();
    let mut retired: Vec<JoinHandle<()>> = Vec::new();
    let mut next_index = 0;
    let mut peak_callers = 0;
    let mut current_stage = None;
    let mut spawn_error = None;

    'ramp: loop {
        if shutdown_handle.is_shutdown() {
            log::info!("Run stopped before the schedule completed");
            break;
        }

        let elapsed = start.elapsed();
        let Some(stage_index) = schedule.stage_index_at(elapsed) else {
            log::info!("Schedule complete after {:?}", elapsed);
            break;
        };

        if current_stage != Some(stage_index) {
            current_stage = Some(stage_index);
            log::info!(
                "Starting stage {}/{}: {}",
                stage_index + 1,
                schedule.stages().len(),
                schedule.stages()[stage_index]
            );
        }

        let target = schedule.target_at(elapsed);

        while active.len() > target {
            if let Some(caller) = active.pop() {
                caller.retire_handle.shutdown();
                retired.push(caller.join_handle);
            }
        }

        while active.len() < target {
            match spawn_caller(
                next_index,
                behaviour,
                runner_context.clone(),
                shutdown_handle,
            ) {
                Ok(caller) => {
                    next_index += 1;
                    active.push(caller);
                }
                Err(e) => {
                    log::error!("Failed to start caller {next_index}: {e:?}");
                    spawn_error = Some(e);
                    shutdown_handle.shutdown();
                    break 'ramp;
                }
            }
        }

        peak_callers = peak_callers.max(active.len());
        log::trace!("Target {target} callers, {} active", active.len());

        std::thread::sleep(tick);
    }

    let interrupted = shutdown_handle.is_shutdown();

    for caller in active.drain(..) {
        caller.retire_handle.shutdown();
        retired.push(caller.join_handle);
    }

    for handle in retired {
        handle
            .join()
            .map_err(|e| anyhow::anyhow!("Error joining thread for caller: {:?}", e))?;
    }

    if let Some(e) = spawn_error {
        return Err(e);
    }

    Ok(RampResult {
        peak_callers,
        callers_started: next_index,
        interrupted,
    })
}

fn spawn_caller<RV: UserValuesConstraint, V: UserValuesConstraint>(
    caller_index: usize,
    behaviour: CallerHookMut<RV, V>,
    runner_context: Arc<RunnerContext<RV>>,
    shutdown_handle: &ShutdownHandle,
) -> anyhow::Result<ActiveCaller> {
    let retire_handle = ShutdownHandle::new();
    let retire_listener = retire_handle.new_listener();
    let shutdown_listener = shutdown_handle.new_listener();

    let join_handle = std::thread::Builder::new()
        .name(format!("caller-{caller_index}"))
        .spawn(move || {
            let mut context = CallerContext::<RV, V>::new(
                caller_index,
                runner_context,
                retire_listener,
                shutdown_listener,
            );

            loop {
                if context.should_stop() {
                    log::debug!("Stopping {}", context.caller_id());
                    break;
                }

                match behaviour(&mut context) {
                    Ok(()) => {}
                    Err(e) if e.is::<ShutdownSignalError>() => {
                        // Expected when the caller is retired or the run stops mid-iteration.
                        // The check at the top of the loop will catch this and break out.
                    }
                    Err(e) => {
                        log::error!("Caller behaviour failed for {}: {:?}", context.caller_id(), e);
                    }
                }
            }
        })
        .context("Failed to spawn thread for caller")?;

    Ok(ActiveCaller {
        retire_handle,
        join_handle,
    })
}

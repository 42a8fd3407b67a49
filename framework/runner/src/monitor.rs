use anyhow::Context;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::shutdown::DelegatedShutdownListener;

/// Share of the machine's total CPU above which the load generator itself may be skewing results.
const HIGH_CPU_USAGE_PERCENT: f32 = 10.0;

/// Monitor the resource usage of the load generator process and report high usage.
///
/// Note that this won't stop the run, it only logs a warning so the user knows that latency
/// figures might include time spent waiting for CPU on the client side.
///
/// The CPU usage for the process is collected every [sysinfo::MINIMUM_CPU_UPDATE_INTERVAL] and
/// compared against the number of cores.
pub(crate) fn start_monitor(shutdown_listener: DelegatedShutdownListener) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let this_process_pid = Pid::from_u32(std::process::id());
            let mut sys = System::new();

            sys.refresh_cpu_all();
            let cpu_count = sys.cpus().len().max(1);
            let mut peak_usage: f32 = 0.0;

            loop {
                if shutdown_listener.should_shutdown() {
                    log::debug!("Peak load generator CPU usage was {peak_usage:.2}%");
                    break;
                }

                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[this_process_pid]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );

                let Some(process) = sys.process(this_process_pid) else {
                    log::warn!("Could not read process info, stopping the resource monitor");
                    break;
                };

                let usage = (process.cpu_usage() / (cpu_count * 100) as f32) * 100.0;
                peak_usage = peak_usage.max(usage);
                if usage > HIGH_CPU_USAGE_PERCENT {
                    log::warn!(
                        "High CPU usage detected. The load generator is using {:.2}% of the CPU, with {} available cores",
                        usage,
                        cpu_count
                    );
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
        })
        .context("Failed to start monitor thread")?;

    Ok(())
}

use std::cmp::min;
use std::fmt::Write;
use std::time::{Duration, Instant};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};

use crate::schedule::RampSchedule;
use crate::shutdown::DelegatedShutdownListener;

/// Displays a progress bar while the schedule is running to show the user how long is left and
/// how many callers the ramp is currently aiming for.
pub(crate) fn start_progress(
    schedule: RampSchedule,
    shutdown_listener: DelegatedShutdownListener,
) -> anyhow::Result<()> {
    let planned_runtime = schedule.total_duration();
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
    )
    .context("Failed to set progress style")?
    .with_key("planned_runtime", {
        let hours = planned_runtime.as_secs() / 3600;
        let minutes = (planned_runtime.as_secs() % 3600) / 60;
        let seconds = planned_runtime.as_secs() % 60;
        move |_state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds);
        }
    })
    .progress_chars("#>-");

    std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_secs());
            pb.set_style(style);

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                let elapsed = start_time.elapsed();
                match schedule.stage_index_at(elapsed) {
                    Some(stage) => pb.set_message(format!(
                        "stage {}/{}, target {} callers",
                        stage + 1,
                        schedule.stages().len(),
                        schedule.target_at(elapsed)
                    )),
                    None => pb.set_message("waiting for callers to finish"),
                }

                pb.set_position(min(elapsed.as_secs(), planned_runtime.as_secs()));
                std::thread::sleep(Duration::from_millis(500));
            }
        })
        .context("Failed to start progress thread")?;

    Ok(())
}

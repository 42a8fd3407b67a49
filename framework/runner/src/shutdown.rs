use tokio::signal;

use crate::executor::Executor;

pub use gale_core::prelude::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};

/// Trigger the given handle when the user presses Ctrl-C.
pub(crate) fn start_shutdown_listener(executor: &Executor, handle: ShutdownHandle) {
    executor.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received shutdown signal, shutting down...");
                handle.shutdown();
            }
            Err(e) => log::error!(
                "Failed to listen for Ctrl-C, the run can only end on schedule: {e:?}"
            ),
        }
    });
}

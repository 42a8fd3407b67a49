use std::future::Future;

use crate::shutdown::{ShutdownHandle, ShutdownSignalError};

/// Owns the async runtime that callers use for their requests.
///
/// Callers run on their own threads and block on the runtime for each piece of async work, so a
/// single caller issues its requests one after another while many callers share the runtime.
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    shutdown_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, shutdown_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            shutdown_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// Note that the future will be cancelled if the run is shut down, for example by Ctrl-C.
    /// Callers that are retired because the ramp moved down are not affected, their in-flight
    /// work is allowed to finish.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let shutdown_listener = self.shutdown_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = shutdown_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                },
            }
        })
    }

    /// Submit async code to be run in the background.
    ///
    /// Note that the future will not be cancelled if the run is shut down. It is also not
    /// guaranteed that the runner will wait for the future to complete before shutting down.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }
}

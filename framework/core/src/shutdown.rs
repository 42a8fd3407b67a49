use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// A one-shot stop signal that can be observed by any number of listeners.
///
/// The same type is used for the whole run (Ctrl-C, end of the schedule) and for retiring a
/// single caller when the ramp moves down. Once triggered, the handle stays triggered, so a
/// listener created after the signal was sent still observes it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown(&self) {
        // Set before sending so that a listener which subscribes after the send still sees it.
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.sender.send(()) {
            // Will fail if nobody is listening for a shutdown signal, in which case the log message
            // can be ignored.
            log::debug!("No listeners for shutdown signal: {e:?}");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe(), self.triggered.clone())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    triggered: Arc<AtomicBool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>, triggered: Arc<AtomicBool>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            triggered,
        }
    }

    /// Point in time check if the shutdown signal has been received. If this returns true then
    /// work should be stopped. Unlike the underlying channel, repeated calls keep returning true.
    pub fn should_shutdown(&self) -> bool {
        if self.triggered.load(Ordering::SeqCst) {
            return true;
        }

        match self.receiver.try_lock() {
            Ok(mut guard) => match guard.try_recv() {
                Ok(_) => true,
                Err(TryRecvError::Closed) => true,
                // If the receiver is empty or lagged then we should not shutdown.
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Wait for the shutdown signal to be received. It is safe to race this with another future
    /// so that the shutdown signal can be used to cancel other work in progress.
    pub async fn wait_for_shutdown(&self) {
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }

        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Ok(()) | Err(RecvError::Closed) => {}
            Err(RecvError::Lagged(n)) => {
                log::trace!("Shutdown listener lagged by {n} messages");
            }
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by shutdown signal".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_sees_signal_sent_before_it_was_created() {
        let handle = ShutdownHandle::new();
        handle.shutdown();

        let listener = handle.new_listener();
        assert!(listener.should_shutdown());
        assert!(handle.is_shutdown());
    }

    #[test]
    fn repeated_checks_keep_reporting_shutdown() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();
        assert!(!listener.should_shutdown());

        handle.shutdown();
        assert!(listener.should_shutdown());
        assert!(listener.should_shutdown());
    }

    #[test]
    fn shutdown_twice_is_harmless() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();
        handle.shutdown();
        handle.shutdown();
        assert!(listener.should_shutdown());
    }

    #[tokio::test]
    async fn wait_for_shutdown_wakes_on_signal() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();

        let waiter = tokio::spawn(async move { listener.wait_for_shutdown().await });
        handle.shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("listener did not wake")
            .expect("listener task panicked");
    }
}

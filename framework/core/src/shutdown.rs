use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative stop signal for a run.
///
/// The flag only ever moves from running to stopped. Listeners created after the signal has
/// been sent still observe it, so a session spawned late in a run stops straight away.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn shutdown(&self) {
        let was_stopped = self.sender.send_replace(true);
        if !was_stopped {
            log::debug!("Stop signal issued");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Point in time check if the stop signal has been sent. If this returns true then no new
    /// request should be started.
    pub fn should_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the stop signal. It is safe to race this with another future so that the signal
    /// can be used to cut a sleep short.
    pub async fn wait_for_shutdown(&mut self) {
        // An error means the handle was dropped, which can only happen once the run is over.
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_listener_sees_earlier_signal() {
        let handle = ShutdownHandle::new();
        let early = handle.new_listener();
        assert!(!early.should_shutdown());

        handle.shutdown();

        assert!(early.should_shutdown());
        assert!(handle.new_listener().should_shutdown());
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn wait_for_shutdown_wakes_on_signal() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        let waiter = tokio::spawn(async move {
            listener.wait_for_shutdown().await;
        });

        handle.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("listener did not wake")
            .unwrap();
    }
}

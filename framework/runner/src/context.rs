use std::fmt::Debug;
use std::sync::Arc;

use stampede_core::prelude::ShutdownHandle;
use stampede_http_client::prelude::Transport;
use stampede_instruments::Reporter;

use crate::retry::RetryPolicy;

/// Run-wide resources shared by every session.
pub struct RunnerContext {
    transport: Arc<dyn Transport>,
    reporter: Arc<Reporter>,
    retry_policy: RetryPolicy,
    shutdown_handle: ShutdownHandle,
}

impl RunnerContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        reporter: Arc<Reporter>,
        retry_policy: RetryPolicy,
        shutdown_handle: ShutdownHandle,
    ) -> Self {
        Self {
            transport,
            reporter,
            retry_policy,
            shutdown_handle,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown_handle
    }
}

impl Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("retry_policy", &self.retry_policy)
            .field("stopped", &self.shutdown_handle.is_shutdown())
            .finish_non_exhaustive()
    }
}

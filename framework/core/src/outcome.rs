use std::time::Duration;

use chrono::{DateTime, Utc};

/// The record of a single HTTP attempt.
///
/// One outcome is produced per attempt, so a retried task produces several. Outcomes are built
/// with the `with_*` methods and cannot be changed once handed to a recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    timestamp: DateTime<Utc>,
    task_name: String,
    endpoint: String,
    status_code: u16,
    success: bool,
    response_summary: String,
    error_detail: Option<String>,
    elapsed: Duration,
}

impl RequestOutcome {
    /// Status code reserved for attempts that never got a response.
    pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

    /// Start an outcome for a request to `endpoint`, timestamped now.
    pub fn new(task_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            task_name: task_name.into(),
            endpoint: endpoint.into(),
            status_code: Self::TRANSPORT_FAILURE_STATUS,
            success: false,
            response_summary: String::new(),
            error_detail: None,
            elapsed: Duration::ZERO,
        }
    }

    /// An attempt that failed below HTTP, a timeout or a refused connection.
    pub fn transport_failure(
        task_name: impl Into<String>,
        endpoint: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(task_name, endpoint).with_error(detail)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_status(mut self, status_code: u16, success: bool) -> Self {
        self.status_code = status_code;
        self.success = success;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.response_summary = summary.into();
        self
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// The same outcome marked as a failure.
    pub fn into_failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status_code == Self::TRANSPORT_FAILURE_STATUS
    }

    pub fn response_summary(&self) -> &str {
        &self.response_summary
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

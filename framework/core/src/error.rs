/// Reasons a virtual user session stops before the run is over.
///
/// Returned in a session report rather than propagated, a session failing never stops the run
/// or any other session.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Login did not succeed within the retry budget. No task runs for this session.
    #[display("authentication failed for {identifier} after {attempts} attempt(s)")]
    AuthenticationFailure { identifier: String, attempts: u32 },
    /// A value that dependent tasks need was never produced.
    #[display("session value `{key}` was missing for {skips} consecutive task(s)")]
    MissingState { key: String, skips: usize },
}

/// Failure categories, used as retry reason tags and in log lines.
#[derive(derive_more::Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    #[display("authentication_failure")]
    AuthenticationFailure,
    #[display("transient_contention")]
    TransientContention,
    #[display("generic_request_failure")]
    GenericRequestFailure,
    #[display("parse_failure")]
    ParseFailure,
    #[display("recorder_write_failure")]
    RecorderWriteFailure,
}

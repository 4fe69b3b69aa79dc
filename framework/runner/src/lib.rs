mod cli;
mod context;
mod controller;
mod definition;
mod init;
mod monitor;
mod progress;
mod retry;
mod run;
mod scheduler;
mod session;
mod shutdown;
mod task;
mod template;
mod types;

pub mod prelude {
    pub use crate::cli::StampedeCli;
    pub use crate::context::RunnerContext;
    pub use crate::controller::{LoadController, RunHandle, Summary};
    pub use crate::definition::{
        ScenarioDefinition, ScenarioDefinitionBuilder, ThinkTime, UserAllocation, UserType,
        UserTypeDefinition, DEFAULT_MAX_CONSECUTIVE_SKIPS,
    };
    pub use crate::init::init;
    pub use crate::retry::{
        AttemptResult, Classification, FailureClassifier, MarkerClassifier, RetryDecision,
        RetryPolicy, DEFAULT_CONTENTION_MARKERS,
    };
    pub use crate::run::run;
    pub use crate::scheduler::TaskScheduler;
    pub use crate::session::{
        SessionReport, SessionState, SessionStatus, Termination, VirtualUserSession,
    };
    pub use crate::task::{
        Extraction, RenderError, RequestTemplate, SuccessPredicate, TaskDefinition, TaskList,
    };
    pub use crate::template::{MissingValue, TemplateEngine, TemplateError};
    pub use crate::types::StampedeResult;

    pub use stampede_core::prelude::*;
    pub use stampede_http_client::prelude::{
        HttpClient, HttpRequest, HttpResponse, Method, ResponseBody, Transport, TransportError,
    };
    pub use stampede_instruments::{ReportConfig, Reporter};
    pub use serde_json::json;
}

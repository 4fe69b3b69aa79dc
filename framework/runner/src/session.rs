mod state;

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use stampede_core::prelude::{DelegatedShutdownListener, FailureKind, RequestOutcome, SessionError};
use stampede_http_client::prelude::{HttpRequest, HttpResponse, Url};

use crate::context::RunnerContext;
use crate::definition::UserTypeDefinition;
use crate::retry::{AttemptResult, Classification};
use crate::scheduler::TaskScheduler;
use crate::task::{RenderError, SuccessPredicate, TaskDefinition};
use crate::template::MissingValue;

pub use state::SessionState;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The run was stopped.
    Graceful,
    Fatal(SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Created,
    Authenticating,
    Running,
    Stopped(Termination),
}

/// What a session did, returned when it stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: String,
    pub user_type: String,
    pub termination: Termination,
    pub login_attempts: u32,
    pub tasks_executed: usize,
    pub tasks_skipped: usize,
    /// Outcomes produced, one per attempt.
    pub outcomes: usize,
}

/// The last attempt of a task, with the response if there was one.
struct Attempted {
    outcome: RequestOutcome,
    classification: Classification,
    response: Option<HttpResponse>,
    attempt: u32,
}

impl AttemptResult for Attempted {
    fn classification(&self) -> Classification {
        self.classification
    }

    fn exhausted(mut self) -> Self {
        self.outcome = self.outcome.into_failed();
        self
    }
}

/// One virtual user, from login until the run stops.
pub struct VirtualUserSession {
    state: SessionState,
    status: SessionStatus,
    user_type: Arc<UserTypeDefinition>,
    context: Arc<RunnerContext>,
    scheduler: TaskScheduler,
    shutdown_listener: DelegatedShutdownListener,
    rng: StdRng,
    login_attempts: u32,
    tasks_executed: usize,
    tasks_skipped: usize,
    consecutive_skips: usize,
    outcomes: usize,
}

impl VirtualUserSession {
    /// Create a session and draw its credential from the user type's pool.
    pub fn new(
        session_id: &str,
        user_type: Arc<UserTypeDefinition>,
        context: Arc<RunnerContext>,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        let credential = user_type.credentials().choose(&mut rng).cloned();
        let role = credential
            .as_ref()
            .and_then(|c| user_type.role_for(c.identifier()));

        Self {
            state: SessionState::new(session_id, credential, role),
            status: SessionStatus::Created,
            scheduler: TaskScheduler::new(Arc::clone(user_type.tasks())),
            shutdown_listener: context.shutdown_handle().new_listener(),
            user_type,
            context,
            rng,
            login_attempts: 0,
            tasks_executed: 0,
            tasks_skipped: 0,
            consecutive_skips: 0,
            outcomes: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        self.state.session_id()
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Log in, then run tasks until the run is stopped or the session fails.
    pub async fn run(mut self) -> SessionReport {
        log::debug!(
            "Starting session {} as [{}]",
            self.session_id(),
            self.user_type.name()
        );

        self.status = SessionStatus::Authenticating;
        let termination = match self.authenticate().await {
            Ok(()) => {
                self.status = SessionStatus::Running;
                self.run_tasks().await
            }
            Err(e) => {
                log::warn!(
                    "Session {} stopped [{}]: {e}",
                    self.session_id(),
                    FailureKind::AuthenticationFailure
                );
                Termination::Fatal(e)
            }
        };

        if let Termination::Fatal(SessionError::MissingState { .. }) = &termination {
            log::warn!(
                "Session {} stopped after {} skipped tasks in a row",
                self.session_id(),
                self.consecutive_skips
            );
        }

        self.state.release();
        self.status = SessionStatus::Stopped(termination.clone());

        SessionReport {
            session_id: self.state.session_id().to_string(),
            user_type: self.user_type.name().to_string(),
            termination,
            login_attempts: self.login_attempts,
            tasks_executed: self.tasks_executed,
            tasks_skipped: self.tasks_skipped,
            outcomes: self.outcomes,
        }
    }

    async fn authenticate(&mut self) -> Result<(), SessionError> {
        let user_type = Arc::clone(&self.user_type);
        let Some(login) = user_type.login() else {
            self.state.set_authenticated();
            return Ok(());
        };

        if self.shutdown_listener.should_shutdown() {
            return Ok(());
        }

        let identifier = self.state.identifier().unwrap_or_default().to_string();
        let attempted = match self.execute(login, true).await {
            Ok(attempted) => attempted,
            Err(missing) => {
                log::error!("Cannot build login request for {identifier}: {missing}");
                return Err(SessionError::AuthenticationFailure {
                    identifier,
                    attempts: 0,
                });
            }
        };
        self.login_attempts = attempted.attempt;

        if !attempted.outcome.is_success() {
            if self.shutdown_listener.should_shutdown() {
                return Ok(());
            }

            return Err(SessionError::AuthenticationFailure {
                identifier,
                attempts: attempted.attempt,
            });
        }

        self.state.set_authenticated();
        log::info!(
            "Session {} logged in as {identifier}",
            self.session_id()
        );

        if let Some(probe) = user_type.identity_probe() {
            match self.execute(probe, probe.is_idempotent()).await {
                Ok(attempted) if attempted.outcome.is_success() => {
                    log::debug!(
                        "Identity probe for {identifier}: {}",
                        attempted.outcome.response_summary()
                    );
                }
                Ok(attempted) => {
                    log::warn!(
                        "Identity probe for {identifier} failed with status {}",
                        attempted.outcome.status_code()
                    );
                }
                Err(missing) => {
                    log::warn!("Identity probe for {identifier} skipped: {missing}");
                }
            }
        }

        Ok(())
    }

    async fn run_tasks(&mut self) -> Termination {
        loop {
            if self.shutdown_listener.should_shutdown() {
                log::debug!("Stopping session {}", self.session_id());
                return Termination::Graceful;
            }

            let task = self.scheduler.next();
            let retry = task.is_idempotent();
            match self.execute(&task, retry).await {
                Ok(_) => {
                    self.tasks_executed += 1;
                    self.consecutive_skips = 0;
                }
                Err(MissingValue { key }) => {
                    self.tasks_skipped += 1;
                    self.consecutive_skips += 1;
                    log::debug!(
                        "Session {} skipped task [{}], `{key}` is not set",
                        self.session_id(),
                        task.name()
                    );

                    if self.consecutive_skips >= self.user_type.max_consecutive_skips() {
                        return Termination::Fatal(SessionError::MissingState {
                            key,
                            skips: self.consecutive_skips,
                        });
                    }

                    tokio::task::yield_now().await;
                    continue;
                }
            }

            self.think().await;
        }
    }

    /// Send one task, retrying when asked to. Fails only if the request needs a session value
    /// that is not set, in which case nothing is sent.
    async fn execute(
        &mut self,
        task: &TaskDefinition,
        retry: bool,
    ) -> Result<Attempted, MissingValue> {
        let data = self.state.template_data();
        let task_name = task.display_name(self.user_type.templates(), &data);

        let request = match self.render(task, &data) {
            Ok(request) => request,
            Err(RenderError::Missing(missing)) => return Err(missing),
            Err(e) => {
                log::error!("Session {} cannot send [{task_name}]: {e}", self.session_id());
                let outcome =
                    RequestOutcome::transport_failure(&task_name, task.request().path(), e.to_string());
                self.context.reporter().record(outcome.clone()).await;
                self.outcomes += 1;

                return Ok(Attempted {
                    outcome,
                    classification: Classification::Failure,
                    response: None,
                    attempt: 1,
                });
            }
        };

        let context = self.context.as_ref();
        let success = task.success();
        let attempted = if retry {
            context
                .retry_policy()
                .attempt_until_stopped(&self.shutdown_listener, |attempt| {
                    send_attempt(context, &task_name, &request, success, attempt)
                })
                .await
        } else {
            send_attempt(context, &task_name, &request, success, 1).await
        };

        self.outcomes += attempted.attempt as usize;
        self.absorb(task, &task_name, &request.url, &attempted);

        Ok(attempted)
    }

    fn render(&self, task: &TaskDefinition, data: &Value) -> Result<HttpRequest, RenderError> {
        let templates = self.user_type.templates();
        let mut request = task
            .request()
            .render(self.user_type.base_url(), templates, data)?;

        for (name, value) in self.user_type.default_headers() {
            request = request.with_header(name, templates.render(value, data)?);
        }
        if let Some(cookies) = self.state.cookies().header_value(&request.url) {
            request = request.with_header("Cookie", cookies);
        }

        Ok(request)
    }

    /// Keep cookies from the final attempt and apply the task's extractions.
    fn absorb(&mut self, task: &TaskDefinition, task_name: &str, url: &Url, attempted: &Attempted) {
        let Some(response) = &attempted.response else {
            return;
        };

        self.state.cookies().store_set_cookies(&response.set_cookies, url);

        if !attempted.outcome.is_success() {
            return;
        }

        for extraction in task.extractions() {
            match extraction.apply(&response.body) {
                Some(value) => self.state.set_value(&extraction.key, value),
                None => {
                    log::warn!(
                        "Session {} [{}]: no value at `{}` in response to [{task_name}]",
                        self.state.session_id(),
                        FailureKind::ParseFailure,
                        extraction.pointer
                    );
                    self.state.remove_value(&extraction.key);
                }
            }
        }

        for key in task.consumed_keys() {
            self.state.remove_value(key);
        }
    }

    async fn think(&mut self) {
        let delay = self.user_type.think_time().sample(&mut self.rng);
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown_listener.wait_for_shutdown() => {}
        }
    }
}

/// Send one attempt and record its outcome.
async fn send_attempt(
    context: &RunnerContext,
    task_name: &str,
    request: &HttpRequest,
    success: &SuccessPredicate,
    attempt: u32,
) -> Attempted {
    let endpoint = request.endpoint().to_string();
    let started = Instant::now();

    let attempted = match context.transport().send(request.clone()).await {
        Ok(response) => {
            let succeeded = success.evaluate(&response);
            let outcome = RequestOutcome::new(task_name, endpoint)
                .with_status(response.status, succeeded)
                .with_elapsed(response.elapsed);

            let (outcome, classification) = match response.body.to_text() {
                Ok(text) => {
                    let classification = context.retry_policy().classify(&outcome, &text);
                    (outcome.with_summary(text.into_owned()), classification)
                }
                Err(e) => {
                    log::warn!("[{}] Could not serialize response to [{task_name}]: {e}", FailureKind::ParseFailure);
                    let outcome = outcome.with_error(format!("could not serialize response body: {e}"));
                    let classification = context.retry_policy().classify(&outcome, "");
                    (outcome, classification)
                }
            };

            Attempted {
                outcome,
                classification,
                response: Some(response),
                attempt,
            }
        }
        Err(e) => {
            log::debug!("[{task_name}] attempt {attempt} got no response: {e}");
            let outcome = RequestOutcome::transport_failure(task_name, endpoint, e.to_string())
                .with_elapsed(started.elapsed());
            let classification = context.retry_policy().classify(&outcome, "");

            Attempted {
                outcome,
                classification,
                response: None,
                attempt,
            }
        }
    };

    if !attempted.outcome.is_success() {
        log::debug!(
            "[{task_name}] attempt {attempt} failed with status {}",
            attempted.outcome.status_code()
        );
    }
    context.reporter().record(attempted.outcome.clone()).await;

    attempted
}

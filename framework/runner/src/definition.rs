use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use stampede_core::prelude::Credential;
use stampede_http_client::prelude::{Url, DEFAULT_REQUEST_TIMEOUT};

use crate::cli::StampedeCli;
use crate::retry::RetryPolicy;
use crate::task::{TaskDefinition, TaskList};
use crate::template::TemplateEngine;

/// Stop a session after this many skipped tasks in a row.
pub const DEFAULT_MAX_CONSECUTIVE_SKIPS: usize = 20;

/// Pause between tasks of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkTime {
    Fixed(Duration),
    /// Uniformly distributed between the bounds, inclusive.
    Between(Duration, Duration),
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self::Between(Duration::from_secs(1), Duration::from_secs(3))
    }
}

impl ThinkTime {
    pub fn none() -> Self {
        Self::Fixed(Duration::ZERO)
    }

    pub fn between_secs(min: u64, max: u64) -> Self {
        Self::Between(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Between(min, max) if max <= min => min,
            Self::Between(min, max) => rng.gen_range(min..=max),
        }
    }
}

/// How many virtual users to spawn and of which type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAllocation {
    /// The same number of users for every user type.
    PerType(usize),
    /// `total` users, each given a user type picked in proportion to the spawn weights.
    Weighted { total: usize },
}

/// Declares one kind of virtual user.
///
/// Finished by [ScenarioDefinitionBuilder::use_user_type], which checks the declaration when the
/// scenario is built.
#[derive(Debug, Clone)]
pub struct UserType {
    name: String,
    host: Option<String>,
    credentials: Vec<Credential>,
    roles: HashMap<String, String>,
    default_role: Option<String>,
    default_headers: Vec<(String, String)>,
    login: Option<TaskDefinition>,
    identity_probe: Option<TaskDefinition>,
    tasks: Option<TaskList>,
    spawn_weight: u32,
    think_time: ThinkTime,
    max_consecutive_skips: usize,
}

impl UserType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            host: None,
            credentials: Vec::new(),
            roles: HashMap::new(),
            default_role: None,
            default_headers: Vec::new(),
            login: None,
            identity_probe: None,
            tasks: None,
            spawn_weight: 1,
            think_time: ThinkTime::default(),
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
        }
    }

    /// Base URL of the service. The `--host` flag takes precedence.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Add to the pool that each session draws its credential from.
    pub fn with_credential(mut self, identifier: &str, secret: &str) -> Self {
        self.credentials.push(Credential::new(identifier, secret));
        self
    }

    pub fn with_credentials(mut self, credentials: impl IntoIterator<Item = Credential>) -> Self {
        self.credentials.extend(credentials);
        self
    }

    /// The `{{role}}` placeholder value for sessions logged in as `identifier`.
    pub fn with_role(mut self, identifier: &str, role: &str) -> Self {
        self.roles.insert(identifier.to_string(), role.to_string());
        self
    }

    /// The `{{role}}` placeholder value for identifiers without a role of their own.
    pub fn with_default_role(mut self, role: &str) -> Self {
        self.default_role = Some(role.to_string());
        self
    }

    /// A header sent with every request, placeholders included. For example
    /// `("Authorization", "token {{identifier}}:{{secret}}")`.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Self {
        self.default_headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Run `login` once before any task. The session stops if it never succeeds.
    pub fn use_login(mut self, login: TaskDefinition) -> Self {
        self.login = Some(login);
        self
    }

    /// Run `probe` once after a successful login. A failing probe is only logged.
    pub fn use_identity_probe(mut self, probe: TaskDefinition) -> Self {
        self.identity_probe = Some(probe);
        self
    }

    pub fn use_tasks(mut self, tasks: TaskList) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Relative share of users given this type when the total user count is set.
    pub fn with_spawn_weight(mut self, weight: u32) -> Self {
        self.spawn_weight = weight;
        self
    }

    pub fn with_think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn with_max_consecutive_skips(mut self, max_consecutive_skips: usize) -> Self {
        self.max_consecutive_skips = max_consecutive_skips.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build(self, host_override: Option<&str>) -> anyhow::Result<UserTypeDefinition> {
        let host = host_override
            .or(self.host.as_deref())
            .with_context(|| format!("No host set for user type [{}], use --host", self.name))?;
        let base_url = Url::parse(host)
            .with_context(|| format!("Invalid host for user type [{}]: {host}", self.name))?;

        let tasks = self
            .tasks
            .with_context(|| format!("No tasks defined for user type [{}]", self.name))?;
        tasks
            .validate()
            .with_context(|| format!("Invalid tasks for user type [{}]", self.name))?;

        for task in self.login.iter().chain(&self.identity_probe) {
            task.validate_templates()
                .with_context(|| format!("Invalid login for user type [{}]", self.name))?;
        }
        for (name, value) in &self.default_headers {
            TemplateEngine::validate(value).with_context(|| {
                format!("Invalid `{name}` header for user type [{}]", self.name)
            })?;
        }

        if self.login.is_some() && self.credentials.is_empty() {
            anyhow::bail!(
                "User type [{}] logs in but has no credentials to log in with",
                self.name
            );
        }

        Ok(UserTypeDefinition {
            name: self.name,
            base_url,
            credentials: self.credentials,
            roles: self.roles,
            default_role: self.default_role,
            default_headers: self.default_headers,
            login: self.login,
            identity_probe: self.identity_probe,
            tasks: Arc::new(tasks),
            spawn_weight: self.spawn_weight,
            think_time: self.think_time,
            max_consecutive_skips: self.max_consecutive_skips,
            templates: TemplateEngine::new(),
        })
    }
}

/// A checked [UserType], shared by all of its sessions.
#[derive(Debug)]
pub struct UserTypeDefinition {
    name: String,
    base_url: Url,
    credentials: Vec<Credential>,
    roles: HashMap<String, String>,
    default_role: Option<String>,
    default_headers: Vec<(String, String)>,
    login: Option<TaskDefinition>,
    identity_probe: Option<TaskDefinition>,
    tasks: Arc<TaskList>,
    spawn_weight: u32,
    think_time: ThinkTime,
    max_consecutive_skips: usize,
    templates: TemplateEngine,
}

impl UserTypeDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn role_for(&self, identifier: &str) -> Option<String> {
        self.roles
            .get(identifier)
            .or(self.default_role.as_ref())
            .cloned()
    }

    pub fn default_headers(&self) -> &[(String, String)] {
        &self.default_headers
    }

    pub fn login(&self) -> Option<&TaskDefinition> {
        self.login.as_ref()
    }

    pub fn identity_probe(&self) -> Option<&TaskDefinition> {
        self.identity_probe.as_ref()
    }

    pub fn tasks(&self) -> &Arc<TaskList> {
        &self.tasks
    }

    pub fn spawn_weight(&self) -> u32 {
        self.spawn_weight
    }

    pub fn think_time(&self) -> ThinkTime {
        self.think_time
    }

    pub fn max_consecutive_skips(&self) -> usize {
        self.max_consecutive_skips
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }
}

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
/// Values given with the `with_default_*` methods apply when the matching command line flag is
/// not set.
#[derive(Debug)]
pub struct ScenarioDefinitionBuilder {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: StampedeCli,
    default_duration_s: Option<u64>,
    default_users: UserAllocation,
    default_spawn_rate: Option<f64>,
    default_results_file: Option<PathBuf>,
    retry_policy: RetryPolicy,
    user_types: Vec<UserType>,
}

/// A checked scenario, ready to run.
#[derive(Debug)]
pub struct ScenarioDefinition {
    pub name: String,
    pub user_types: Vec<Arc<UserTypeDefinition>>,
    pub users: UserAllocation,
    /// Users started per second, or all at once if not set.
    pub spawn_rate: Option<f64>,
    /// Stop the run after this long. Runs until every session stops or Ctrl-C if not set.
    pub duration: Option<Duration>,
    pub retry_policy: RetryPolicy,
    pub request_timeout: Duration,
    pub results_file: Option<PathBuf>,
    pub summary_file: Option<PathBuf>,
    pub show_summary_table: bool,
    pub show_progress: bool,
}

impl ScenarioDefinitionBuilder {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, crate::init::init())
    }

    /// Initialise a new scenario definition with a pre-parsed CLI.
    pub fn new(name: &str, cli: StampedeCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_duration_s: None,
            default_users: UserAllocation::PerType(1),
            default_spawn_rate: None,
            default_results_file: None,
            retry_policy: RetryPolicy::default(),
            user_types: Vec::new(),
        }
    }

    /// Run for this many seconds unless `--duration` or `--soak` is given.
    pub fn with_default_duration_s(mut self, duration: u64) -> Self {
        self.default_duration_s = Some(duration);
        self
    }

    pub fn with_default_users_per_type(mut self, users: usize) -> Self {
        self.default_users = UserAllocation::PerType(users);
        self
    }

    pub fn with_default_total_users(mut self, total: usize) -> Self {
        self.default_users = UserAllocation::Weighted { total };
        self
    }

    pub fn with_default_spawn_rate(mut self, users_per_second: f64) -> Self {
        self.default_spawn_rate = Some(users_per_second);
        self
    }

    pub fn with_default_results_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_results_file = Some(path.into());
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Add a user type to this scenario.
    pub fn use_user_type(mut self, user_type: UserType) -> Self {
        if self.user_types.iter().any(|u| u.name() == user_type.name()) {
            panic!("User type [{}] is already defined", user_type.name());
        }

        self.user_types.push(user_type);
        self
    }

    /// Combine the declared scenario with the command line and check it.
    pub fn build(self) -> anyhow::Result<ScenarioDefinition> {
        if self.user_types.is_empty() {
            anyhow::bail!("No user types defined for scenario [{}]", self.name);
        }

        let cli = self.cli;
        let users = match (cli.users, cli.users_per_type) {
            (Some(total), _) => UserAllocation::Weighted { total },
            (None, Some(per_type)) => UserAllocation::PerType(per_type),
            (None, None) => self.default_users,
        };

        let user_types = self
            .user_types
            .into_iter()
            .map(|u| u.build(cli.host.as_deref()).map(Arc::new))
            .collect::<anyhow::Result<Vec<_>>>()?;

        if let UserAllocation::Weighted { total } = users {
            if total > 0 && user_types.iter().all(|u| u.spawn_weight() == 0) {
                anyhow::bail!("All user type spawn weights are zero");
            }
        }

        let spawn_rate = cli.spawn_rate.or(self.default_spawn_rate);
        if let Some(rate) = spawn_rate {
            if !rate.is_finite() || rate <= 0.0 {
                anyhow::bail!("Spawn rate must be a positive number of users per second, got {rate}");
            }
            Duration::try_from_secs_f64(1.0 / rate)
                .with_context(|| format!("Spawn rate {rate} is too low to schedule users"))?;
        }

        let duration = if cli.soak {
            None
        } else {
            cli.duration.or(self.default_duration_s).map(Duration::from_secs)
        };

        Ok(ScenarioDefinition {
            name: self.name,
            user_types,
            users,
            spawn_rate,
            duration,
            retry_policy: self.retry_policy,
            request_timeout: cli
                .request_timeout_s
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            results_file: cli.results_file.or(self.default_results_file),
            summary_file: cli.summary_file,
            show_summary_table: !cli.no_summary_table,
            show_progress: !cli.no_progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RequestTemplate;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn user_type(name: &str) -> UserType {
        UserType::new(name)
            .with_host("http://localhost:8000")
            .use_tasks(TaskList::weighted([TaskDefinition::new(
                "list",
                RequestTemplate::get("/api/resource/Visitor"),
            )]))
    }

    #[test]
    fn cli_overrides_defaults() {
        let cli = StampedeCli {
            host: Some("http://10.0.0.1".to_string()),
            users: Some(12),
            duration: Some(30),
            request_timeout_s: Some(5),
            ..Default::default()
        };

        let definition = ScenarioDefinitionBuilder::new("test", cli)
            .with_default_duration_s(600)
            .with_default_users_per_type(3)
            .use_user_type(user_type("visitor"))
            .build()
            .unwrap();

        assert_eq!(UserAllocation::Weighted { total: 12 }, definition.users);
        assert_eq!(Some(Duration::from_secs(30)), definition.duration);
        assert_eq!(Duration::from_secs(5), definition.request_timeout);
        assert_eq!("http://10.0.0.1/", definition.user_types[0].base_url().as_str());
    }

    #[test]
    fn defaults_apply_without_flags() {
        let definition = ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .with_default_duration_s(600)
            .with_default_users_per_type(3)
            .with_default_results_file("results.csv")
            .use_user_type(user_type("visitor"))
            .build()
            .unwrap();

        assert_eq!(UserAllocation::PerType(3), definition.users);
        assert_eq!(Some(Duration::from_secs(600)), definition.duration);
        assert_eq!(DEFAULT_REQUEST_TIMEOUT, definition.request_timeout);
        assert_eq!(Some(PathBuf::from("results.csv")), definition.results_file);
        assert!(definition.show_summary_table);
    }

    #[test]
    fn soak_ignores_duration() {
        let cli = StampedeCli {
            soak: true,
            duration: Some(30),
            ..Default::default()
        };

        let definition = ScenarioDefinitionBuilder::new("test", cli)
            .with_default_duration_s(600)
            .use_user_type(user_type("visitor"))
            .build()
            .unwrap();

        assert_eq!(None, definition.duration);
    }

    #[test]
    fn rejects_invalid_definitions() {
        assert!(ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .build()
            .is_err());

        assert!(ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .use_user_type(UserType::new("no_host").use_tasks(TaskList::weighted([
                TaskDefinition::new("list", RequestTemplate::get("/")),
            ])))
            .build()
            .is_err());

        assert!(ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .use_user_type(user_type("login_without_credentials").use_login(
                TaskDefinition::new("login", RequestTemplate::post("/api/method/login"))
            ))
            .build()
            .is_err());

        assert!(ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .with_default_spawn_rate(0.0)
            .use_user_type(user_type("visitor"))
            .build()
            .is_err());

        assert!(ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .use_user_type(
                user_type("reports").with_default_header("Authorization", "token {{identifier")
            )
            .build()
            .is_err());
    }

    #[test]
    fn spawn_rate_must_give_a_representable_interval() {
        let cli = StampedeCli {
            spawn_rate: Some(1e-300),
            ..Default::default()
        };
        let err = ScenarioDefinitionBuilder::new("test", cli)
            .use_user_type(user_type("visitor"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("too low"), "{err:#}");

        let definition = ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .with_default_spawn_rate(0.5)
            .use_user_type(user_type("visitor"))
            .build()
            .unwrap();
        assert_eq!(Some(0.5), definition.spawn_rate);
    }

    #[test]
    #[should_panic(expected = "User type [visitor] is already defined")]
    fn duplicate_user_type_panics() {
        let _ = ScenarioDefinitionBuilder::new("test", StampedeCli::default())
            .use_user_type(user_type("visitor"))
            .use_user_type(user_type("visitor"));
    }

    #[test]
    fn roles_fall_back_to_default() {
        let definition = user_type("employee")
            .with_role("emp1@erp.in", " (FL) ")
            .with_default_role("Unknown")
            .build(None)
            .unwrap();

        assert_eq!(Some(" (FL) ".to_string()), definition.role_for("emp1@erp.in"));
        assert_eq!(Some("Unknown".to_string()), definition.role_for("other@erp.in"));
    }

    #[test]
    fn think_time_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let think_time = ThinkTime::between_secs(1, 3);

        for _ in 0..1000 {
            let delay = think_time.sample(&mut rng);
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
        }
        assert_eq!(Duration::ZERO, ThinkTime::none().sample(&mut rng));
    }
}

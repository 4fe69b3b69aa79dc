use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stampede_core::prelude::ShutdownHandle;
use tokio::task::{JoinHandle, JoinSet};

use crate::context::RunnerContext;
use crate::definition::{ScenarioDefinition, UserAllocation, UserTypeDefinition};
use crate::session::{SessionReport, Termination, VirtualUserSession};

/// How a run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub spawned: usize,
    pub completed_gracefully: usize,
    pub failed_fatal: usize,
    /// Outcomes produced by sessions that reported back, one per attempt.
    pub total_outcomes: usize,
    pub spawned_by_user_type: BTreeMap<String, usize>,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} users spawned, {} stopped gracefully, {} failed, {} outcomes",
            self.spawned, self.completed_gracefully, self.failed_fatal, self.total_outcomes
        )
    }
}

/// Starts sessions for a scenario and supervises them until the run is over.
#[derive(Debug)]
pub struct LoadController {
    context: Arc<RunnerContext>,
}

/// A run in progress.
#[derive(Debug)]
pub struct RunHandle {
    shutdown_handle: ShutdownHandle,
    supervisor: JoinHandle<Summary>,
}

impl LoadController {
    pub fn new(context: Arc<RunnerContext>) -> Self {
        Self { context }
    }

    /// Start spawning sessions. Must be called from within a Tokio runtime.
    pub fn start(&self, scenario: &ScenarioDefinition) -> RunHandle {
        let plan = plan_spawns(&scenario.user_types, scenario.users, &mut StdRng::from_entropy());
        log::info!(
            "Spawning {} users for scenario [{}]",
            plan.len(),
            scenario.name
        );

        let shutdown_handle = self.context.shutdown_handle().clone();
        let supervisor = tokio::spawn(supervise(
            plan,
            scenario.spawn_rate,
            scenario.duration,
            Arc::clone(&self.context),
        ));

        RunHandle {
            shutdown_handle,
            supervisor,
        }
    }
}

impl RunHandle {
    /// Ask every session to stop. No new session is spawned after this.
    pub fn stop(&self) {
        self.shutdown_handle.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Wait for every session to stop.
    pub async fn await_completion(self) -> Summary {
        match self.supervisor.await {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("Run supervisor failed: {e}");
                Summary::default()
            }
        }
    }
}

/// The user type of every session to spawn, in spawn order.
pub(crate) fn plan_spawns(
    user_types: &[Arc<UserTypeDefinition>],
    allocation: UserAllocation,
    rng: &mut impl Rng,
) -> Vec<Arc<UserTypeDefinition>> {
    if user_types.is_empty() {
        return Vec::new();
    }

    match allocation {
        // Interleave the types so a spawn rate ramps all of them up together.
        UserAllocation::PerType(count) => (0..count)
            .flat_map(|_| user_types.iter().cloned())
            .collect(),
        UserAllocation::Weighted { total } => {
            let weights = user_types.iter().map(|u| u.spawn_weight());
            match WeightedIndex::new(weights) {
                Ok(index) => (0..total)
                    .map(|_| Arc::clone(&user_types[index.sample(rng)]))
                    .collect(),
                Err(e) => {
                    log::warn!("Cannot weight user types ({e}), picking uniformly");
                    (0..total)
                        .map(|_| Arc::clone(&user_types[rng.gen_range(0..user_types.len())]))
                        .collect()
                }
            }
        }
    }
}

async fn supervise(
    plan: Vec<Arc<UserTypeDefinition>>,
    spawn_rate: Option<f64>,
    duration: Option<Duration>,
    context: Arc<RunnerContext>,
) -> Summary {
    let shutdown_handle = context.shutdown_handle().clone();
    let timer = duration.map(|duration| {
        let shutdown_handle = shutdown_handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            log::info!("Run duration of {}s reached, stopping", duration.as_secs());
            shutdown_handle.shutdown();
        })
    });

    let spawn_interval = spawn_rate.and_then(|rate| Duration::try_from_secs_f64(1.0 / rate).ok());
    let mut shutdown_listener = shutdown_handle.new_listener();
    let mut summary = Summary::default();
    let mut sessions = JoinSet::new();

    for (index, user_type) in plan.into_iter().enumerate() {
        if shutdown_listener.should_shutdown() {
            log::info!("Run stopped after spawning {} users", summary.spawned);
            break;
        }

        if index > 0 {
            if let Some(interval) = spawn_interval {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_listener.wait_for_shutdown() => {
                        log::info!("Run stopped after spawning {} users", summary.spawned);
                        break;
                    }
                }
            }
        }

        let session_id = format!("{}-{index}", user_type.name());
        *summary
            .spawned_by_user_type
            .entry(user_type.name().to_string())
            .or_default() += 1;
        summary.spawned += 1;

        let session = VirtualUserSession::new(&session_id, user_type, Arc::clone(&context));
        sessions.spawn(session.run());
    }

    while let Some(result) = sessions.join_next().await {
        match result {
            Ok(report) => record_report(&mut summary, report),
            Err(e) => {
                log::error!("Session task failed: {e}");
                summary.failed_fatal += 1;
            }
        }
    }

    if let Some(timer) = timer {
        timer.abort();
    }

    summary
}

fn record_report(summary: &mut Summary, report: SessionReport) {
    summary.total_outcomes += report.outcomes;
    match report.termination {
        Termination::Graceful => summary.completed_gracefully += 1,
        Termination::Fatal(e) => {
            log::debug!("Session {} failed: {e}", report.session_id);
            summary.failed_fatal += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::StampedeCli;
    use crate::definition::{ScenarioDefinitionBuilder, UserType};
    use crate::task::{RequestTemplate, TaskDefinition, TaskList};
    use pretty_assertions::assert_eq;

    fn user_types(weights: &[(&str, u32)]) -> Vec<Arc<UserTypeDefinition>> {
        let builder = weights.iter().fold(
            ScenarioDefinitionBuilder::new("test", StampedeCli::default()),
            |builder, (name, weight)| {
                builder.use_user_type(
                    UserType::new(name)
                        .with_host("http://localhost")
                        .with_spawn_weight(*weight)
                        .use_tasks(TaskList::weighted([TaskDefinition::new(
                            "list",
                            RequestTemplate::get("/"),
                        )])),
                )
            },
        );

        builder.build().unwrap().user_types
    }

    fn names(plan: &[Arc<UserTypeDefinition>]) -> Vec<&str> {
        plan.iter().map(|u| u.name()).collect()
    }

    #[test]
    fn per_type_interleaves_user_types() {
        let user_types = user_types(&[("employee", 1), ("manager", 1)]);
        let plan = plan_spawns(
            &user_types,
            UserAllocation::PerType(2),
            &mut StdRng::seed_from_u64(1),
        );

        assert_eq!(vec!["employee", "manager", "employee", "manager"], names(&plan));
    }

    #[test]
    fn weighted_allocation_follows_spawn_weights() {
        let user_types = user_types(&[("employee", 3), ("manager", 1), ("disabled", 0)]);
        let plan = plan_spawns(
            &user_types,
            UserAllocation::Weighted { total: 4000 },
            &mut StdRng::seed_from_u64(1),
        );

        let employees = plan.iter().filter(|u| u.name() == "employee").count();
        assert_eq!(4000, plan.len());
        assert!((2800..3200).contains(&employees), "{employees}");
        assert!(plan.iter().all(|u| u.name() != "disabled"));
    }

    #[test]
    fn zero_users_plans_nothing() {
        let user_types = user_types(&[("employee", 1)]);

        assert!(plan_spawns(&user_types, UserAllocation::PerType(0), &mut StdRng::seed_from_u64(1)).is_empty());
        assert!(plan_spawns(
            &user_types,
            UserAllocation::Weighted { total: 0 },
            &mut StdRng::seed_from_u64(1)
        )
        .is_empty());
    }

    #[test]
    fn summary_counts_terminations() {
        let mut summary = Summary::default();
        let report = |termination| SessionReport {
            session_id: "employee-0".to_string(),
            user_type: "employee".to_string(),
            termination,
            login_attempts: 1,
            tasks_executed: 2,
            tasks_skipped: 0,
            outcomes: 3,
        };

        record_report(&mut summary, report(Termination::Graceful));
        record_report(
            &mut summary,
            report(Termination::Fatal(
                stampede_core::prelude::SessionError::AuthenticationFailure {
                    identifier: "emp1@erp.in".to_string(),
                    attempts: 3,
                },
            )),
        );

        assert_eq!(1, summary.completed_gracefully);
        assert_eq!(1, summary.failed_fatal);
        assert_eq!(6, summary.total_outcomes);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use stampede_http_client::prelude::{HttpClient, Transport};
use stampede_instruments::ReportConfig;
use stampede_summary_model::{append_run_summary, RunSummary};

use crate::context::RunnerContext;
use crate::controller::{LoadController, Summary};
use crate::definition::{ScenarioDefinition, ScenarioDefinitionBuilder, UserAllocation};
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::shutdown::start_shutdown_listener;

/// Run a scenario to completion.
///
/// Blocks until the run is over: the configured duration has passed, Ctrl-C was pressed or every
/// session has stopped. A summary is produced even if every request failed.
pub fn run(definition: ScenarioDefinitionBuilder) -> anyhow::Result<Summary> {
    let definition = definition.build()?;

    log::info!("Running scenario: {}", definition.name);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);

    let transport: Arc<dyn Transport> = Arc::new(
        HttpClient::new(definition.request_timeout).context("Failed to create HTTP client")?,
    );
    let reporter = Arc::new(report_config(&definition).init(runtime.handle()));
    let context = Arc::new(RunnerContext::new(
        transport,
        Arc::clone(&reporter),
        definition.retry_policy.clone(),
        shutdown_handle.clone(),
    ));

    if let Some(duration) = definition.duration {
        if definition.show_progress {
            if let Err(e) = start_progress(
                duration,
                Arc::clone(&reporter),
                shutdown_handle.new_listener(),
            ) {
                log::warn!("Could not start progress bar: {e}");
            }
        }
    }

    // Started before any session so that high usage while spawning is reported too.
    if let Err(e) = start_monitor(shutdown_handle.new_listener()) {
        log::warn!("Could not start resource monitor: {e}");
    }

    let started_at = chrono::Utc::now().timestamp();
    let summary = runtime.block_on(async {
        let handle = LoadController::new(context).start(&definition);
        let summary = handle.await_completion().await;
        reporter.finalize().await;
        summary
    });

    // Sessions are done, this stops the progress and monitor threads.
    shutdown_handle.shutdown();

    log::info!("Scenario [{}] finished: {summary}", definition.name);

    if let Some(path) = &definition.summary_file {
        let run_summary = run_summary(&definition, started_at, &summary);
        log::info!(
            "Run {} has fingerprint {}",
            run_summary.run_id,
            run_summary.fingerprint()
        );
        if let Err(e) = append_run_summary(&run_summary, path) {
            log::error!("Failed to write run summary to {}: {e:?}", path.display());
        }
    }

    Ok(summary)
}

fn report_config(definition: &ScenarioDefinition) -> ReportConfig {
    let mut config = ReportConfig::default();
    if let Some(path) = &definition.results_file {
        config = config.enable_results_file(path);
    }
    if definition.show_summary_table {
        config = config.enable_summary();
    }
    config
}

fn run_summary(definition: &ScenarioDefinition, started_at: i64, summary: &Summary) -> RunSummary {
    let mut run_summary = RunSummary::new(
        nanoid::nanoid!(),
        definition.name.clone(),
        started_at,
        definition.duration.map(|d| d.as_secs()),
        summary
            .spawned_by_user_type
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect::<HashMap<_, _>>(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    run_summary.set_session_results(
        summary.completed_gracefully,
        summary.failed_fatal,
        summary.total_outcomes,
    );

    // Part of the fingerprint, so runs against different targets or loads are told apart.
    for user_type in &definition.user_types {
        run_summary.add_env(
            format!("host.{}", user_type.name()),
            user_type.base_url().to_string(),
        );
    }
    let users = match definition.users {
        UserAllocation::PerType(count) => format!("{count} per user type"),
        UserAllocation::Weighted { total } => format!("{total} weighted"),
    };
    run_summary.add_env("users".to_string(), users);
    if let Some(rate) = definition.spawn_rate {
        run_summary.add_env("spawn_rate".to_string(), rate.to_string());
    }

    run_summary
}

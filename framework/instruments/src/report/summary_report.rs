mod task_table;

use std::collections::BTreeMap;
use std::time::Duration;

use stampede_core::prelude::RequestOutcome;
use tabled::settings::Style;
use tabled::Table;

use crate::report::ReportCollector;

pub use task_table::TaskRow;

#[derive(Debug, Default)]
struct TaskStats {
    total: usize,
    succeeded: usize,
    timed: usize,
    total_elapsed: Duration,
    min_elapsed: Option<Duration>,
    max_elapsed: Option<Duration>,
}

/// Keeps running totals per task name and prints them as a table at the end of the run.
///
/// Timings only cover attempts that got an HTTP response.
#[derive(Debug, Default)]
pub struct SummaryReportCollector {
    tasks: BTreeMap<String, TaskStats>,
}

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<TaskRow> {
        self.tasks
            .iter()
            .map(|(task_name, stats)| {
                let avg_time_ms = if stats.timed > 0 {
                    stats.total_elapsed.as_micros() as f64 / stats.timed as f64 / 1000.0
                } else {
                    0.0
                };

                TaskRow {
                    task_name: task_name.clone(),
                    total: stats.total,
                    succeeded: stats.succeeded,
                    failed: stats.total - stats.succeeded,
                    avg_time_ms,
                    min_time_ms: as_ms(stats.min_elapsed),
                    max_time_ms: as_ms(stats.max_elapsed),
                }
            })
            .collect()
    }

    fn print_summary_of_tasks(&self) {
        println!("\nSummary of tasks");

        let mut table = Table::new(self.rows());
        table.with(Style::modern());

        println!("{table}");
    }
}

fn as_ms(duration: Option<Duration>) -> f64 {
    duration
        .map(|d| d.as_micros() as f64 / 1000.0)
        .unwrap_or_default()
}

impl ReportCollector for SummaryReportCollector {
    fn add_outcome(&mut self, outcome: &RequestOutcome) {
        let stats = self.tasks.entry(outcome.task_name().to_string()).or_default();
        stats.total += 1;
        if outcome.is_success() {
            stats.succeeded += 1;
        }

        if !outcome.is_transport_failure() {
            let elapsed = outcome.elapsed();
            stats.timed += 1;
            stats.total_elapsed += elapsed;
            stats.min_elapsed = Some(stats.min_elapsed.map_or(elapsed, |min| min.min(elapsed)));
            stats.max_elapsed = Some(stats.max_elapsed.map_or(elapsed, |max| max.max(elapsed)));
        }
    }

    fn finalize(&self) {
        self.print_summary_of_tasks();
    }
}

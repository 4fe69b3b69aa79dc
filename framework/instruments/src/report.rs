mod summary_report;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use stampede_core::prelude::RequestOutcome;
use tokio::runtime::Handle;

use crate::recorder::{RecorderConfig, ResultRecorder, DEFAULT_QUEUE_CAPACITY, DEFAULT_SUMMARY_CAP};

pub use summary_report::{SummaryReportCollector, TaskRow};

pub trait ReportCollector {
    fn add_outcome(&mut self, outcome: &RequestOutcome);

    fn finalize(&self);
}

/// Choose where outcomes go for a run.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    results_file: Option<PathBuf>,
    summary_cap: usize,
    queue_capacity: usize,
    enable_summary: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            results_file: None,
            summary_cap: DEFAULT_SUMMARY_CAP,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enable_summary: false,
        }
    }
}

impl ReportConfig {
    /// Write every outcome to a CSV file at `path`.
    pub fn enable_results_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_file = Some(path.into());
        self
    }

    /// Print a per-task table when the run finishes.
    pub fn enable_summary(mut self) -> Self {
        self.enable_summary = true;
        self
    }

    pub fn with_summary_cap(mut self, summary_cap: usize) -> Self {
        self.summary_cap = summary_cap;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Start the configured sinks. File sinks run their write task on `runtime`.
    pub fn init(self, runtime: &Handle) -> Reporter {
        let recorder = self.results_file.map(|path| {
            ResultRecorder::open(
                runtime,
                RecorderConfig::new(path)
                    .with_summary_cap(self.summary_cap)
                    .with_queue_capacity(self.queue_capacity),
            )
        });
        let summary = self
            .enable_summary
            .then(|| Mutex::new(SummaryReportCollector::new()));

        Reporter {
            recorder,
            summary,
            outcome_count: AtomicUsize::new(0),
        }
    }
}

/// Fans outcomes out to the sinks chosen in [ReportConfig].
pub struct Reporter {
    recorder: Option<ResultRecorder>,
    summary: Option<Mutex<SummaryReportCollector>>,
    outcome_count: AtomicUsize,
}

impl Reporter {
    pub async fn record(&self, outcome: RequestOutcome) {
        self.outcome_count.fetch_add(1, Ordering::Relaxed);

        if let Some(summary) = &self.summary {
            summary.lock().add_outcome(&outcome);
        }

        if let Some(recorder) = &self.recorder {
            recorder.record(outcome).await;
        }
    }

    /// Number of outcomes accepted so far, whether or not a sink managed to store them.
    pub fn outcome_count(&self) -> usize {
        self.outcome_count.load(Ordering::Relaxed)
    }

    pub async fn flush(&self) {
        if let Some(recorder) = &self.recorder {
            recorder.flush().await;
        }
    }

    /// Close the results file and print the summary table, if enabled.
    pub async fn finalize(&self) {
        if let Some(recorder) = &self.recorder {
            recorder.close().await;
        }

        if let Some(summary) = &self.summary {
            summary.lock().finalize();
        }
    }

    /// Rows of the summary table as they stand now. Empty if the summary is disabled.
    pub fn summary_rows(&self) -> Vec<TaskRow> {
        self.summary
            .as_ref()
            .map(|summary| summary.lock().rows())
            .unwrap_or_default()
    }
}

mod recorder;
mod report;

pub use recorder::{
    truncate_summary, RecorderConfig, ResultRecorder, DEFAULT_QUEUE_CAPACITY, DEFAULT_SUMMARY_CAP,
    RESULT_COLUMNS, TRUNCATION_MARKER,
};
pub use report::{ReportCollector, ReportConfig, Reporter, SummaryReportCollector, TaskRow};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::SecondsFormat;
use parking_lot::Mutex;
use stampede_core::prelude::{FailureKind, RequestOutcome};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Response summaries longer than this many characters are cut.
pub const DEFAULT_SUMMARY_CAP: usize = 1000;

/// Appended to a summary that was cut.
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// How many outcomes may wait for the writer before `record` has to wait for space.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// How long an appending writer waits for the creator of a results file to write its header.
const HEADER_WAIT_ATTEMPTS: u32 = 50;
const HEADER_WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Column layout of the results file. Written once, when the file is created.
pub const RESULT_COLUMNS: [&str; 6] = [
    "timestamp",
    "task_name",
    "endpoint",
    "status_code",
    "success",
    "response_summary",
];

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub path: PathBuf,
    pub summary_cap: usize,
    pub queue_capacity: usize,
}

impl RecorderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            summary_cap: DEFAULT_SUMMARY_CAP,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_summary_cap(mut self, summary_cap: usize) -> Self {
        self.summary_cap = summary_cap;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }
}

enum WriterCommand {
    Record(RequestOutcome),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Append-only CSV sink for [RequestOutcome]s.
///
/// Sessions hand outcomes to a bounded queue. A single write task owns the file, so rows are
/// never interleaved and no session waits on disk I/O. Outcomes sent from one task are written
/// in the order they were sent.
pub struct ResultRecorder {
    sender: mpsc::Sender<WriterCommand>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResultRecorder {
    /// Start the write task on `runtime`. The file is created, with its header row, when the
    /// task starts. An existing file is appended to.
    pub fn open(runtime: &Handle, config: RecorderConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let join_handle = runtime.spawn(write_task(config, receiver));

        Self {
            sender,
            join_handle: Mutex::new(Some(join_handle)),
        }
    }

    /// Queue an outcome for writing. Waits only if the queue is full.
    pub async fn record(&self, outcome: RequestOutcome) {
        if let Err(e) = self.sender.send(WriterCommand::Record(outcome)).await {
            if let WriterCommand::Record(outcome) = e.0 {
                log::warn!(
                    "Dropping outcome for task [{}] because the result writer has stopped",
                    outcome.task_name()
                );
            }
        }
    }

    /// Wait until every outcome recorded before this call has been written out.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(WriterCommand::Flush(ack)).await.is_err() {
            log::debug!("Flush requested after the result writer stopped");
            return;
        }

        if done.await.is_err() {
            log::warn!("Result writer stopped before the flush completed");
        }
    }

    /// Flush and release the file. Later calls to `record` drop their outcome.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(WriterCommand::Close(ack)).await.is_ok() {
            let _ = done.await;
        }

        let join_handle = self.join_handle.lock().take();
        if let Some(join_handle) = join_handle {
            if let Err(e) = join_handle.await {
                log::error!("Result writer task failed: {:?}", e);
            }
        }
    }
}

async fn write_task(config: RecorderConfig, mut receiver: mpsc::Receiver<WriterCommand>) {
    let mut sink = match CsvSink::open(&config.path).await {
        Ok(sink) => Some(sink),
        Err(e) => {
            log::error!(
                "{}: could not open results file {}: {}",
                FailureKind::RecorderWriteFailure,
                config.path.display(),
                e
            );
            None
        }
    };

    let mut written = 0usize;
    let mut dropped = 0usize;
    while let Some(command) = receiver.recv().await {
        match command {
            WriterCommand::Record(outcome) => {
                let Some(sink) = sink.as_mut() else {
                    dropped += 1;
                    continue;
                };

                match sink.write_outcome(&outcome, config.summary_cap).await {
                    Ok(()) => written += 1,
                    Err(e) => {
                        dropped += 1;
                        log::error!(
                            "{}: dropping outcome for task [{}]: {}",
                            FailureKind::RecorderWriteFailure,
                            outcome.task_name(),
                            e
                        );
                    }
                }
            }
            WriterCommand::Flush(ack) => {
                flush_sink(&mut sink).await;
                let _ = ack.send(());
            }
            WriterCommand::Close(ack) => {
                flush_sink(&mut sink).await;
                let _ = ack.send(());
                break;
            }
        }
    }

    flush_sink(&mut sink).await;

    if dropped > 0 {
        log::warn!(
            "Result writer finished with {} outcome(s) written and {} dropped",
            written,
            dropped
        );
    } else {
        log::debug!("Result writer finished with {} outcome(s) written", written);
    }
}

async fn flush_sink(sink: &mut Option<CsvSink>) {
    if let Some(sink) = sink.as_mut() {
        if let Err(e) = sink.writer.flush().await {
            log::error!(
                "{}: failed to flush results file: {}",
                FailureKind::RecorderWriteFailure,
                e
            );
        }
    }
}

struct CsvSink {
    writer: BufWriter<File>,
}

impl CsvSink {
    async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Whoever creates the file writes the header. Everyone else just appends.
        match OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                writer.write_all(&encode_fields(&RESULT_COLUMNS)?).await?;
                writer.flush().await?;
                log::debug!("Created results file {}", path.display());
                Ok(Self { writer })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                wait_for_header(path).await?;
                let file = OpenOptions::new().append(true).open(path).await?;
                log::debug!("Appending to existing results file {}", path.display());
                Ok(Self {
                    writer: BufWriter::new(file),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn write_outcome(
        &mut self,
        outcome: &RequestOutcome,
        summary_cap: usize,
    ) -> std::io::Result<()> {
        let row = encode_outcome(outcome, summary_cap);
        self.writer.write_all(&row).await
    }
}

/// Rows must not land before the header when another writer has only just created the file.
async fn wait_for_header(path: &Path) -> std::io::Result<()> {
    for _ in 0..HEADER_WAIT_ATTEMPTS {
        if tokio::fs::metadata(path).await?.len() > 0 {
            return Ok(());
        }
        tokio::time::sleep(HEADER_WAIT_INTERVAL).await;
    }

    log::warn!(
        "Results file {} is still empty, appending without waiting for its header",
        path.display()
    );
    Ok(())
}

fn encode_outcome(outcome: &RequestOutcome, summary_cap: usize) -> Vec<u8> {
    let mut fields = [
        outcome
            .timestamp()
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        outcome.task_name().to_string(),
        outcome.endpoint().to_string(),
        outcome.status_code().to_string(),
        outcome.is_success().to_string(),
        summary_cell(outcome, summary_cap),
    ];

    match encode_fields(&fields) {
        Ok(row) => row,
        Err(e) => {
            log::warn!(
                "Could not serialize outcome for task [{}]: {}",
                outcome.task_name(),
                e
            );
            fields[5] = format!("error: failed to serialize outcome: {e}");
            encode_fields(&fields).unwrap_or_default()
        }
    }
}

fn summary_cell(outcome: &RequestOutcome, summary_cap: usize) -> String {
    if outcome.response_summary().is_empty() {
        let detail = outcome
            .error_detail()
            .map(|detail| format!("error: {detail}"))
            .unwrap_or_default();
        truncate_summary(&detail, summary_cap)
    } else {
        truncate_summary(outcome.response_summary(), summary_cap)
    }
}

/// Cut `summary` to at most `cap` characters, marking it with [TRUNCATION_MARKER] if anything
/// was removed.
pub fn truncate_summary(summary: &str, cap: usize) -> String {
    match summary.char_indices().nth(cap) {
        Some((cut, _)) => format!("{}{}", &summary[..cut], TRUNCATION_MARKER),
        None => summary.to_string(),
    }
}

fn encode_fields<S: AsRef<[u8]>>(fields: &[S]) -> std::io::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields).map_err(std::io::Error::other)?;
    writer.into_inner().map_err(|e| e.into_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap())
            .collect()
    }

    fn header_count(rows: &[csv::StringRecord]) -> usize {
        rows.iter()
            .filter(|row| row.iter().eq(RESULT_COLUMNS.iter().copied()))
            .count()
    }

    #[test]
    fn truncate_long_summary() {
        let summary = "x".repeat(1500);

        let truncated = truncate_summary(&summary, DEFAULT_SUMMARY_CAP);

        assert_eq!(1000 + TRUNCATION_MARKER.len(), truncated.len());
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert_eq!("x".repeat(1000), &truncated[..1000]);
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let summary = "é".repeat(5);

        assert_eq!("éé...(truncated)", truncate_summary(&summary, 2));
        assert_eq!(summary, truncate_summary(&summary, 5));
    }

    #[test]
    fn error_detail_fills_empty_summary() {
        let outcome = RequestOutcome::transport_failure("login", "/api/method/login", "timed out");
        assert_eq!("error: timed out", summary_cell(&outcome, DEFAULT_SUMMARY_CAP));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_produce_one_header_and_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let recorder = Arc::new(ResultRecorder::open(
            &Handle::current(),
            RecorderConfig::new(&path).with_queue_capacity(16),
        ));

        let sessions = 25;
        let per_session = 40;
        let mut handles = Vec::new();
        for session in 0..sessions {
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                for seq in 0..per_session {
                    let outcome = RequestOutcome::new(
                        format!("session-{session}"),
                        format!("/api/method/item?seq={seq}"),
                    )
                    .with_status(200 + (seq % 2) as u16, seq % 2 == 0)
                    .with_summary(format!("{{\"message\": \"{session},{seq}\"}}"));
                    recorder.record(outcome).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        recorder.flush().await;

        let rows = read_rows(&path);
        assert_eq!(1, header_count(&rows));
        assert_eq!(RESULT_COLUMNS.to_vec(), rows[0].iter().collect::<Vec<_>>());
        assert_eq!(sessions * per_session, rows.len() - 1);

        let mut next_seq: HashMap<String, usize> = HashMap::new();
        for row in &rows[1..] {
            let task_name = row[1].to_string();
            let seq = next_seq.entry(task_name.clone()).or_default();
            let session = task_name.trim_start_matches("session-");

            assert_eq!(format!("/api/method/item?seq={seq}"), &row[2]);
            assert_eq!((200 + (*seq % 2)).to_string(), &row[3]);
            assert_eq!((*seq % 2 == 0).to_string(), &row[4]);
            assert_eq!(format!("{{\"message\": \"{session},{seq}\"}}"), &row[5]);
            *seq += 1;
        }
        assert!(next_seq.values().all(|count| *count == per_session));

        recorder.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_openers_write_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.csv");

        let recorders = (0..8)
            .map(|_| ResultRecorder::open(&Handle::current(), RecorderConfig::new(&path)))
            .collect::<Vec<_>>();
        for (i, recorder) in recorders.iter().enumerate() {
            recorder
                .record(RequestOutcome::new(format!("task-{i}"), "/").with_status(200, true))
                .await;
        }
        for recorder in &recorders {
            recorder.close().await;
        }

        let rows = read_rows(&path);
        assert_eq!(1, header_count(&rows));
        assert_eq!(RESULT_COLUMNS.to_vec(), rows[0].iter().collect::<Vec<_>>());
        assert_eq!(9, rows.len());
    }

    #[tokio::test]
    async fn reopening_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.csv");

        for run in 0..2 {
            let recorder = ResultRecorder::open(&Handle::current(), RecorderConfig::new(&path));
            recorder
                .record(RequestOutcome::new(format!("run-{run}"), "/").with_status(200, true))
                .await;
            recorder.close().await;
        }

        let rows = read_rows(&path);
        assert_eq!(1, header_count(&rows));
        assert_eq!(3, rows.len());
        assert_eq!("run-0", &rows[1][1]);
        assert_eq!("run-1", &rows[2][1]);
    }

    #[tokio::test]
    async fn long_summary_is_stored_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let recorder = ResultRecorder::open(&Handle::current(), RecorderConfig::new(&path));

        recorder
            .record(
                RequestOutcome::new("big", "/big")
                    .with_status(200, true)
                    .with_summary("y".repeat(1500)),
            )
            .await;
        recorder.close().await;

        let rows = read_rows(&path);
        assert_eq!(
            format!("{}{}", "y".repeat(1000), TRUNCATION_MARKER),
            &rows[1][5]
        );
    }

    #[tokio::test]
    async fn unwritable_destination_does_not_block_callers() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("results.csv");

        let recorder = ResultRecorder::open(&Handle::current(), RecorderConfig::new(&path));
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            for i in 0..100 {
                recorder
                    .record(RequestOutcome::new(format!("task-{i}"), "/"))
                    .await;
            }
            recorder.flush().await;
            recorder.close().await;
        })
        .await
        .expect("recording stalled on an unwritable destination");

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn record_after_close_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let recorder = ResultRecorder::open(&Handle::current(), RecorderConfig::new(&path));
        recorder.close().await;

        recorder.record(RequestOutcome::new("late", "/")).await;
        recorder.close().await;

        assert_eq!(1, read_rows(&path).len());
    }
}

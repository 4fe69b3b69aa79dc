use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// Summary of a load run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The duration that the run was configured with, in seconds
    ///
    /// Not set for soak runs or runs that end when every session has stopped.
    ///
    /// The run can finish sooner than `started_at + run_duration` if every session stopped
    /// early, for example because all logins failed.
    pub run_duration: Option<u64>,
    /// The number of virtual users that were spawned
    pub user_count: usize,
    /// How many virtual users were spawned for each user type
    pub assigned_user_types: HashMap<String, usize>,
    /// Sessions that stopped because the run was stopped
    pub sessions_completed: usize,
    /// Sessions that stopped early on a fatal error
    pub sessions_failed: usize,
    /// The number of request outcomes produced, counting every retry attempt
    pub total_outcomes: usize,
    /// Environment variables set for the run
    ///
    /// Only the ones the scenario chooses to include.
    pub env: HashMap<String, String>,
    /// The version of Stampede that was used for this run
    pub stampede_version: String,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        run_duration: Option<u64>,
        assigned_user_types: HashMap<String, usize>,
        stampede_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            run_duration,
            user_count: assigned_user_types.values().sum(),
            assigned_user_types,
            sessions_completed: 0,
            sessions_failed: 0,
            total_outcomes: 0,
            env: HashMap::with_capacity(0),
            stampede_version,
        }
    }

    /// Record how the sessions of the run ended
    pub fn set_session_results(&mut self, completed: usize, failed: usize, total_outcomes: usize) {
        self.sessions_completed = completed;
        self.sessions_failed = failed;
        self.total_outcomes = total_outcomes;
    }

    /// Record a setting that identifies the environment of the run, such as the target host
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint identifies the configuration a scenario was run with, so results from
    /// comparable runs can be grouped. It uses the
    ///     - Scenario name
    ///     - Run duration
    ///     - Assigned user types
    ///     - Selected environment variables
    ///     - Stampede version
    ///
    /// Results of the run do not contribute. The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        if let Some(run_duration) = self.run_duration {
            Digest::update(&mut hasher, run_duration.to_le_bytes());
        }
        self.assigned_user_types
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.to_le_bytes());
            });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.stampede_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary is written as one line of JSON followed by a newline. The recommended file
/// extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    let mut line = Vec::new();
    store_run_summary(run_summary, &mut line)?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary]. Blank lines are skipped.
pub fn load_summary_runs(path: impl AsRef<Path>) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(run_id: &str) -> RunSummary {
        RunSummary::new(
            run_id.to_string(),
            "erp_role_mix".to_string(),
            1_700_000_000,
            Some(60),
            HashMap::from([("employee".to_string(), 8), ("manager".to_string(), 2)]),
            "0.1.0".to_string(),
        )
    }

    #[test]
    fn user_count_is_the_sum_of_assignments() {
        assert_eq!(10, summary("a").user_count);
    }

    #[test]
    fn fingerprint_ignores_run_id_and_results() {
        let first = summary("a");
        let mut second = summary("b");
        second.set_session_results(7, 3, 1200);

        assert_eq!(first.fingerprint(), second.fingerprint());

        let mut third = summary("c");
        third.add_env("TARGET".to_string(), "staging".to_string());
        assert_ne!(first.fingerprint(), third.fingerprint());
    }

    #[test]
    fn append_and_load_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");

        let first = summary("a");
        let mut second = summary("b");
        second.set_session_results(10, 0, 42);

        append_run_summary(&first, &path).unwrap();
        append_run_summary(&second, &path).unwrap();

        assert_eq!(vec![first, second], load_summary_runs(&path).unwrap());
    }

    #[test]
    fn store_and_load_single() {
        let original = summary("a");
        let mut buf = Vec::new();
        store_run_summary(&original, &mut buf).unwrap();

        assert_eq!(original, load_run_summary(buf.as_slice()).unwrap());
    }
}

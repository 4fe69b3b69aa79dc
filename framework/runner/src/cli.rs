use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(about, long_about = None)]
pub struct StampedeCli {
    /// Base URL of the service to test, for example `http://14.99.126.171`.
    ///
    /// Overrides the host declared by every user type in the scenario.
    #[clap(long)]
    pub host: Option<String>,

    /// The total number of virtual users to spawn. User types are picked at random for each
    /// user, in proportion to their spawn weight.
    #[clap(long, conflicts_with = "users_per_type")]
    pub users: Option<usize>,

    /// Spawn this many virtual users of every user type.
    #[clap(long)]
    pub users_per_type: Option<usize>,

    /// How many virtual users to start per second. All users start at once if not set.
    #[clap(long)]
    pub spawn_rate: Option<f64>,

    /// The number of seconds to run the scenario for
    #[clap(long)]
    pub duration: Option<u64>,

    /// Run this test as a soak test, ignoring any configured duration and continuing to run until stopped
    #[clap(long, default_value = "false")]
    pub soak: bool,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Write one CSV row per request attempt to this file. Rows are appended if the file exists.
    #[clap(long)]
    pub results_file: Option<PathBuf>,

    /// Append a JSON summary of the run to this file.
    #[clap(long)]
    pub summary_file: Option<PathBuf>,

    /// Do not print the per-task summary table at the end of the run.
    #[clap(long, default_value = "false")]
    pub no_summary_table: bool,

    /// Seconds to wait for each request before treating it as a timeout.
    #[clap(long)]
    pub request_timeout_s: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        StampedeCli::command().debug_assert();
    }

    #[test]
    fn users_and_users_per_type_conflict() {
        let result = StampedeCli::try_parse_from(["stampede", "--users", "10", "--users-per-type", "2"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_flags() {
        let cli = StampedeCli::try_parse_from([
            "stampede",
            "--host",
            "http://localhost:8000",
            "--users",
            "10",
            "--spawn-rate",
            "2.5",
            "--duration",
            "60",
            "--no-progress",
        ])
        .unwrap();

        assert_eq!(Some("http://localhost:8000".to_string()), cli.host);
        assert_eq!(Some(10), cli.users);
        assert_eq!(Some(2.5), cli.spawn_rate);
        assert_eq!(Some(60), cli.duration);
        assert!(cli.no_progress);
        assert!(!cli.soak);
    }
}

// CLI-specific types and structures
// This module contains the command-line interface definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// CLI structure - contains all command-line arguments and options
#[derive(Parser, Debug)]
#[command(name = "loadstat")]
#[command(about = "Parallel ingestion of load-test timer files into report statistics")]
#[command(
    long_about = "Parallel ingestion of load-test timer files into report statistics\n\nTimer files are grouped by directory into source units. The last three\ndirectory names of a unit are taken as <agent>/<test case>/<user number>, e.g.\n  results/ac0001_00/TOrder/0/timers.csv\n\nCOMMON EXAMPLES:\n  loadstat results/*/*/*/timers.csv*\n  loadstat --from 2024-03-01T10:00:00Z --to 2024-03-01T11:00:00Z timers.csv\n  loadstat --config report.json --sample-factor 10 --stats results/**/timers*"
)]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Timer files to read (gzip and zstd compressed files are detected automatically)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// JSON configuration file; command-line options override its values
    #[arg(short = 'c', long = "config", help_heading = "Configuration")]
    pub config: Option<PathBuf>,

    /// Ignore records before this time (epoch milliseconds or RFC 3339)
    #[arg(long = "from", help_heading = "Filtering Options")]
    pub from: Option<String>,

    /// Ignore records after this time (epoch milliseconds or RFC 3339)
    #[arg(long = "to", help_heading = "Filtering Options")]
    pub to: Option<String>,

    /// Keep roughly one in N non-transaction records per second (1 keeps everything)
    #[arg(long = "sample-factor", help_heading = "Filtering Options")]
    pub sample_factor: Option<u32>,

    /// Strip indexes from request names (Product.1.2 becomes Product)
    #[arg(long = "remove-indexes", help_heading = "Filtering Options")]
    pub remove_indexes: bool,

    /// Do not rename web driver timers after the preceding action
    #[arg(long = "no-action-names", help_heading = "Filtering Options")]
    pub no_action_names: bool,

    /// Number of parser worker threads (0 = number of CPUs)
    #[arg(short = 't', long = "threads", help_heading = "Performance Options")]
    pub threads: Option<usize>,

    /// Number of threads reading source units
    #[arg(long = "reader-threads", help_heading = "Performance Options")]
    pub reader_threads: Option<usize>,

    /// Maximum number of chunks waiting for a parser
    #[arg(long = "queue-length", help_heading = "Performance Options")]
    pub queue_length: Option<usize>,

    /// Number of lines per chunk
    #[arg(long = "chunk-size", help_heading = "Performance Options")]
    pub chunk_size: Option<usize>,

    /// Log verbosity on stderr (RUST_LOG takes precedence when set)
    #[arg(
        long = "log-level",
        value_enum,
        default_value = "warn",
        help_heading = "Display Options"
    )]
    pub log_level: LogLevel,

    /// Print processing statistics to stderr when done
    #[arg(short = 's', long = "stats", help_heading = "Display Options")]
    pub stats: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_invocation() {
        let cli = Cli::try_parse_from(["loadstat", "timers.csv"]).unwrap();
        assert_eq!(cli.files, vec![PathBuf::from("timers.csv")]);
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert!(cli.threads.is_none());
        assert!(!cli.stats);
    }

    #[test]
    fn test_files_are_required() {
        assert!(Cli::try_parse_from(["loadstat"]).is_err());
    }

    #[test]
    fn test_all_options() {
        let cli = Cli::try_parse_from([
            "loadstat",
            "--config",
            "report.json",
            "--from",
            "1000",
            "--to",
            "2024-01-01T00:00:00Z",
            "--sample-factor",
            "5",
            "--remove-indexes",
            "--no-action-names",
            "-t",
            "4",
            "--reader-threads",
            "2",
            "--queue-length",
            "8",
            "--chunk-size",
            "500",
            "--log-level",
            "debug",
            "--stats",
            "a.csv",
            "b.csv.gz",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("report.json")));
        assert_eq!(cli.from.as_deref(), Some("1000"));
        assert_eq!(cli.sample_factor, Some(5));
        assert!(cli.remove_indexes);
        assert!(cli.no_action_names);
        assert_eq!(cli.threads, Some(4));
        assert_eq!(cli.chunk_size, Some(500));
        assert_eq!(cli.log_level.as_filter(), "debug");
        assert_eq!(cli.files.len(), 2);
    }
}

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::unbounded;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use loadstat::cli::{Cli, LogLevel};
use loadstat::config::PipelineConfig;
use loadstat::error::ConfigError;
use loadstat::parallel::shared_provider;
use loadstat::platform::{self, Ctrl, ExitCode, SignalHandler};
use loadstat::providers::SummaryProvider;
use loadstat::run_report;

fn init_logging(level: LogLevel) {
    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    // Control channel fed by the signal handler
    let (ctrl_tx, ctrl_rx) = unbounded::<Ctrl>();

    let _signal_handler = match SignalHandler::new(ctrl_tx) {
        Ok(handler) => handler,
        Err(e) => {
            eprintln!("loadstat: Failed to initialize signal handling: {}", e);
            ExitCode::GeneralError.exit();
        }
    };

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            ExitCode::InvalidUsage.exit();
        }
        // --help and --version
        Err(e) => e.exit(),
    };

    init_logging(cli.log_level);

    let config = match PipelineConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("loadstat: Error: {:#}", e);
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::InvalidUsage.exit();
            }
            ExitCode::GeneralError.exit();
        }
    };
    debug!(?config, "Configuration loaded");

    let summary = shared_provider(SummaryProvider::new());
    let result = match run_report(&config, &cli.files, vec![summary], &ctrl_rx) {
        Ok(result) => result,
        Err(e) => {
            error!("Report failed: {:#}", e);
            eprintln!("loadstat: Error: {:#}", e);
            ExitCode::GeneralError.exit();
        }
    };

    platform::write_stdout(&serde_json::to_string_pretty(&result)?)?;

    if cli.stats {
        eprintln!("{}", result.summary.stats.format_stats());
    }

    if let Some(code) = SignalHandler::shutdown_exit_code() {
        code.exit();
    }
    if result.summary.cancelled {
        ExitCode::SignalInt.exit();
    }
    ExitCode::Success.exit();
}

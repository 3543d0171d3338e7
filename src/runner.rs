//! Report execution
//!
//! Wires a validated configuration into a running pipeline: source units are
//! grouped and handed to the reader pool, control messages from the signal
//! handler are served on a side thread, and the provider fragments are
//! collected once everything has been delivered.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, Receiver};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::parallel::{LogProgress, PipelineSummary, ReportPipeline, SharedProvider};
use crate::platform::Ctrl;
use crate::readers;

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct ReportResult {
    #[serde(flatten)]
    pub summary: PipelineSummary,
    /// Report fragments keyed by provider name.
    pub providers: serde_json::Map<String, serde_json::Value>,
}

/// Read `files` into `providers` and wait for the result.
///
/// A `Ctrl::Shutdown` on `ctrl_rx` cancels the run; the result then has
/// `cancelled` set and covers whatever was delivered before.
pub fn run_report(
    config: &PipelineConfig,
    files: &[PathBuf],
    providers: Vec<SharedProvider>,
    ctrl_rx: &Receiver<Ctrl>,
) -> Result<ReportResult> {
    let mut pipeline = ReportPipeline::new(config.parallel_config(), config.worker_settings())
        .with_registry(config.build_registry()?)
        .with_rules(config.build_rules()?)
        .with_progress(Arc::new(LogProgress));
    for provider in &providers {
        pipeline = pipeline.with_provider(Arc::clone(provider));
    }
    let running = pipeline.start()?;

    let options = config.reader_options();
    let units = readers::group_files(files, &options);
    info!(files = files.len(), units = units.len(), "Reading timer files");

    let reader_handles = match readers::spawn_readers(units, Arc::clone(running.dispatcher()), &options) {
        Ok(handles) => handles,
        Err(err) => {
            running.cancel();
            let _ = running.wait();
            return Err(err);
        }
    };

    let (done_tx, done_rx) = bounded::<()>(0);
    let control = {
        let dispatcher = Arc::clone(running.dispatcher());
        let stats = Arc::clone(running.stats());
        let ctrl_rx = ctrl_rx.clone();
        thread::Builder::new()
            .name("loadstat-control".into())
            .spawn(move || loop {
                select! {
                    recv(ctrl_rx) -> msg => match msg {
                        Ok(Ctrl::Shutdown { immediate }) => {
                            warn!(immediate, "Shutdown requested");
                            dispatcher.cancel();
                        }
                        Ok(Ctrl::PrintStats) => {
                            eprintln!("{}", stats.snapshot().format_stats());
                        }
                        Err(_) => return,
                    },
                    recv(done_rx) -> _ => return,
                }
            })
            .context("Failed to spawn control thread")?
    };

    let summary = running.wait();

    drop(done_tx);
    let _ = control.join();
    for handle in reader_handles {
        if handle.join().is_err() {
            warn!("Reader thread panicked");
        }
    }

    let summary = summary?;
    let mut fragments = serde_json::Map::new();
    for provider in &providers {
        let provider = provider.lock();
        if let Some(fragment) = provider.create_report_fragment() {
            fragments.insert(provider.name().to_string(), fragment);
        }
    }

    Ok(ReportResult {
        summary,
        providers: fragments,
    })
}

//! Pipeline orchestration
//!
//! Wires the dispatcher, the statistics stage and the parser workers
//! together. Feeding chunks is left to the caller (see
//! [`crate::readers`]), which talks to the [`Dispatcher`] directly.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

use crate::registry::RecordTypeRegistry;
use crate::rules::RuleSet;
use crate::stats::{PipelineStats, StatsSnapshot};

use super::dispatcher::{Dispatcher, ProgressListener};
use super::statistics::{SharedProvider, StatisticsProcessor};
use super::types::ParallelConfig;
use super::worker::{ParserWorker, WorkerSettings};

/// Builder for a report pipeline
pub struct ReportPipeline {
    config: ParallelConfig,
    settings: WorkerSettings,
    registry: Arc<RecordTypeRegistry>,
    rules: Arc<RuleSet>,
    providers: Vec<SharedProvider>,
    progress: Option<Arc<dyn ProgressListener>>,
}

impl ReportPipeline {
    pub fn new(config: ParallelConfig, settings: WorkerSettings) -> Self {
        Self {
            config,
            settings,
            registry: Arc::new(RecordTypeRegistry::standard()),
            rules: Arc::new(RuleSet::new()),
            providers: Vec::new(),
            progress: None,
        }
    }

    pub fn with_registry(mut self, registry: RecordTypeRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn with_provider(mut self, provider: SharedProvider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Spawn the parser workers. The returned pipeline accepts chunks right
    /// away.
    pub fn start(self) -> Result<RunningPipeline> {
        let stats = Arc::new(PipelineStats::new());
        let statistics = Arc::new(StatisticsProcessor::new(self.providers, stats.clone()));

        let mut dispatcher = Dispatcher::new(self.config.queue_length, statistics, stats.clone());
        if let Some(progress) = self.progress {
            dispatcher = dispatcher.with_progress(progress);
        }
        let dispatcher = Arc::new(dispatcher);

        let num_workers = self.config.num_workers.max(1);
        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let worker = ParserWorker::new(
                id,
                Arc::clone(&dispatcher),
                Arc::clone(&self.registry),
                Arc::clone(&self.rules),
                self.settings.clone(),
            );
            let handle = thread::Builder::new()
                .name(format!("loadstat-parser-{}", id))
                .spawn(move || worker.run());
            match handle {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    dispatcher.cancel();
                    return Err(err).context("Failed to spawn parser worker thread");
                }
            }
        }

        info!(workers = num_workers, queue_length = self.config.queue_length, "Pipeline started");

        Ok(RunningPipeline {
            dispatcher,
            workers,
            stats,
        })
    }
}

/// Outcome of a finished pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub minimum_time: Option<i64>,
    pub maximum_time: Option<i64>,
    pub cancelled: bool,
    pub stats: StatsSnapshot,
}

pub struct RunningPipeline {
    dispatcher: Arc<Dispatcher>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

impl RunningPipeline {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Stop the pipeline early. Records already handed to providers stay
    /// delivered.
    pub fn cancel(&self) {
        info!("Cancelling pipeline");
        self.dispatcher.cancel();
    }

    /// Block until all registered units are read and all chunks delivered,
    /// or until the pipeline is cancelled, then stop the workers.
    pub fn wait(self) -> Result<PipelineSummary> {
        let cancelled = self.dispatcher.wait_for_completion().is_err();

        // workers blocked on an empty queue leave on shutdown
        self.dispatcher.cancel();

        let mut panicked = 0;
        for handle in self.workers {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(anyhow!("{} parser worker(s) panicked", panicked));
        }
        debug!("All parser workers stopped");

        let statistics = self.dispatcher.statistics();
        Ok(PipelineSummary {
            minimum_time: statistics.minimum_time(),
            maximum_time: statistics.maximum_time(),
            cancelled,
            stats: self.stats.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CharBuffer;
    use crate::parallel::statistics::ReportProvider;
    use crate::parallel::types::DataChunk;
    use crate::record::DataRecord;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counting {
        records: usize,
    }

    impl ReportProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn process_data_record(&mut self, _record: &DataRecord) -> anyhow::Result<()> {
            self.records += 1;
            Ok(())
        }
    }

    fn config(num_workers: usize) -> ParallelConfig {
        ParallelConfig {
            num_workers,
            queue_length: 2,
        }
    }

    #[test]
    fn test_run_to_completion() {
        let counting = Arc::new(Mutex::new(Counting::default()));
        let pipeline = ReportPipeline::new(config(3), WorkerSettings::default())
            .with_provider(counting.clone())
            .start()
            .unwrap();

        let dispatcher = Arc::clone(pipeline.dispatcher());
        dispatcher.register_unit();
        dispatcher.begin_reading();
        for i in 0..10 {
            let line = format!("A,Action{},{},1,false", i, 1000 + i);
            dispatcher
                .add_read_data(DataChunk::new(vec![CharBuffer::from(line)]))
                .unwrap();
        }
        dispatcher.finished_reading();

        let summary = pipeline.wait().unwrap();
        assert!(!summary.cancelled);
        assert_eq!(summary.minimum_time, Some(1000));
        assert_eq!(summary.maximum_time, Some(1009));
        assert_eq!(summary.stats.lines_read, 10);
        assert_eq!(summary.stats.records_delivered, 10);
        assert_eq!(counting.lock().records, 10);
    }

    #[test]
    fn test_empty_run() {
        let pipeline = ReportPipeline::new(config(2), WorkerSettings::default())
            .start()
            .unwrap();
        let summary = pipeline.wait().unwrap();
        assert!(!summary.cancelled);
        assert_eq!(summary.minimum_time, None);
        assert_eq!(summary.stats.records_delivered, 0);
    }

    #[test]
    fn test_cancel_while_waiting_for_units() {
        let pipeline = ReportPipeline::new(config(2), WorkerSettings::default())
            .start()
            .unwrap();
        pipeline.dispatcher().register_unit();

        let dispatcher = Arc::clone(pipeline.dispatcher());
        let canceller = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            dispatcher.cancel();
        });

        let summary = pipeline.wait().unwrap();
        canceller.join().unwrap();
        assert!(summary.cancelled);
    }
}

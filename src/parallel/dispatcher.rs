//! Hand-off point between readers, parser workers and the statistics stage
//!
//! Readers push chunks into a bounded queue and block while it is full.
//! Workers take chunks, and after processing hand the batch back, which runs
//! the statistics stage on the worker's thread before the chunk counts as
//! done. The driver waits until all source units are read and all chunks are
//! done. Cancellation releases every blocked party with [`Cancelled`].

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Cancelled;
use crate::stats::PipelineStats;

use super::counter::SynchronizingCounter;
use super::statistics::StatisticsProcessor;
use super::types::{DataChunk, ProcessedBatch};

/// Observer of reading progress.
pub trait ProgressListener: Send + Sync {
    fn reading_started(&self, total_units: usize);
    fn unit_finished(&self, finished: usize, total_units: usize);
}

/// Progress reporting through the log.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressListener for LogProgress {
    fn reading_started(&self, total_units: usize) {
        info!(total_units, "Reading started");
    }

    fn unit_finished(&self, finished: usize, total_units: usize) {
        info!("Read {}/{} source units", finished, total_units);
    }
}

pub struct Dispatcher {
    chunk_sender: Sender<DataChunk>,
    chunk_receiver: Receiver<DataChunk>,
    /// Dropped on cancellation, which disconnects `shutdown_receiver` for
    /// every `select!` waiting on it.
    shutdown_sender: Mutex<Option<Sender<()>>>,
    shutdown_receiver: Receiver<()>,
    remaining_units: SynchronizingCounter,
    total_units: AtomicUsize,
    open_chunks: SynchronizingCounter,
    statistics: Arc<StatisticsProcessor>,
    progress: Option<Arc<dyn ProgressListener>>,
    stats: Arc<PipelineStats>,
}

impl Dispatcher {
    pub fn new(
        queue_length: usize,
        statistics: Arc<StatisticsProcessor>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (chunk_sender, chunk_receiver) = bounded(queue_length.max(1));
        let (shutdown_sender, shutdown_receiver) = bounded(0);

        Self {
            chunk_sender,
            chunk_receiver,
            shutdown_sender: Mutex::new(Some(shutdown_sender)),
            shutdown_receiver,
            remaining_units: SynchronizingCounter::new(),
            total_units: AtomicUsize::new(0),
            open_chunks: SynchronizingCounter::new(),
            statistics,
            progress: None,
            stats,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Announce a source unit that will be read. Must happen before the
    /// driver starts waiting for completion.
    pub fn register_unit(&self) {
        self.total_units.fetch_add(1, Ordering::Relaxed);
        self.remaining_units.increment();
    }

    pub fn begin_reading(&self) {
        let total = self.total_units();
        debug!(total_units = total, "Begin reading");
        if let Some(progress) = &self.progress {
            progress.reading_started(total);
        }
    }

    /// A registered unit has been read completely.
    pub fn finished_reading(&self) {
        self.remaining_units.decrement();
        self.stats.add_unit_finished();

        if let Some(progress) = &self.progress {
            let total = self.total_units();
            progress.unit_finished(total - self.remaining_units.get().min(total), total);
        }
    }

    /// Enqueue a chunk, blocking while the queue is full.
    pub fn add_read_data(&self, chunk: DataChunk) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        self.open_chunks.increment();

        let sent = select! {
            send(self.chunk_sender, chunk) -> res => res.is_ok(),
            recv(self.shutdown_receiver) -> _ => false,
        };

        if sent {
            self.stats.add_chunk();
            Ok(())
        } else {
            self.open_chunks.decrement();
            Err(Cancelled)
        }
    }

    /// Take the next chunk, blocking while the queue is empty.
    pub fn retrieve_read_data(&self) -> Result<DataChunk, Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        select! {
            recv(self.chunk_receiver) -> msg => msg.map_err(|_| Cancelled),
            recv(self.shutdown_receiver) -> _ => Err(Cancelled),
        }
    }

    /// Run the statistics stage for a processed chunk, then mark the chunk
    /// as done.
    pub fn add_processed_data(&self, batch: ProcessedBatch) {
        self.stats.record_batch(&batch);
        self.statistics.process(&batch);
        self.open_chunks.decrement();
    }

    /// Block until every registered unit has been read and every chunk has
    /// gone through the statistics stage.
    pub fn wait_for_completion(&self) -> Result<(), Cancelled> {
        self.remaining_units.await_zero()?;
        self.open_chunks.await_zero()?;
        debug!("All data records processed");
        Ok(())
    }

    /// Release every blocked enqueue, dequeue and wait. Idempotent.
    pub fn cancel(&self) {
        if self.shutdown_sender.lock().take().is_some() {
            debug!("Dispatcher shut down");
        }
        self.remaining_units.cancel();
        self.open_chunks.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown_sender.lock().is_none()
    }

    pub fn total_units(&self) -> usize {
        self.total_units.load(Ordering::Relaxed)
    }

    pub fn remaining_units(&self) -> usize {
        self.remaining_units.get()
    }

    pub fn open_chunks(&self) -> usize {
        self.open_chunks.get()
    }

    pub fn statistics(&self) -> &StatisticsProcessor {
        &self.statistics
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.chunk_receiver.len())
            .field("total_units", &self.total_units())
            .field("remaining_units", &self.remaining_units())
            .field("open_chunks", &self.open_chunks())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

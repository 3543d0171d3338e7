//! Parallel processing module for loadstat
//!
//! Readers feed chunks of raw lines through the dispatcher to a pool of
//! parser workers; each worker turns its chunk into a batch of records and
//! delivers the batch to the report providers itself.
//!
//! # Module Structure
//!
//! - `types`: Chunks, batches, the action name index, and configuration
//! - `counter`: Blocking counters with wait-for-zero and cancellation
//! - `dispatcher`: Bounded chunk queue, completion barrier, progress
//! - `worker`: Parser worker turning chunks into batches
//! - `statistics`: Report provider fan-out and global time range
//! - `processor`: ReportPipeline orchestration

mod counter;
mod dispatcher;
mod processor;
mod statistics;
mod types;
mod worker;

// Re-export public types
pub use counter::SynchronizingCounter;
pub use dispatcher::{Dispatcher, LogProgress, ProgressListener};
pub use processor::{PipelineSummary, ReportPipeline, RunningPipeline};
pub use statistics::{shared_provider, ReportProvider, SharedProvider, StatisticsProcessor};
pub use types::{
    ActionNameIndex, DataChunk, ParallelConfig, ProcessedBatch, DEFAULT_CHUNK_SIZE,
    DEFAULT_QUEUE_LENGTH,
};
pub use worker::{apply_adjustments, strip_name_index, ParserWorker, WorkerSettings, UNKNOWN_ACTION};

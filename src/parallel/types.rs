//! Type definitions for the processing pipeline
//!
//! Contains the unit of work handed to parser workers, the batch they hand
//! back, and the pipeline tuning parameters.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::buffer::CharBuffer;
use crate::record::DataRecord;

/// Default number of lines per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Default depth of the chunk queue.
pub const DEFAULT_QUEUE_LENGTH: usize = 20;

/// Action names seen in one source unit, keyed by their timestamp.
///
/// Filled by workers processing the unit's action-collecting chunks, read by
/// workers renaming the unit's web driver timers.
#[derive(Debug, Clone, Default)]
pub struct ActionNameIndex {
    names: Arc<RwLock<BTreeMap<i64, CharBuffer>>>,
}

impl ActionNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, time: i64, name: CharBuffer) {
        self.names.write().insert(time, name);
    }

    /// Name of the latest action that started at or before `time`.
    pub fn floor(&self, time: i64) -> Option<CharBuffer> {
        self.names
            .read()
            .range(..=time)
            .next_back()
            .map(|(_, name)| name.clone())
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

/// Raw lines of one source file slice, plus the context needed to stamp the
/// records parsed from them.
#[derive(Debug, Clone)]
pub struct DataChunk {
    pub lines: Vec<CharBuffer>,
    pub agent_name: Arc<str>,
    pub test_case_name: Arc<str>,
    pub user_number: Arc<str>,
    /// Line number of `lines[0]` in its source, starting at 1.
    pub base_line_number: usize,
    pub source: Option<PathBuf>,
    pub collect_action_names: bool,
    pub adjust_timer_names: bool,
    pub action_names: ActionNameIndex,
}

impl DataChunk {
    pub fn new(lines: Vec<CharBuffer>) -> Self {
        Self {
            lines,
            agent_name: Arc::from(""),
            test_case_name: Arc::from(""),
            user_number: Arc::from(""),
            base_line_number: 1,
            source: None,
            collect_action_names: false,
            adjust_timer_names: false,
            action_names: ActionNameIndex::new(),
        }
    }

    pub fn source_display(&self) -> String {
        self.source
            .as_ref()
            .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string())
    }
}

/// Records that survived processing of one chunk.
#[derive(Debug, Clone)]
pub struct ProcessedBatch {
    pub records: Vec<DataRecord>,
    pub minimum_time: i64,
    pub maximum_time: i64,
    pub lines: usize,
    pub parse_errors: usize,
    pub out_of_window: usize,
    pub sampled_out: usize,
    pub dropped_by_rules: usize,
    pub rule_errors: usize,
}

impl ProcessedBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            minimum_time: i64::MAX,
            maximum_time: i64::MIN,
            lines: 0,
            parse_errors: 0,
            out_of_window: 0,
            sampled_out: 0,
            dropped_by_rules: 0,
            rule_errors: 0,
        }
    }

    pub fn push(&mut self, record: DataRecord) {
        self.minimum_time = self.minimum_time.min(record.time);
        self.maximum_time = self.maximum_time.max(record.time);
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ProcessedBatch {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Thread and queue sizing of the pipeline
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub num_workers: usize,
    pub queue_length: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            queue_length: DEFAULT_QUEUE_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RecordTypeRegistry;

    #[test]
    fn test_action_name_floor_lookup() {
        let index = ActionNameIndex::new();
        assert!(index.floor(100).is_none());

        index.insert(1000, CharBuffer::from("Login"));
        index.insert(2000, CharBuffer::from("Search"));

        assert!(index.floor(999).is_none());
        assert_eq!(index.floor(1000).unwrap(), "Login");
        assert_eq!(index.floor(1999).unwrap(), "Login");
        assert_eq!(index.floor(5000).unwrap(), "Search");

        let shared = index.clone();
        shared.insert(3000, CharBuffer::from("Checkout"));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_batch_min_max_sentinels() {
        let mut batch = ProcessedBatch::default();
        assert_eq!(batch.minimum_time, i64::MAX);
        assert_eq!(batch.maximum_time, i64::MIN);

        let registry = RecordTypeRegistry::standard();
        for line in ["A,a,3000,1,false", "A,b,1000,1,false", "A,c,2000,1,false"] {
            batch.push(registry.create_from_line(&CharBuffer::from(line)).unwrap());
        }
        assert_eq!(batch.minimum_time, 1000);
        assert_eq!(batch.maximum_time, 3000);
        assert_eq!(batch.records[0].name, "a");
    }
}

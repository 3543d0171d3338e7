//! Parser worker thread
//!
//! Takes chunks from the dispatcher, turns their lines into records, filters
//! and rewrites them, and hands the surviving batch back to the dispatcher.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

use crate::buffer::CharBuffer;
use crate::error::{panic_message, RecordError};
use crate::record::{DataRecord, RecordDetails, RecordKind};
use crate::registry::RecordTypeRegistry;
use crate::rules::{RuleSet, RuleVerdict};
use crate::sampling::Sampler;

use super::dispatcher::Dispatcher;
use super::types::{DataChunk, ProcessedBatch};

/// Web driver timer names carry a page counter in place of the action name.
static WEB_DRIVER_TIMER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"page_\d+").expect("valid web driver timer pattern"));

/// Name used when no action precedes a web driver timer.
pub const UNKNOWN_ACTION: &str = "UnknownAction";

/// Per-worker settings shared by all workers.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub from_time: i64,
    pub to_time: i64,
    pub sample_factor: u32,
    pub remove_indexes: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            from_time: i64::MIN,
            to_time: i64::MAX,
            sample_factor: 1,
            remove_indexes: false,
        }
    }
}

pub struct ParserWorker {
    id: usize,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<RecordTypeRegistry>,
    rules: Arc<RuleSet>,
    settings: WorkerSettings,
    sampler: Sampler,
    fields: Vec<CharBuffer>,
}

impl ParserWorker {
    pub fn new(
        id: usize,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<RecordTypeRegistry>,
        rules: Arc<RuleSet>,
        settings: WorkerSettings,
    ) -> Self {
        let sampler = Sampler::new(settings.sample_factor);
        Self {
            id,
            dispatcher,
            registry,
            rules,
            settings,
            sampler,
            fields: Vec::with_capacity(32),
        }
    }

    /// Process chunks until the dispatcher is cancelled.
    pub fn run(mut self) {
        debug!(worker = self.id, "Parser worker started");

        while let Ok(chunk) = self.dispatcher.retrieve_read_data() {
            let lines = chunk.lines.len();
            let batch = match panic::catch_unwind(AssertUnwindSafe(|| self.process_chunk(chunk))) {
                Ok(batch) => batch,
                Err(payload) => {
                    error!(
                        worker = self.id,
                        "Failed to process chunk, discarding it: {}",
                        panic_message(payload.as_ref())
                    );
                    self.fields.clear();
                    ProcessedBatch {
                        lines,
                        ..Default::default()
                    }
                }
            };
            self.dispatcher.add_processed_data(batch);
        }

        debug!(worker = self.id, "Parser worker stopped");
    }

    pub fn process_chunk(&mut self, chunk: DataChunk) -> ProcessedBatch {
        let mut batch = ProcessedBatch::with_capacity(chunk.lines.len());
        batch.lines = chunk.lines.len();

        for (i, line) in chunk.lines.iter().enumerate() {
            let head = match self.registry.split_head(line, &mut self.fields) {
                Ok(head) => head,
                Err(err) => {
                    log_parse_error(&chunk, i, line, &err);
                    batch.parse_errors += 1;
                    continue;
                }
            };

            if head.time < self.settings.from_time || head.time > self.settings.to_time {
                batch.out_of_window += 1;
                continue;
            }

            if !self.sampler.keep(head.kind, head.time) {
                batch.sampled_out += 1;
                continue;
            }

            let mut record = match head.complete(&self.fields) {
                Ok(record) => record,
                Err(err) => {
                    log_parse_error(&chunk, i, line, &err);
                    batch.parse_errors += 1;
                    continue;
                }
            };

            apply_adjustments(&mut record, &chunk);

            if record.kind() == RecordKind::Request {
                if self.settings.remove_indexes {
                    strip_name_index(&mut record);
                }
                match self.rules.apply(&mut record) {
                    RuleVerdict::Keep => {}
                    RuleVerdict::Drop => {
                        batch.dropped_by_rules += 1;
                        continue;
                    }
                    RuleVerdict::Restored => batch.rule_errors += 1,
                }
            }

            batch.push(record);
        }

        self.fields.clear();
        batch
    }
}

fn log_parse_error(chunk: &DataChunk, index: usize, line: &CharBuffer, err: &RecordError) {
    error!(
        "Failed to parse data record at line {} in file '{}': {}\nLine is: {}",
        chunk.base_line_number + index,
        chunk.source_display(),
        err,
        line
    );
}

/// Stamp the chunk context onto `record` and maintain the source unit's
/// action name index.
pub fn apply_adjustments(record: &mut DataRecord, chunk: &DataChunk) {
    record.agent_name = Some(Arc::clone(&chunk.agent_name));
    record.transaction_name = Some(Arc::clone(&chunk.test_case_name));

    match record.kind() {
        RecordKind::Transaction => {
            if let RecordDetails::Transaction(tx) = &mut record.details {
                tx.test_user_number = Some(Arc::clone(&chunk.user_number));
            }
        }
        RecordKind::Action if chunk.collect_action_names => {
            chunk.action_names.insert(record.time, record.name.clone());
        }
        RecordKind::Request | RecordKind::PageLoadTiming if chunk.adjust_timer_names => {
            let name = record.name.to_text();
            if !WEB_DRIVER_TIMER_NAME.is_match(&name) {
                return;
            }
            let action = chunk
                .action_names
                .floor(record.time)
                .map_or_else(|| UNKNOWN_ACTION.to_string(), |name| name.to_text());
            if let Cow::Owned(renamed) = WEB_DRIVER_TIMER_NAME.replace(&name, NoExpand(&action)) {
                record.set_name(renamed);
            }
        }
        _ => {}
    }
}

/// `Product.1.2` becomes `Product`. A name starting with a dot is kept.
pub fn strip_name_index(record: &mut DataRecord) {
    if let Some(pos) = record.name.index_of_char('.') {
        if pos > 0 {
            record.name = record.name.view(0, pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::statistics::StatisticsProcessor;
    use crate::rules::{MergeRuleConfig, RuleField};
    use crate::stats::PipelineStats;

    fn worker(settings: WorkerSettings, rules: RuleSet) -> ParserWorker {
        let stats = Arc::new(PipelineStats::new());
        let statistics = Arc::new(StatisticsProcessor::new(Vec::new(), stats.clone()));
        let dispatcher = Arc::new(Dispatcher::new(1, statistics, stats));
        ParserWorker::new(
            0,
            dispatcher,
            Arc::new(RecordTypeRegistry::standard()),
            Arc::new(rules),
            settings,
        )
    }

    fn chunk(lines: &[&str]) -> DataChunk {
        let mut chunk = DataChunk::new(lines.iter().map(|l| CharBuffer::from(*l)).collect());
        chunk.agent_name = Arc::from("ac0001_00");
        chunk.test_case_name = Arc::from("TOrder");
        chunk.user_number = Arc::from("3");
        chunk
    }

    fn names(batch: &ProcessedBatch) -> Vec<String> {
        batch.records.iter().map(|r| r.name.to_text()).collect()
    }

    #[test]
    fn test_context_is_stamped() {
        let mut w = worker(WorkerSettings::default(), RuleSet::new());
        let batch = w.process_chunk(chunk(&["T,TOrder,1000,5000,false", "A,Login,1000,10,false"]));
        assert_eq!(batch.records.len(), 2);
        for record in &batch.records {
            assert_eq!(record.agent_name.as_deref(), Some("ac0001_00"));
            assert_eq!(record.transaction_name.as_deref(), Some("TOrder"));
        }
        match &batch.records[0].details {
            RecordDetails::Transaction(tx) => assert_eq!(tx.test_user_number.as_deref(), Some("3")),
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_bad_lines_are_skipped_and_counted() {
        let mut w = worker(WorkerSettings::default(), RuleSet::new());
        let batch = w.process_chunk(chunk(&[
            "A,Login,1000,10,false",
            "X,Unknown,1000",
            "A,Broken,noon,10,false",
            "",
            "A,Logout,2000,10,false",
        ]));
        assert_eq!(names(&batch), vec!["Login", "Logout"]);
        assert_eq!(batch.parse_errors, 3);
        assert_eq!(batch.lines, 5);
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let settings = WorkerSettings {
            from_time: 1000,
            to_time: 2000,
            ..Default::default()
        };
        let mut w = worker(settings, RuleSet::new());
        let batch = w.process_chunk(chunk(&[
            "A,Early,999,1,false",
            "A,First,1000,1,false",
            "A,Last,2000,1,false",
            "A,Late,2001,1,false",
        ]));
        assert_eq!(names(&batch), vec!["First", "Last"]);
        assert_eq!(batch.out_of_window, 2);
        assert_eq!(batch.minimum_time, 1000);
        assert_eq!(batch.maximum_time, 2000);
    }

    #[test]
    fn test_window_is_checked_before_the_tail_is_parsed() {
        let settings = WorkerSettings {
            from_time: 1000,
            to_time: 5000,
            ..Default::default()
        };
        let mut w = worker(settings, RuleSet::new());
        let batch = w.process_chunk(chunk(&[
            "A,Late,90000,notanumber,false",
            "R,Early,10,1,false",
            "A,Inside,1500,notanumber,false",
            "A,Kept,1500,10,false",
        ]));
        assert_eq!(names(&batch), vec!["Kept"]);
        assert_eq!(batch.out_of_window, 2);
        assert_eq!(batch.parse_errors, 1);
    }

    #[test]
    fn test_strip_name_index() {
        let settings = WorkerSettings {
            remove_indexes: true,
            ..Default::default()
        };
        let mut w = worker(settings, RuleSet::new());
        let batch = w.process_chunk(chunk(&[
            "R,Product.1.2,1000,1,false,0,0,200,/p",
            "R,.hidden,1000,1,false,0,0,200,/h",
            "A,Action.1,1000,1,false",
        ]));
        assert_eq!(names(&batch), vec!["Product", ".hidden", "Action.1"]);
    }

    #[test]
    fn test_web_driver_timer_renaming() {
        let mut w = worker(WorkerSettings::default(), RuleSet::new());

        let mut collect = chunk(&["A,Login,1000,1,false", "A,Search,5000,1,false"]);
        collect.collect_action_names = true;
        let index = collect.action_names.clone();
        w.process_chunk(collect);
        assert_eq!(index.len(), 2);

        let mut adjust = chunk(&[
            "R,page_1 - main.js,500,1,false,0,0,200,/main.js",
            "R,page_2 - app.css,1500,1,false,0,0,200,/app.css",
            "P,page_3,6000,1,false",
            "C,page_4,6000,1,false",
        ]);
        adjust.adjust_timer_names = true;
        adjust.action_names = index;
        let batch = w.process_chunk(adjust);
        assert_eq!(
            names(&batch),
            vec!["UnknownAction - main.js", "Login - app.css", "Search", "page_4"]
        );
    }

    #[test]
    fn test_merge_rules_drop_and_rename() {
        let rules = RuleSet::from_config(&[
            MergeRuleConfig {
                include: [(RuleField::Url, r"\.ico$".to_string())].into_iter().collect(),
                drop_on_match: true,
                ..Default::default()
            },
            MergeRuleConfig {
                new_name: "{n} ({s})".into(),
                ..Default::default()
            },
        ])
        .unwrap();
        let mut w = worker(WorkerSettings::default(), rules);
        let batch = w.process_chunk(chunk(&[
            "R,Icon,1000,1,false,0,0,200,/favicon.ico",
            "R,Home,1000,1,false,0,0,404,/",
            "A,Home,1000,1,false",
        ]));
        assert_eq!(names(&batch), vec!["Home (404)", "Home"]);
        assert_eq!(batch.dropped_by_rules, 1);
    }

    #[test]
    fn test_rule_failure_restores_stripped_name() {
        let rules = RuleSet::from_config(&[MergeRuleConfig {
            new_name: "{n:1}".into(),
            include: [(RuleField::Name, r"^\w+(-x)?$".to_string())].into_iter().collect(),
            ..Default::default()
        }])
        .unwrap();
        let settings = WorkerSettings {
            remove_indexes: true,
            ..Default::default()
        };
        let mut w = worker(settings, rules);
        let batch = w.process_chunk(chunk(&["R,Cart.7,1000,1,false,0,0,200,/cart"]));
        assert_eq!(names(&batch), vec!["Cart"]);
        assert_eq!(batch.rule_errors, 1);
    }
}

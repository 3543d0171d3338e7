//! Built-in report providers

use serde::Serialize;
use std::collections::BTreeMap;

use crate::parallel::ReportProvider;
use crate::record::{DataRecord, RecordDetails, RecordKind};

/// Per-name aggregate of one record kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSummary {
    pub count: u64,
    pub errors: u64,
    /// Runtime figures in milliseconds; absent for events and values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip)]
    total: i128,
}

impl TimerSummary {
    fn new() -> Self {
        Self {
            count: 0,
            errors: 0,
            min: None,
            max: None,
            mean: None,
            total: 0,
        }
    }

    fn add(&mut self, record: &DataRecord) {
        self.count += 1;

        match &record.details {
            RecordDetails::Event(_) => return,
            RecordDetails::Value(value) => {
                let value = value.round() as i64;
                self.add_runtime(value);
                return;
            }
            _ => {}
        }

        if let Some(timer) = record.timer() {
            if timer.failed {
                self.errors += 1;
            }
            self.add_runtime(timer.runtime);
        }
    }

    fn add_runtime(&mut self, runtime: i64) {
        self.min = Some(self.min.map_or(runtime, |m| m.min(runtime)));
        self.max = Some(self.max.map_or(runtime, |m| m.max(runtime)));
        self.total += i128::from(runtime);
        self.mean = Some(self.total as f64 / self.count as f64);
    }
}

/// Counts, errors and runtime statistics per record kind and name.
#[derive(Debug, Default)]
pub struct SummaryProvider {
    summaries: BTreeMap<RecordKind, BTreeMap<String, TimerSummary>>,
}

impl SummaryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: RecordKind, name: &str) -> Option<&TimerSummary> {
        self.summaries.get(&kind)?.get(name)
    }

    /// Total number of records seen.
    pub fn total(&self) -> u64 {
        self.summaries
            .values()
            .flat_map(|names| names.values())
            .map(|s| s.count)
            .sum()
    }
}

impl ReportProvider for SummaryProvider {
    fn name(&self) -> &str {
        "summary"
    }

    fn process_data_record(&mut self, record: &DataRecord) -> anyhow::Result<()> {
        let names = self.summaries.entry(record.kind()).or_default();
        // avoid allocating the key for names already present
        match names.get_mut(record.name.to_text().as_str()) {
            Some(summary) => summary.add(record),
            None => {
                let mut summary = TimerSummary::new();
                summary.add(record);
                names.insert(record.name.to_text(), summary);
            }
        }
        Ok(())
    }

    fn create_report_fragment(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.summaries).ok()
    }
}

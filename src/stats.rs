use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::parallel::ProcessedBatch;

/// Counters collected while the pipeline runs. Shared by every pipeline
/// thread, so all updates are relaxed atomic adds.
#[derive(Debug)]
pub struct PipelineStats {
    lines_read: AtomicUsize,
    chunks: AtomicUsize,
    parse_errors: AtomicUsize,
    out_of_window: AtomicUsize,
    sampled_out: AtomicUsize,
    dropped_by_rules: AtomicUsize,
    rule_errors: AtomicUsize,
    records_delivered: AtomicUsize,
    provider_failures: AtomicUsize,
    units_finished: AtomicUsize,
    start_time: Instant,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lines_read: usize,
    pub chunks: usize,
    pub parse_errors: usize,
    pub out_of_window: usize,
    pub sampled_out: usize,
    pub dropped_by_rules: usize,
    pub rule_errors: usize,
    pub records_delivered: usize,
    pub provider_failures: usize,
    pub units_finished: usize,
    #[serde(rename = "processing_time_ms", serialize_with = "serialize_millis")]
    pub processing_time: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            lines_read: AtomicUsize::new(0),
            chunks: AtomicUsize::new(0),
            parse_errors: AtomicUsize::new(0),
            out_of_window: AtomicUsize::new(0),
            sampled_out: AtomicUsize::new(0),
            dropped_by_rules: AtomicUsize::new(0),
            rule_errors: AtomicUsize::new(0),
            records_delivered: AtomicUsize::new(0),
            provider_failures: AtomicUsize::new(0),
            units_finished: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn add_chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unit_finished(&self) {
        self.units_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_delivered(&self, count: usize) {
        self.records_delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// Fold the per-batch counters of one processed chunk.
    pub fn record_batch(&self, batch: &ProcessedBatch) {
        self.lines_read.fetch_add(batch.lines, Ordering::Relaxed);
        self.parse_errors.fetch_add(batch.parse_errors, Ordering::Relaxed);
        self.out_of_window.fetch_add(batch.out_of_window, Ordering::Relaxed);
        self.sampled_out.fetch_add(batch.sampled_out, Ordering::Relaxed);
        self.dropped_by_rules.fetch_add(batch.dropped_by_rules, Ordering::Relaxed);
        self.rule_errors.fetch_add(batch.rule_errors, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            out_of_window: self.out_of_window.load(Ordering::Relaxed),
            sampled_out: self.sampled_out.load(Ordering::Relaxed),
            dropped_by_rules: self.dropped_by_rules.load(Ordering::Relaxed),
            rule_errors: self.rule_errors.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            units_finished: self.units_finished.load(Ordering::Relaxed),
            processing_time: self.start_time.elapsed(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    pub fn format_stats(&self) -> String {
        let filtered = self.out_of_window + self.sampled_out + self.dropped_by_rules;
        let mut output = format!(
            "Lines processed: {} total, {} delivered, {} filtered",
            self.lines_read, self.records_delivered, filtered
        );

        if self.units_finished > 0 {
            output.push_str(&format!(", {} source units", self.units_finished));
        }

        if self.parse_errors > 0 {
            output.push_str(&format!(", {} parse errors", self.parse_errors));
        }

        if self.rule_errors > 0 {
            output.push_str(&format!(", {} rule errors", self.rule_errors));
        }

        if self.provider_failures > 0 {
            output.push_str(&format!(", {} provider failures", self.provider_failures));
        }

        let processing_time_ms = self.processing_time.as_millis();
        output.push_str(&format!(" in {}ms", processing_time_ms));

        if processing_time_ms > 0 && self.lines_read > 0 {
            let lines_per_sec = (self.lines_read as f64 * 1000.0) / processing_time_ms as f64;
            output.push_str(&format!(" ({:.0} lines/s)", lines_per_sec));
        }

        output
    }
}

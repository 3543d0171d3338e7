//! Fan-out of processed batches to report providers
//!
//! Every batch goes to every provider that wants data records. Each provider
//! sits behind its own mutex, so a provider never sees two batches at once
//! while different providers may consume the same batch concurrently. The
//! delivering thread tries the providers in round-robin order with
//! non-blocking `try_lock`, skipping busy ones and yielding after a bounded
//! number of misses.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{error, trace};

use crate::error::panic_message;
use crate::record::DataRecord;
use crate::stats::PipelineStats;

use super::types::ProcessedBatch;

/// Misses allowed before yielding the thread.
const ATTEMPTS_BEFORE_YIELDING: usize = 9;

/// Misses allowed right after a successful delivery.
const ATTEMPTS_AFTER_DELIVERY: usize = 3;

/// Consumer of data records, usually building one section of a report.
pub trait ReportProvider: Send {
    fn name(&self) -> &str;

    /// Providers answering `false` are never handed any records.
    fn wants_data_records(&self) -> bool {
        true
    }

    fn process_data_record(&mut self, record: &DataRecord) -> anyhow::Result<()>;

    fn process_all(&mut self, records: &[DataRecord]) -> anyhow::Result<()> {
        for record in records {
            self.process_data_record(record)?;
        }
        Ok(())
    }

    /// This provider's section of the final report, if it produces one.
    fn create_report_fragment(&self) -> Option<serde_json::Value> {
        None
    }
}

/// A provider together with its exclusive lock.
pub type SharedProvider = Arc<Mutex<dyn ReportProvider>>;

pub fn shared_provider<P: ReportProvider + 'static>(provider: P) -> SharedProvider {
    Arc::new(Mutex::new(provider))
}

#[derive(Debug, Clone, Copy)]
struct TimeRange {
    minimum: i64,
    maximum: i64,
}

pub struct StatisticsProcessor {
    providers: Vec<SharedProvider>,
    time_range: Mutex<TimeRange>,
    stats: Arc<PipelineStats>,
}

impl StatisticsProcessor {
    pub fn new(providers: Vec<SharedProvider>, stats: Arc<PipelineStats>) -> Self {
        let providers = providers
            .into_iter()
            .filter(|p| p.lock().wants_data_records())
            .collect();

        Self {
            providers,
            time_range: Mutex::new(TimeRange {
                minimum: i64::MAX,
                maximum: i64::MIN,
            }),
            stats,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Deliver `batch` to every provider exactly once, then fold the batch's
    /// time range into the global one.
    pub fn process(&self, batch: &ProcessedBatch) {
        let mut pending: VecDeque<&SharedProvider> = self.providers.iter().collect();
        let mut attempts = pending.len();

        while let Some(provider) = pending.pop_front() {
            let Some(mut guard) = provider.try_lock() else {
                pending.push_back(provider);
                if attempts == 0 {
                    attempts = ATTEMPTS_BEFORE_YIELDING;
                    thread::yield_now();
                } else {
                    attempts -= 1;
                }
                continue;
            };

            self.deliver(&mut *guard, &batch.records);
            drop(guard);
            attempts = ATTEMPTS_AFTER_DELIVERY;
        }

        self.stats.add_records_delivered(batch.records.len());

        let mut range = self.time_range.lock();
        range.minimum = range.minimum.min(batch.minimum_time);
        range.maximum = range.maximum.max(batch.maximum_time);
    }

    fn deliver(&self, provider: &mut dyn ReportProvider, records: &[DataRecord]) {
        trace!(provider = provider.name(), records = records.len(), "Delivering batch");

        match panic::catch_unwind(AssertUnwindSafe(|| provider.process_all(records))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(
                    provider = provider.name(),
                    "Failed to process data records, discarding full chunk: {:#}", err
                );
                self.stats.add_provider_failure();
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    provider = provider.name(),
                    "Provider panicked, discarding full chunk: {}", message
                );
                self.stats.add_provider_failure();
            }
        }
    }

    /// Earliest record time delivered so far.
    pub fn minimum_time(&self) -> Option<i64> {
        let range = self.time_range.lock();
        (range.minimum <= range.maximum).then_some(range.minimum)
    }

    /// Latest record time delivered so far.
    pub fn maximum_time(&self) -> Option<i64> {
        let range = self.time_range.lock();
        (range.minimum <= range.maximum).then_some(range.maximum)
    }
}

impl std::fmt::Debug for StatisticsProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsProcessor")
            .field("providers", &self.providers.len())
            .field("time_range", &*self.time_range.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CharBuffer;
    use crate::registry::RecordTypeRegistry;
    use anyhow::bail;

    #[derive(Default)]
    struct Collecting {
        names: Vec<String>,
        calls: usize,
    }

    impl ReportProvider for Collecting {
        fn name(&self) -> &str {
            "collecting"
        }

        fn process_data_record(&mut self, record: &DataRecord) -> anyhow::Result<()> {
            self.names.push(record.name.to_text());
            Ok(())
        }

        fn process_all(&mut self, records: &[DataRecord]) -> anyhow::Result<()> {
            self.calls += 1;
            for record in records {
                self.process_data_record(record)?;
            }
            Ok(())
        }
    }

    struct NotInterested;

    impl ReportProvider for NotInterested {
        fn name(&self) -> &str {
            "not interested"
        }

        fn wants_data_records(&self) -> bool {
            false
        }

        fn process_data_record(&mut self, _record: &DataRecord) -> anyhow::Result<()> {
            panic!("must never be called");
        }
    }

    struct Failing {
        panic: bool,
    }

    impl ReportProvider for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn process_data_record(&mut self, _record: &DataRecord) -> anyhow::Result<()> {
            if self.panic {
                panic!("provider blew up");
            }
            bail!("provider refused")
        }
    }

    fn batch(lines: &[&str]) -> ProcessedBatch {
        let registry = RecordTypeRegistry::standard();
        let mut batch = ProcessedBatch::default();
        for line in lines {
            batch.push(registry.create_from_line(&CharBuffer::from(*line)).unwrap());
        }
        batch
    }

    #[test]
    fn test_every_interested_provider_gets_the_batch() {
        let a = Arc::new(Mutex::new(Collecting::default()));
        let b = Arc::new(Mutex::new(Collecting::default()));
        let stats = Arc::new(PipelineStats::new());
        let processor = StatisticsProcessor::new(
            vec![
                a.clone() as SharedProvider,
                b.clone(),
                shared_provider(NotInterested),
            ],
            stats.clone(),
        );
        assert_eq!(processor.provider_count(), 2);

        processor.process(&batch(&["A,Login,2000,1,false", "A,Search,1000,1,false"]));

        for provider in [&a, &b] {
            let provider = provider.lock();
            assert_eq!(provider.calls, 1);
            assert_eq!(provider.names, vec!["Login", "Search"]);
        }
        assert_eq!(processor.minimum_time(), Some(1000));
        assert_eq!(processor.maximum_time(), Some(2000));
        assert_eq!(stats.snapshot().records_delivered, 2);
    }

    #[test]
    fn test_time_range_is_empty_until_records_arrive() {
        let processor = StatisticsProcessor::new(Vec::new(), Arc::new(PipelineStats::new()));
        assert_eq!(processor.minimum_time(), None);
        processor.process(&ProcessedBatch::default());
        assert_eq!(processor.maximum_time(), None);

        processor.process(&batch(&["V,Size,5000,1.5"]));
        processor.process(&batch(&["V,Size,7000,1.5"]));
        assert_eq!(processor.minimum_time(), Some(5000));
        assert_eq!(processor.maximum_time(), Some(7000));
    }

    #[test]
    fn test_failing_providers_do_not_stop_delivery() {
        let good = Arc::new(Mutex::new(Collecting::default()));
        let stats = Arc::new(PipelineStats::new());
        let processor = StatisticsProcessor::new(
            vec![
                shared_provider(Failing { panic: false }),
                shared_provider(Failing { panic: true }),
                good.clone() as SharedProvider,
            ],
            stats.clone(),
        );

        processor.process(&batch(&["A,Login,1000,1,false"]));
        processor.process(&batch(&["A,Logout,2000,1,false"]));

        assert_eq!(good.lock().names, vec!["Login", "Logout"]);
        assert_eq!(stats.snapshot().provider_failures, 4);
    }

    #[test]
    fn test_busy_provider_is_retried() {
        let busy = Arc::new(Mutex::new(Collecting::default()));
        let processor = Arc::new(StatisticsProcessor::new(
            vec![busy.clone() as SharedProvider],
            Arc::new(PipelineStats::new()),
        ));

        let guard = busy.lock();
        let worker = {
            let processor = Arc::clone(&processor);
            thread::spawn(move || processor.process(&batch(&["A,Login,1000,1,false"])))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(guard.calls, 0);
        drop(guard);

        worker.join().unwrap();
        assert_eq!(busy.lock().calls, 1);
    }
}

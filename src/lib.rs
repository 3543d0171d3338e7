// Core library for loadstat, parallel ingestion of load-test timer files

pub mod buffer;
pub mod cli;
pub mod config;
pub mod decompression;
pub mod error;
pub mod numbers;
pub mod parallel;
pub mod platform;
pub mod providers;
pub mod readers;
pub mod record;
pub mod registry;
pub mod rules;
pub mod runner;
pub mod sampling;
pub mod stats;

pub use buffer::{CharBuffer, CharBufferBuilder};
pub use config::PipelineConfig;
pub use error::{Cancelled, ConfigError, NumberFormatError, RecordError, RegistryError, RuleError};
pub use parallel::{
    shared_provider, Dispatcher, ParallelConfig, PipelineSummary, ReportPipeline, ReportProvider,
    RunningPipeline, SharedProvider,
};
pub use record::{DataRecord, RecordDetails, RecordHead, RecordKind};
pub use registry::RecordTypeRegistry;
pub use rules::{MergeRuleConfig, RuleSet};
pub use runner::{run_report, ReportResult};

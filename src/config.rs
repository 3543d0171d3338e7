use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::parallel::{ParallelConfig, WorkerSettings, DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_LENGTH};
use crate::readers::ReaderOptions;
use crate::record::RecordKind;
use crate::registry::RecordTypeRegistry;
use crate::rules::{MergeRuleConfig, RuleSet};

/// Complete configuration of a report run
///
/// Loaded from JSON; every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Inclusive lower time bound, epoch milliseconds or RFC 3339.
    #[serde(deserialize_with = "deserialize_time_bound")]
    pub from_time: Option<i64>,
    /// Inclusive upper time bound, epoch milliseconds or RFC 3339.
    #[serde(deserialize_with = "deserialize_time_bound")]
    pub to_time: Option<i64>,
    pub data_sample_factor: u32,
    pub remove_indexes_from_request_names: bool,
    pub collect_action_names: bool,
    pub adjust_timer_names: bool,
    /// Parser worker threads, 0 means one per CPU.
    pub threads: usize,
    pub reader_threads: usize,
    pub queue_length: usize,
    pub chunk_size: usize,
    pub merge_rules: Vec<MergeRuleConfig>,
    /// Custom type code table, e.g. `{"R": "request", "T": "transaction"}`.
    pub record_types: Option<BTreeMap<String, RecordKind>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            from_time: None,
            to_time: None,
            data_sample_factor: 1,
            remove_indexes_from_request_names: false,
            collect_action_names: true,
            adjust_timer_names: true,
            threads: 0,
            reader_threads: 2,
            queue_length: DEFAULT_QUEUE_LENGTH,
            chunk_size: DEFAULT_CHUNK_SIZE,
            merge_rules: Vec::new(),
            record_types: None,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Build the configuration from an optional config file and the CLI
    /// overrides, then validate it.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(from) = &cli.from {
            self.from_time = Some(parse_time_bound(from)?);
        }
        if let Some(to) = &cli.to {
            self.to_time = Some(parse_time_bound(to)?);
        }
        if let Some(factor) = cli.sample_factor {
            self.data_sample_factor = factor;
        }
        if cli.remove_indexes {
            self.remove_indexes_from_request_names = true;
        }
        if cli.no_action_names {
            self.collect_action_names = false;
            self.adjust_timer_names = false;
        }
        if let Some(threads) = cli.threads {
            self.threads = threads;
        }
        if let Some(reader_threads) = cli.reader_threads {
            self.reader_threads = reader_threads;
        }
        if let Some(queue_length) = cli.queue_length {
            self.queue_length = queue_length;
        }
        if let Some(chunk_size) = cli.chunk_size {
            self.chunk_size = chunk_size;
        }
        Ok(())
    }

    /// Check every setting, including that all merge rules compile and the
    /// record type table is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_sample_factor < 1 {
            return Err(ConfigError::Invalid("data_sample_factor must be at least 1".into()));
        }
        if self.reader_threads < 1 {
            return Err(ConfigError::Invalid("reader_threads must be at least 1".into()));
        }
        if self.queue_length < 1 {
            return Err(ConfigError::Invalid("queue_length must be at least 1".into()));
        }
        if self.chunk_size < 1 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".into()));
        }
        if self.from_time() > self.to_time() {
            return Err(ConfigError::Invalid(format!(
                "from time {} is after to time {}",
                self.from_time(),
                self.to_time()
            )));
        }
        self.build_registry()?;
        self.build_rules()?;
        Ok(())
    }

    pub fn from_time(&self) -> i64 {
        self.from_time.unwrap_or(i64::MIN)
    }

    pub fn to_time(&self) -> i64 {
        self.to_time.unwrap_or(i64::MAX)
    }

    /// Get effective thread count with defaults
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    pub fn build_rules(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::from_config(&self.merge_rules)
    }

    pub fn build_registry(&self) -> Result<RecordTypeRegistry, ConfigError> {
        match &self.record_types {
            Some(table) => Ok(RecordTypeRegistry::from_codes(
                table.iter().map(|(code, kind)| (code.as_str(), *kind)),
            )?),
            None => Ok(RecordTypeRegistry::standard()),
        }
    }

    pub fn parallel_config(&self) -> ParallelConfig {
        ParallelConfig {
            num_workers: self.effective_threads(),
            queue_length: self.queue_length,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            from_time: self.from_time(),
            to_time: self.to_time(),
            sample_factor: self.data_sample_factor,
            remove_indexes: self.remove_indexes_from_request_names,
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            chunk_size: self.chunk_size,
            reader_threads: self.reader_threads,
            collect_action_names: self.collect_action_names,
            adjust_timer_names: self.adjust_timer_names,
        }
    }
}

/// Parse a time bound given as epoch milliseconds, RFC 3339, or a naive
/// `YYYY-MM-DD HH:MM:SS` timestamp taken as UTC.
pub fn parse_time_bound(text: &str) -> Result<i64, ConfigError> {
    let text = text.trim();

    if let Ok(millis) = text.parse::<i64>() {
        return Ok(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }

    Err(ConfigError::Invalid(format!(
        "invalid time {:?}: expected epoch milliseconds or RFC 3339",
        text
    )))
}

fn deserialize_time_bound<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawBound {
        Millis(i64),
        Text(String),
    }

    match Option::<RawBound>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawBound::Millis(millis)) => Ok(Some(millis)),
        Some(RawBound::Text(text)) => parse_time_bound(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

//! Error types for loadstat
//!
//! Library components return these typed errors. The orchestration layer and
//! the binary wrap them in `anyhow::Error` with context.

use std::any::Any;
use thiserror::Error;

use crate::record::RecordKind;

/// A number could not be parsed, neither by the fast path nor by the
/// standard library fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed number {input:?}: {reason}")]
pub struct NumberFormatError {
    pub input: String,
    pub reason: String,
}

impl NumberFormatError {
    pub fn new(input: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            input: input.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure to turn one raw line into a typed record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("empty line")]
    EmptyLine,

    #[error("unknown record type {0:?}")]
    UnknownType(char),

    #[error("{kind} record is missing field #{index} ({field})")]
    MissingField {
        kind: RecordKind,
        index: usize,
        field: &'static str,
    },

    #[error("invalid {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        #[source]
        source: NumberFormatError,
    },
}

/// Invalid record type table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("record type table is empty")]
    Empty,

    #[error("record type code {0:?} is registered twice")]
    Duplicate(char),

    #[error("record type code {0:?} must be a single ASCII character")]
    InvalidCode(String),
}

/// Invalid pipeline configuration. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("merge rule #{rule}: invalid {field} pattern: {source}")]
    InvalidPattern {
        rule: usize,
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("merge rule #{rule}: invalid new name template {template:?}: {reason}")]
    InvalidTemplate {
        rule: usize,
        template: String,
        reason: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Invalid(String),
}

/// A merge rule matched but could not compute its result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("placeholder {{{field}:{group}}} has no value")]
    MissingCapture { field: char, group: usize },
}

/// Returned by blocking pipeline operations once the pipeline was cancelled.
/// Callers treat it as a clean shutdown signal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pipeline cancelled")]
pub struct Cancelled;

/// Text of a payload caught by `catch_unwind`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

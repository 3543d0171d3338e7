//! Typed data records
//!
//! One record per timer-file line. Every record carries a kind, a name, a
//! timestamp and the agent/test-case context stamped by the parser worker;
//! the kind-specific values live in [`RecordDetails`]. Text fields are
//! [`CharBuffer`] views into the original line.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::buffer::CharBuffer;
use crate::error::RecordError;
use crate::numbers::{parse_bool, parse_double, parse_int, parse_long};

/// Field separator of timer files.
pub const FIELD_SEPARATOR: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Transaction,
    Action,
    Request,
    PageLoadTiming,
    Custom,
    Event,
    Value,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Transaction,
        RecordKind::Action,
        RecordKind::Request,
        RecordKind::PageLoadTiming,
        RecordKind::Custom,
        RecordKind::Event,
        RecordKind::Value,
    ];

    /// Leading character identifying the kind in timer files.
    pub fn type_code(self) -> char {
        match self {
            RecordKind::Transaction => 'T',
            RecordKind::Action => 'A',
            RecordKind::Request => 'R',
            RecordKind::PageLoadTiming => 'P',
            RecordKind::Custom => 'C',
            RecordKind::Event => 'E',
            RecordKind::Value => 'V',
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Transaction => "transaction",
            RecordKind::Action => "action",
            RecordKind::Request => "request",
            RecordKind::PageLoadTiming => "page load timing",
            RecordKind::Custom => "custom timer",
            RecordKind::Event => "event",
            RecordKind::Value => "value",
        };
        f.write_str(name)
    }
}

/// Runtime and outcome shared by all timer-like kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerValues {
    pub runtime: i64,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDetails {
    pub timer: TimerValues,
    pub failure_message: Option<CharBuffer>,
    /// Stamped from the chunk metadata, not parsed.
    pub test_user_number: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDetails {
    pub timer: TimerValues,
    pub bytes_sent: i32,
    pub bytes_received: i32,
    pub response_code: i32,
    pub url: CharBuffer,
    pub content_type: CharBuffer,
    pub http_method: CharBuffer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventDetails {
    pub test_case_name: CharBuffer,
    pub message: CharBuffer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordDetails {
    Transaction(TransactionDetails),
    Action(TimerValues),
    Request(RequestDetails),
    PageLoadTiming(TimerValues),
    Custom(TimerValues),
    Event(EventDetails),
    Value(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub name: CharBuffer,
    /// Milliseconds since the epoch.
    pub time: i64,
    pub agent_name: Option<Arc<str>>,
    pub transaction_name: Option<Arc<str>>,
    pub details: RecordDetails,
}

impl DataRecord {
    pub fn kind(&self) -> RecordKind {
        match self.details {
            RecordDetails::Transaction(_) => RecordKind::Transaction,
            RecordDetails::Action(_) => RecordKind::Action,
            RecordDetails::Request(_) => RecordKind::Request,
            RecordDetails::PageLoadTiming(_) => RecordKind::PageLoadTiming,
            RecordDetails::Custom(_) => RecordKind::Custom,
            RecordDetails::Event(_) => RecordKind::Event,
            RecordDetails::Value(_) => RecordKind::Value,
        }
    }

    pub fn set_name(&mut self, name: impl Into<CharBuffer>) {
        self.name = name.into();
    }

    /// Runtime and outcome, for kinds that have them.
    pub fn timer(&self) -> Option<&TimerValues> {
        match &self.details {
            RecordDetails::Transaction(t) => Some(&t.timer),
            RecordDetails::Request(r) => Some(&r.timer),
            RecordDetails::Action(t) | RecordDetails::PageLoadTiming(t) | RecordDetails::Custom(t) => {
                Some(t)
            }
            RecordDetails::Event(_) | RecordDetails::Value(_) => None,
        }
    }

    pub fn request(&self) -> Option<&RequestDetails> {
        match &self.details {
            RecordDetails::Request(r) => Some(r),
            _ => None,
        }
    }

    /// Parse a record of `kind` from already split fields. Field 0 is the
    /// type code and is not inspected here.
    pub fn from_fields(kind: RecordKind, fields: &[CharBuffer]) -> Result<Self, RecordError> {
        RecordHead::parse(kind, fields)?.complete(fields)
    }
}

/// The values every record starts with.
///
/// Parsing stops here until the time window and the sampler have accepted
/// the record, so discarded lines never pay for their remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHead {
    pub kind: RecordKind,
    pub name: CharBuffer,
    pub time: i64,
}

impl RecordHead {
    pub fn parse(kind: RecordKind, fields: &[CharBuffer]) -> Result<Self, RecordError> {
        let reader = FieldReader { kind, fields };
        Ok(Self {
            kind,
            name: reader.text(1, "name")?,
            time: reader.long(2, "time")?,
        })
    }

    /// Parse the kind-specific values from the same `fields`.
    pub fn complete(self, fields: &[CharBuffer]) -> Result<DataRecord, RecordError> {
        let reader = FieldReader {
            kind: self.kind,
            fields,
        };

        let details = match self.kind {
            RecordKind::Transaction => RecordDetails::Transaction(TransactionDetails {
                timer: reader.timer()?,
                failure_message: reader.optional(5),
                test_user_number: None,
            }),
            RecordKind::Action => RecordDetails::Action(reader.timer()?),
            RecordKind::PageLoadTiming => RecordDetails::PageLoadTiming(reader.timer()?),
            RecordKind::Custom => RecordDetails::Custom(reader.timer()?),
            RecordKind::Request => RecordDetails::Request(RequestDetails {
                timer: reader.timer()?,
                bytes_sent: reader.int(5, "bytes sent")?,
                bytes_received: reader.int(6, "bytes received")?,
                response_code: reader.int(7, "response code")?,
                url: reader.text(8, "url")?,
                content_type: reader.optional(9).unwrap_or_default(),
                http_method: reader.optional(10).unwrap_or_default(),
            }),
            RecordKind::Event => RecordDetails::Event(EventDetails {
                test_case_name: reader.text(3, "test case name")?,
                message: reader.text(4, "message")?,
            }),
            RecordKind::Value => RecordDetails::Value(reader.double(3, "value")?),
        };

        Ok(DataRecord {
            name: self.name,
            time: self.time,
            agent_name: None,
            transaction_name: None,
            details,
        })
    }
}

struct FieldReader<'a> {
    kind: RecordKind,
    fields: &'a [CharBuffer],
}

impl FieldReader<'_> {
    fn text(&self, index: usize, field: &'static str) -> Result<CharBuffer, RecordError> {
        self.fields
            .get(index)
            .cloned()
            .ok_or(RecordError::MissingField {
                kind: self.kind,
                index,
                field,
            })
    }

    fn optional(&self, index: usize) -> Option<CharBuffer> {
        self.fields.get(index).filter(|f| !f.is_empty()).cloned()
    }

    fn long(&self, index: usize, field: &'static str) -> Result<i64, RecordError> {
        let text = self.text(index, field)?;
        parse_long(&text).map_err(|source| RecordError::InvalidNumber { field, source })
    }

    fn int(&self, index: usize, field: &'static str) -> Result<i32, RecordError> {
        let text = self.text(index, field)?;
        parse_int(&text).map_err(|source| RecordError::InvalidNumber { field, source })
    }

    fn double(&self, index: usize, field: &'static str) -> Result<f64, RecordError> {
        let text = self.text(index, field)?;
        parse_double(&text).map_err(|source| RecordError::InvalidNumber { field, source })
    }

    fn timer(&self) -> Result<TimerValues, RecordError> {
        Ok(TimerValues {
            runtime: self.long(3, "runtime")?,
            failed: parse_bool(&self.text(4, "failed")?),
        })
    }
}

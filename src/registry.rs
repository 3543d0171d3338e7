//! Dispatch from a line's leading type code to its record kind

use crate::buffer::CharBuffer;
use crate::error::{RecordError, RegistryError};
use crate::record::{DataRecord, RecordHead, RecordKind, FIELD_SEPARATOR};

/// Maps leading type codes to record kinds.
///
/// The table is dense: `kinds[code - offset]`, sized to the span between the
/// smallest and the largest registered code. Codes are restricted to ASCII,
/// so the span never exceeds 128 entries.
#[derive(Debug, Clone)]
pub struct RecordTypeRegistry {
    offset: u32,
    kinds: Vec<Option<RecordKind>>,
}

impl RecordTypeRegistry {
    pub fn new<I>(table: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (char, RecordKind)>,
    {
        let entries: Vec<(char, RecordKind)> = table.into_iter().collect();

        for (code, _) in &entries {
            if !code.is_ascii() || code.is_ascii_control() {
                return Err(RegistryError::InvalidCode(code.to_string()));
            }
        }

        let min = entries.iter().map(|(c, _)| *c as u32).min().ok_or(RegistryError::Empty)?;
        let max = entries.iter().map(|(c, _)| *c as u32).max().ok_or(RegistryError::Empty)?;

        let mut kinds = vec![None; (max - min + 1) as usize];
        for (code, kind) in entries {
            let slot = &mut kinds[(code as u32 - min) as usize];
            if slot.is_some() {
                return Err(RegistryError::Duplicate(code));
            }
            *slot = Some(kind);
        }

        Ok(Self { offset: min, kinds })
    }

    /// Build from textual codes, as found in configuration files. Every code
    /// must be exactly one character.
    pub fn from_codes<'a, I>(table: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (&'a str, RecordKind)>,
    {
        let mut entries = Vec::new();
        for (code, kind) in table {
            let mut chars = code.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => entries.push((c, kind)),
                _ => return Err(RegistryError::InvalidCode(code.to_string())),
            }
        }
        Self::new(entries)
    }

    /// The built-in table: every [`RecordKind`] under its own type code.
    pub fn standard() -> Self {
        let mut kinds = vec![None; 128];
        let mut offset = u32::MAX;
        for kind in RecordKind::ALL {
            offset = offset.min(kind.type_code() as u32);
        }
        for kind in RecordKind::ALL {
            kinds[(kind.type_code() as u32 - offset) as usize] = Some(kind);
        }
        let last = kinds.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        kinds.truncate(last);
        Self { offset, kinds }
    }

    pub fn lookup(&self, code: char) -> Option<RecordKind> {
        let index = (code as u32).checked_sub(self.offset)? as usize;
        self.kinds.get(index).copied().flatten()
    }

    /// Registered codes with their kinds, in code order.
    pub fn entries(&self) -> impl Iterator<Item = (char, RecordKind)> + '_ {
        self.kinds.iter().enumerate().filter_map(move |(i, kind)| {
            let code = char::from_u32(self.offset + i as u32)?;
            kind.map(|k| (code, k))
        })
    }

    pub fn create_from_line(&self, line: &CharBuffer) -> Result<DataRecord, RecordError> {
        let mut fields = Vec::with_capacity(16);
        self.create_from_line_with(line, &mut fields)
    }

    /// Like [`RecordTypeRegistry::create_from_line`], reusing `fields` as
    /// scratch space for the split line.
    pub fn create_from_line_with(
        &self,
        line: &CharBuffer,
        fields: &mut Vec<CharBuffer>,
    ) -> Result<DataRecord, RecordError> {
        let record = match self.split_head(line, fields) {
            Ok(head) => head.complete(fields),
            Err(err) => Err(err),
        };
        fields.clear();
        record
    }

    /// Split `line` into `fields` and parse only its head. `fields` keeps the
    /// split line for [`RecordHead::complete`].
    pub fn split_head(
        &self,
        line: &CharBuffer,
        fields: &mut Vec<CharBuffer>,
    ) -> Result<RecordHead, RecordError> {
        let code = line.get(0).ok_or(RecordError::EmptyLine)?;
        let kind = self.lookup(code).ok_or(RecordError::UnknownType(code))?;

        fields.clear();
        fields.extend(line.split(FIELD_SEPARATOR));
        RecordHead::parse(kind, fields)
    }
}

impl Default for RecordTypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

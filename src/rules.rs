//! Request processing (merge) rules
//!
//! Rules run in configuration order on every request record. Each rule
//! reports an explicit [`RuleOutcome`]; the [`RuleSet`] turns the sequence of
//! outcomes into a verdict for the record and restores the record's name when
//! a rule fails halfway.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

use crate::error::{panic_message, ConfigError, RuleError};
use crate::record::DataRecord;

/// Result of running one rule against one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Keep going with the next rule.
    Continue,
    /// Keep the record as transformed so far, skip the remaining rules.
    Stop,
    /// Discard the record.
    Drop,
    /// The rule could not be applied.
    Failed(RuleError),
}

pub trait RequestProcessingRule: Send + Sync + fmt::Debug {
    fn process(&self, record: &mut DataRecord) -> RuleOutcome;
}

/// What happened to a record after the whole rule set ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    Keep,
    Drop,
    /// A rule failed; the record keeps its pre-rule name.
    Restored,
}

/// Ordered list of rules, shared read-only by all parser workers.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn RequestProcessingRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[MergeRuleConfig]) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for (index, config) in configs.iter().enumerate() {
            set.push(MergeRule::new(index, config)?);
        }
        Ok(set)
    }

    pub fn push(&mut self, rule: impl RequestProcessingRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, record: &mut DataRecord) -> RuleVerdict {
        let original_name = record.name.clone();

        for rule in &self.rules {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule.process(record)));
            match outcome {
                Ok(RuleOutcome::Continue) => {}
                Ok(RuleOutcome::Stop) => break,
                Ok(RuleOutcome::Drop) => return RuleVerdict::Drop,
                Ok(RuleOutcome::Failed(err)) => {
                    error!("Failed to apply request merge rule {:?}: {}", rule, err);
                    record.name = original_name;
                    return RuleVerdict::Restored;
                }
                Err(payload) => {
                    error!(
                        "Request merge rule {:?} panicked: {}",
                        rule,
                        panic_message(payload.as_ref())
                    );
                    record.name = original_name;
                    return RuleVerdict::Restored;
                }
            }
        }

        RuleVerdict::Keep
    }
}

/// Request attribute a merge rule can match on, with its placeholder
/// character in name templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Name,
    Url,
    ContentType,
    StatusCode,
    Agent,
    Transaction,
    Method,
}

impl RuleField {
    const ALL: [RuleField; 7] = [
        RuleField::Name,
        RuleField::Url,
        RuleField::ContentType,
        RuleField::StatusCode,
        RuleField::Agent,
        RuleField::Transaction,
        RuleField::Method,
    ];

    pub fn placeholder(self) -> char {
        match self {
            RuleField::Name => 'n',
            RuleField::Url => 'u',
            RuleField::ContentType => 'c',
            RuleField::StatusCode => 's',
            RuleField::Agent => 'a',
            RuleField::Transaction => 't',
            RuleField::Method => 'm',
        }
    }

    fn from_placeholder(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.placeholder() == c)
    }

    fn label(self) -> &'static str {
        match self {
            RuleField::Name => "name",
            RuleField::Url => "url",
            RuleField::ContentType => "content type",
            RuleField::StatusCode => "status code",
            RuleField::Agent => "agent",
            RuleField::Transaction => "transaction",
            RuleField::Method => "method",
        }
    }

    fn value(self, record: &DataRecord) -> String {
        let request = record.request();
        match self {
            RuleField::Name => record.name.to_text(),
            RuleField::Url => request.map(|r| r.url.to_text()).unwrap_or_default(),
            RuleField::ContentType => request.map(|r| r.content_type.to_text()).unwrap_or_default(),
            RuleField::StatusCode => request
                .map(|r| r.response_code.to_string())
                .unwrap_or_default(),
            RuleField::Agent => record.agent_name.as_deref().unwrap_or_default().to_string(),
            RuleField::Transaction => record
                .transaction_name
                .as_deref()
                .unwrap_or_default()
                .to_string(),
            RuleField::Method => request.map(|r| r.http_method.to_text()).unwrap_or_default(),
        }
    }
}

/// Serialized form of a [`MergeRule`].
///
/// ```json
/// { "new_name": "{n:1} [{s}]", "include": { "name": "^([^.]+)" }, "exclude": { "url": "\\.js$" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeRuleConfig {
    pub new_name: String,
    pub include: BTreeMap<RuleField, String>,
    pub exclude: BTreeMap<RuleField, String>,
    pub stop_on_match: bool,
    pub drop_on_match: bool,
}

impl Default for MergeRuleConfig {
    fn default() -> Self {
        Self {
            new_name: String::new(),
            include: BTreeMap::new(),
            exclude: BTreeMap::new(),
            stop_on_match: true,
            drop_on_match: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Placeholder { field: RuleField, group: usize },
}

/// Regex based rename/drop rule.
///
/// All include patterns must match and no exclude pattern may match for the
/// rule to apply. The new name template may reference capture groups of the
/// include patterns (`{n:1}`), or the full attribute value of fields without
/// an include pattern (`{s}`).
#[derive(Debug)]
pub struct MergeRule {
    index: usize,
    includes: Vec<(RuleField, Regex)>,
    excludes: Vec<(RuleField, Regex)>,
    template: Vec<TemplatePart>,
    stop_on_match: bool,
    drop_on_match: bool,
}

impl MergeRule {
    pub fn new(index: usize, config: &MergeRuleConfig) -> Result<Self, ConfigError> {
        let compile = |field: RuleField, pattern: &String| {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                rule: index,
                field: field.label(),
                source,
            })
        };

        let includes = config
            .include
            .iter()
            .map(|(field, pattern)| Ok((*field, compile(*field, pattern)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let excludes = config
            .exclude
            .iter()
            .map(|(field, pattern)| Ok((*field, compile(*field, pattern)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let invalid = |reason: String| ConfigError::InvalidTemplate {
            rule: index,
            template: config.new_name.clone(),
            reason,
        };

        if config.new_name.is_empty() && !config.drop_on_match {
            return Err(invalid("a new name is required unless the rule drops".into()));
        }

        let template = parse_template(&config.new_name).map_err(invalid)?;
        for part in &template {
            if let TemplatePart::Placeholder { field, group } = part {
                let groups = includes
                    .iter()
                    .find(|(f, _)| f == field)
                    .map_or(1, |(_, re)| re.captures_len());
                if *group >= groups {
                    return Err(invalid(format!(
                        "{{{}:{}}} refers to a capture group that does not exist",
                        field.placeholder(),
                        group
                    )));
                }
            }
        }

        Ok(Self {
            index,
            includes,
            excludes,
            template,
            stop_on_match: config.stop_on_match,
            drop_on_match: config.drop_on_match,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl RequestProcessingRule for MergeRule {
    fn process(&self, record: &mut DataRecord) -> RuleOutcome {
        if record.request().is_none() {
            return RuleOutcome::Continue;
        }

        for (field, re) in &self.excludes {
            if re.is_match(&field.value(record)) {
                return RuleOutcome::Continue;
            }
        }

        let mut captured: Vec<(RuleField, Vec<Option<String>>)> =
            Vec::with_capacity(self.includes.len());
        for (field, re) in &self.includes {
            let text = field.value(record);
            match re.captures(&text) {
                Some(caps) => captured.push((
                    *field,
                    caps.iter()
                        .map(|m| m.map(|m| m.as_str().to_string()))
                        .collect(),
                )),
                None => return RuleOutcome::Continue,
            }
        }

        if self.drop_on_match {
            return RuleOutcome::Drop;
        }

        let mut name = String::new();
        for part in &self.template {
            match part {
                TemplatePart::Literal(text) => name.push_str(text),
                TemplatePart::Placeholder { field, group } => {
                    let value = match captured.iter().find(|(f, _)| f == field) {
                        Some((_, groups)) => groups.get(*group).cloned().flatten(),
                        None => Some(field.value(record)),
                    };
                    match value {
                        Some(v) => name.push_str(&v),
                        None => {
                            return RuleOutcome::Failed(RuleError::MissingCapture {
                                field: field.placeholder(),
                                group: *group,
                            })
                        }
                    }
                }
            }
        }
        record.set_name(name.as_str());

        if self.stop_on_match {
            RuleOutcome::Stop
        } else {
            RuleOutcome::Continue
        }
    }
}

fn parse_template(template: &str) -> Result<Vec<TemplatePart>, String> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            literal.push(c);
            continue;
        }

        let mut placeholder = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            placeholder.push(c);
        }
        if !closed {
            return Err(format!("unclosed placeholder {{{}", placeholder));
        }

        let (field, group) = match placeholder.split_once(':') {
            Some((field, group)) => {
                let group = group
                    .parse::<usize>()
                    .map_err(|_| format!("invalid capture group in {{{}}}", placeholder))?;
                (field, group)
            }
            None => (placeholder.as_str(), 0),
        };
        let mut field_chars = field.chars();
        let field = match (field_chars.next(), field_chars.next()) {
            (Some(c), None) => RuleField::from_placeholder(c),
            _ => None,
        }
        .ok_or_else(|| format!("unknown placeholder {{{}}}", placeholder))?;

        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(TemplatePart::Placeholder { field, group });
    }

    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    Ok(parts)
}

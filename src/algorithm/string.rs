// src/algorithm/string.rs
use super::{unknown_param, AlgorithmKind, Condition, ConditionConfig, ParamKind, ParamSpec};
use crate::error::{AlarmError, Result};
use crate::value::Value;
use crate::watch::WatchView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

/// Comparison applied between the current text and `alarm_value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StringMode {
    #[default]
    Equals,
    NotEquals,
    Contains,
    NotContains,
    /// Current text is a substring of the alarm value
    Contained,
    NotContained,
    StartsWith,
    EndsWith,
    /// Alarm value is a comma separated list
    InList,
    NotInList,
}

impl StringMode {
    pub const ALL: [StringMode; 10] = [
        StringMode::Equals,
        StringMode::NotEquals,
        StringMode::Contains,
        StringMode::NotContains,
        StringMode::Contained,
        StringMode::NotContained,
        StringMode::StartsWith,
        StringMode::EndsWith,
        StringMode::InList,
        StringMode::NotInList,
    ];

    const NAMES: [&'static str; 10] = [
        "Equals",
        "NotEquals",
        "Contains",
        "NotContains",
        "Contained",
        "NotContained",
        "StartsWith",
        "EndsWith",
        "InList",
        "NotInList",
    ];

    pub fn as_str(&self) -> &'static str {
        Self::NAMES[*self as usize]
    }

    fn uses_list(&self) -> bool {
        matches!(self, StringMode::InList | StringMode::NotInList)
    }
}

impl fmt::Display for StringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StringMode {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace([' ', '_'], "");
        StringMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| AlarmError::InvalidParameter(format!("unknown string mode '{}'", s)))
    }
}

/// Parse one CSV row into trimmed cells with surrounding quotes removed
pub fn parse_list(text: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(Vec::new());
    }
    Ok(record.iter().map(|cell| unquote(cell).to_string()).collect())
}

fn unquote(cell: &str) -> &str {
    if cell.len() >= 2 && cell.starts_with('"') && cell.ends_with('"') {
        &cell[1..cell.len() - 1]
    } else {
        cell
    }
}

/// Alarm on a text comparison against `alarm_value`
///
/// Comparisons are case sensitive. A value with no text form never alarms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringAlgorithm {
    #[serde(default)]
    pub alarm_value: String,
    #[serde(default)]
    pub mode: StringMode,
    #[serde(skip)]
    list: OnceLock<Vec<String>>,
}

impl PartialEq for StringAlgorithm {
    fn eq(&self, other: &Self) -> bool {
        self.alarm_value == other.alarm_value && self.mode == other.mode
    }
}

impl StringAlgorithm {
    pub fn new(alarm_value: impl Into<String>, mode: StringMode) -> Self {
        Self {
            alarm_value: alarm_value.into(),
            mode,
            list: OnceLock::new(),
        }
    }

    fn list(&self) -> &[String] {
        self.list.get_or_init(|| {
            parse_list(&self.alarm_value).unwrap_or_else(|e| {
                warn!("Cannot parse list '{}': {}", self.alarm_value, e);
                Vec::new()
            })
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        let target = self.alarm_value.as_str();
        match self.mode {
            StringMode::Equals => text == target,
            StringMode::NotEquals => text != target,
            StringMode::Contains => text.contains(target),
            StringMode::NotContains => !text.contains(target),
            StringMode::Contained => target.contains(text),
            StringMode::NotContained => !target.contains(text),
            StringMode::StartsWith => text.starts_with(target),
            StringMode::EndsWith => text.ends_with(target),
            StringMode::InList => self.list().iter().any(|item| item == text),
            StringMode::NotInList => !self.list().iter().any(|item| item == text),
        }
    }
}

impl Condition for StringAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::String
    }

    fn is_alarm(&self, watch: &WatchView, _now: DateTime<Utc>) -> bool {
        match watch.value.as_ref().and_then(Value::as_text) {
            Some(text) => self.matches(&text),
            None => false,
        }
    }

    fn message(&self, watch: &WatchView) -> String {
        format!("Value = {}", watch.value.clone().unwrap_or_default())
    }

    fn config_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("alarm_value", ParamKind::Text, ""),
            ParamSpec::new("mode", ParamKind::Choice(&StringMode::NAMES), StringMode::default().as_str()),
        ]
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        let text = value.as_text().unwrap_or_default();
        let (alarm_value, mode) = match name {
            "alarm_value" => (text, self.mode),
            "mode" => (self.alarm_value.clone(), text.parse()?),
            _ => return Err(unknown_param(self.kind(), name)),
        };
        // Validate the combination before touching any field
        let list = OnceLock::new();
        if mode.uses_list() {
            let _ = list.set(parse_list(&alarm_value)?);
        }
        self.alarm_value = alarm_value;
        self.mode = mode;
        self.list = list;
        Ok(())
    }

    fn to_config(&self) -> ConditionConfig {
        ConditionConfig::String(self.clone())
    }
}

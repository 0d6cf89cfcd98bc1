// src/value.rs - Data point values delivered to watches
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value observed on a monitored data point
///
/// Values arrive from the host data source and are stored on watches.
/// Algorithms coerce them into the shape they need with the `as_*`
/// accessors; a `None` from an accessor means the value cannot be used
/// and the algorithm reports no alarm.
///
/// # Examples
///
/// ```rust
/// use petra_alarms::Value;
///
/// assert_eq!(Value::Int(42).as_float(), Some(42.0));
/// assert_eq!(Value::from("active").as_bool(), Some(true));
/// assert_eq!(Value::Null.as_bool(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Source is unavailable or has no value yet
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating-point value (64-bit)
    Float(f64),
    /// String value
    String(String),
}

impl Value {
    /// Convert to boolean if possible
    ///
    /// Strings accept the usual on/off vocabulary used by field devices.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) => Some(*f != 0.0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" | "active" => Some(true),
                "false" | "no" | "off" | "0" | "inactive" => Some(false),
                other => other.parse::<f64>().ok().filter(|f| !f.is_nan()).map(|f| f != 0.0),
            },
        }
    }

    /// Convert to float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
        }
    }

    /// Text used by string comparisons and alarm messages
    ///
    /// Whole-number floats render without a fractional part so that
    /// `Float(5.0)` compares equal to the string `"5"`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some((*f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
            Value::String(s) => Some(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "null"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

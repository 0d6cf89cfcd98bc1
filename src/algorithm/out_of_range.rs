// src/algorithm/out_of_range.rs
use super::{param_number, unknown_param, AlgorithmKind, Condition, ConditionConfig, ParamKind, ParamSpec};
use crate::error::{AlarmError, Result};
use crate::value::Value;
use crate::watch::WatchView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alarm when a numeric value leaves `[min, max]`
///
/// The deadband widens the band for entering an alarm and narrows it for
/// leaving one, so a value hovering at a limit does not chatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfRangeAlgorithm {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default)]
    pub deadband: f64,
}

fn default_max() -> f64 {
    100.0
}

impl Default for OutOfRangeAlgorithm {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: default_max(),
            deadband: 0.0,
        }
    }
}

impl Condition for OutOfRangeAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::OutOfRange
    }

    fn is_alarm(&self, watch: &WatchView, _now: DateTime<Utc>) -> bool {
        let Some(v) = watch.value.as_ref().and_then(Value::as_float) else {
            return false;
        };
        let db = self.deadband;
        if watch.alarm_state.is_alarm() {
            !(v >= self.min + db && v <= self.max - db)
        } else {
            v < self.min - db || v > self.max + db
        }
    }

    fn message(&self, watch: &WatchView) -> String {
        format!("Value out of range: {}", watch.value.clone().unwrap_or_default())
    }

    fn config_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("min", ParamKind::Number, 0.0),
            ParamSpec::new("max", ParamKind::Number, default_max()),
            ParamSpec::new("deadband", ParamKind::Number, 0.0),
        ]
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "min" => self.min = param_number(name, value)?,
            "max" => self.max = param_number(name, value)?,
            "deadband" => {
                let db = param_number(name, value)?;
                if db < 0.0 {
                    return Err(AlarmError::InvalidParameter("deadband cannot be negative".to_string()));
                }
                self.deadband = db;
            }
            _ => return Err(unknown_param(self.kind(), name)),
        }
        Ok(())
    }

    fn to_config(&self) -> ConditionConfig {
        ConditionConfig::OutOfRange(self.clone())
    }
}

// src/algorithm/boolean.rs
use super::{param_bool, unknown_param, AlgorithmKind, Condition, ConditionConfig, ParamKind, ParamSpec};
use crate::error::Result;
use crate::value::Value;
use crate::watch::WatchView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alarm when the value coerces to `alarm_value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanAlgorithm {
    #[serde(default = "default_alarm_value")]
    pub alarm_value: bool,
}

fn default_alarm_value() -> bool {
    true
}

impl Default for BooleanAlgorithm {
    fn default() -> Self {
        Self {
            alarm_value: default_alarm_value(),
        }
    }
}

impl Condition for BooleanAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Boolean
    }

    fn is_alarm(&self, watch: &WatchView, _now: DateTime<Utc>) -> bool {
        watch
            .value
            .as_ref()
            .and_then(Value::as_bool)
            .map_or(false, |b| b == self.alarm_value)
    }

    fn message(&self, watch: &WatchView) -> String {
        format!("Value: {}", watch.value.clone().unwrap_or_default())
    }

    fn config_schema(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("alarm_value", ParamKind::Bool, default_alarm_value())]
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "alarm_value" => self.alarm_value = param_bool(name, value)?,
            _ => return Err(unknown_param(self.kind(), name)),
        }
        Ok(())
    }

    fn to_config(&self) -> ConditionConfig {
        ConditionConfig::Boolean(self.clone())
    }
}

// src/algorithm/stale.rs
use super::{param_count, unknown_param, AlgorithmKind, Condition, ConditionConfig, ParamKind, ParamSpec};
use crate::error::Result;
use crate::value::Value;
use crate::watch::WatchView;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Alarm when the value has not changed for longer than the configured period
///
/// Only a differing value restarts the clock, so a source repeating the same
/// value still goes stale. Pair with an auto-update interval so the check
/// runs while the source is silent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleAlgorithm {
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
}

fn default_days() -> u32 {
    1
}

impl Default for StaleAlgorithm {
    fn default() -> Self {
        Self {
            days: default_days(),
            hours: 0,
            minutes: 0,
        }
    }
}

impl StaleAlgorithm {
    pub fn duration(&self) -> Duration {
        Duration::days(self.days as i64) + Duration::hours(self.hours as i64) + Duration::minutes(self.minutes as i64)
    }
}

impl Condition for StaleAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Stale
    }

    fn is_alarm(&self, watch: &WatchView, now: DateTime<Utc>) -> bool {
        let limit = self.duration();
        limit > Duration::zero() && watch.time_in_current_state(now) > limit
    }

    fn message(&self, watch: &WatchView) -> String {
        format!("Stale value: {}", watch.value.clone().unwrap_or_default())
    }

    fn config_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("days", ParamKind::Integer, default_days() as i64),
            ParamSpec::new("hours", ParamKind::Integer, 0i64),
            ParamSpec::new("minutes", ParamKind::Integer, 0i64),
        ]
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "days" => self.days = param_count(name, value)?,
            "hours" => self.hours = param_count(name, value)?,
            "minutes" => self.minutes = param_count(name, value)?,
            _ => return Err(unknown_param(self.kind(), name)),
        }
        Ok(())
    }

    fn to_config(&self) -> ConditionConfig {
        ConditionConfig::Stale(self.clone())
    }
}

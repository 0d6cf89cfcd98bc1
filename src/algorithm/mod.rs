// src/algorithm/mod.rs - Alarm algorithms and their evaluation loop
//
// An algorithm owns a set of watches and one condition. The condition only
// answers "is this watch in alarm" and renders the record message; the
// Algorithm applies severity, inhibits and record creation.

use crate::engine::{Engine, Handle, Lifecycle, LifecycleCell};
use crate::error::{AlarmError, Result};
use crate::record::AlarmState;
use crate::timer::PeriodicTask;
use crate::value::Value;
use crate::watch::{Inhibits, Transition, Watch, WatchView};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod boolean;
pub mod out_of_range;
pub mod stale;
pub mod string;

pub use boolean::BooleanAlgorithm;
pub use out_of_range::OutOfRangeAlgorithm;
pub use stale::StaleAlgorithm;
pub use string::{StringAlgorithm, StringMode};

// ============================================================================
// CONDITIONS
// ============================================================================

/// Built-in algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    Boolean,
    OutOfRange,
    Stale,
    String,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 4] = [
        AlgorithmKind::Boolean,
        AlgorithmKind::OutOfRange,
        AlgorithmKind::Stale,
        AlgorithmKind::String,
    ];

    /// Catalog name used to create algorithms by type
    pub fn type_name(&self) -> &'static str {
        match self {
            AlgorithmKind::Boolean => "Boolean Algorithm",
            AlgorithmKind::OutOfRange => "Out of Range Algorithm",
            AlgorithmKind::Stale => "Stale Algorithm",
            AlgorithmKind::String => "String Algorithm",
        }
    }

    /// Condition with default parameters
    pub fn default_config(&self) -> ConditionConfig {
        match self {
            AlgorithmKind::Boolean => ConditionConfig::Boolean(BooleanAlgorithm::default()),
            AlgorithmKind::OutOfRange => ConditionConfig::OutOfRange(OutOfRangeAlgorithm::default()),
            AlgorithmKind::Stale => ConditionConfig::Stale(StaleAlgorithm::default()),
            AlgorithmKind::String => ConditionConfig::String(StringAlgorithm::default()),
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for AlgorithmKind {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        AlgorithmKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.type_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AlarmError::InvalidParameter(format!("unknown algorithm type '{}'", s)))
    }
}

/// Kind of a configurable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamKind {
    Bool,
    Number,
    Integer,
    Text,
    Choice(&'static [&'static str]),
}

/// One configurable parameter of a condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Value,
}

impl ParamSpec {
    pub fn new(name: &'static str, kind: ParamKind, default: impl Into<Value>) -> Self {
        Self {
            name,
            kind,
            default: default.into(),
        }
    }
}

/// The predicate an algorithm evaluates over each of its watches
pub trait Condition: Send + Sync + fmt::Debug {
    fn kind(&self) -> AlgorithmKind;

    /// Whether the watch is in alarm. A value that cannot be interpreted is
    /// never an alarm.
    fn is_alarm(&self, watch: &WatchView, now: DateTime<Utc>) -> bool;

    /// Message stored on a new record
    fn message(&self, watch: &WatchView) -> String;

    fn config_schema(&self) -> Vec<ParamSpec>;

    /// Update one parameter from a host-supplied value
    fn set_param(&mut self, name: &str, value: &Value) -> Result<()>;

    fn to_config(&self) -> ConditionConfig;
}

pub(crate) fn param_bool(name: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| AlarmError::InvalidParameter(format!("{} expects a boolean, got {}", name, value)))
}

pub(crate) fn param_number(name: &str, value: &Value) -> Result<f64> {
    value
        .as_float()
        .ok_or_else(|| AlarmError::InvalidParameter(format!("{} expects a number, got {}", name, value)))
}

pub(crate) fn param_count(name: &str, value: &Value) -> Result<u32> {
    let number = param_number(name, value)?;
    if number < 0.0 || number.fract() != 0.0 || number > u32::MAX as f64 {
        return Err(AlarmError::InvalidParameter(format!(
            "{} expects a non-negative integer, got {}",
            name, value
        )));
    }
    Ok(number as u32)
}

pub(crate) fn unknown_param(kind: AlgorithmKind, name: &str) -> AlarmError {
    AlarmError::InvalidParameter(format!("{} has no parameter '{}'", kind, name))
}

/// Serializable condition parameters, tagged with the catalog name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConditionConfig {
    #[serde(rename = "Boolean Algorithm")]
    Boolean(BooleanAlgorithm),
    #[serde(rename = "Out of Range Algorithm")]
    OutOfRange(OutOfRangeAlgorithm),
    #[serde(rename = "Stale Algorithm")]
    Stale(StaleAlgorithm),
    #[serde(rename = "String Algorithm")]
    String(StringAlgorithm),
}

impl ConditionConfig {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            ConditionConfig::Boolean(_) => AlgorithmKind::Boolean,
            ConditionConfig::OutOfRange(_) => AlgorithmKind::OutOfRange,
            ConditionConfig::Stale(_) => AlgorithmKind::Stale,
            ConditionConfig::String(_) => AlgorithmKind::String,
        }
    }

    pub fn into_condition(self) -> Box<dyn Condition> {
        match self {
            ConditionConfig::Boolean(c) => Box::new(c),
            ConditionConfig::OutOfRange(c) => Box::new(c),
            ConditionConfig::Stale(c) => Box::new(c),
            ConditionConfig::String(c) => Box::new(c),
        }
    }
}

impl Default for ConditionConfig {
    fn default() -> Self {
        AlgorithmKind::Boolean.default_config()
    }
}

// ============================================================================
// ALGORITHM NODE
// ============================================================================

/// Settings shared by every algorithm type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmSettings {
    pub enabled: bool,
    /// Severity of raised records; never Normal
    pub severity: AlarmState,
    /// Seconds between automatic re-evaluations, 0 to disable
    pub auto_update_secs: u64,
    pub to_alarm_inhibit_secs: u64,
    pub to_normal_inhibit_secs: u64,
}

impl Default for AlgorithmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            severity: AlarmState::Alert,
            auto_update_secs: 0,
            to_alarm_inhibit_secs: 0,
            to_normal_inhibit_secs: 0,
        }
    }
}

impl AlgorithmSettings {
    pub fn inhibits(&self) -> Inhibits {
        Inhibits {
            to_alarm: Duration::seconds(self.to_alarm_inhibit_secs as i64),
            to_normal: Duration::seconds(self.to_normal_inhibit_secs as i64),
        }
    }
}

/// Clears the reentrancy flag when an update pass ends
struct UpdatingGuard<'a>(&'a AtomicBool);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An algorithm node in the alarm tree
#[derive(Debug)]
pub struct Algorithm {
    handle: Handle,
    name: String,
    class: Handle,
    settings: RwLock<AlgorithmSettings>,
    condition: RwLock<Box<dyn Condition>>,
    watches: RwLock<Vec<Handle>>,
    updating: AtomicBool,
    timer: tokio::sync::Mutex<Option<PeriodicTask>>,
    lifecycle: LifecycleCell,
}

impl Algorithm {
    pub fn new(
        handle: Handle,
        name: impl Into<String>,
        class: Handle,
        settings: AlgorithmSettings,
        condition: Box<dyn Condition>,
    ) -> Result<Self> {
        if settings.severity == AlarmState::Normal {
            return Err(AlarmError::InvalidParameter("alarm type cannot be Normal".to_string()));
        }
        Ok(Self {
            handle,
            name: name.into(),
            class,
            settings: RwLock::new(settings),
            condition: RwLock::new(condition),
            watches: RwLock::new(Vec::new()),
            updating: AtomicBool::new(false),
            timer: tokio::sync::Mutex::new(None),
            lifecycle: LifecycleCell::default(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle of the owning class
    pub fn class(&self) -> Handle {
        self.class
    }

    pub fn kind(&self) -> AlgorithmKind {
        self.condition.read().kind()
    }

    pub fn settings(&self) -> AlgorithmSettings {
        self.settings.read().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.write().enabled = enabled;
    }

    pub fn severity(&self) -> AlarmState {
        self.settings.read().severity
    }

    pub fn set_severity(&self, severity: AlarmState) -> Result<()> {
        if severity == AlarmState::Normal {
            return Err(AlarmError::InvalidParameter("alarm type cannot be Normal".to_string()));
        }
        self.settings.write().severity = severity;
        Ok(())
    }

    pub fn set_inhibits(&self, to_alarm_secs: u64, to_normal_secs: u64) {
        let mut settings = self.settings.write();
        settings.to_alarm_inhibit_secs = to_alarm_secs;
        settings.to_normal_inhibit_secs = to_normal_secs;
    }

    pub fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    pub fn is_steady(&self) -> bool {
        self.lifecycle.get() == Lifecycle::Steady
    }

    pub fn config_schema(&self) -> Vec<ParamSpec> {
        self.condition.read().config_schema()
    }

    pub fn condition_config(&self) -> ConditionConfig {
        self.condition.read().to_config()
    }

    pub fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        self.condition.write().set_param(name, value)
    }

    /// Replace the condition parameters; the type cannot change
    pub fn set_condition(&self, config: ConditionConfig) -> Result<()> {
        let mut condition = self.condition.write();
        if condition.kind() != config.kind() {
            return Err(AlarmError::InvalidParameter(format!(
                "cannot change {} into {}",
                condition.kind(),
                config.kind()
            )));
        }
        *condition = config.into_condition();
        Ok(())
    }

    pub fn watches(&self) -> Vec<Handle> {
        self.watches.read().clone()
    }

    pub(crate) fn add_watch(&self, handle: Handle) {
        self.watches.write().push(handle);
    }

    pub(crate) fn remove_watch(&self, handle: Handle) {
        self.watches.write().retain(|h| *h != handle);
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Re-evaluate every watch. Overlapping calls collapse into a no-op.
    pub async fn update_all(&self, engine: &Engine) {
        if self
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Algorithm {} update already running", self.name);
            return;
        }
        let _guard = UpdatingGuard(&self.updating);
        for handle in self.watches() {
            match engine.watch(handle) {
                Ok(watch) => {
                    if let Err(e) = self.update(engine, &watch).await {
                        error!("Algorithm {} failed to update watch {}: {}", self.name, watch.name(), e);
                    }
                }
                Err(e) => warn!("Algorithm {} lost watch {}: {}", self.name, handle, e),
            }
            tokio::task::yield_now().await;
        }
    }

    /// Evaluate one watch and commit any state change
    pub async fn update(&self, engine: &Engine, watch: &Arc<Watch>) -> Result<()> {
        if !self.is_enabled() || !self.is_steady() || !watch.is_enabled() || !watch.is_steady() {
            return Ok(());
        }
        let _evaluating = watch.lock_evaluation().await;
        let now = engine.now();
        let view = watch.view();
        let (alarm, message) = {
            let condition = self.condition.read();
            let alarm = condition.is_alarm(&view, now);
            let message = if alarm { condition.message(&view) } else { String::new() };
            (alarm, message)
        };
        let target = if alarm { self.severity() } else { AlarmState::Normal };
        self.update_state(engine, watch, target, message).await
    }

    async fn update_state(
        &self,
        engine: &Engine,
        watch: &Arc<Watch>,
        target: AlarmState,
        message: String,
    ) -> Result<()> {
        let class = engine.class(self.class)?;
        if !engine.service().is_enabled() || !class.is_enabled() {
            return Ok(());
        }
        let now = engine.now();
        let inhibits = self.settings.read().inhibits();
        let (previous, last_alarm) = match watch.transition(target, inhibits, now) {
            Transition::Unchanged => return Ok(()),
            Transition::Deferred => {
                debug!("Watch {} transition to {} inhibited", watch.name(), target);
                return Ok(());
            }
            Transition::Accepted { previous, last_alarm } => (previous, last_alarm),
        };

        if target == AlarmState::Normal {
            info!("Watch {} returned to normal", watch.name());
            if let Some(id) = last_alarm {
                match engine.provider().return_to_normal(id, now).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        warn!("Watch {} record {} no longer exists", watch.name(), id);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
                engine.mark_counts_dirty();
                if let Some(record) = engine.provider().get_alarm(id).await? {
                    class.notify_all_updates(engine, &record);
                }
            }
            return Ok(());
        }

        let created = engine
            .create_alarm(&class, Some(watch.handle()), &watch.source_path(), target, &message)
            .await;
        match created {
            Ok(record) => {
                info!("Alarm triggered: {} ({})", watch.source_path(), record.message);
                watch.set_last_alarm(Some(record.id));
                class.notify_new_record(&record);
                class.notify_all_updates(engine, &record);
                Ok(())
            }
            Err(e) => {
                watch.revert(previous, now);
                Err(e)
            }
        }
    }

    /// Housekeeping hook run on every service tick.
    ///
    /// Watches holding back an inhibited transition are re-evaluated so the
    /// transition commits even when the source goes quiet.
    pub async fn execute(&self, engine: &Engine) {
        if !self.is_enabled() || !self.is_steady() {
            return;
        }
        for handle in self.watches() {
            if let Ok(watch) = engine.watch(handle) {
                if watch.has_deferred_transition() {
                    if let Err(e) = self.update(engine, &watch).await {
                        error!("Algorithm {} failed to update watch {}: {}", self.name, watch.name(), e);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Auto update timer
    // ------------------------------------------------------------------

    /// Cancel any running timer and start a new one at the configured interval
    pub async fn schedule_auto_update(&self, engine: &Engine) {
        let mut timer = self.timer.lock().await;
        if let Some(task) = timer.take() {
            task.stop().await;
        }
        let secs = self.settings.read().auto_update_secs;
        if secs == 0 || !self.is_steady() {
            return;
        }
        let period = std::time::Duration::from_secs(secs);
        let initial = std::time::Duration::from_secs(secs.min(5));
        let weak = engine.downgrade();
        let handle = self.handle;
        *timer = Some(PeriodicTask::spawn(
            format!("auto-update {}", self.name),
            initial,
            period,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(engine) = weak.upgrade() {
                        if let Ok(algorithm) = engine.algorithm(handle) {
                            algorithm.update_all(&engine).await;
                        }
                    }
                }
            },
        ));
    }

    /// Change the auto-update interval, rescheduling when running
    pub async fn set_auto_update_interval(&self, engine: &Engine, secs: u64) {
        self.settings.write().auto_update_secs = secs;
        self.schedule_auto_update(engine).await;
    }

    pub async fn cancel_auto_update(&self) {
        if let Some(task) = self.timer.lock().await.take() {
            task.stop().await;
        }
    }

    pub async fn has_auto_update(&self) -> bool {
        self.timer.lock().await.is_some()
    }
}

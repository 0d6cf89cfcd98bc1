// src/watch.rs - Per data point alarm state
use crate::engine::{Handle, Lifecycle, LifecycleCell};
use crate::record::AlarmState;
use crate::value::Value;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Point-in-time view of a watch handed to algorithm conditions
#[derive(Debug, Clone, PartialEq)]
pub struct WatchView {
    pub value: Option<Value>,
    pub alarm_state: AlarmState,
    /// When the source entered its current value
    pub state_entered: DateTime<Utc>,
}

impl WatchView {
    /// How long the source has held its current value
    pub fn time_in_current_state(&self, now: DateTime<Utc>) -> Duration {
        now - self.state_entered
    }
}

/// Inhibit durations applied when committing a transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inhibits {
    pub to_alarm: Duration,
    pub to_normal: Duration,
}

/// Result of offering a target state to a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target equals the current state
    Unchanged,
    /// Inhibit timer still running
    Deferred,
    /// State changed; carries the previous state and the record linked at the time
    Accepted {
        previous: AlarmState,
        last_alarm: Option<Uuid>,
    },
}

#[derive(Debug)]
struct WatchState {
    value: Option<Value>,
    alarm_state: AlarmState,
    alarm_state_time: DateTime<Utc>,
    state_entered: DateTime<Utc>,
    last_alarm: Option<Uuid>,
    /// Lazily seeded from the alarm state
    detected: Option<bool>,
    detected_time: DateTime<Utc>,
}

/// A monitored data point
#[derive(Debug)]
pub struct Watch {
    handle: Handle,
    name: String,
    algorithm: Handle,
    source_path: RwLock<String>,
    enabled: AtomicBool,
    state: Mutex<WatchState>,
    pending: AtomicBool,
    /// Held for a whole evaluation, including the record write
    evaluation: tokio::sync::Mutex<()>,
    lifecycle: LifecycleCell,
}

impl Watch {
    pub fn new(
        handle: Handle,
        name: impl Into<String>,
        algorithm: Handle,
        source_path: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            handle,
            name: name.into(),
            algorithm,
            source_path: RwLock::new(source_path.into()),
            enabled: AtomicBool::new(true),
            state: Mutex::new(WatchState {
                value: None,
                alarm_state: AlarmState::Normal,
                alarm_state_time: now,
                state_entered: now,
                last_alarm: None,
                detected: None,
                detected_time: now,
            }),
            pending: AtomicBool::new(false),
            evaluation: tokio::sync::Mutex::new(()),
            lifecycle: LifecycleCell::default(),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle of the owning algorithm
    pub fn algorithm(&self) -> Handle {
        self.algorithm
    }

    pub fn source_path(&self) -> String {
        self.source_path.read().clone()
    }

    pub(crate) fn set_source_path(&self, path: impl Into<String>) {
        *self.source_path.write() = path.into();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    pub fn is_steady(&self) -> bool {
        self.lifecycle.get() == Lifecycle::Steady
    }

    pub fn view(&self) -> WatchView {
        let state = self.state.lock();
        WatchView {
            value: state.value.clone(),
            alarm_state: state.alarm_state,
            state_entered: state.state_entered,
        }
    }

    pub fn current_value(&self) -> Option<Value> {
        self.state.lock().value.clone()
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.state.lock().alarm_state
    }

    pub fn alarm_state_time(&self) -> DateTime<Utc> {
        self.state.lock().alarm_state_time
    }

    pub fn last_alarm(&self) -> Option<Uuid> {
        self.state.lock().last_alarm
    }

    pub(crate) fn set_last_alarm(&self, id: Option<Uuid>) {
        self.state.lock().last_alarm = id;
    }

    /// Store a value from the source.
    ///
    /// Only a different value restarts the state clock. The caller requests
    /// an evaluation in both cases.
    pub fn receive(&self, value: Value, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.value.as_ref() == Some(&value) {
            return false;
        }
        state.value = Some(value);
        state.state_entered = now;
        true
    }

    /// Restore the state clock, used when loading persisted state
    pub fn set_state_entered(&self, at: DateTime<Utc>) {
        self.state.lock().state_entered = at;
    }

    /// Set the alarm state; the state time only moves on a real change
    pub fn set_alarm_state(&self, alarm_state: AlarmState, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        if state.alarm_state != alarm_state {
            state.alarm_state = alarm_state;
            state.alarm_state_time = now;
        }
    }

    /// Mark an evaluation as pending. Returns false when one already is.
    pub(crate) fn try_mark_pending(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Serialize evaluations so a transition and its record write are not
    /// interleaved with another evaluation of the same watch
    pub(crate) async fn lock_evaluation(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.evaluation.lock().await
    }

    pub fn is_evaluation_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Milliseconds since the detection flag last flipped
    pub fn alarm_detected_elapsed(&self, now: DateTime<Utc>) -> i64 {
        (now - self.state.lock().detected_time).num_milliseconds()
    }

    /// Detection disagrees with the committed state, i.e. an inhibit is running
    pub fn has_deferred_transition(&self) -> bool {
        let state = self.state.lock();
        state
            .detected
            .map_or(false, |detected| detected != state.alarm_state.is_alarm())
    }

    /// Offer a target state, applying the inhibit timers.
    ///
    /// The detection flag tracks every evaluation so that an inhibit measures
    /// how long the condition has actually held. When accepted, the new state
    /// is committed before returning so concurrent evaluators see it.
    pub fn transition(&self, target: AlarmState, inhibits: Inhibits, now: DateTime<Utc>) -> Transition {
        let mut state = self.state.lock();
        let toward_alarm = target.is_alarm();
        let seeded = state.alarm_state.is_alarm();
        let detected = *state.detected.get_or_insert(seeded);
        if detected != toward_alarm {
            state.detected = Some(toward_alarm);
            state.detected_time = now;
        }
        if target == state.alarm_state {
            return Transition::Unchanged;
        }
        let inhibit = if toward_alarm { inhibits.to_alarm } else { inhibits.to_normal };
        if inhibit > Duration::zero() && now - state.detected_time < inhibit {
            return Transition::Deferred;
        }
        let previous = state.alarm_state;
        state.alarm_state = target;
        state.alarm_state_time = now;
        Transition::Accepted {
            previous,
            last_alarm: state.last_alarm,
        }
    }

    /// Undo an accepted transition whose record could not be written
    pub(crate) fn revert(&self, previous: AlarmState, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.alarm_state = previous;
        state.alarm_state_time = now;
        state.detected = Some(previous.is_alarm());
    }
}

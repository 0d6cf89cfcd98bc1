// src/signal.rs - In-process value store usable as the host data source
use crate::error::{AlarmError, Result};
use crate::subscriptions::{DataSource, ValueCallback};
use crate::value::Value;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Thread-safe signal bus with one subscriber per path
///
/// The bus stores the last value of every path and pushes each write to the
/// path's subscriber, if any. A new subscriber immediately receives the
/// current value.
///
/// # Examples
///
/// ```rust
/// use petra_alarms::{SignalBus, Value};
///
/// let bus = SignalBus::new();
/// bus.set("/plant/temperature", Value::Float(23.5));
/// assert_eq!(bus.get("/plant/temperature"), Some(Value::Float(23.5)));
/// ```
#[derive(Clone, Default)]
pub struct SignalBus {
    signals: Arc<DashMap<String, Value>>,
    subscribers: Arc<DashMap<String, ValueCallback>>,
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("signals", &self.signals.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a signal value and notify its subscriber
    pub fn set(&self, name: impl AsRef<str>, value: Value) {
        let name = name.as_ref();
        trace!("Setting signal {} = {:?}", name, value);
        self.signals.insert(name.to_string(), value.clone());
        // clone out of the map so the callback runs without a shard lock
        let callback = self.subscribers.get(name).map(|entry| entry.value().clone());
        if let Some(callback) = callback {
            callback(name, value);
        }
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<Value> {
        self.signals.get(name.as_ref()).map(|entry| entry.value().clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.signals.remove(name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscribers.contains_key(name)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl DataSource for SignalBus {
    fn subscribe(&self, path: &str, callback: ValueCallback) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.subscribers.entry(path.to_string()) {
            Entry::Occupied(_) => {
                return Err(AlarmError::InvalidParameter(format!("{} already has a subscriber", path)))
            }
            Entry::Vacant(slot) => {
                slot.insert(callback.clone());
            }
        }
        if let Some(current) = self.get(path) {
            callback(path, current);
        }
        Ok(())
    }

    fn unsubscribe(&self, path: &str) -> Result<()> {
        self.subscribers
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| AlarmError::NotFound(format!("subscription {}", path)))
    }
}

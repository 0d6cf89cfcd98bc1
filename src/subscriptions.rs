// src/subscriptions.rs - Fan-in of watch subscriptions onto the host data source
use crate::engine::Handle;
use crate::error::Result;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Called by the host with the path and its new value
pub type ValueCallback = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Host primitive that allows one subscriber per path
pub trait DataSource: Send + Sync {
    fn subscribe(&self, path: &str, callback: ValueCallback) -> Result<()>;

    fn unsubscribe(&self, path: &str) -> Result<()>;
}

/// Multiplexes any number of watches per path onto a single host subscription
///
/// The host is subscribed when the first watch of a path arrives and
/// unsubscribed when the last one leaves. Host calls are serialized by
/// `host_lock` and never made while the path table is locked.
pub struct Subscriptions {
    source: Arc<dyn DataSource>,
    paths: RwLock<HashMap<String, HashSet<Handle>>>,
    host_lock: Mutex<()>,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("paths", &self.paths.read().len())
            .finish()
    }
}

impl Subscriptions {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            paths: RwLock::new(HashMap::new()),
            host_lock: Mutex::new(()),
        }
    }

    /// Add a watch to a path, subscribing the host on first use
    pub fn subscribe(&self, path: &str, handle: Handle, callback: impl FnOnce() -> ValueCallback) -> Result<()> {
        let _host = self.host_lock.lock();
        let first = {
            let mut paths = self.paths.write();
            let watchers = paths.entry(path.to_string()).or_default();
            let first = watchers.is_empty();
            watchers.insert(handle);
            first
        };
        if first {
            debug!("Subscribing to {}", path);
            if let Err(e) = self.source.subscribe(path, callback()) {
                let mut paths = self.paths.write();
                if let Some(watchers) = paths.get_mut(path) {
                    watchers.remove(&handle);
                    if watchers.is_empty() {
                        paths.remove(path);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove a watch from a path, releasing the host subscription after the last one
    pub fn unsubscribe(&self, path: &str, handle: Handle) -> Result<()> {
        let _host = self.host_lock.lock();
        let last = {
            let mut paths = self.paths.write();
            let Some(watchers) = paths.get_mut(path) else {
                return Ok(());
            };
            if !watchers.remove(&handle) {
                return Ok(());
            }
            let empty = watchers.is_empty();
            if empty {
                paths.remove(path);
            }
            empty
        };
        if last {
            debug!("Unsubscribing from {}", path);
            if let Err(e) = self.source.unsubscribe(path) {
                warn!("Host unsubscribe of {} failed: {}", path, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Watches currently subscribed to a path
    pub fn subscribers(&self, path: &str) -> Vec<Handle> {
        self.paths
            .read()
            .get(path)
            .map(|watchers| watchers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of distinct host subscriptions
    pub fn path_count(&self) -> usize {
        self.paths.read().len()
    }
}

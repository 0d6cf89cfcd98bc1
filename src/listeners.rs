// src/listeners.rs - Copy-on-write streamer sets
use crate::record::AlarmRecord;
use crate::streamer::Streamer;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::trace;

/// A set of streamers that receive the same notifications
///
/// Membership changes rebuild an immutable snapshot. Notification clones
/// the current snapshot and iterates it with no lock held.
#[derive(Debug)]
pub struct ListenerSet {
    name: String,
    members: Mutex<Vec<Arc<Streamer>>>,
    snapshot: RwLock<Arc<[Arc<Streamer>]>>,
}

impl ListenerSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, streamer: Arc<Streamer>) {
        let mut members = self.members.lock();
        members.push(streamer);
        *self.snapshot.write() = Arc::from(members.clone());
    }

    /// Remove a streamer by id. Returns whether it was a member.
    pub fn remove(&self, id: u64) -> bool {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|s| s.id() != id);
        let removed = members.len() != before;
        if removed {
            *self.snapshot.write() = Arc::from(members.clone());
        }
        removed
    }

    pub fn snapshot(&self) -> Arc<[Arc<Streamer>]> {
        self.snapshot.read().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a copy of the record on every member
    pub fn notify(&self, record: &AlarmRecord) {
        let members = self.snapshot();
        if members.is_empty() {
            return;
        }
        trace!("Notifying {} listeners of {} about {}", members.len(), self.name, record.id);
        for streamer in members.iter() {
            streamer.update(record);
        }
    }

    /// Close every member from the producer side
    pub fn close_all(&self) {
        for streamer in self.snapshot().iter() {
            streamer.close();
        }
    }
}

// src/provider/memory.rs - Copy-on-write in-memory record store
use super::{AlarmCursor, AlarmQuery, Cursor, NoteCursor, Paging, Provider, VecCursor};
use crate::error::{AlarmError, Result};
use crate::record::{record_time, AlarmRecord, Note};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Records are keyed by creation time first so natural order is a range scan
type Key = (DateTime<Utc>, Uuid);

#[derive(Debug, Clone, Default)]
struct Store {
    records: BTreeMap<Key, AlarmRecord>,
    index: HashMap<Uuid, DateTime<Utc>>,
    notes: HashMap<Uuid, Vec<Note>>,
}

impl Store {
    fn key_of(&self, id: Uuid) -> Option<Key> {
        self.index.get(&id).map(|created| (*created, id))
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut AlarmRecord> {
        let key = self
            .key_of(id)
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {}", id)))?;
        self.records
            .get_mut(&key)
            .ok_or_else(|| AlarmError::NotFound(format!("alarm {}", id)))
    }
}

/// Volatile provider
///
/// Mutations copy the store when a cursor still holds the previous
/// snapshot, so open cursors never observe concurrent inserts or deletes.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    store: RwLock<Arc<Store>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Store> {
        self.store.read().clone()
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Store) -> Result<T>) -> Result<T> {
        let mut guard = self.store.write();
        f(Arc::make_mut(&mut guard))
    }

    pub fn len(&self) -> usize {
        self.store.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn add_alarm(&self, record: &AlarmRecord) -> Result<()> {
        self.mutate(|store| {
            if store.index.contains_key(&record.id) {
                return Err(AlarmError::DuplicateRecord(record.id));
            }
            store.index.insert(record.id, record.created_time);
            store
                .records
                .insert((record.created_time, record.id), record.clone());
            Ok(())
        })
    }

    async fn get_alarm(&self, id: Uuid) -> Result<Option<AlarmRecord>> {
        let store = self.snapshot();
        Ok(store.key_of(id).and_then(|key| store.records.get(&key).cloned()))
    }

    async fn acknowledge(&self, id: Uuid, user: &str, at: DateTime<Utc>) -> Result<()> {
        // Avoid copying the store for a repeat acknowledgement
        match self.get_alarm(id).await? {
            None => return Err(AlarmError::NotFound(format!("alarm {}", id))),
            Some(record) if record.is_acknowledged() => return Ok(()),
            Some(_) => {}
        }
        self.mutate(|store| {
            store.get_mut(id)?.acknowledge(user, at);
            Ok(())
        })
    }

    async fn return_to_normal(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        match self.get_alarm(id).await? {
            None => return Err(AlarmError::NotFound(format!("alarm {}", id))),
            Some(record) if record.is_normal() => return Ok(()),
            Some(_) => {}
        }
        self.mutate(|store| {
            store.get_mut(id)?.return_to_normal(at);
            Ok(())
        })
    }

    async fn add_note(&self, id: Uuid, user: &str, text: &str, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|store| {
            store.get_mut(id)?.has_notes = true;
            store.notes.entry(id).or_default().push(Note {
                alarm_id: id,
                timestamp: record_time(at),
                user: user.to_string(),
                text: text.to_string(),
            });
            Ok(())
        })
    }

    async fn delete_record(&self, id: Uuid) -> Result<()> {
        self.mutate(|store| {
            let key = store
                .key_of(id)
                .ok_or_else(|| AlarmError::NotFound(format!("alarm {}", id)))?;
            store.records.remove(&key);
            store.index.remove(&id);
            store.notes.remove(&id);
            Ok(())
        })
    }

    async fn delete_all_records(&self) -> Result<()> {
        let mut guard = self.store.write();
        let dropped = guard.records.len();
        *guard = Arc::new(Store::default());
        debug!("Memory provider cleared {} records", dropped);
        Ok(())
    }

    async fn query_alarms(&self, query: &AlarmQuery) -> Result<AlarmCursor> {
        Ok(Box::new(MemoryAlarmCursor::new(self.snapshot(), query.clone())))
    }

    async fn get_notes(&self, id: Uuid) -> Result<NoteCursor> {
        let store = self.snapshot();
        let mut notes = store.notes.get(&id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps
        notes.sort_by_key(|note| note.timestamp);
        Ok(Box::new(VecCursor::new(notes)))
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Cursor over a frozen snapshot of the store
struct MemoryAlarmCursor {
    snapshot: Arc<Store>,
    query: AlarmQuery,
    /// Pre-sorted keys when the query asks for a non-natural order
    ordered: Option<std::vec::IntoIter<Key>>,
    /// Last key visited in natural order
    position: Option<Key>,
    exhausted: bool,
    paging: Option<Paging>,
    skipped: usize,
    yielded: usize,
    started: bool,
    current: Option<Key>,
}

impl MemoryAlarmCursor {
    fn new(snapshot: Arc<Store>, query: AlarmQuery) -> Self {
        Self {
            snapshot,
            query,
            ordered: None,
            position: None,
            exhausted: false,
            paging: None,
            skipped: 0,
            yielded: 0,
            started: false,
            current: None,
        }
    }

    fn sort_keys(&self) -> Vec<Key> {
        let column = self.query.sort_column();
        let mut matching: Vec<&AlarmRecord> = self
            .snapshot
            .records
            .values()
            .filter(|record| self.query.matches(record))
            .collect();
        matching.sort_by(|a, b| {
            column
                .compare(a, b)
                .then_with(|| (a.created_time, a.id).cmp(&(b.created_time, b.id)))
        });
        if self.query.descending {
            matching.reverse();
        }
        matching.iter().map(|r| (r.created_time, r.id)).collect()
    }

    /// Next matching key before paging is applied
    fn advance(&mut self) -> Option<Key> {
        if self.exhausted {
            return None;
        }
        if let Some(ordered) = self.ordered.as_mut() {
            let next = ordered.next();
            self.exhausted = next.is_none();
            return next;
        }
        let lower = match self.position {
            Some(key) => Bound::Excluded(key),
            None => match self.query.from {
                Some(from) => Bound::Included((record_time(from), Uuid::nil())),
                None => Bound::Unbounded,
            },
        };
        let mut found = None;
        for (key, record) in self.snapshot.records.range((lower, Bound::Unbounded)) {
            self.position = Some(*key);
            if self.query.to.map_or(false, |to| key.0 >= record_time(to)) {
                break;
            }
            if self.query.matches(record) {
                found = Some(*key);
                break;
            }
        }
        self.exhausted = found.is_none();
        found
    }
}

#[async_trait]
impl Cursor<AlarmRecord> for MemoryAlarmCursor {
    fn set_paging(&mut self, page: usize, page_size: usize) -> Result<()> {
        if self.started {
            return Err(AlarmError::InvalidParameter("cursor already in use".to_string()));
        }
        self.paging = Some(Paging::new(page, page_size)?);
        Ok(())
    }

    async fn next(&mut self) -> Result<bool> {
        if !self.started {
            self.started = true;
            if !self.query.is_natural_order() {
                self.ordered = Some(self.sort_keys().into_iter());
            }
        }
        self.current = None;
        if let Some(paging) = self.paging {
            while self.skipped < paging.skip {
                if self.advance().is_none() {
                    return Ok(false);
                }
                self.skipped += 1;
            }
            if self.yielded >= paging.limit {
                self.exhausted = true;
                return Ok(false);
            }
        }
        self.current = self.advance();
        if self.current.is_some() {
            self.yielded += 1;
        }
        Ok(self.current.is_some())
    }

    fn current(&self) -> Option<&AlarmRecord> {
        self.current.and_then(|key| self.snapshot.records.get(&key))
    }

    async fn close(&mut self) {
        self.exhausted = true;
        self.ordered = None;
        self.current = None;
    }
}

// src/streamer.rs - Live alarm streams for subscribers
//
// A streamer first replays an optional initial cursor, then, when joined to
// a listener set, forwards every record enqueued by `update` until either
// the consumer or the producer closes it.

use crate::listeners::ListenerSet;
use crate::provider::AlarmCursor;
use crate::record::AlarmRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

static NEXT_STREAMER_ID: AtomicU64 = AtomicU64::new(1);

/// Tuning for streamers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Rows per emitted chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// How long the live loop waits on an empty queue before re-checking
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
    /// Chunks buffered toward a slow consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_chunk_size() -> usize {
    50
}

fn default_wait_ms() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    16
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            wait_ms: default_wait_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// What a consumer receives
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Rows from the initial query
    Snapshot(Vec<AlarmRecord>),
    /// The initial query is exhausted; live updates follow when joined
    SnapshotComplete,
    /// Records delivered after the snapshot, each a full copy
    Update(Vec<AlarmRecord>),
}

/// Producer side of one subscription
#[derive(Debug)]
pub struct Streamer {
    id: u64,
    queue: Mutex<VecDeque<AlarmRecord>>,
    wake: Notify,
    open: AtomicBool,
    deregistered: AtomicBool,
    listeners: Option<Weak<ListenerSet>>,
}

impl Streamer {
    fn new(id: u64, listeners: Option<&Arc<ListenerSet>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            open: AtomicBool::new(true),
            deregistered: AtomicBool::new(false),
            listeners: listeners.map(Arc::downgrade),
        })
    }

    /// A streamer with no run loop, for exercising listener sets
    pub fn detached(id: u64) -> Arc<Self> {
        Self::new(id, None)
    }

    /// Start streaming on the current runtime
    ///
    /// With `listeners` the streamer joins the set before the snapshot is
    /// read, so no update between the query and the join is lost. Without it
    /// the stream ends after the snapshot.
    pub fn spawn(
        listeners: Option<Arc<ListenerSet>>,
        cursor: Option<AlarmCursor>,
        settings: StreamSettings,
    ) -> AlarmStream {
        Self::join(listeners).start(cursor, settings)
    }

    /// Create a streamer and join the set without starting it.
    ///
    /// Updates are queued from this point, so the snapshot query can run
    /// afterwards without losing anything in between.
    pub fn join(listeners: Option<Arc<ListenerSet>>) -> Arc<Self> {
        let id = NEXT_STREAMER_ID.fetch_add(1, Ordering::Relaxed);
        let streamer = Self::new(id, listeners.as_ref());
        if let Some(set) = &listeners {
            set.add(streamer.clone());
        }
        streamer
    }

    /// Start the run loop of a joined streamer
    pub fn start(self: Arc<Self>, cursor: Option<AlarmCursor>, settings: StreamSettings) -> AlarmStream {
        let (tx, rx) = mpsc::channel(settings.channel_capacity.max(1));
        let task = tokio::spawn(self.clone().run(cursor, tx, settings));
        AlarmStream {
            streamer: self,
            rx,
            task: Some(task),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_live(&self) -> bool {
        self.listeners.is_some()
    }

    /// Records waiting to be emitted
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Enqueue a snapshot of the record if the stream is still open
    pub fn update(&self, record: &AlarmRecord) {
        if !self.is_open() {
            return;
        }
        self.queue.lock().push_back(record.clone());
        self.wake.notify_one();
    }

    /// Stop further delivery; the run loop exits on its next wake
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.wake.notify_one();
        }
    }

    /// Close a joined streamer that will never be started
    pub fn abandon(&self) {
        self.close();
        self.deregister();
    }

    /// Leave the listener set. Only the first call has any effect.
    fn deregister(&self) -> bool {
        if self.deregistered.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.listeners.as_ref().and_then(Weak::upgrade) {
            Some(set) => set.remove(self.id),
            None => false,
        }
    }

    fn drain(&self, max: usize) -> Vec<AlarmRecord> {
        let mut queue = self.queue.lock();
        let take = queue.len().min(max);
        queue.drain(..take).collect()
    }

    async fn run(
        self: Arc<Self>,
        cursor: Option<AlarmCursor>,
        tx: mpsc::Sender<StreamEvent>,
        settings: StreamSettings,
    ) {
        let chunk_size = settings.chunk_size.max(1);
        if let Some(cursor) = cursor {
            if let Err(e) = self.replay(cursor, &tx, chunk_size).await {
                warn!("Alarm stream {} snapshot failed: {}", self.id, e);
                self.close();
            }
        }
        if self.is_open() && tx.send(StreamEvent::SnapshotComplete).await.is_err() {
            self.close();
        }

        if self.is_live() {
            let wait = Duration::from_millis(settings.wait_ms);
            while self.is_open() && !tx.is_closed() {
                let batch = self.drain(chunk_size);
                if batch.is_empty() {
                    let _ = tokio::time::timeout(wait, self.wake.notified()).await;
                    continue;
                }
                if tx.send(StreamEvent::Update(batch)).await.is_err() {
                    break;
                }
            }
        }

        self.close();
        self.queue.lock().clear();
        self.deregister();
        debug!("Alarm stream {} finished", self.id);
    }

    async fn replay(
        &self,
        mut cursor: AlarmCursor,
        tx: &mpsc::Sender<StreamEvent>,
        chunk_size: usize,
    ) -> crate::error::Result<()> {
        let mut chunk = Vec::with_capacity(chunk_size);
        while self.is_open() && cursor.next().await? {
            if let Some(record) = cursor.current() {
                chunk.push(record.clone());
            }
            if chunk.len() >= chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                if tx.send(StreamEvent::Snapshot(full)).await.is_err() {
                    self.close();
                    break;
                }
            }
        }
        cursor.close().await;
        if !chunk.is_empty() && self.is_open() && tx.send(StreamEvent::Snapshot(chunk)).await.is_err() {
            self.close();
        }
        Ok(())
    }
}

/// Consumer side of one subscription
#[derive(Debug)]
pub struct AlarmStream {
    streamer: Arc<Streamer>,
    rx: mpsc::Receiver<StreamEvent>,
    task: Option<JoinHandle<()>>,
}

impl AlarmStream {
    pub fn id(&self) -> u64 {
        self.streamer.id()
    }

    /// Next event, or `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Collect the initial snapshot rows
    pub async fn snapshot(&mut self) -> Vec<AlarmRecord> {
        let mut rows = Vec::new();
        while let Some(event) = self.rx.recv().await {
            match event {
                StreamEvent::Snapshot(chunk) => rows.extend(chunk),
                StreamEvent::SnapshotComplete => break,
                StreamEvent::Update(chunk) => rows.extend(chunk),
            }
        }
        rows
    }

    /// Close from the consumer side and wait for the run loop to finish
    pub async fn close(mut self) {
        self.streamer.close();
        self.rx.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// src/engine.rs - Alarm tree arena, handle registry and lifecycle
//
// The engine owns every node of the alarm tree in a handle-keyed arena.
// Parents keep the handles of their children and children keep the handle
// of their parent, so both directions are lookups and no reference cycles
// exist. The engine is cheap to clone; background tasks hold a WeakEngine.

use crate::algorithm::{Algorithm, AlgorithmSettings, ConditionConfig};
use crate::class::{AlarmClass, ClassSettings};
use crate::error::{AlarmError, Result};
use crate::provider::Provider;
use crate::service::AlarmService;
use crate::streamer::StreamSettings;
use crate::subscriptions::{DataSource, Subscriptions, ValueCallback};
use crate::value::Value;
use crate::watch::Watch;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, info, trace, warn};

/// Stable identifier of a tree node
pub type Handle = u32;

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Lifecycle of the engine and of each node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Lifecycle {
    Created = 0,
    Started = 1,
    /// The node and all its descendants are running
    Steady = 2,
    Stopped = 3,
}

#[derive(Debug, Default)]
pub struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            0 => Lifecycle::Created,
            1 => Lifecycle::Started,
            2 => Lifecycle::Steady,
            _ => Lifecycle::Stopped,
        }
    }

    pub(crate) fn set(&self, state: Lifecycle) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// Time source for every timestamp the engine writes
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock moved by hand, for deterministic tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// ARENA
// ============================================================================

/// A registered tree node
#[derive(Debug, Clone)]
pub enum Node {
    Class(Arc<AlarmClass>),
    Algorithm(Arc<Algorithm>),
    Watch(Arc<Watch>),
}

impl Node {
    fn same(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Class(a), Node::Class(b)) => Arc::ptr_eq(a, b),
            (Node::Algorithm(a), Node::Algorithm(b)) => Arc::ptr_eq(a, b),
            (Node::Watch(a), Node::Watch(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Class(_) => "class",
            Node::Algorithm(_) => "algorithm",
            Node::Watch(_) => "watch",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Class(c) => c.name(),
            Node::Algorithm(a) => a.name(),
            Node::Watch(w) => w.name(),
        }
    }
}

pub(crate) struct EngineInner {
    provider: Arc<dyn Provider>,
    clock: Arc<dyn Clock>,
    nodes: DashMap<Handle, Node>,
    classes: RwLock<Vec<Handle>>,
    next_handle: AtomicU32,
    service: AlarmService,
    subscriptions: Subscriptions,
    stream_settings: RwLock<StreamSettings>,
    lifecycle: LifecycleCell,
    runtime: OnceLock<tokio::runtime::Handle>,
}

/// Shared handle to an alarm engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine reference held by timers and host callbacks
#[derive(Clone)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.inner.provider.name())
            .field("nodes", &self.inner.nodes.len())
            .field("lifecycle", &self.inner.lifecycle.get())
            .finish()
    }
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, source: Arc<dyn DataSource>) -> Self {
        Self::with_clock(provider, source, Arc::new(SystemClock))
    }

    pub fn with_clock(provider: Arc<dyn Provider>, source: Arc<dyn DataSource>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(EngineInner {
                provider,
                clock,
                nodes: DashMap::new(),
                classes: RwLock::new(Vec::new()),
                next_handle: AtomicU32::new(1),
                service: AlarmService::new(now),
                subscriptions: Subscriptions::new(source),
                stream_settings: RwLock::new(StreamSettings::default()),
                lifecycle: LifecycleCell::default(),
                runtime: OnceLock::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.provider
    }

    pub fn service(&self) -> &AlarmService {
        &self.inner.service
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.inner.subscriptions
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle.get()
    }

    pub fn is_steady(&self) -> bool {
        self.lifecycle() == Lifecycle::Steady
    }

    pub fn stream_settings(&self) -> StreamSettings {
        *self.inner.stream_settings.read()
    }

    pub fn set_stream_settings(&self, settings: StreamSettings) {
        *self.inner.stream_settings.write() = settings;
    }

    // ------------------------------------------------------------------
    // Handle registry
    // ------------------------------------------------------------------

    /// The next handle that will be assigned
    pub fn next_handle(&self) -> Handle {
        self.inner.next_handle.load(Ordering::Acquire)
    }

    /// Raise the handle counter, used when restoring persisted state
    pub fn reserve_handles(&self, next: Handle) {
        self.inner.next_handle.fetch_max(next, Ordering::AcqRel);
    }

    /// Reuse a persisted handle or assign a fresh one
    pub(crate) fn allocate_handle(&self, requested: Option<Handle>) -> Result<Handle> {
        match requested {
            Some(handle) => {
                if handle == 0 || self.inner.nodes.contains_key(&handle) {
                    return Err(AlarmError::HandleMismatch(handle));
                }
                self.reserve_handles(handle.saturating_add(1));
                Ok(handle)
            }
            None => Ok(self.inner.next_handle.fetch_add(1, Ordering::AcqRel)),
        }
    }

    pub(crate) fn register(&self, handle: Handle, node: Node) -> Result<()> {
        match self.inner.nodes.entry(handle) {
            Entry::Occupied(_) => Err(AlarmError::HandleMismatch(handle)),
            Entry::Vacant(slot) => {
                trace!("Registered {} {} as {}", node.kind(), node.name(), handle);
                slot.insert(node);
                Ok(())
            }
        }
    }

    /// Remove a handle mapping, refusing if it maps to another object
    pub(crate) fn unregister(&self, handle: Handle, expected: &Node) -> Result<()> {
        if self.inner.nodes.remove_if(&handle, |_, node| node.same(expected)).is_some() {
            return Ok(());
        }
        if self.inner.nodes.contains_key(&handle) {
            error!("Handle {} does not map to {} {}", handle, expected.kind(), expected.name());
            return Err(AlarmError::HandleMismatch(handle));
        }
        Err(AlarmError::NotFound(format!("handle {}", handle)))
    }

    pub fn get_by_handle(&self, handle: Handle) -> Option<Node> {
        self.inner.nodes.get(&handle).map(|entry| entry.value().clone())
    }

    pub fn class(&self, handle: Handle) -> Result<Arc<AlarmClass>> {
        match self.get_by_handle(handle) {
            Some(Node::Class(class)) => Ok(class),
            _ => Err(AlarmError::NotFound(format!("alarm class {}", handle))),
        }
    }

    pub fn algorithm(&self, handle: Handle) -> Result<Arc<Algorithm>> {
        match self.get_by_handle(handle) {
            Some(Node::Algorithm(algorithm)) => Ok(algorithm),
            _ => Err(AlarmError::NotFound(format!("algorithm {}", handle))),
        }
    }

    pub fn watch(&self, handle: Handle) -> Result<Arc<Watch>> {
        match self.get_by_handle(handle) {
            Some(Node::Watch(watch)) => Ok(watch),
            _ => Err(AlarmError::NotFound(format!("watch {}", handle))),
        }
    }

    pub fn classes(&self) -> Vec<Arc<AlarmClass>> {
        self.inner
            .classes
            .read()
            .iter()
            .filter_map(|h| self.class(*h).ok())
            .collect()
    }

    pub fn class_by_name(&self, name: &str) -> Option<Arc<AlarmClass>> {
        self.classes().into_iter().find(|c| c.name() == name)
    }

    pub fn algorithms_of(&self, class: &AlarmClass) -> Vec<Arc<Algorithm>> {
        class
            .algorithms()
            .into_iter()
            .filter_map(|h| self.algorithm(h).ok())
            .collect()
    }

    pub fn watches_of(&self, algorithm: &Algorithm) -> Vec<Arc<Watch>> {
        algorithm
            .watches()
            .into_iter()
            .filter_map(|h| self.watch(h).ok())
            .collect()
    }

    /// Every watch in the tree
    pub fn all_watches(&self) -> Vec<Arc<Watch>> {
        self.inner
            .nodes
            .iter()
            .filter_map(|entry| match entry.value() {
                Node::Watch(watch) => Some(watch.clone()),
                _ => None,
            })
            .collect()
    }

    /// `class/algorithm/watch` path of a watch
    pub fn watch_path(&self, handle: Handle) -> Option<String> {
        let watch = self.watch(handle).ok()?;
        let algorithm = self.algorithm(watch.algorithm()).ok()?;
        let class = self.class(algorithm.class()).ok()?;
        Some(format!("{}/{}/{}", class.name(), algorithm.name(), watch.name()))
    }

    // ------------------------------------------------------------------
    // Tree construction
    // ------------------------------------------------------------------

    pub async fn add_class(&self, name: &str, settings: ClassSettings) -> Result<Arc<AlarmClass>> {
        self.insert_class(name, settings, None).await
    }

    pub(crate) async fn insert_class(
        &self,
        name: &str,
        settings: ClassSettings,
        handle: Option<Handle>,
    ) -> Result<Arc<AlarmClass>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AlarmError::InvalidParameter("missing class name".to_string()));
        }
        let class = {
            let mut classes = self.inner.classes.write();
            if classes
                .iter()
                .filter_map(|h| self.class(*h).ok())
                .any(|c| c.name() == name)
            {
                return Err(AlarmError::DuplicateName(name.to_string()));
            }
            let handle = self.allocate_handle(handle)?;
            let class = Arc::new(AlarmClass::new(handle, name, settings, self.now()));
            self.register(handle, Node::Class(class.clone()))?;
            classes.push(handle);
            class
        };
        info!("Created alarm class {}", name);
        self.bring_up(&Node::Class(class.clone())).await;
        Ok(class)
    }

    pub async fn add_algorithm(
        &self,
        class: Handle,
        name: &str,
        settings: AlgorithmSettings,
        condition: ConditionConfig,
    ) -> Result<Arc<Algorithm>> {
        self.insert_algorithm(class, name, settings, condition, None).await
    }

    pub(crate) async fn insert_algorithm(
        &self,
        class_handle: Handle,
        name: &str,
        settings: AlgorithmSettings,
        condition: ConditionConfig,
        handle: Option<Handle>,
    ) -> Result<Arc<Algorithm>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AlarmError::InvalidParameter("missing algorithm name".to_string()));
        }
        let class = self.class(class_handle)?;
        if !self.inner.provider.algorithm_catalog().contains(&condition.kind()) {
            return Err(AlarmError::InvalidParameter(format!(
                "{} is not offered by the {} provider",
                condition.kind(),
                self.inner.provider.name()
            )));
        }
        if self.algorithms_of(&class).iter().any(|a| a.name() == name) {
            return Err(AlarmError::DuplicateName(name.to_string()));
        }
        let handle = self.allocate_handle(handle)?;
        let algorithm = Arc::new(Algorithm::new(
            handle,
            name,
            class_handle,
            settings,
            condition.into_condition(),
        )?);
        self.register(handle, Node::Algorithm(algorithm.clone()))?;
        class.add_algorithm(handle);
        info!("Created {} {} in {}", algorithm.kind(), name, class.name());
        self.bring_up(&Node::Algorithm(algorithm.clone())).await;
        Ok(algorithm)
    }

    pub async fn add_watch(&self, algorithm: Handle, name: &str, source_path: &str) -> Result<Arc<Watch>> {
        self.insert_watch(algorithm, name, source_path, None, |_| {}).await
    }

    /// Create a watch, letting `restore` seed persisted state before it starts
    pub(crate) async fn insert_watch(
        &self,
        algorithm_handle: Handle,
        name: &str,
        source_path: &str,
        handle: Option<Handle>,
        restore: impl FnOnce(&Watch),
    ) -> Result<Arc<Watch>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AlarmError::InvalidParameter("missing watch name".to_string()));
        }
        if source_path.trim().is_empty() {
            return Err(AlarmError::InvalidParameter("missing source path".to_string()));
        }
        let algorithm = self.algorithm(algorithm_handle)?;
        if self.watches_of(&algorithm).iter().any(|w| w.name() == name) {
            return Err(AlarmError::DuplicateName(name.to_string()));
        }
        let handle = self.allocate_handle(handle)?;
        let watch = Arc::new(Watch::new(handle, name, algorithm_handle, source_path.trim(), self.now()));
        restore(&watch);
        self.register(handle, Node::Watch(watch.clone()))?;
        algorithm.add_watch(handle);
        debug!("Created watch {} on {}", name, watch.source_path());
        self.bring_up(&Node::Watch(watch.clone())).await;
        Ok(watch)
    }

    /// Move a watch to another source path, resubscribing when running
    pub fn set_watch_source_path(&self, handle: Handle, path: &str) -> Result<()> {
        let path = path.trim();
        if path.is_empty() {
            return Err(AlarmError::InvalidParameter("missing source path".to_string()));
        }
        let watch = self.watch(handle)?;
        let old = watch.source_path();
        if old == path {
            return Ok(());
        }
        let steady = watch.is_steady();
        if steady {
            self.inner.subscriptions.unsubscribe(&old, handle)?;
        }
        watch.set_source_path(path);
        if steady {
            self.subscribe_watch(&watch)?;
        }
        Ok(())
    }

    pub async fn delete_watch(&self, handle: Handle) -> Result<()> {
        let watch = self.watch(handle)?;
        self.stop_watch(&watch);
        if let Ok(algorithm) = self.algorithm(watch.algorithm()) {
            algorithm.remove_watch(handle);
        }
        info!("Deleted watch {}", watch.name());
        Ok(())
    }

    pub async fn delete_algorithm(&self, handle: Handle) -> Result<()> {
        let algorithm = self.algorithm(handle)?;
        self.stop_algorithm(&algorithm).await;
        if let Ok(class) = self.class(algorithm.class()) {
            class.remove_algorithm(handle);
        }
        info!("Deleted algorithm {}", algorithm.name());
        Ok(())
    }

    /// Delete a class and its subtree. Its records stay in the provider.
    pub async fn delete_class(&self, handle: Handle) -> Result<()> {
        let class = self.class(handle)?;
        self.stop_class(&class).await;
        self.inner.classes.write().retain(|h| *h != handle);
        info!("Deleted alarm class {}", class.name());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the provider and bring the whole tree to steady
    pub async fn start(&self) -> Result<()> {
        match self.lifecycle() {
            Lifecycle::Created => {}
            Lifecycle::Stopped => {
                return Err(AlarmError::Config("engine has been stopped".to_string()));
            }
            _ => return Ok(()),
        }
        self.inner.provider.start().await?;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let _ = self.inner.runtime.set(runtime);
        }
        self.inner.lifecycle.set(Lifecycle::Started);
        for class in self.classes() {
            class.lifecycle().set(Lifecycle::Started);
            for algorithm in self.algorithms_of(&class) {
                algorithm.lifecycle().set(Lifecycle::Started);
                for watch in self.watches_of(&algorithm) {
                    watch.lifecycle().set(Lifecycle::Started);
                }
            }
        }

        self.inner.lifecycle.set(Lifecycle::Steady);
        if let Err(e) = self.sync_watches_to_database().await {
            error!("Reconciling watches with stored records failed: {}", e);
        }
        for class in self.classes() {
            self.steady_subtree(&class).await;
        }
        self.start_service_tick().await;
        info!(
            "Alarm engine steady with {} classes on {} provider",
            self.inner.classes.read().len(),
            self.inner.provider.name()
        );
        Ok(())
    }

    /// Stop timers, tear down the tree and stop the provider. Terminal.
    pub async fn stop(&self) {
        if self.lifecycle() == Lifecycle::Stopped {
            return;
        }
        info!("Stopping alarm engine");
        self.inner.lifecycle.set(Lifecycle::Stopped);
        self.stop_service_tick().await;
        for class in self.classes() {
            self.stop_class(&class).await;
        }
        self.inner.classes.write().clear();
        self.inner.service.open_alarm_listeners().close_all();
        if let Err(e) = self.inner.provider.stop().await {
            error!("Provider {} failed to stop: {}", self.inner.provider.name(), e);
        }
    }

    /// Start a node added while the engine is running
    async fn bring_up(&self, node: &Node) {
        let state = self.lifecycle();
        if state != Lifecycle::Started && state != Lifecycle::Steady {
            return;
        }
        match node {
            Node::Class(class) => {
                class.lifecycle().set(Lifecycle::Started);
                if state == Lifecycle::Steady {
                    self.steady_subtree(class).await;
                }
            }
            Node::Algorithm(algorithm) => {
                algorithm.lifecycle().set(Lifecycle::Started);
                if state == Lifecycle::Steady {
                    self.steady_algorithm(algorithm).await;
                }
            }
            Node::Watch(watch) => {
                watch.lifecycle().set(Lifecycle::Started);
                if state == Lifecycle::Steady {
                    self.steady_watch(watch);
                }
            }
        }
    }

    async fn steady_subtree(&self, class: &Arc<AlarmClass>) {
        class.lifecycle().set(Lifecycle::Steady);
        for algorithm in self.algorithms_of(class) {
            self.steady_algorithm(&algorithm).await;
        }
    }

    async fn steady_algorithm(&self, algorithm: &Arc<Algorithm>) {
        algorithm.lifecycle().set(Lifecycle::Steady);
        algorithm.schedule_auto_update(self).await;
        for watch in self.watches_of(algorithm) {
            self.steady_watch(&watch);
        }
    }

    fn steady_watch(&self, watch: &Arc<Watch>) {
        watch.lifecycle().set(Lifecycle::Steady);
        if let Err(e) = self.subscribe_watch(watch) {
            error!("Watch {} cannot subscribe to {}: {}", watch.name(), watch.source_path(), e);
        }
    }

    fn subscribe_watch(&self, watch: &Watch) -> Result<()> {
        let weak = self.downgrade();
        self.inner
            .subscriptions
            .subscribe(&watch.source_path(), watch.handle(), move || -> ValueCallback {
                Arc::new(move |path: &str, value: Value| {
                    if let Some(engine) = weak.upgrade() {
                        engine.deliver(path, value);
                    }
                })
            })
    }

    async fn stop_class(&self, class: &Arc<AlarmClass>) {
        let algorithms = self.algorithms_of(class);
        join_all(algorithms.iter().map(|algorithm| self.stop_algorithm(algorithm))).await;
        class.close_listeners();
        class.lifecycle().set(Lifecycle::Stopped);
        if let Err(e) = self.unregister(class.handle(), &Node::Class(class.clone())) {
            warn!("Unregistering class {}: {}", class.name(), e);
        }
    }

    async fn stop_algorithm(&self, algorithm: &Arc<Algorithm>) {
        algorithm.cancel_auto_update().await;
        for watch in self.watches_of(algorithm) {
            self.stop_watch(&watch);
        }
        algorithm.lifecycle().set(Lifecycle::Stopped);
        if let Err(e) = self.unregister(algorithm.handle(), &Node::Algorithm(algorithm.clone())) {
            warn!("Unregistering algorithm {}: {}", algorithm.name(), e);
        }
    }

    fn stop_watch(&self, watch: &Arc<Watch>) {
        if watch.is_steady() {
            if let Err(e) = self.inner.subscriptions.unsubscribe(&watch.source_path(), watch.handle()) {
                warn!("Watch {} unsubscribe failed: {}", watch.name(), e);
            }
        }
        watch.lifecycle().set(Lifecycle::Stopped);
        if let Err(e) = self.unregister(watch.handle(), &Node::Watch(watch.clone())) {
            warn!("Unregistering watch {}: {}", watch.name(), e);
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Deliver a source value to every watch subscribed to `path`
    pub fn deliver(&self, path: &str, value: Value) {
        let now = self.now();
        for handle in self.inner.subscriptions.subscribers(path) {
            match self.watch(handle) {
                Ok(watch) => {
                    watch.receive(value.clone(), now);
                    self.request_evaluation(&watch);
                }
                Err(_) => trace!("Dropping value for removed watch {}", handle),
            }
        }
    }

    /// Queue an evaluation of one watch unless one is already pending.
    ///
    /// The pending flag is cleared when the evaluation starts, so a value
    /// that arrives while it is queued is picked up by it.
    pub fn request_evaluation(&self, watch: &Arc<Watch>) {
        if !watch.is_steady() {
            return;
        }
        if !watch.try_mark_pending() {
            trace!("Evaluation of {} already pending", watch.name());
            return;
        }
        let engine = self.clone();
        let target = watch.clone();
        let evaluation = async move {
            target.clear_pending();
            match engine.algorithm(target.algorithm()) {
                Ok(algorithm) => {
                    if let Err(e) = algorithm.update(&engine, &target).await {
                        error!("Evaluating watch {} failed: {}", target.name(), e);
                    }
                }
                Err(e) => warn!("Watch {} has no algorithm: {}", target.name(), e),
            }
        };
        if !self.spawn(evaluation) {
            watch.clear_pending();
            warn!("No runtime to evaluate watch {}", watch.name());
        }
    }

    /// Spawn on the engine's runtime, or the current one
    pub(crate) fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = self
            .inner
            .runtime
            .get()
            .cloned()
            .or_else(|| tokio::runtime::Handle::try_current().ok());
        match runtime {
            Some(runtime) => {
                runtime.spawn(future);
                true
            }
            None => false,
        }
    }

    /// Evaluate every watch of an algorithm now
    pub async fn update_all(&self, algorithm: Handle) -> Result<()> {
        let algorithm = self.algorithm(algorithm)?;
        algorithm.update_all(self).await;
        Ok(())
    }
}

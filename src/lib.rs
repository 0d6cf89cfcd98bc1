//! PETRA Alarms - alarm detection, escalation and record management
//!
//! The engine watches host data points, evaluates them with one of the
//! catalog algorithms and keeps a durable history of alarm records with
//! acknowledgement, notes, escalation and purge.
//!
//! # Tree
//!
//! - **AlarmClass**: escalation tiers, purge ages and listener sets
//! - **Algorithm**: a condition plus severity, inhibits and auto-update
//! - **Watch**: one subscribed data point with its alarm state
//!
//! # Examples
//!
//! ```rust
//! use petra_alarms::{AlgorithmSettings, ClassSettings, ConditionConfig, Engine, MemoryProvider, SignalBus, Value};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let bus = SignalBus::new();
//! let engine = Engine::new(Arc::new(MemoryProvider::new()), Arc::new(bus.clone()));
//! let class = engine.add_class("Plant", ClassSettings::default()).await?;
//! let doors = engine
//!     .add_algorithm(class.handle(), "Doors", AlgorithmSettings::default(), ConditionConfig::default())
//!     .await?;
//! engine.add_watch(doors.handle(), "Front", "/doors/front").await?;
//! engine.start().await?;
//!
//! bus.set("/doors/front", Value::Bool(true));
//! engine.stop().await;
//! # Ok::<(), petra_alarms::AlarmError>(())
//! # });
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error taxonomy and the operation wrapper
pub mod error;

/// Data point values delivered by the host
pub mod value;

/// Alarm records, notes and query filters
pub mod record;

/// Record storage backends
pub mod provider;

// ============================================================================
// ALARM TREE
// ============================================================================

pub mod watch;

/// Alarm conditions and the algorithm node
pub mod algorithm;

pub mod class;

/// Service tick, record creation and reconciliation
pub mod service;

/// Arena, handle registry and lifecycle
pub mod engine;

// ============================================================================
// DISTRIBUTION AND HOST SURFACE
// ============================================================================

pub mod streamer;
pub mod listeners;
pub mod subscriptions;

/// In-process host data source
pub mod signal;

/// Operations the host invokes by name
pub mod actions;

/// YAML configuration and tree snapshots
pub mod config;

pub mod logging;

mod timer;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use error::{AlarmError, OperationExt, Result};
pub use value::Value;
pub use signal::SignalBus;
pub use engine::{Clock, Engine, Handle, Lifecycle, ManualClock, Node, SystemClock, WeakEngine};
pub use config::{build_provider, Config};
pub use record::{AlarmRecord, AlarmRow, AlarmState, Note, SortColumn};
pub use provider::{AlarmQuery, MemoryProvider, Provider};
#[cfg(feature = "sql-storage")]
pub use provider::SqlProvider;
pub use algorithm::{Algorithm, AlgorithmKind, AlgorithmSettings, ConditionConfig};
pub use class::{AlarmClass, ClassSettings, EscalationBasis, EscalationTier};
pub use service::{AlarmCounts, AlarmService};
pub use streamer::{AlarmStream, StreamEvent, StreamSettings};
pub use subscriptions::{DataSource, ValueCallback};
pub use watch::Watch;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

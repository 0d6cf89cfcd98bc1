// src/config.rs - Persisted alarm tree configuration
use crate::algorithm::{AlgorithmSettings, ConditionConfig};
use crate::class::ClassSettings;
use crate::engine::{Engine, Handle};
use crate::error::{AlarmError, Result};
use crate::logging::LogLevel;
use crate::provider::{MemoryProvider, Provider};
use crate::record::AlarmState;
use crate::streamer::StreamSettings;
use crate::subscriptions::DataSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Root of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    /// Where alarm records are stored
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Streamer tuning
    #[serde(default)]
    pub streams: StreamSettings,

    /// Alarm classes with their algorithms and watches
    #[serde(default)]
    pub classes: Vec<ClassConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        info!("Loaded alarm configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Check names, severities and handles across the whole tree
    pub fn validate(&self) -> Result<()> {
        let mut class_names = HashSet::new();
        let mut handles = HashSet::new();
        let mut claim = |handle: Option<Handle>, what: &str| -> Result<()> {
            match handle {
                Some(0) => Err(AlarmError::Config(format!("{} has handle 0", what))),
                Some(h) if !handles.insert(h) => {
                    Err(AlarmError::Config(format!("handle {} is used twice ({})", h, what)))
                }
                _ => Ok(()),
            }
        };

        for class in &self.classes {
            if class.name.trim().is_empty() {
                return Err(AlarmError::Config("alarm class without a name".to_string()));
            }
            if !class_names.insert(class.name.as_str()) {
                return Err(AlarmError::Config(format!("duplicate alarm class '{}'", class.name)));
            }
            claim(class.handle, &class.name)?;

            let mut algorithm_names = HashSet::new();
            for algorithm in &class.algorithms {
                if !algorithm_names.insert(algorithm.name.as_str()) {
                    return Err(AlarmError::Config(format!(
                        "duplicate algorithm '{}' in class '{}'",
                        algorithm.name, class.name
                    )));
                }
                if algorithm.severity == AlarmState::Normal {
                    return Err(AlarmError::Config(format!(
                        "algorithm '{}' cannot raise Normal alarms",
                        algorithm.name
                    )));
                }
                claim(algorithm.handle, &algorithm.name)?;

                let mut watch_names = HashSet::new();
                for watch in &algorithm.watches {
                    if !watch_names.insert(watch.name.as_str()) {
                        return Err(AlarmError::Config(format!(
                            "duplicate watch '{}' in algorithm '{}'",
                            watch.name, algorithm.name
                        )));
                    }
                    if watch.source_path.trim().is_empty() {
                        return Err(AlarmError::Config(format!("watch '{}' has no source path", watch.name)));
                    }
                    claim(watch.handle, &watch.name)?;
                }
            }
        }
        Ok(())
    }

    /// Highest handle persisted anywhere in the tree
    fn max_handle(&self) -> Handle {
        self.classes
            .iter()
            .flat_map(|c| {
                std::iter::once(c.handle).chain(c.algorithms.iter().flat_map(|a| {
                    std::iter::once(a.handle).chain(a.watches.iter().map(|w| w.handle))
                }))
            })
            .flatten()
            .max()
            .unwrap_or(0)
    }
}

// ============================================================================
// SERVICE, PROVIDER AND LOGGING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Disabled services keep evaluating but never change alarm state
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Next handle to assign, persisted so handles are never reused
    #[serde(default = "default_next_handle")]
    pub next_handle: Handle,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            next_handle: default_next_handle(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Memory,
    Sql {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Memory
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

/// Open the configured record store
pub async fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Memory => Ok(Arc::new(MemoryProvider::new())),
        #[cfg(feature = "sql-storage")]
        ProviderConfig::Sql { url, max_connections } => {
            let provider = crate::provider::SqlProvider::connect(url, *max_connections).await?;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "sql-storage"))]
        ProviderConfig::Sql { .. } => Err(AlarmError::Config(
            "sql provider requires the sql-storage feature".to_string(),
        )),
    }
}

// ============================================================================
// ALARM TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,

    #[serde(flatten)]
    pub settings: ClassSettings,

    #[serde(default)]
    pub algorithms: Vec<AlgorithmConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,

    /// Catalog type name and its parameters
    #[serde(flatten)]
    pub condition: ConditionConfig,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_severity")]
    pub severity: AlarmState,

    /// Seconds between automatic re-evaluations, 0 disables them
    #[serde(default)]
    pub auto_update_secs: u64,

    #[serde(default)]
    pub to_alarm_inhibit_secs: u64,

    #[serde(default)]
    pub to_normal_inhibit_secs: u64,

    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

impl AlgorithmConfig {
    pub fn settings(&self) -> AlgorithmSettings {
        AlgorithmSettings {
            enabled: self.enabled,
            severity: self.severity,
            auto_update_secs: self.auto_update_secs,
            to_alarm_inhibit_secs: self.to_alarm_inhibit_secs,
            to_normal_inhibit_secs: self.to_normal_inhibit_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<Handle>,

    /// Host path the watch subscribes to
    pub source_path: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Alarm state at the time the configuration was saved
    #[serde(default)]
    pub alarm_state: AlarmState,

    /// Record linked to the watch at the time the configuration was saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_alarm: Option<Uuid>,
}

impl WatchConfig {
    pub fn new(name: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: None,
            source_path: source_path.into(),
            enabled: true,
            alarm_state: AlarmState::Normal,
            last_alarm: None,
        }
    }
}

// ============================================================================
// ENGINE CONSTRUCTION AND SNAPSHOTS
// ============================================================================

impl Engine {
    /// Build an engine and its tree from configuration. The engine is not started.
    pub async fn from_config(
        config: &Config,
        provider: Arc<dyn Provider>,
        source: Arc<dyn DataSource>,
    ) -> Result<Engine> {
        config.validate()?;
        let engine = Engine::new(provider, source);
        engine.apply_config(config).await?;
        Ok(engine)
    }

    /// Add the configured tree to this engine
    pub async fn apply_config(&self, config: &Config) -> Result<()> {
        // Persisted handles win; fresh ones start above all of them
        self.reserve_handles(config.service.next_handle.max(config.max_handle().saturating_add(1)));
        self.service().set_enabled(config.service.enabled);
        self.set_stream_settings(config.streams);

        let now = self.now();
        for class_config in &config.classes {
            let class = self
                .insert_class(&class_config.name, class_config.settings.clone(), class_config.handle)
                .await?;
            for algorithm_config in &class_config.algorithms {
                let algorithm = self
                    .insert_algorithm(
                        class.handle(),
                        &algorithm_config.name,
                        algorithm_config.settings(),
                        algorithm_config.condition.clone(),
                        algorithm_config.handle,
                    )
                    .await?;
                for watch_config in &algorithm_config.watches {
                    self.insert_watch(
                        algorithm.handle(),
                        &watch_config.name,
                        &watch_config.source_path,
                        watch_config.handle,
                        |watch| {
                            watch.set_enabled(watch_config.enabled);
                            watch.set_alarm_state(watch_config.alarm_state, now);
                            watch.set_last_alarm(watch_config.last_alarm);
                        },
                    )
                    .await?;
                }
            }
        }
        if self.next_handle() < config.service.next_handle {
            warn!("Handle counter behind configuration, raising to {}", config.service.next_handle);
            self.reserve_handles(config.service.next_handle);
        }
        info!("Applied configuration with {} alarm classes", config.classes.len());
        Ok(())
    }

    /// Export the live tree, handles and watch state included
    pub fn snapshot_config(&self) -> Config {
        let classes = self
            .classes()
            .iter()
            .map(|class| ClassConfig {
                name: class.name().to_string(),
                handle: Some(class.handle()),
                settings: class.settings(),
                algorithms: self
                    .algorithms_of(class)
                    .iter()
                    .map(|algorithm| {
                        let settings = algorithm.settings();
                        AlgorithmConfig {
                            name: algorithm.name().to_string(),
                            handle: Some(algorithm.handle()),
                            condition: algorithm.condition_config(),
                            enabled: settings.enabled,
                            severity: settings.severity,
                            auto_update_secs: settings.auto_update_secs,
                            to_alarm_inhibit_secs: settings.to_alarm_inhibit_secs,
                            to_normal_inhibit_secs: settings.to_normal_inhibit_secs,
                            watches: self
                                .watches_of(algorithm)
                                .iter()
                                .map(|watch| WatchConfig {
                                    name: watch.name().to_string(),
                                    handle: Some(watch.handle()),
                                    source_path: watch.source_path(),
                                    enabled: watch.is_enabled(),
                                    alarm_state: watch.alarm_state(),
                                    last_alarm: watch.last_alarm(),
                                })
                                .collect(),
                        }
                    })
                    .collect(),
            })
            .collect();

        Config {
            service: ServiceConfig {
                enabled: self.service().is_enabled(),
                next_handle: self.next_handle(),
            },
            provider: ProviderConfig::default(),
            logging: LoggingConfig {
                level: crate::logging::current_level(),
            },
            streams: self.stream_settings(),
            classes,
        }
    }
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_true() -> bool { true }
fn default_next_handle() -> Handle { 1 }
fn default_max_connections() -> u32 { 5 }
fn default_severity() -> AlarmState { AlarmState::Alert }

// src/logging.rs - Subscriber setup and runtime log level changes
use crate::error::{AlarmError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();
static CURRENT: Mutex<LogLevel> = parking_lot::const_mutex(LogLevel::Info);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        LogLevel::ALL
            .iter()
            .copied()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AlarmError::InvalidParameter(format!("unknown log level '{}'", s)))
    }
}

/// Install the global fmt subscriber. `RUST_LOG` overrides `level`.
pub fn init(level: LogLevel) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| AlarmError::Config(format!("logging already initialized: {}", e)))?;
    let _ = FILTER.set(handle);
    *CURRENT.lock() = level;
    Ok(())
}

/// Change the level of the running subscriber.
///
/// Without an installed subscriber the level is only recorded.
pub fn set_log_level(level: &str) -> Result<LogLevel> {
    let level: LogLevel = level.parse()?;
    if let Some(handle) = FILTER.get() {
        handle
            .reload(EnvFilter::new(level.as_str()))
            .map_err(|e| AlarmError::Config(format!("cannot change log level: {}", e)))?;
    }
    *CURRENT.lock() = level;
    info!("Log level set to {}", level);
    Ok(level)
}

pub fn current_level() -> LogLevel {
    *CURRENT.lock()
}

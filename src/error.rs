// src/error.rs - Error taxonomy for the alarm engine
use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum AlarmError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while rendering JSON rows
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error while parsing a CSV list parameter
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Record store failure
    #[cfg(feature = "sql-storage")]
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Record, handle or named node does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or malformed action parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A sibling with the same name already exists
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A record with the same id is already stored
    #[error("Duplicate record: {0}")]
    DuplicateRecord(uuid::Uuid),

    /// The engine has not finished starting
    #[error("Alarm service is not steady")]
    NotSteady,

    /// The handle registry maps a handle to a different object
    #[error("Invalid handle: {0}")]
    HandleMismatch(u32),

    /// Operation requires an enabled node
    #[error("Disabled: {0}")]
    Disabled(String),

    /// Uniform failure signal for host-invoked operations
    #[error("{operation} failed: {source}")]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: Box<AlarmError>,
    },
}

impl AlarmError {
    /// Wrap an error as the failure of a named operation.
    ///
    /// Already wrapped errors are passed through so the cause is never nested twice.
    pub fn operation(operation: &'static str, source: AlarmError) -> Self {
        match source {
            AlarmError::OperationFailed { .. } => source,
            other => AlarmError::OperationFailed {
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The underlying cause with operation wrappers removed
    pub fn root(&self) -> &AlarmError {
        match self {
            AlarmError::OperationFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), AlarmError::NotFound(_))
    }
}

/// Convenient alias over [`Result`] using [`AlarmError`]
pub type Result<T> = std::result::Result<T, AlarmError>;

/// Attach an operation name to a fallible result
pub trait OperationExt<T> {
    fn operation(self, name: &'static str) -> Result<T>;
}

impl<T> OperationExt<T> for Result<T> {
    fn operation(self, name: &'static str) -> Result<T> {
        self.map_err(|e| AlarmError::operation(name, e))
    }
}

use thiserror::Error;

/// Main error type for the continuous-training pipeline
#[derive(Error, Debug)]
pub enum RecastError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Change detection / version resolution errors
    #[error("Version resolution failed: {0}")]
    VersionResolution(String),

    #[error("Data state is locked by another invocation: {0}")]
    StateLocked(String),

    // Dataset errors
    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    // Registry errors
    #[error("Run registry unavailable: {0}")]
    Registry(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    // Training errors
    #[error("Metric computation error: {0}")]
    MetricComputation(String),

    #[error("Unknown model type: {0}")]
    UnknownModelType(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RecastError
pub type Result<T> = std::result::Result<T, RecastError>;

impl RecastError {
    /// Whether the error aborts the whole update cycle rather than a single
    /// version. Cycle-fatal errors must prevent the data-state commit.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            RecastError::Config(_)
                | RecastError::InvalidConfig(_)
                | RecastError::VersionResolution(_)
                | RecastError::StateLocked(_)
                | RecastError::Registry(_)
                | RecastError::Cancelled
        )
    }
}

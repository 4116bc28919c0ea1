//! Error types for the orchestration engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the orchestration engine
///
/// Validation and NotFound surface immediately to the caller and are never
/// retried. ExternalProcess and Cancelled terminate the affected build and
/// propagate only as a status change. TransientInfra is the one class the
/// queue layer retries automatically.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Required deploy fields missing; rejected before any state change
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced container or build does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Nonzero exit from a runtime adapter call
    #[error("`{command}` exited with code {exit_code}: {stderr}")]
    ExternalProcess {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Explicit stop observed at a stage boundary
    #[error("build cancelled: {0}")]
    Cancelled(Uuid),

    /// Queue-runner level failure, eligible for automatic retry
    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),

    /// Persistence collaborator failure (treated as transient by the queue)
    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Whether the queue layer may retry the job that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::TransientInfra(_) | EngineError::Store(_) | EngineError::Io(_)
        )
    }
}

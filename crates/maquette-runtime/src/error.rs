//! Runtime error types

use maquette_engine::SimError;
use maquette_scenario::ScenarioError;
use maquette_types::RunStatus;
use thiserror::Error;

/// Errors raised by the run executor and store.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("run {0:?} not found")]
    RunNotFound(String),

    #[error("run {id:?} is already {status}")]
    RunTerminal { id: String, status: RunStatus },

    #[error("run id missing")]
    RunIdMissing,

    #[error("invalid run id {0:?}: must be non-empty and contain no ':' or '/'")]
    InvalidRunId(String),

    #[error("run {0:?} already exists")]
    RunExists(String),

    #[error("run {0:?} is still active; stop it before deleting")]
    RunActive(String),

    #[error("metrics not available for run {0:?}")]
    MetricsNotAvailable(String),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Engine(#[from] SimError),
}

/// Convenience alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;

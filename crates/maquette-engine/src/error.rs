//! Simulation error types

use maquette_types::RequestId;
use thiserror::Error;

/// Errors raised by the simulation core.
///
/// Construction-time errors (`ResourceInit`) fail the run synchronously.
/// Execution-time errors surfaced from handlers fail the affected request
/// and increment the error counter, but never stop the run; the engine
/// logs them and continues.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("run cancelled")]
    Cancelled,

    #[error("virtual clock may only be advanced by the engine loop")]
    ClockMisuse,

    #[error("resource initialization failed: {0}")]
    ResourceInit(String),

    #[error("no instance available for service {service:?}")]
    NoInstanceAvailable { service: String },

    #[error("capacity exceeded on {scope}: {detail}")]
    CapacityExceeded { scope: String, detail: String },

    #[error("allocation failed on instance {instance:?}: {reason}")]
    AllocationFailed { instance: String, reason: String },

    #[error("{policy} denied request to {service}:{endpoint}")]
    PolicyDenied {
        service: String,
        endpoint: String,
        policy: &'static str,
    },

    #[error("unknown service {0:?}")]
    UnknownService(String),

    #[error("unknown endpoint {service}:{path}")]
    UnknownEndpoint { service: String, path: String },

    #[error("unknown request {0}")]
    UnknownRequest(RequestId),

    #[error("unknown instance {0:?}")]
    UnknownInstance(String),

    #[error("workload pattern {0:?} not found")]
    WorkloadPatternNotFound(String),

    #[error("invalid rate {0}: rates must be positive")]
    InvalidRate(f64),

    #[error("invalid workload pattern: {0}")]
    InvalidPattern(String),

    #[error("handler error: {0}")]
    Handler(String),
}

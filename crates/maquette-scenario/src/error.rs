//! Scenario error types

use thiserror::Error;

/// Errors raised while parsing or validating a scenario document.
///
/// All of these are construction-time failures: a run that hits one is
/// failed synchronously before the engine loop is entered.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to parse scenario YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed downstream target {target:?}: {reason}")]
    MalformedTarget { target: String, reason: String },

    #[error("downstream target {target:?} references unknown service {service:?}")]
    UnknownDownstreamTarget { target: String, service: String },

    #[error("service dependency cycle detected at {endpoint:?}")]
    CycleDetected { endpoint: String },

    #[error("scenario declares no hosts")]
    NoHosts,

    #[error("invalid scenario: {0}")]
    Invalid(String),
}

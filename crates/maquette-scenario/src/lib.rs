//! # maquette-scenario: Scenario documents for `Maquette`
//!
//! A scenario is the YAML description of the deployment to simulate:
//! hosts, services and their endpoints, downstream call edges, workload
//! patterns, and optional policy settings.
//!
//! This crate owns the document schema, parsing, and structural
//! validation. Graph-level validation (unknown downstream services,
//! dependency cycles) happens when the engine builds its service graph.

mod builder;
mod error;
pub mod presets;
mod spec;
mod target;

pub use builder::{EndpointBuilder, ScenarioBuilder, ServiceBuilder};
pub use error::ScenarioError;
pub use spec::{
    ArrivalKind, ArrivalSpec, AutoscalingSpec, CircuitBreakerSpec, DownstreamSpec, EndpointSpec,
    HostSpec, NetLatencySpec, PoliciesSpec, RateLimitSpec, RetrySpec, Scenario, ServiceSpec,
    WorkloadSpec,
};
pub use target::{endpoint_key, parse_downstream_target};

//! Programmatic scenario construction.
//!
//! Most scenarios arrive as YAML, but tests and tooling often want to
//! build one in code. The builder produces the same validated
//! [`Scenario`] the YAML path does.

use crate::{
    ArrivalSpec, DownstreamSpec, EndpointSpec, HostSpec, NetLatencySpec, PoliciesSpec, Scenario,
    ScenarioError, ServiceSpec, WorkloadSpec,
};

/// Fluent builder for [`Scenario`] values.
///
/// ```
/// use maquette_scenario::{ArrivalSpec, ScenarioBuilder};
///
/// let scenario = ScenarioBuilder::new()
///     .host("h1", 4, 8.0)
///     .service("frontend", 2, |svc| {
///         svc.endpoint("/checkout", 10.0, 2.0, |ep| {
///             ep.net_latency(1.0, 0.2).downstream("payments:/charge", 1.5)
///         })
///     })
///     .service("payments", 1, |svc| {
///         svc.endpoint("/charge", 5.0, 0.0, |ep| ep)
///     })
///     .workload("client", "frontend:/checkout", ArrivalSpec::poisson(50.0))
///     .build()
///     .unwrap();
///
/// assert_eq!(scenario.services.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    /// Starts an empty scenario.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host.
    pub fn host(mut self, id: &str, cpu_cores: u32, memory_gb: f64) -> Self {
        self.scenario.hosts.push(HostSpec {
            id: id.to_string(),
            cpu_cores,
            memory_gb,
        });
        self
    }

    /// Adds a service with the given replica count; endpoints are added
    /// through the closure.
    pub fn service<F>(mut self, id: &str, replicas: u32, configure: F) -> Self
    where
        F: FnOnce(ServiceBuilder) -> ServiceBuilder,
    {
        let builder = configure(ServiceBuilder {
            spec: ServiceSpec {
                id: id.to_string(),
                replicas,
                endpoints: Vec::new(),
            },
        });
        self.scenario.services.push(builder.spec);
        self
    }

    /// Adds a workload pattern.
    pub fn workload(mut self, from: &str, to: &str, arrival: ArrivalSpec) -> Self {
        self.scenario.workload.push(WorkloadSpec {
            from: from.to_string(),
            to: to.to_string(),
            arrival,
        });
        self
    }

    /// Sets the policy section.
    pub fn policies(mut self, policies: PoliciesSpec) -> Self {
        self.scenario.policies = policies;
        self
    }

    /// Validates and returns the scenario.
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        self.scenario.validate()?;
        Ok(self.scenario)
    }
}

/// Builder for one service's endpoints.
#[derive(Debug)]
pub struct ServiceBuilder {
    spec: ServiceSpec,
}

impl ServiceBuilder {
    /// Adds an endpoint with mean/sigma CPU service time; further
    /// settings through the closure.
    pub fn endpoint<F>(mut self, path: &str, mean_cpu_ms: f64, cpu_sigma_ms: f64, configure: F) -> Self
    where
        F: FnOnce(EndpointBuilder) -> EndpointBuilder,
    {
        let builder = configure(EndpointBuilder {
            spec: EndpointSpec {
                path: path.to_string(),
                mean_cpu_ms,
                cpu_sigma_ms,
                net_latency_ms: NetLatencySpec::default(),
                default_memory_mb: None,
                downstream: Vec::new(),
            },
        });
        self.spec.endpoints.push(builder.spec);
        self
    }
}

/// Builder for one endpoint.
#[derive(Debug)]
pub struct EndpointBuilder {
    spec: EndpointSpec,
}

impl EndpointBuilder {
    /// Sets the network latency distribution.
    pub fn net_latency(mut self, mean: f64, sigma: f64) -> Self {
        self.spec.net_latency_ms = NetLatencySpec { mean, sigma };
        self
    }

    /// Sets the per-request memory charge.
    pub fn memory_mb(mut self, memory_mb: f64) -> Self {
        self.spec.default_memory_mb = Some(memory_mb);
        self
    }

    /// Adds a downstream call edge.
    pub fn downstream(mut self, to: &str, call_count_mean: f64) -> Self {
        self.spec.downstream.push(DownstreamSpec {
            to: to.to_string(),
            call_count_mean: Some(call_count_mean),
        });
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

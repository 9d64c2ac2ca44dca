//! Scenario document schema.
//!
//! A scenario describes the deployment to simulate: hosts, services with
//! their endpoints and downstream edges, workload patterns, and optional
//! policy settings. Scenarios arrive as YAML strings; the schema below is
//! the serde model they deserialize into.

use serde::{Deserialize, Serialize};

use crate::{ScenarioError, parse_downstream_target};

/// A parsed scenario document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    /// Host machines available for placement.
    #[serde(default)]
    pub hosts: Vec<HostSpec>,

    /// Services to deploy.
    #[serde(default)]
    pub services: Vec<ServiceSpec>,

    /// Workload patterns injecting root arrivals.
    #[serde(default)]
    pub workload: Vec<WorkloadSpec>,

    /// Optional policy settings.
    #[serde(default)]
    pub policies: PoliciesSpec,
}

impl Scenario {
    /// Parses and validates a scenario from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Validates structural constraints that serde cannot express.
    ///
    /// Graph-level validation (unknown downstream services, cycles) is the
    /// service graph's responsibility; this pass checks the document shape.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.hosts.is_empty() {
            return Err(ScenarioError::NoHosts);
        }

        for host in &self.hosts {
            if host.id.is_empty() {
                return Err(ScenarioError::Invalid("host with empty id".to_string()));
            }
            if host.cpu_cores == 0 {
                return Err(ScenarioError::Invalid(format!(
                    "host {:?} has zero cpu_cores",
                    host.id
                )));
            }
            if host.memory_gb <= 0.0 {
                return Err(ScenarioError::Invalid(format!(
                    "host {:?} has non-positive memory_gb",
                    host.id
                )));
            }
        }

        let mut seen_services = std::collections::HashSet::new();
        for service in &self.services {
            if service.id.is_empty() {
                return Err(ScenarioError::Invalid("service with empty id".to_string()));
            }
            if !seen_services.insert(service.id.as_str()) {
                return Err(ScenarioError::Invalid(format!(
                    "duplicate service id {:?}",
                    service.id
                )));
            }
            for endpoint in &service.endpoints {
                if endpoint.path.is_empty() {
                    return Err(ScenarioError::Invalid(format!(
                        "service {:?} has an endpoint with empty path",
                        service.id
                    )));
                }
                for downstream in &endpoint.downstream {
                    // Shape check only; existence is checked at graph build.
                    parse_downstream_target(&downstream.to)?;
                }
            }
        }

        for pattern in &self.workload {
            parse_downstream_target(&pattern.to)?;
        }

        Ok(())
    }

    /// Looks up a service by id.
    pub fn service(&self, id: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.id == id)
    }
}

/// A host machine in the simulated fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    /// Host id, unique within the scenario.
    pub id: String,

    /// Number of CPU cores.
    pub cpu_cores: u32,

    /// Memory capacity in gigabytes.
    pub memory_gb: f64,
}

/// A service to deploy, with one instance per replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service id, unique within the scenario.
    pub id: String,

    /// Number of instances to place. Defaults to 1.
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Endpoints exposed by the service.
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

fn default_replicas() -> u32 {
    1
}

/// An endpoint on a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Endpoint path, e.g. `/checkout`.
    pub path: String,

    /// Mean CPU service time in milliseconds.
    #[serde(default)]
    pub mean_cpu_ms: f64,

    /// Standard deviation of CPU service time in milliseconds.
    #[serde(default)]
    pub cpu_sigma_ms: f64,

    /// Network latency distribution.
    #[serde(default)]
    pub net_latency_ms: NetLatencySpec,

    /// Memory charged per in-flight request, in megabytes.
    pub default_memory_mb: Option<f64>,

    /// Downstream calls made on completion.
    #[serde(default)]
    pub downstream: Vec<DownstreamSpec>,
}

/// Mean/sigma pair for an endpoint's network latency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetLatencySpec {
    /// Mean network latency in milliseconds.
    #[serde(default)]
    pub mean: f64,

    /// Standard deviation in milliseconds.
    #[serde(default)]
    pub sigma: f64,
}

/// A downstream edge from one endpoint to another service's endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamSpec {
    /// Target as `"svc:path"`, or bare `"svc"` for the root path.
    pub to: String,

    /// Mean number of calls emitted per completion. Fractional values are
    /// resolved by stochastic rounding; missing or non-positive means 1.
    pub call_count_mean: Option<f64>,
}

/// A workload pattern generating root arrivals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Logical traffic source, e.g. `"client"`. Used only for keying.
    pub from: String,

    /// Target as `"svc:path"`.
    pub to: String,

    /// Arrival process specification.
    pub arrival: ArrivalSpec,
}

impl WorkloadSpec {
    /// The pattern key `"{from}:{to}"` used for live reconfiguration.
    pub fn key(&self) -> String {
        format!("{}:{}", self.from, self.to)
    }
}

/// Arrival process of a workload pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalSpec {
    /// Distribution of inter-arrival times.
    #[serde(rename = "type", default)]
    pub kind: ArrivalKind,

    /// Mean arrival rate in requests per second.
    pub rate_rps: f64,

    /// Standard deviation of the rate, for normal arrivals. Defaults to
    /// one tenth of the mean inter-arrival time when absent.
    pub std_dev_rps: Option<f64>,

    /// Elevated rate during burst phases, for bursty arrivals.
    pub burst_rate_rps: Option<f64>,

    /// Length of each burst phase in seconds.
    pub burst_duration_seconds: Option<f64>,

    /// Length of each quiet phase in seconds.
    pub quiet_duration_seconds: Option<f64>,
}

impl ArrivalSpec {
    /// Creates a Poisson arrival spec at the given rate.
    pub fn poisson(rate_rps: f64) -> Self {
        Self {
            kind: ArrivalKind::Poisson,
            rate_rps,
            std_dev_rps: None,
            burst_rate_rps: None,
            burst_duration_seconds: None,
            quiet_duration_seconds: None,
        }
    }

    /// Creates a constant-rate arrival spec.
    pub fn constant(rate_rps: f64) -> Self {
        Self {
            kind: ArrivalKind::Constant,
            ..Self::poisson(rate_rps)
        }
    }
}

/// Supported inter-arrival distributions.
///
/// Unrecognized type strings deserialize to [`ArrivalKind::Unknown`] and
/// sample as Poisson, so a newer scenario file degrades instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalKind {
    /// Exponential inter-arrivals (Poisson process).
    #[default]
    Poisson,
    /// Alias of `poisson`.
    Exponential,
    /// Deterministic inter-arrivals at `1 / rate_rps`.
    Uniform,
    /// Alias of `uniform`.
    Constant,
    /// Normally distributed inter-arrivals.
    Normal,
    /// Alias of `normal`.
    Gaussian,
    /// Alternating burst/quiet phases.
    Bursty,
    /// Unrecognized type; treated as Poisson.
    #[serde(other)]
    Unknown,
}

/// Optional policy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesSpec {
    /// Autoscaling settings, if enabled.
    pub autoscaling: Option<AutoscalingSpec>,

    /// Retry settings, if enabled.
    pub retries: Option<RetrySpec>,

    /// Per-endpoint admission rate limit, if enabled.
    pub rate_limit: Option<RateLimitSpec>,

    /// Circuit breaker settings, if enabled.
    pub circuit_breaker: Option<CircuitBreakerSpec>,
}

/// Autoscaling policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingSpec {
    /// Whether autoscaling decisions are consulted.
    #[serde(default)]
    pub enabled: bool,

    /// Lower replica bound.
    #[serde(default = "default_replicas_u32")]
    pub min_replicas: u32,

    /// Upper replica bound.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,

    /// CPU utilization that triggers a scale-up.
    #[serde(default = "default_scale_up_threshold")]
    pub cpu_threshold: f64,
}

fn default_replicas_u32() -> u32 {
    1
}

fn default_max_replicas() -> u32 {
    10
}

fn default_scale_up_threshold() -> f64 {
    0.8
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpec {
    /// Maximum attempts per request, including the first.
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds.
    #[serde(default)]
    pub backoff_ms: f64,
}

/// Admission rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Maximum admitted requests per second per endpoint.
    pub rps_limit: f64,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSpec {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,

    /// Sim-time cool-down before the breaker closes again, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: f64,
}

fn default_cooldown_ms() -> f64 {
    1_000.0
}

// ============================================================================
// Tests
// ============================================================================

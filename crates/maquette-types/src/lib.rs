//! # maquette-types: Core types for `Maquette`
//!
//! This crate contains shared types used across the `Maquette` simulator:
//! - Simulation time ([`SimTime`] plus ms/ns conversion helpers)
//! - Entity IDs ([`RequestId`], [`TraceId`], [`RunId`], [`EventId`],
//!   [`InstanceId`], [`HostId`])
//! - Request lifecycle ([`Request`], [`RequestStatus`])
//! - Run lifecycle ([`Run`], [`RunStatus`], [`RunConfig`])
//! - Metric summaries ([`RunMetricsSummary`], [`SeriesSummary`])
//! - Canonical metric names and label keys ([`metric`], [`label`])

use std::{collections::HashMap, fmt::Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Simulation Time - Copy (8-byte value)
// ============================================================================

/// Converts milliseconds (fractional) to nanoseconds.
#[inline]
pub fn ms_to_ns(ms: f64) -> u64 {
    (ms * 1_000_000.0) as u64
}

/// Converts nanoseconds to milliseconds (fractional).
#[inline]
pub fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

/// Converts seconds (fractional) to nanoseconds.
#[inline]
pub fn sec_to_ns(sec: f64) -> u64 {
    (sec * 1_000_000_000.0) as u64
}

/// Converts nanoseconds to seconds (fractional).
#[inline]
pub fn ns_to_sec(ns: u64) -> f64 {
    ns as f64 / 1_000_000_000.0
}

/// A point in simulated time.
///
/// Stored as nanoseconds since run start. Simulated time is advanced only
/// by the engine's event loop and never decreases within a run. All
/// latency arithmetic in the simulator bottoms out in this type; the
/// fractional-millisecond views exist because scenario inputs and metric
/// outputs speak milliseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SimTime(u64);

impl SimTime {
    /// The start of a run.
    pub const ZERO: SimTime = SimTime(0);

    /// Creates a sim time from nanoseconds since run start.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a sim time from fractional milliseconds since run start.
    pub fn from_millis(ms: f64) -> Self {
        Self(ms_to_ns(ms))
    }

    /// Returns nanoseconds since run start.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns fractional milliseconds since run start.
    pub fn as_millis(&self) -> f64 {
        ns_to_ms(self.0)
    }

    /// Returns fractional seconds since run start.
    pub fn as_secs_f64(&self) -> f64 {
        ns_to_sec(self.0)
    }

    /// Adds a duration in nanoseconds, saturating on overflow.
    pub fn saturating_add_nanos(&self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Adds a fractional-millisecond duration, saturating on overflow.
    pub fn saturating_add_millis(&self, ms: f64) -> Self {
        self.saturating_add_nanos(ms_to_ns(ms))
    }

    /// Returns `self - earlier` in nanoseconds, or zero if `earlier` is later.
    pub fn saturating_since(&self, earlier: SimTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}ms", self.as_millis())
    }
}

impl From<u64> for SimTime {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl From<SimTime> for u64 {
    fn from(t: SimTime) -> Self {
        t.0
    }
}

// ============================================================================
// Entity IDs
// ============================================================================

/// Unique identifier for a simulated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh random request id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a request id from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier shared by every request causally descended from one root
/// arrival. Child requests inherit the trace id of their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceId(Uuid);

impl TraceId {
    /// Generates a fresh trace id for a root arrival.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a trace id from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a scheduled event, assigned by the event queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EventId(u64);

impl EventId {
    /// Creates an event id from its raw value.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a simulation run.
///
/// Run ids are caller-supplied or generated; they must not contain `:`
/// or `/` because they are embedded in composite lookup keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Generates a fresh random run id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a run id from a caller-supplied string, if valid.
    ///
    /// Returns `None` for empty ids or ids containing `:` or `/`.
    pub fn parse(id: &str) -> Option<Self> {
        if id.is_empty() || id.contains(':') || id.contains('/') {
            None
        } else {
            Some(Self(id.to_string()))
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a simulated service instance (one replica on one host).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Builds the canonical instance id for a service replica.
    pub fn for_replica(service: &str, index: usize) -> Self {
        Self(format!("{service}-{index}"))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a simulated host machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(String);

impl HostId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for HostId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ============================================================================
// Request Lifecycle
// ============================================================================

/// Lifecycle state of a simulated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created on arrival; not yet admitted to an instance.
    #[default]
    Pending,
    /// Holding CPU and memory on an instance.
    Processing,
    /// Finished successfully.
    Completed,
    /// Rejected or errored at some lifecycle stage.
    Failed,
}

impl RequestStatus {
    /// Returns true for `Completed` and `Failed`.
    ///
    /// Once a request is terminal, only its completion time, duration and
    /// error message may still be written.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A simulated request flowing through the service graph.
///
/// Requests are owned by the per-run request store; events and instance
/// queues reference them by [`RequestId`] only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique id of this request.
    pub id: RequestId,

    /// Trace id shared with every causal descendant of the root arrival.
    pub trace_id: TraceId,

    /// Parent request for downstream calls; `None` for root arrivals.
    pub parent_id: Option<RequestId>,

    /// Target service name.
    pub service_name: String,

    /// Target endpoint path on the service.
    pub endpoint: String,

    /// Current lifecycle state.
    pub status: RequestStatus,

    /// Sim time the request arrived.
    pub arrival_time: SimTime,

    /// Sim time processing started, once admitted.
    pub start_time: Option<SimTime>,

    /// Sim time the request reached a terminal state.
    pub completion_time: Option<SimTime>,

    /// End-to-end latency in milliseconds, set on completion.
    pub duration_ms: Option<f64>,

    /// Sampled CPU service time in milliseconds.
    pub cpu_time_ms: f64,

    /// Sampled network latency in milliseconds.
    pub network_latency_ms: f64,

    /// Estimated time spent waiting in an instance queue, in milliseconds.
    pub queue_time_ms: f64,

    /// Failure description for failed requests.
    pub error: Option<String>,

    /// Free-form metadata (e.g. the assigned instance id).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Request {
    /// Creates a pending root request arriving at `arrival_time`.
    pub fn arriving(service_name: &str, endpoint: &str, arrival_time: SimTime) -> Self {
        Self {
            id: RequestId::generate(),
            trace_id: TraceId::generate(),
            parent_id: None,
            service_name: service_name.to_string(),
            endpoint: endpoint.to_string(),
            status: RequestStatus::Pending,
            arrival_time,
            start_time: None,
            completion_time: None,
            duration_ms: None,
            cpu_time_ms: 0.0,
            network_latency_ms: 0.0,
            queue_time_ms: 0.0,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Creates a pending child request descending from `parent`.
    ///
    /// The child shares the parent's trace id and records the parent's
    /// request id for trace reconstruction.
    pub fn descending_from(
        parent: &Request,
        service_name: &str,
        endpoint: &str,
        arrival_time: SimTime,
    ) -> Self {
        let mut child = Self::arriving(service_name, endpoint, arrival_time);
        child.trace_id = parent.trace_id;
        child.parent_id = Some(parent.id);
        child
    }
}

// ============================================================================
// Run Lifecycle
// ============================================================================

/// Lifecycle state of a simulation run.
///
/// Transitions are monotonic: `Pending → Running → {Completed, Failed,
/// Cancelled}`. A terminal run never changes state again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet started.
    #[default]
    Pending,
    /// The worker is executing the engine loop.
    Running,
    /// The engine reached the scheduled end of the simulation.
    Completed,
    /// Construction or execution failed the whole run.
    Failed,
    /// Stopped by an external cancellation.
    Cancelled,
}

impl RunStatus {
    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Returns true if a transition from `self` to `next` moves forward.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => matches!(
                next,
                RunStatus::Running | RunStatus::Failed | RunStatus::Cancelled
            ),
            RunStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Input configuration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// The scenario document, as YAML.
    pub scenario_yaml: String,

    /// Virtual duration of the simulation in milliseconds.
    pub duration_ms: u64,

    /// When true, the engine paces event processing so that wall-clock
    /// time approximately tracks virtual time.
    pub real_time_mode: bool,

    /// Seed for all in-run sampling. A fresh random seed is drawn when
    /// absent.
    pub seed: Option<u64>,

    /// Webhook URL notified on completion. Carried opaquely; delivery is
    /// handled outside the core.
    pub callback_url: Option<String>,

    /// Shared secret for callback signing. Carried opaquely.
    pub callback_secret: Option<String>,
}

impl RunConfig {
    /// Default virtual duration applied when the caller passes zero.
    pub const DEFAULT_DURATION_MS: u64 = 10_000;

    /// Creates a config for the given scenario with defaults applied.
    pub fn new(scenario_yaml: impl Into<String>) -> Self {
        Self {
            scenario_yaml: scenario_yaml.into(),
            duration_ms: Self::DEFAULT_DURATION_MS,
            real_time_mode: false,
            seed: None,
            callback_url: None,
            callback_secret: None,
        }
    }

    /// Sets the virtual duration in milliseconds.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Sets the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enables wall-clock pacing.
    pub fn with_real_time_mode(mut self, enabled: bool) -> Self {
        self.real_time_mode = enabled;
        self
    }
}

/// A simulation run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run id.
    pub id: RunId,

    /// Current lifecycle state.
    pub status: RunStatus,

    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,

    /// Wall-clock time the worker started, if any.
    pub started_at: Option<DateTime<Utc>>,

    /// Wall-clock time the run reached a terminal state, if any.
    pub ended_at: Option<DateTime<Utc>>,

    /// Wall-clock duration in milliseconds, set at teardown.
    pub duration_ms: Option<u64>,

    /// Aggregated metrics, present on completed runs.
    pub metrics: Option<RunMetricsSummary>,

    /// Failure description for failed runs.
    pub error: Option<String>,

    /// Input configuration.
    pub config: RunConfig,

    /// Free-form metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Run {
    /// Creates a pending run with the given id and configuration.
    pub fn new(id: RunId, config: RunConfig) -> Self {
        Self {
            id,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            duration_ms: None,
            metrics: None,
            error: None,
            config,
            metadata: HashMap::new(),
        }
    }
}

// ============================================================================
// Metric Summaries
// ============================================================================

/// Count/total/mean/extrema summary of one recorded metric series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    /// Number of samples recorded.
    pub count: u64,
    /// Sum of sample values.
    pub total: f64,
    /// Arithmetic mean of sample values.
    pub mean: f64,
    /// Smallest sample value.
    pub min: f64,
    /// Largest sample value.
    pub max: f64,
}

/// Latency distribution for one endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointLatencySummary {
    /// Completed requests against this endpoint.
    pub count: u64,
    /// Mean latency in milliseconds.
    pub mean_ms: f64,
    /// Median latency in milliseconds.
    pub p50_ms: f64,
    /// 95th-percentile latency in milliseconds.
    pub p95_ms: f64,
    /// 99th-percentile latency in milliseconds.
    pub p99_ms: f64,
}

/// Aggregated metrics for one completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetricsSummary {
    /// Requests observed (arrivals plus downstream calls).
    pub total_requests: u64,

    /// Requests that completed successfully.
    pub completed_requests: u64,

    /// Requests that reached `Failed`.
    pub failed_requests: u64,

    /// Mean end-to-end latency in milliseconds.
    pub mean_latency_ms: f64,

    /// Median end-to-end latency in milliseconds.
    pub p50_latency_ms: f64,

    /// 95th-percentile end-to-end latency in milliseconds.
    pub p95_latency_ms: f64,

    /// 99th-percentile end-to-end latency in milliseconds.
    pub p99_latency_ms: f64,

    /// `total_requests / wall_duration_s`, or zero for zero duration.
    pub throughput_rps: f64,

    /// Per-series summaries keyed by metric name.
    pub series: HashMap<String, SeriesSummary>,

    /// Latency breakdown keyed by `"svc:path"`.
    pub endpoints: HashMap<String, EndpointLatencySummary>,
}

// ============================================================================
// Canonical Metric Names & Label Keys
// ============================================================================

/// Canonical metric names emitted by the simulation core.
pub mod metric {
    /// End-to-end request latency in milliseconds.
    pub const REQUEST_LATENCY_MS: &str = "request_latency_ms";
    /// Count of admitted requests.
    pub const REQUEST_COUNT: &str = "request_count";
    /// Count of failed requests.
    pub const REQUEST_ERROR_COUNT: &str = "request_error_count";
    /// Instance CPU utilization in `[0, 1]`.
    pub const CPU_UTILIZATION: &str = "cpu_utilization";
    /// Instance memory utilization in `[0, 1]`.
    pub const MEMORY_UTILIZATION: &str = "memory_utilization";
    /// Instance FIFO queue depth.
    pub const QUEUE_LENGTH: &str = "queue_length";
}

/// Canonical label keys attached to metric records.
pub mod label {
    /// Service name.
    pub const SERVICE: &str = "service";
    /// Endpoint path.
    pub const ENDPOINT: &str = "endpoint";
    /// Service instance id.
    pub const INSTANCE: &str = "instance";
    /// Host id.
    pub const HOST: &str = "host";
}

// ============================================================================
// Tests
// ============================================================================

//! # Maquette
//!
//! Discrete-event simulation of microservice deployments.
//!
//! Maquette predicts how a service fleet behaves under a configurable
//! workload — latency distributions, throughput, utilization, error
//! rates — without running the real services. Scenarios describe hosts,
//! services, endpoints, call edges, and traffic; a virtual-time engine
//! plays the workload through the deployment and aggregates the result.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Maquette                             │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐  │
//! │  │ Scenario │ → │  Engine   │ → │ Metrics  │ → │  Run     │  │
//! │  │  (YAML)  │   │(event loop│   │(series + │   │ summary  │  │
//! │  │          │   │ handlers) │   │ HDR hist)│   │          │  │
//! │  └──────────┘   └───────────┘   └──────────┘   └──────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use maquette::Maquette;
//!
//! # async fn demo() -> maquette::Result<()> {
//! let sim = Maquette::new();
//!
//! let scenario = r#"
//! hosts:
//!   - id: h1
//!     cpu_cores: 4
//!     memory_gb: 8
//! services:
//!   - id: api
//!     replicas: 2
//!     endpoints:
//!       - path: /orders
//!         mean_cpu_ms: 10
//!         cpu_sigma_ms: 2
//! workload:
//!   - from: client
//!     to: "api:/orders"
//!     arrival:
//!       type: poisson
//!       rate_rps: 200
//! "#;
//!
//! let metrics = sim.simulate(scenario, 10_000, Some(42)).await?;
//! println!("p99 latency: {:.1} ms", metrics.p99_latency_ms);
//! # Ok(())
//! # }
//! ```
//!
//! For long-lived runs, live reconfiguration, and run listing, use the
//! [`RunExecutor`] directly via [`Maquette::executor`].

use std::time::Duration;

// Run lifecycle - main API
pub use maquette_runtime::{Result, RunExecutor, RunStore, RuntimeError, render_report};

// Re-export core types
pub use maquette_types::{
    EndpointLatencySummary, Request, RequestId, RequestStatus, Run, RunConfig, RunId,
    RunMetricsSummary, RunStatus, SeriesSummary, SimTime, TraceId, label, metric,
};

// Re-export the scenario model
pub use maquette_scenario::{
    ArrivalKind, ArrivalSpec, Scenario, ScenarioBuilder, ScenarioError, parse_downstream_target,
    presets,
};

// Re-export engine surface for embedders
pub use maquette_engine::{
    BranchingStrategy, DefaultBranching, Engine, EngineConfig, EventKind, EventQueue, EventType,
    InvariantViolation, PatternSnapshot, PolicySet, ProbabilisticBranching, RunAuditor, SimClock,
    SimError, SimRng, WorkloadState,
};

/// High-level entry point: create runs, simulate, inspect results.
pub struct Maquette {
    executor: RunExecutor,
}

impl Default for Maquette {
    fn default() -> Self {
        Self::new()
    }
}

impl Maquette {
    /// Creates a simulator with an empty run store.
    pub fn new() -> Self {
        Self {
            executor: RunExecutor::new(),
        }
    }

    /// Returns the underlying executor for run management and live
    /// reconfiguration.
    pub fn executor(&self) -> &RunExecutor {
        &self.executor
    }

    /// Runs a scenario to completion and returns its aggregated metrics.
    ///
    /// `duration_ms` of zero applies the 10-second default. Passing a
    /// seed makes the run reproducible within this process.
    pub async fn simulate(
        &self,
        scenario_yaml: &str,
        duration_ms: u64,
        seed: Option<u64>,
    ) -> Result<RunMetricsSummary> {
        let mut config = RunConfig::new(scenario_yaml).with_duration_ms(duration_ms);
        config.seed = seed;

        let run = self.executor.create_run(config);
        self.executor.start_run(run.id.as_str())?;

        loop {
            let current = self.executor.get_run(run.id.as_str())?;
            match current.status {
                RunStatus::Completed => {
                    return current
                        .metrics
                        .ok_or_else(|| RuntimeError::MetricsNotAvailable(run.id.to_string()));
                }
                RunStatus::Failed => {
                    return Err(RuntimeError::RunTerminal {
                        id: run.id.to_string(),
                        status: RunStatus::Failed,
                    });
                }
                RunStatus::Cancelled => {
                    return Err(RuntimeError::RunTerminal {
                        id: run.id.to_string(),
                        status: RunStatus::Cancelled,
                    });
                }
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

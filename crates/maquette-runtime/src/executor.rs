//! Run execution and supervision.
//!
//! The executor owns the mapping from run records to live simulations.
//! `start_run` builds every per-run component from the scenario, spawns
//! a worker task that drives the engine loop, and returns immediately;
//! `stop_run` signals cancellation. Construction failures (bad YAML,
//! cyclic graphs, missing hosts) fail the run synchronously before any
//! event is processed; execution failures never stop a run.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use maquette_engine::{
    Engine, EngineConfig, EventQueue, MetricsRecorder, PolicySet, ProducerHorizon, RequestStore,
    ResourceManager, ResourceSettings, ServiceGraph, SimClock, SimContext, SimError, SimRng,
    WorkloadState, register_default_handlers,
};
use maquette_engine::{DefaultBranching, PatternSnapshot};
use maquette_scenario::{Scenario, WorkloadSpec};
use maquette_types::{
    Run, RunConfig, RunId, RunMetricsSummary, RunStatus, SimTime, ms_to_ns,
};
use tracing::{info, warn};

use crate::{Result, RunStore, RuntimeError};

struct ActiveRun {
    engine: Arc<Engine>,
    workload: Arc<WorkloadState>,
}

/// Builds, supervises, and reconfigures simulation runs.
pub struct RunExecutor {
    store: Arc<RunStore>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
}

impl Default for RunExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RunExecutor {
    /// Creates an executor with an empty run store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RunStore::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the underlying run store.
    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Creates a pending run with a generated id.
    pub fn create_run(&self, config: RunConfig) -> Run {
        self.store.create(config)
    }

    /// Creates a pending run with a caller-supplied id.
    pub fn create_run_with_id(&self, id: &str, config: RunConfig) -> Result<Run> {
        if id.is_empty() {
            return Err(RuntimeError::RunIdMissing);
        }
        self.store.create_with_id(id, config)
    }

    /// Starts a pending run.
    ///
    /// Builds the simulation from the scenario, transitions the run to
    /// `Running`, and spawns a worker task. Starting an already-running
    /// run is idempotent; starting a terminal run fails with
    /// `RunTerminal`. Must be called from within a tokio runtime.
    pub fn start_run(&self, id: &str) -> Result<Run> {
        let run_id = parse_run_id(id)?;
        let run = self.store.get(&run_id)?;

        match run.status {
            RunStatus::Running => return Ok(run),
            status if status.is_terminal() => {
                return Err(RuntimeError::RunTerminal {
                    id: id.to_string(),
                    status,
                });
            }
            _ => {}
        }

        let built = match build_simulation(&run.config) {
            Ok(built) => built,
            Err(err) => {
                // Construction failures are synchronous: no engine loop
                // is entered for this run.
                let _ = self.store.transition(&run_id, RunStatus::Failed);
                self.store.set_error(&run_id, &err.to_string());
                return Err(err);
            }
        };

        let updated = self.store.transition(&run_id, RunStatus::Running)?;
        {
            let mut active = self.active.lock().expect("active map poisoned");
            active.insert(
                run_id.clone(),
                ActiveRun {
                    engine: Arc::clone(&built.engine),
                    workload: Arc::clone(&built.workload),
                },
            );
        }

        let store = Arc::clone(&self.store);
        let active = Arc::clone(&self.active);
        tokio::spawn(run_worker(store, active, run_id, built));

        Ok(updated)
    }

    /// Signals cancellation and transitions the run to `Cancelled`.
    ///
    /// The engine observes the signal, clears its queue, and exits
    /// without finalizing metrics.
    pub fn stop_run(&self, id: &str) -> Result<Run> {
        let run_id = parse_run_id(id)?;
        let run = self.store.get(&run_id)?;

        if run.status.is_terminal() {
            return Err(RuntimeError::RunTerminal {
                id: id.to_string(),
                status: run.status,
            });
        }

        {
            let active = self.active.lock().expect("active map poisoned");
            if let Some(entry) = active.get(&run_id) {
                entry.engine.stop();
            }
        }

        match self.store.transition(&run_id, RunStatus::Cancelled) {
            Ok(run) => Ok(run),
            // The worker won the race and finished first.
            Err(RuntimeError::RunTerminal { .. }) => self.store.get(&run_id),
            Err(err) => Err(err),
        }
    }

    /// Returns a run record.
    pub fn get_run(&self, id: &str) -> Result<Run> {
        let run_id = parse_run_id(id)?;
        self.store.get(&run_id)
    }

    /// Lists runs in creation order; `limit` of zero means unlimited.
    pub fn list_runs(&self, status: Option<RunStatus>, limit: usize, offset: usize) -> Vec<Run> {
        self.store.list(status, limit, offset)
    }

    /// Returns a run's aggregated metrics.
    pub fn get_run_metrics(&self, id: &str) -> Result<RunMetricsSummary> {
        let run = self.get_run(id)?;
        run.metrics
            .ok_or_else(|| RuntimeError::MetricsNotAvailable(id.to_string()))
    }

    /// Signals cancellation on every active run. Returns how many were
    /// signaled.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<RunId> = {
            let active = self.active.lock().expect("active map poisoned");
            active.keys().cloned().collect()
        };
        let mut stopped = 0;
        for id in ids {
            if self.stop_run(id.as_str()).is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    /// Number of runs with a live worker.
    pub fn active_count(&self) -> usize {
        let active = self.active.lock().expect("active map poisoned");
        active.len()
    }

    /// Writes a metadata entry on a run record.
    pub fn set_run_metadata(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let run_id = parse_run_id(id)?;
        self.store.set_metadata(&run_id, key, value)
    }

    /// Removes a terminal run from the store.
    pub fn delete_run(&self, id: &str) -> Result<()> {
        let run_id = parse_run_id(id)?;
        {
            let active = self.active.lock().expect("active map poisoned");
            if active.contains_key(&run_id) {
                return Err(RuntimeError::RunActive(id.to_string()));
            }
        }
        self.store.remove(&run_id)
    }

    /// Updates the arrival rate of a running run's workload pattern.
    pub fn update_workload_rate(&self, id: &str, pattern_key: &str, rps: f64) -> Result<()> {
        let workload = self.active_workload(id)?;
        workload.update_rate(pattern_key, rps)?;
        Ok(())
    }

    /// Replaces a running run's workload pattern wholesale.
    pub fn update_workload_pattern(
        &self,
        id: &str,
        pattern_key: &str,
        spec: &WorkloadSpec,
    ) -> Result<()> {
        let workload = self.active_workload(id)?;
        workload.update_pattern(pattern_key, spec)?;
        Ok(())
    }

    /// Pauses or resumes a running run's workload pattern.
    pub fn set_workload_pattern_active(
        &self,
        id: &str,
        pattern_key: &str,
        active: bool,
    ) -> Result<()> {
        let workload = self.active_workload(id)?;
        workload.set_active(pattern_key, active)?;
        Ok(())
    }

    /// Returns a snapshot of a running run's workload pattern.
    pub fn get_workload_pattern(&self, id: &str, pattern_key: &str) -> Result<PatternSnapshot> {
        let workload = self.active_workload(id)?;
        workload
            .get_pattern(pattern_key)
            .ok_or_else(|| SimError::WorkloadPatternNotFound(pattern_key.to_string()).into())
    }

    fn active_workload(&self, id: &str) -> Result<Arc<WorkloadState>> {
        let run_id = parse_run_id(id)?;
        let active = self.active.lock().expect("active map poisoned");
        active
            .get(&run_id)
            .map(|entry| Arc::clone(&entry.workload))
            .ok_or_else(|| RuntimeError::RunNotFound(id.to_string()))
    }
}

fn parse_run_id(id: &str) -> Result<RunId> {
    if id.is_empty() {
        return Err(RuntimeError::RunIdMissing);
    }
    RunId::parse(id).ok_or_else(|| RuntimeError::InvalidRunId(id.to_string()))
}

// ============================================================================
// Simulation Construction
// ============================================================================

struct BuiltSimulation {
    engine: Arc<Engine>,
    workload: Arc<WorkloadState>,
    duration_ns: u64,
}

fn build_simulation(config: &RunConfig) -> Result<BuiltSimulation> {
    let scenario = Scenario::from_yaml(&config.scenario_yaml)?;

    let duration_ms = if config.duration_ms == 0 {
        RunConfig::DEFAULT_DURATION_MS
    } else {
        config.duration_ms
    };
    let duration_ns = ms_to_ns(duration_ms as f64);
    let end_time = SimTime::from_nanos(duration_ns);

    let clock = Arc::new(SimClock::new());
    let queue = Arc::new(EventQueue::new());
    let resources = Arc::new(ResourceManager::from_scenario(
        &scenario,
        ResourceSettings::default(),
    )?);
    let graph = Arc::new(ServiceGraph::from_scenario(&scenario)?);
    let policies = PolicySet::from_spec(&scenario.policies);

    let seed = config.seed.unwrap_or_else(rand::random);
    let mut rng = SimRng::new(seed);
    let workload_rng = rng.fork();

    let horizon = ProducerHorizon::unbounded();
    let workload = Arc::new(WorkloadState::new(
        &scenario.workload,
        Arc::clone(&queue),
        Arc::clone(&clock),
        workload_rng,
        end_time,
        horizon.clone(),
    )?);

    let ctx = Arc::new(SimContext {
        clock,
        queue,
        resources,
        graph,
        requests: Arc::new(RequestStore::new()),
        metrics: Arc::new(MetricsRecorder::new()),
        policies,
        branching: Arc::new(DefaultBranching),
        rng: Mutex::new(rng),
    });

    let mut engine = Engine::new(
        ctx,
        horizon,
        EngineConfig {
            real_time_mode: config.real_time_mode,
            ..EngineConfig::default()
        },
    );
    register_default_handlers(&mut engine);

    Ok(BuiltSimulation {
        engine: Arc::new(engine),
        workload,
        duration_ns,
    })
}

// ============================================================================
// Worker
// ============================================================================

async fn run_worker(
    store: Arc<RunStore>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
    run_id: RunId,
    built: BuiltSimulation,
) {
    let started = Instant::now();
    let generator = built.workload.start(built.engine.cancel_receiver());

    let result = built.engine.run(built.duration_ns).await;

    // Tear down the generator whether or not the run was cancelled.
    built.engine.stop();
    let _ = generator.await;

    let ctx = built.engine.context();
    ctx.metrics.stop();
    let wall = started.elapsed();

    match result {
        Ok(()) => {
            let summary = ctx.metrics.summarize(&ctx.requests, wall);
            info!(
                run = %run_id,
                requests = summary.total_requests,
                throughput = summary.throughput_rps,
                "run completed"
            );
            store.set_metrics(&run_id, summary);
            let _ = store.transition(&run_id, RunStatus::Completed);
        }
        Err(SimError::Cancelled) => {
            // Cancellation skips metric finalization.
            info!(run = %run_id, "run cancelled");
            let _ = store.transition(&run_id, RunStatus::Cancelled);
        }
        Err(err) => {
            warn!(run = %run_id, error = %err, "run failed");
            store.set_error(&run_id, &err.to_string());
            let _ = store.transition(&run_id, RunStatus::Failed);
        }
    }

    let mut active = active.lock().expect("active map poisoned");
    active.remove(&run_id);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    replicas: 1
    endpoints:
      - path: /t
        mean_cpu_ms: 5
        cpu_sigma_ms: 0
        net_latency_ms:
          mean: 1
          sigma: 0
workload:
  - from: client
    to: "a:/t"
    arrival:
      type: constant
      rate_rps: 20
"#;

    fn config(duration_ms: u64) -> RunConfig {
        RunConfig::new(SCENARIO)
            .with_duration_ms(duration_ms)
            .with_seed(42)
    }

    async fn wait_terminal(executor: &RunExecutor, id: &str) -> Run {
        for _ in 0..600 {
            let run = executor.get_run(id).expect("run exists");
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("run {id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn run_completes_with_metrics() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(500));

        executor.start_run(run.id.as_str()).expect("starts");
        let finished = wait_terminal(&executor, run.id.as_str()).await;

        assert_eq!(finished.status, RunStatus::Completed);
        let metrics = finished.metrics.expect("metrics recorded");
        // 20 RPS over 500ms: arrivals at 50ms..450ms.
        assert!(metrics.total_requests >= 5, "{}", metrics.total_requests);
        assert_eq!(metrics.failed_requests, 0);
        assert!(metrics.throughput_rps > 0.0);
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(60_000));

        let first = executor.start_run(run.id.as_str()).expect("starts");
        assert_eq!(first.status, RunStatus::Running);

        let second = executor.start_run(run.id.as_str()).expect("idempotent");
        assert_eq!(second.status, RunStatus::Running);

        executor.stop_run(run.id.as_str()).expect("stops");
        wait_terminal(&executor, run.id.as_str()).await;
    }

    #[tokio::test]
    async fn start_terminal_run_fails() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(100));

        executor.start_run(run.id.as_str()).expect("starts");
        wait_terminal(&executor, run.id.as_str()).await;

        let err = executor.start_run(run.id.as_str()).unwrap_err();
        assert!(matches!(err, RuntimeError::RunTerminal { .. }));
    }

    #[tokio::test]
    async fn construction_failure_fails_run_synchronously() {
        let executor = RunExecutor::new();
        let run = executor.create_run(RunConfig::new("not: [valid").with_duration_ms(100));

        let err = executor.start_run(run.id.as_str()).unwrap_err();
        assert!(matches!(err, RuntimeError::Scenario(_)));

        let stored = executor.get_run(run.id.as_str()).unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn unknown_and_invalid_ids() {
        let executor = RunExecutor::new();

        assert!(matches!(
            executor.start_run("missing"),
            Err(RuntimeError::RunNotFound(_))
        ));
        assert!(matches!(
            executor.start_run(""),
            Err(RuntimeError::RunIdMissing)
        ));
        assert!(matches!(
            executor.get_run("bad:id"),
            Err(RuntimeError::InvalidRunId(_))
        ));
    }

    #[tokio::test]
    async fn delete_refuses_active_runs() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(60_000));
        executor.start_run(run.id.as_str()).expect("starts");

        assert!(matches!(
            executor.delete_run(run.id.as_str()),
            Err(RuntimeError::RunActive(_))
        ));

        executor.stop_run(run.id.as_str()).expect("stops");
        wait_terminal(&executor, run.id.as_str()).await;
        executor.delete_run(run.id.as_str()).expect("deletes");
        assert!(matches!(
            executor.get_run(run.id.as_str()),
            Err(RuntimeError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn live_reconfiguration_requires_active_run() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(100));

        assert!(matches!(
            executor.update_workload_rate(run.id.as_str(), "client:a:/t", 50.0),
            Err(RuntimeError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn workload_pattern_snapshot_and_update() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(60_000));
        executor.start_run(run.id.as_str()).expect("starts");

        let key = "client:a:/t";
        let snapshot = executor
            .get_workload_pattern(run.id.as_str(), key)
            .expect("pattern visible");
        assert_eq!(snapshot.service_id, "a");
        assert!((snapshot.arrival.rate_rps - 20.0).abs() < f64::EPSILON);

        executor
            .update_workload_rate(run.id.as_str(), key, 80.0)
            .expect("rate updates");
        let snapshot = executor
            .get_workload_pattern(run.id.as_str(), key)
            .expect("pattern visible");
        assert!((snapshot.arrival.rate_rps - 80.0).abs() < f64::EPSILON);

        assert!(matches!(
            executor.update_workload_rate(run.id.as_str(), key, -1.0),
            Err(RuntimeError::Engine(SimError::InvalidRate(_)))
        ));

        executor.stop_run(run.id.as_str()).expect("stops");
        wait_terminal(&executor, run.id.as_str()).await;
    }

    #[tokio::test]
    async fn stop_all_signals_every_active_run() {
        let executor = RunExecutor::new();
        let first = executor.create_run(config(60_000));
        let second = executor.create_run(config(60_000));

        executor.start_run(first.id.as_str()).expect("starts");
        executor.start_run(second.id.as_str()).expect("starts");
        assert_eq!(executor.active_count(), 2);

        let stopped = executor.stop_all();
        assert_eq!(stopped, 2);

        wait_terminal(&executor, first.id.as_str()).await;
        wait_terminal(&executor, second.id.as_str()).await;
        assert_eq!(executor.active_count(), 0);
    }

    #[tokio::test]
    async fn run_metadata_round_trips() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(100));

        executor
            .set_run_metadata(run.id.as_str(), "owner", serde_json::json!("capacity-team"))
            .expect("metadata sets");

        let fetched = executor.get_run(run.id.as_str()).unwrap();
        assert_eq!(
            fetched.metadata.get("owner"),
            Some(&serde_json::json!("capacity-team"))
        );
    }

    #[tokio::test]
    async fn metrics_unavailable_before_completion() {
        let executor = RunExecutor::new();
        let run = executor.create_run(config(100));

        assert!(matches!(
            executor.get_run_metrics(run.id.as_str()),
            Err(RuntimeError::MetricsNotAvailable(_))
        ));
    }
}

//! End-to-end simulation scenarios.
//!
//! Each test drives a full run through the public executor or engine
//! surface and checks the behavior an operator would observe: request
//! volumes, latency distributions, trace linkage, cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use maquette_engine::{
    ArrivalHandler, BranchingStrategy, CompleteHandler, DefaultBranching, DownstreamHandler,
    Engine, EngineConfig, EventQueue, EventType, MetricsRecorder, PolicySet, ProducerHorizon,
    RequestStore, ResourceManager, ResourceSettings, ServiceGraph, SimClock, SimContext, SimRng,
    StartHandler,
};
use maquette_runtime::{RunExecutor, RuntimeError};
use maquette_scenario::{Scenario, ScenarioError};
use maquette_types::{RequestStatus, Run, RunConfig, RunStatus, SimTime, ms_to_ns};

async fn wait_terminal(executor: &RunExecutor, id: &str) -> Run {
    for _ in 0..1_200 {
        let run = executor.get_run(id).expect("run exists");
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {id} did not reach a terminal state");
}

// ============================================================================
// Scenario: single-service steady state
// ============================================================================

const STEADY_STATE: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    replicas: 1
    endpoints:
      - path: /t
        mean_cpu_ms: 10
        cpu_sigma_ms: 0
        net_latency_ms:
          mean: 1
          sigma: 0
workload:
  - from: client
    to: "a:/t"
    arrival:
      type: poisson
      rate_rps: 10
"#;

#[tokio::test]
async fn steady_state_volume_and_latency() {
    let executor = RunExecutor::new();
    let run = executor.create_run(
        RunConfig::new(STEADY_STATE)
            .with_duration_ms(1_000)
            .with_seed(1_234),
    );

    executor.start_run(run.id.as_str()).expect("starts");
    let finished = wait_terminal(&executor, run.id.as_str()).await;

    assert_eq!(finished.status, RunStatus::Completed);
    let metrics = finished.metrics.expect("metrics recorded");

    // Poisson at 10 RPS over one second, single instance.
    assert!(
        (5..=20).contains(&metrics.completed_requests),
        "completed {} requests",
        metrics.completed_requests
    );
    // Base service time is 11ms; queueing pushes the median up but the
    // instance is not overloaded.
    assert!(
        metrics.p50_latency_ms >= 11.0 && metrics.p50_latency_ms <= 50.0,
        "p50 was {}ms",
        metrics.p50_latency_ms
    );
    assert!(metrics.throughput_rps > 0.0);
}

// ============================================================================
// Scenario: priority tie-break
// ============================================================================

#[test]
fn equal_time_events_pop_by_priority() {
    let queue = EventQueue::new();
    let t = SimTime::from_millis(1.0);

    for priority in [10, 5, 1] {
        queue.schedule_with_priority(t, priority, maquette_engine::EventKind::SimulationEnd);
    }

    let order: Vec<u32> = std::iter::from_fn(|| queue.pop().map(|e| e.priority)).collect();
    assert_eq!(order, vec![1, 5, 10]);
}

// ============================================================================
// Scenario: cycle rejection
// ============================================================================

#[tokio::test]
async fn cyclic_scenario_fails_the_run() {
    const CYCLIC: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "b:/y"
  - id: b
    endpoints:
      - path: /y
        downstream:
          - to: "a:/x"
"#;

    let executor = RunExecutor::new();
    let run = executor.create_run(RunConfig::new(CYCLIC).with_duration_ms(100));

    let err = executor.start_run(run.id.as_str()).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Scenario(ScenarioError::CycleDetected { .. })
    ));

    let stored = executor.get_run(run.id.as_str()).unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored.error.unwrap().contains("cycle"));
}

// ============================================================================
// Scenario: downstream stochastic count
// ============================================================================

#[test]
fn stochastic_rounding_mean_converges() {
    const FAN_OUT: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    endpoints:
      - path: /x
        downstream:
          - to: "b:/y"
            call_count_mean: 2.5
  - id: b
    endpoints:
      - path: /y
"#;

    let scenario = Scenario::from_yaml(FAN_OUT).expect("scenario parses");
    let graph = ServiceGraph::from_scenario(&scenario).expect("graph builds");
    let strategy = DefaultBranching;
    let mut rng = SimRng::new(99);

    let candidates = graph.resolve_downstream_calls("a", "/x");
    let trials = 1_000u32;
    let total: usize = (0..trials)
        .map(|_| strategy.select_calls(&candidates, &mut rng).len())
        .sum();
    let mean = total as f64 / f64::from(trials);

    assert!((mean - 2.5).abs() < 0.1, "observed mean {mean}");
}

// ============================================================================
// Scenario: cancellation
// ============================================================================

#[tokio::test]
async fn cancellation_stops_a_long_run() {
    let executor = RunExecutor::new();
    let run = executor.create_run(
        RunConfig::new(STEADY_STATE)
            .with_duration_ms(60_000)
            .with_seed(7),
    );

    executor.start_run(run.id.as_str()).expect("starts");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped = executor.stop_run(run.id.as_str()).expect("stops");
    assert_eq!(stopped.status, RunStatus::Cancelled);

    let finished = wait_terminal(&executor, run.id.as_str()).await;
    assert_eq!(finished.status, RunStatus::Cancelled);
    // Cancellation skips metric finalization.
    assert!(finished.metrics.is_none());
    assert!(matches!(
        executor.get_run_metrics(run.id.as_str()),
        Err(RuntimeError::MetricsNotAvailable(_))
    ));
}

// ============================================================================
// Scenario: trace coherence through fan-out
// ============================================================================

const CHAIN: &str = r#"
hosts:
  - id: h1
    cpu_cores: 4
    memory_gb: 8
services:
  - id: edge
    replicas: 1
    endpoints:
      - path: /in
        mean_cpu_ms: 2
        cpu_sigma_ms: 0
        net_latency_ms:
          mean: 1
          sigma: 0
        downstream:
          - to: "mid:/work"
            call_count_mean: 2
  - id: mid
    replicas: 2
    endpoints:
      - path: /work
        mean_cpu_ms: 3
        cpu_sigma_ms: 0
        downstream:
          - to: "leaf:/store"
            call_count_mean: 1
  - id: leaf
    replicas: 1
    endpoints:
      - path: /store
        mean_cpu_ms: 1
        cpu_sigma_ms: 0
"#;

fn chain_context() -> Arc<SimContext> {
    let scenario = Scenario::from_yaml(CHAIN).expect("scenario parses");
    Arc::new(SimContext {
        clock: Arc::new(SimClock::new()),
        queue: Arc::new(EventQueue::new()),
        resources: Arc::new(
            ResourceManager::from_scenario(&scenario, ResourceSettings::default())
                .expect("resources build"),
        ),
        graph: Arc::new(ServiceGraph::from_scenario(&scenario).expect("graph builds")),
        requests: Arc::new(RequestStore::new()),
        metrics: Arc::new(MetricsRecorder::new()),
        policies: PolicySet::permissive(),
        branching: Arc::new(DefaultBranching),
        rng: Mutex::new(SimRng::new(5)),
    })
}

#[tokio::test]
async fn traces_stay_coherent_through_the_chain() {
    let ctx = chain_context();
    let mut engine = Engine::new(
        Arc::clone(&ctx),
        ProducerHorizon::unbounded(),
        EngineConfig::default(),
    );
    engine.register_handler(EventType::RequestArrival, Arc::new(ArrivalHandler));
    engine.register_handler(EventType::RequestStart, Arc::new(StartHandler));
    engine.register_handler(EventType::RequestComplete, Arc::new(CompleteHandler));
    engine.register_handler(EventType::DownstreamCall, Arc::new(DownstreamHandler));

    for i in 0..3 {
        ctx.queue.schedule(
            SimTime::from_millis(f64::from(i) * 5.0),
            maquette_engine::EventKind::RequestArrival {
                service_id: "edge".to_string(),
                endpoint_path: "/in".to_string(),
            },
        );
    }

    engine.run(ms_to_ns(200.0)).await.expect("run finishes");

    let requests = ctx.requests.all();
    // 3 roots, each fanning into 2 mid calls, each into 1 leaf call.
    assert_eq!(requests.len(), 3 + 6 + 6);
    assert!(requests.iter().all(|r| r.status == RequestStatus::Completed));

    let roots: Vec<_> = requests.iter().filter(|r| r.parent_id.is_none()).collect();
    assert_eq!(roots.len(), 3);

    for request in &requests {
        // Walk to the root; the trace id must match at every hop.
        let mut current = (*request).clone();
        while let Some(parent_id) = current.parent_id {
            let parent = requests
                .iter()
                .find(|r| r.id == parent_id)
                .expect("parent exists");
            assert_eq!(parent.trace_id, request.trace_id);
            current = (*parent).clone();
        }
    }
}

// ============================================================================
// Scenario: resource conservation across a busy run
// ============================================================================

#[tokio::test]
async fn resources_return_to_zero_after_the_run() {
    let ctx = chain_context();
    let mut engine = Engine::new(
        Arc::clone(&ctx),
        ProducerHorizon::unbounded(),
        EngineConfig::default(),
    );
    engine.register_handler(EventType::RequestArrival, Arc::new(ArrivalHandler));
    engine.register_handler(EventType::RequestStart, Arc::new(StartHandler));
    engine.register_handler(EventType::RequestComplete, Arc::new(CompleteHandler));
    engine.register_handler(EventType::DownstreamCall, Arc::new(DownstreamHandler));

    for i in 0..20 {
        ctx.queue.schedule(
            SimTime::from_millis(f64::from(i)),
            maquette_engine::EventKind::RequestArrival {
                service_id: "edge".to_string(),
                endpoint_path: "/in".to_string(),
            },
        );
    }

    engine.run(ms_to_ns(500.0)).await.expect("run finishes");

    for service in ["edge", "mid", "leaf"] {
        for instance in ctx.resources.instances_for(service) {
            assert!(
                ctx.resources.cpu_utilization(&instance).abs() < 1e-9,
                "cpu not released on {instance}"
            );
            assert!(
                ctx.resources.memory_utilization(&instance).abs() < 1e-9,
                "memory not released on {instance}"
            );
            assert_eq!(ctx.resources.queue_length(&instance), 0);
        }
    }
}

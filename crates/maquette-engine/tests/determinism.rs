//! Seed determinism across full engine runs.
//!
//! Two runs wired identically and seeded identically must produce the
//! same requests, the same latencies, and the same metric volumes.
//! Everything random in a run flows from one seeded RNG, so divergence
//! here means a hidden source of nondeterminism crept into the core.

use std::sync::{Arc, Mutex};

use maquette_engine::{
    DefaultBranching, Engine, EngineConfig, EventKind, EventQueue, MetricsRecorder, PolicySet,
    ProducerHorizon, RequestStore, ResourceManager, ResourceSettings, ServiceGraph, SimClock,
    SimContext, SimRng, register_default_handlers,
};
use maquette_scenario::Scenario;
use maquette_types::{SimTime, metric, ms_to_ns};

const SCENARIO: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: edge
    replicas: 2
    endpoints:
      - path: /in
        mean_cpu_ms: 8
        cpu_sigma_ms: 2
        net_latency_ms:
          mean: 1
          sigma: 0.5
        downstream:
          - to: "backend:/work"
            call_count_mean: 1.5
  - id: backend
    replicas: 1
    endpoints:
      - path: /work
        mean_cpu_ms: 4
        cpu_sigma_ms: 1
"#;

struct Wiring {
    engine: Engine,
    ctx: Arc<SimContext>,
}

fn wire(seed: u64) -> Wiring {
    let scenario = Scenario::from_yaml(SCENARIO).expect("scenario parses");
    let ctx = Arc::new(SimContext {
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
        rng: Mutex::new(SimRng::new(seed)),
    });
    let mut engine = Engine::new(
        Arc::clone(&ctx),
        ProducerHorizon::unbounded(),
        EngineConfig::default(),
    );
    register_default_handlers(&mut engine);

    for i in 0..25 {
        ctx.queue.schedule(
            SimTime::from_millis(f64::from(i) * 4.0),
            EventKind::RequestArrival {
                service_id: "edge".to_string(),
                endpoint_path: "/in".to_string(),
            },
        );
    }

    Wiring { engine, ctx }
}

/// Sorted, comparable fingerprint of a finished run.
fn fingerprint(ctx: &SimContext) -> (u64, u64, Vec<u64>) {
    let mut durations: Vec<u64> = ctx
        .requests
        .all()
        .iter()
        .filter_map(|r| r.duration_ms)
        .map(|d| (d * 1_000.0) as u64)
        .collect();
    durations.sort_unstable();
    (ctx.requests.total(), ctx.requests.completed(), durations)
}

#[tokio::test]
async fn same_seed_same_run() {
    let first = wire(0xDEAD_BEEF);
    let second = wire(0xDEAD_BEEF);

    first.engine.run(ms_to_ns(1_000.0)).await.expect("first run");
    second
        .engine
        .run(ms_to_ns(1_000.0))
        .await
        .expect("second run");

    assert_eq!(fingerprint(&first.ctx), fingerprint(&second.ctx));
    assert_eq!(
        first.ctx.metrics.sample_count(metric::REQUEST_LATENCY_MS),
        second.ctx.metrics.sample_count(metric::REQUEST_LATENCY_MS)
    );
}

#[tokio::test]
async fn different_seeds_diverge() {
    let first = wire(1);
    let second = wire(2);

    first.engine.run(ms_to_ns(1_000.0)).await.expect("first run");
    second
        .engine
        .run(ms_to_ns(1_000.0))
        .await
        .expect("second run");

    // Same arrival schedule, but sampled service times and fan-out
    // counts differ.
    let (_, _, first_durations) = fingerprint(&first.ctx);
    let (_, _, second_durations) = fingerprint(&second.ctx);
    assert_ne!(first_durations, second_durations);
}

#[tokio::test]
async fn seeded_runs_satisfy_core_invariants() {
    let wiring = wire(77);
    wiring.engine.run(ms_to_ns(1_000.0)).await.expect("runs");

    let auditor = maquette_engine::RunAuditor;
    let violations = auditor.audit(&wiring.ctx.requests, Some(&wiring.ctx.resources));
    assert!(violations.is_empty(), "{violations:?}");
}

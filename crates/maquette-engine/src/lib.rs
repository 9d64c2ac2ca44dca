//! # maquette-engine: Discrete-event simulation core
//!
//! The engine simulates microservice deployments under configurable
//! workloads, producing latency, throughput, utilization, and error
//! metrics without running the real services.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       one run                               │
//! │                                                             │
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────────┐   │
//! │  │ SimClock    │   │ EventQueue   │   │ SimRng          │   │
//! │  │ virtual ns  │   │ (time, prio, │   │ seeded sampling │   │
//! │  │             │   │  insertion)  │   │                 │   │
//! │  └──────┬──────┘   └──────┬───────┘   └────────┬────────┘   │
//! │         │                 │                    │            │
//! │  ┌──────┴─────────────────┴────────────────────┴────────┐   │
//! │  │ Engine loop: pop → advance clock → dispatch handler  │   │
//! │  └──────┬───────────────────────────────────────────────┘   │
//! │         │                                                   │
//! │  ┌──────┴──────────┐  ┌───────────────┐  ┌──────────────┐   │
//! │  │ Handlers        │  │ ResourceMgr   │  │ ServiceGraph │   │
//! │  │ arrival/start/  │  │ hosts, FIFO   │  │ DAG + fan-out│   │
//! │  │ complete/fanout │  │ queues, cpu/  │  │ strategies   │   │
//! │  │                 │  │ mem accounting│  │              │   │
//! │  └─────────────────┘  └───────────────┘  └──────────────┘   │
//! │                                                             │
//! │  WorkloadState ──(500ms ticks)──▶ RequestArrival events     │
//! │  MetricsRecorder ◀── handlers record series + latencies     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key components
//!
//! - **`SimClock`**: virtual time, advanced only by the engine loop
//! - **`EventQueue`**: priority queue of scheduled events
//! - **`Engine`**: the event loop; dispatches to registered handlers
//! - **`WorkloadState`**: continuous arrival generation with live
//!   rate/pattern updates
//! - **`ResourceManager`**: instance selection, CPU/memory accounting,
//!   per-instance FIFO queues
//! - **`ServiceGraph`** + **`BranchingStrategy`**: downstream fan-out
//! - **`RequestStore`** / **`MetricsRecorder`**: per-run request and
//!   metric state

mod autoscale;
mod branching;
mod clock;
mod engine;
mod error;
mod event;
mod graph;
mod handlers;
mod invariants;
mod metrics;
mod policy;
mod resources;
mod rng;
mod run_state;
mod trace;
mod workload;

pub use autoscale::{NoAutoscaling, ScalingAction, ScalingPolicy, UtilizationAutoscaler};
pub use branching::{BranchingStrategy, DefaultBranching, ProbabilisticBranching, ResolvedCall};
pub use clock::SimClock;
pub use engine::{Engine, EngineConfig};
pub use error::SimError;
pub use event::{DEFAULT_PRIORITY, Event, EventKind, EventQueue, EventType};
pub use graph::{Edge, EndpointNode, ServiceGraph};
pub use handlers::{
    ArrivalHandler, CompleteHandler, DEFAULT_REQUEST_MEMORY_MB, DownstreamHandler, EventHandler,
    ScalingHandler, SimContext, StartHandler, meta,
};
pub use invariants::{InvariantViolation, RunAuditor};
pub use metrics::{MetricPoint, MetricsRecorder, SeriesKey};
pub use policy::{
    AllowAll, CircuitBreakerPolicy, ConsecutiveFailureBreaker, FixedWindowRateLimit, PolicySet,
    RateLimitPolicy, RetryPolicy,
};
pub use resources::{InstanceSnapshot, ResourceManager, ResourceSettings, ServiceLoad};
pub use rng::SimRng;
pub use run_state::{RequestStore, TraceSummary};
pub use trace::{DispatchOutcome, DispatchRecord, EventTrace};
pub use workload::{
    EVENT_GENERATION_TICK, LOOKAHEAD_NS, PatternSnapshot, ProducerHorizon, WorkloadState,
    sample_inter_arrival,
};

use std::sync::Arc;

/// Registers the default lifecycle handlers on an engine.
pub fn register_default_handlers(engine: &mut Engine) {
    engine.register_handler(EventType::RequestArrival, Arc::new(ArrivalHandler));
    engine.register_handler(EventType::RequestStart, Arc::new(StartHandler));
    engine.register_handler(EventType::RequestComplete, Arc::new(CompleteHandler));
    engine.register_handler(EventType::DownstreamCall, Arc::new(DownstreamHandler));
    engine.register_handler(EventType::ScaleUp, Arc::new(ScalingHandler));
    engine.register_handler(EventType::ScaleDown, Arc::new(ScalingHandler));
}

//! Request lifecycle handlers.
//!
//! Each handler consumes one event, mutates request and resource state,
//! emits metric records, and schedules follow-up events. Handler errors
//! are non-fatal: the engine logs them and keeps the run alive, while
//! the affected request is marked failed.
//!
//! Lifecycle:
//!
//! ```text
//! pending ──arrival──▶ [admission checks] ──┬─▶ queued (instance saturated)
//!                                           └─▶ start ──▶ processing ──▶ complete
//!  any                                                                     ▲
//!   │                                                                      │
//!   └──▶ failed (rate-limit / breaker / resource alloc failure)     ◀──────┘
//! ```

use std::sync::{Arc, Mutex};

use maquette_types::{InstanceId, Request, SimTime, label, metric, ms_to_ns};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    BranchingStrategy, EventQueue, MetricsRecorder, PolicySet, RequestStore, ResourceManager,
    ServiceGraph, SimClock, SimError, SimRng,
    event::{Event, EventKind},
};

/// Memory charged per in-flight request when neither the endpoint nor the
/// request metadata specifies one, in megabytes.
pub const DEFAULT_REQUEST_MEMORY_MB: f64 = 10.0;

/// Request metadata keys written by the handlers.
pub mod meta {
    /// The instance a request was assigned to.
    pub const INSTANCE_ID: &str = "instance_id";
    /// The memory charge to return on completion.
    pub const MEMORY_MB: &str = "memory_mb";
    /// The parent's instance, copied onto downstream children.
    pub const PARENT_INSTANCE: &str = "parent_instance";
    /// How many start attempts the request has made.
    pub const ATTEMPTS: &str = "attempts";
}

/// Shared state handed to every handler of one run.
pub struct SimContext {
    /// Virtual clock (read-only for handlers).
    pub clock: Arc<SimClock>,
    /// The run's event queue.
    pub queue: Arc<EventQueue>,
    /// Hosts, instances, and resource accounting.
    pub resources: Arc<ResourceManager>,
    /// The service dependency graph.
    pub graph: Arc<ServiceGraph>,
    /// The run's request store.
    pub requests: Arc<RequestStore>,
    /// Metric sink.
    pub metrics: Arc<MetricsRecorder>,
    /// Admission policies.
    pub policies: PolicySet,
    /// Downstream fan-out strategy.
    pub branching: Arc<dyn BranchingStrategy>,
    /// Sampling RNG for service times and branching.
    pub rng: Mutex<SimRng>,
}

/// A function consuming one event.
pub trait EventHandler: Send + Sync {
    /// Handles the event. Errors fail the affected request, not the run.
    fn handle(&self, ctx: &SimContext, event: &Event) -> Result<(), SimError>;
}

// ============================================================================
// request_arrival
// ============================================================================

/// Admits a fresh root request: policy checks, instance selection, and
/// either an immediate `RequestStart` or a seat on the instance's FIFO
/// queue when it is saturated.
#[derive(Debug, Default)]
pub struct ArrivalHandler;

impl EventHandler for ArrivalHandler {
    fn handle(&self, ctx: &SimContext, event: &Event) -> Result<(), SimError> {
        let EventKind::RequestArrival {
            service_id,
            endpoint_path,
        } = &event.kind
        else {
            return Err(SimError::Handler(
                "arrival handler received a non-arrival event".to_string(),
            ));
        };

        let now = ctx.clock.now();
        let request = Request::arriving(service_id, endpoint_path, now);
        let id = request.id;
        ctx.requests.insert(request);

        let labels = [
            (label::SERVICE, service_id.as_str()),
            (label::ENDPOINT, endpoint_path.as_str()),
        ];

        if !ctx.policies.rate_limit.allow(service_id, endpoint_path, now) {
            ctx.requests.mark_failed(id, now, "rate limited")?;
            ctx.metrics
                .record(metric::REQUEST_ERROR_COUNT, 1.0, now, &labels);
            return Err(SimError::PolicyDenied {
                service: service_id.clone(),
                endpoint: endpoint_path.clone(),
                policy: "rate limit",
            });
        }

        if !ctx
            .policies
            .circuit_breaker
            .allow(service_id, endpoint_path, now)
        {
            ctx.requests.mark_failed(id, now, "circuit breaker open")?;
            ctx.metrics
                .record(metric::REQUEST_ERROR_COUNT, 1.0, now, &labels);
            return Err(SimError::PolicyDenied {
                service: service_id.clone(),
                endpoint: endpoint_path.clone(),
                policy: "circuit breaker",
            });
        }

        ctx.metrics.record(metric::REQUEST_COUNT, 1.0, now, &labels);

        let instance = match ctx.resources.select_instance(service_id) {
            Ok(instance) => instance,
            Err(err) => {
                ctx.requests.mark_failed(id, now, "no instance available")?;
                ctx.metrics
                    .record(metric::REQUEST_ERROR_COUNT, 1.0, now, &labels);
                return Err(err);
            }
        };
        ctx.requests
            .set_metadata(id, meta::INSTANCE_ID, json!(instance.as_str()))?;

        if ctx.resources.has_capacity(&instance) {
            ctx.resources.commit_admission(&instance)?;
            ctx.queue.schedule(
                now,
                EventKind::RequestStart {
                    request_id: id,
                    instance_id: Some(instance),
                },
            );
        } else {
            // Saturated: the request waits its turn. The RequestStart is
            // scheduled by whichever RequestComplete frees the instance.
            debug!(request = %id, instance = %instance, "instance saturated, queueing");
            ctx.resources.enqueue_request(&instance, id)?;
        }

        Ok(())
    }
}

// ============================================================================
// request_start
// ============================================================================

/// Begins processing: samples service times, allocates CPU and memory,
/// and schedules the matching `RequestComplete`.
#[derive(Debug, Default)]
pub struct StartHandler;

impl StartHandler {
    fn resolve_instance(
        ctx: &SimContext,
        event_instance: Option<&InstanceId>,
        request: &Request,
    ) -> Result<InstanceId, SimError> {
        if let Some(instance) = event_instance {
            return Ok(instance.clone());
        }
        if let Some(value) = request.metadata.get(meta::INSTANCE_ID) {
            if let Some(id) = value.as_str() {
                return Ok(InstanceId::from(id.to_string()));
            }
        }
        ctx.resources.select_instance(&request.service_name)
    }
}

impl EventHandler for StartHandler {
    fn handle(&self, ctx: &SimContext, event: &Event) -> Result<(), SimError> {
        let EventKind::RequestStart {
            request_id,
            instance_id,
        } = &event.kind
        else {
            return Err(SimError::Handler(
                "start handler received a non-start event".to_string(),
            ));
        };

        let id = *request_id;
        let now = ctx.clock.now();
        let request = ctx.requests.get(id).ok_or(SimError::UnknownRequest(id))?;

        let labels = [
            (label::SERVICE, request.service_name.as_str()),
            (label::ENDPOINT, request.endpoint.as_str()),
        ];

        let Some(endpoint) = ctx.graph.endpoint(&request.service_name, &request.endpoint) else {
            ctx.requests.mark_failed(id, now, "unknown endpoint")?;
            ctx.metrics
                .record(metric::REQUEST_ERROR_COUNT, 1.0, now, &labels);
            return Err(SimError::UnknownEndpoint {
                service: request.service_name.clone(),
                path: request.endpoint.clone(),
            });
        };

        let instance = match Self::resolve_instance(ctx, instance_id.as_ref(), &request) {
            Ok(instance) => instance,
            Err(err) => {
                ctx.requests.mark_failed(id, now, "no instance available")?;
                ctx.metrics
                    .record(metric::REQUEST_ERROR_COUNT, 1.0, now, &labels);
                return Err(err);
            }
        };

        ctx.requests.mark_processing(id, now)?;

        let (cpu_time_ms, net_latency_ms) = {
            let mut rng = ctx.rng.lock().expect("rng mutex poisoned");
            (
                rng.sample_duration_ms(endpoint.mean_cpu_ms, endpoint.cpu_sigma_ms),
                rng.sample_duration_ms(endpoint.net_mean_ms, endpoint.net_sigma_ms),
            )
        };

        let memory_mb = request
            .metadata
            .get(meta::MEMORY_MB)
            .and_then(serde_json::Value::as_f64)
            .or(endpoint.default_memory_mb)
            .unwrap_or(DEFAULT_REQUEST_MEMORY_MB);

        if let Err(err) = ctx.resources.allocate_cpu(&instance, cpu_time_ms) {
            ctx.requests.mark_failed(id, now, "cpu allocation failed")?;
            ctx.metrics
                .record(metric::REQUEST_ERROR_COUNT, 1.0, now, &labels);
            ctx.policies
                .circuit_breaker
                .record_failure(&request.service_name, &request.endpoint, now);
            return Err(err);
        }
        if let Err(err) = ctx.resources.allocate_memory(&instance, memory_mb) {
            // Roll back the CPU charge so accounting stays balanced.
            let _ = ctx.resources.release_cpu(&instance, cpu_time_ms);
            ctx.policies
                .circuit_breaker
                .record_failure(&request.service_name, &request.endpoint, now);

            let attempts = request
                .metadata
                .get(meta::ATTEMPTS)
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(1) as u32;
            if ctx.policies.retry.should_retry(attempts) {
                debug!(request = %id, attempts, "allocation failed, retrying");
                ctx.requests
                    .set_metadata(id, meta::ATTEMPTS, json!(attempts + 1))?;
                let retry_at = now.saturating_add_millis(ctx.policies.retry.backoff_ms());
                ctx.queue.schedule(
                    retry_at,
                    EventKind::RequestStart {
                        request_id: id,
                        instance_id: None,
                    },
                );
                return Ok(());
            }

            ctx.requests
                .mark_failed(id, now, "memory allocation failed")?;
            ctx.metrics
                .record(metric::REQUEST_ERROR_COUNT, 1.0, now, &labels);
            return Err(err);
        }

        // FIFO-weighted mean-service-time estimate of queueing delay.
        let queue_len = ctx.resources.queue_length(&instance);
        let queue_delay_ms = queue_len as f64 * (endpoint.mean_cpu_ms + endpoint.net_mean_ms);

        ctx.requests
            .set_samples(id, cpu_time_ms, net_latency_ms, queue_delay_ms)?;
        ctx.requests
            .set_metadata(id, meta::INSTANCE_ID, json!(instance.as_str()))?;
        ctx.requests
            .set_metadata(id, meta::MEMORY_MB, json!(memory_mb))?;

        if let Some(snapshot) = ctx.resources.snapshot(&instance) {
            let instance_labels = [
                (label::INSTANCE, instance.as_str()),
                (label::HOST, snapshot.host_id.as_str()),
                (label::SERVICE, request.service_name.as_str()),
            ];
            ctx.metrics.record(
                metric::CPU_UTILIZATION,
                snapshot.cpu_usage,
                now,
                &instance_labels,
            );
            ctx.metrics.record(
                metric::MEMORY_UTILIZATION,
                snapshot.memory_usage,
                now,
                &instance_labels,
            );
            ctx.metrics.record(
                metric::QUEUE_LENGTH,
                queue_len as f64,
                now,
                &instance_labels,
            );
        }

        let completion_at =
            now.saturating_add_nanos(ms_to_ns(cpu_time_ms + net_latency_ms + queue_delay_ms));
        ctx.queue
            .schedule(completion_at, EventKind::RequestComplete { request_id: id });

        Ok(())
    }
}

// ============================================================================
// request_complete
// ============================================================================

/// Finishes a request: returns its resources, wakes the next queued
/// request on the instance, records latency, and fans out downstream.
#[derive(Debug, Default)]
pub struct CompleteHandler;

impl EventHandler for CompleteHandler {
    fn handle(&self, ctx: &SimContext, event: &Event) -> Result<(), SimError> {
        let EventKind::RequestComplete { request_id } = &event.kind else {
            return Err(SimError::Handler(
                "complete handler received a non-complete event".to_string(),
            ));
        };

        let id = *request_id;
        let now = ctx.clock.now();
        let request = ctx.requests.get(id).ok_or(SimError::UnknownRequest(id))?;

        let instance = request
            .metadata
            .get(meta::INSTANCE_ID)
            .and_then(serde_json::Value::as_str)
            .map(|s| InstanceId::from(s.to_string()))
            .ok_or_else(|| {
                SimError::Handler(format!("request {id} completed without an instance"))
            })?;
        let memory_mb = request
            .metadata
            .get(meta::MEMORY_MB)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(DEFAULT_REQUEST_MEMORY_MB);

        ctx.resources.release_cpu(&instance, request.cpu_time_ms)?;
        ctx.resources.release_memory(&instance, memory_mb)?;

        // Wake the next queued request at the same virtual time; insertion
        // order guarantees it is processed after this completion.
        if let Some(next_id) = ctx.resources.dequeue_request(&instance) {
            ctx.queue.schedule(
                now,
                EventKind::RequestStart {
                    request_id: next_id,
                    instance_id: Some(instance.clone()),
                },
            );
        }

        let snapshot = ctx.requests.mark_completed(id, now)?;
        let duration_ms = snapshot.duration_ms.unwrap_or(0.0);

        ctx.metrics.record(
            metric::REQUEST_LATENCY_MS,
            duration_ms,
            now,
            &[
                (label::SERVICE, request.service_name.as_str()),
                (label::ENDPOINT, request.endpoint.as_str()),
            ],
        );
        ctx.policies
            .circuit_breaker
            .record_success(&request.service_name, &request.endpoint, now);

        // Offer the post-release load to the autoscaling policy.
        if let Some(load) = ctx.resources.service_load(&request.service_name) {
            if let Some(action) = ctx.policies.scaling.decide(&load, now) {
                let kind = match action {
                    crate::ScalingAction::Up(replicas) => EventKind::ScaleUp {
                        service_id: request.service_name.clone(),
                        replicas,
                    },
                    crate::ScalingAction::Down(replicas) => EventKind::ScaleDown {
                        service_id: request.service_name.clone(),
                        replicas,
                    },
                };
                ctx.queue.schedule(now, kind);
            }
        }

        let candidates = ctx
            .graph
            .resolve_downstream_calls(&request.service_name, &request.endpoint);
        if !candidates.is_empty() {
            let chosen = {
                let mut rng = ctx.rng.lock().expect("rng mutex poisoned");
                ctx.branching.select_calls(&candidates, &mut rng)
            };
            for call in chosen {
                ctx.queue.schedule(
                    now,
                    EventKind::DownstreamCall {
                        parent_id: id,
                        target_service: call.target_service,
                        target_path: call.target_path,
                    },
                );
            }
        }

        Ok(())
    }
}

// ============================================================================
// downstream_call
// ============================================================================

/// Creates a child request descending from a completed parent and
/// schedules its `RequestStart`.
#[derive(Debug, Default)]
pub struct DownstreamHandler;

impl EventHandler for DownstreamHandler {
    fn handle(&self, ctx: &SimContext, event: &Event) -> Result<(), SimError> {
        let EventKind::DownstreamCall {
            parent_id,
            target_service,
            target_path,
        } = &event.kind
        else {
            return Err(SimError::Handler(
                "downstream handler received a non-downstream event".to_string(),
            ));
        };

        let now = ctx.clock.now();
        let parent = ctx
            .requests
            .get(*parent_id)
            .ok_or(SimError::UnknownRequest(*parent_id))?;

        if !ctx.graph.service_exists(target_service) {
            return Err(SimError::UnknownService(target_service.clone()));
        }

        let mut child = Request::descending_from(&parent, target_service, target_path, now);
        if let Some(parent_instance) = parent.metadata.get(meta::INSTANCE_ID) {
            child
                .metadata
                .insert(meta::PARENT_INSTANCE.to_string(), parent_instance.clone());
        }
        let child_id = child.id;
        ctx.requests.insert(child);

        ctx.queue.schedule(
            now,
            EventKind::RequestStart {
                request_id: child_id,
                instance_id: None,
            },
        );

        Ok(())
    }
}

// ============================================================================
// scale_up / scale_down
// ============================================================================

/// Adjusts a service's replica count in the resource manager.
#[derive(Debug, Default)]
pub struct ScalingHandler;

impl EventHandler for ScalingHandler {
    fn handle(&self, ctx: &SimContext, event: &Event) -> Result<(), SimError> {
        match &event.kind {
            EventKind::ScaleUp {
                service_id,
                replicas,
            } => {
                let added = ctx.resources.add_instances(service_id, *replicas as usize)?;
                info!(service = %service_id, added = added.len(), "scaled up");
                Ok(())
            }
            EventKind::ScaleDown {
                service_id,
                replicas,
            } => {
                let removed = ctx
                    .resources
                    .remove_instances(service_id, *replicas as usize);
                info!(service = %service_id, removed, "scaled down");
                Ok(())
            }
            _ => Err(SimError::Handler(
                "scaling handler received a non-scaling event".to_string(),
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DefaultBranching, ResourceSettings};
    use maquette_scenario::Scenario;
    use maquette_types::RequestStatus;

    const SCENARIO: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 4
services:
  - id: a
    replicas: 1
    endpoints:
      - path: /x
        mean_cpu_ms: 10
        cpu_sigma_ms: 0
        net_latency_ms:
          mean: 1
          sigma: 0
        downstream:
          - to: "b:/y"
            call_count_mean: 1
  - id: b
    replicas: 1
    endpoints:
      - path: /y
        mean_cpu_ms: 5
        cpu_sigma_ms: 0
"#;

    fn context() -> SimContext {
        context_with(SCENARIO, PolicySet::permissive())
    }

    fn context_with(yaml: &str, policies: PolicySet) -> SimContext {
        let scenario = Scenario::from_yaml(yaml).expect("scenario parses");
        SimContext {
            clock: Arc::new(SimClock::new()),
            queue: Arc::new(EventQueue::new()),
            resources: Arc::new(
                ResourceManager::from_scenario(&scenario, ResourceSettings::default())
                    .expect("resources build"),
            ),
            graph: Arc::new(ServiceGraph::from_scenario(&scenario).expect("graph builds")),
            requests: Arc::new(RequestStore::new()),
            metrics: Arc::new(MetricsRecorder::new()),
            policies,
            branching: Arc::new(DefaultBranching),
            rng: Mutex::new(SimRng::new(7)),
        }
    }

    fn arrival_event(service: &str, path: &str) -> Event {
        Event {
            id: maquette_types::EventId::from_raw(1),
            time: SimTime::ZERO,
            priority: 100,
            seq: 0,
            kind: EventKind::RequestArrival {
                service_id: service.to_string(),
                endpoint_path: path.to_string(),
            },
        }
    }

    fn drive(ctx: &SimContext) {
        // Minimal synchronous event loop for handler tests.
        let arrival = ArrivalHandler;
        let start = StartHandler;
        let complete = CompleteHandler;
        let downstream = DownstreamHandler;

        while let Some(event) = ctx.queue.pop() {
            ctx.clock.set(event.time).expect("monotonic pops");
            let result = match event.kind {
                EventKind::RequestArrival { .. } => arrival.handle(ctx, &event),
                EventKind::RequestStart { .. } => start.handle(ctx, &event),
                EventKind::RequestComplete { .. } => complete.handle(ctx, &event),
                EventKind::DownstreamCall { .. } => downstream.handle(ctx, &event),
                _ => Ok(()),
            };
            let _ = result;
        }
    }

    #[test]
    fn arrival_schedules_start_when_capacity() {
        let ctx = context();
        let handler = ArrivalHandler;

        handler
            .handle(&ctx, &arrival_event("a", "/x"))
            .expect("arrival succeeds");

        assert_eq!(ctx.requests.total(), 1);
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.metrics.sample_count(metric::REQUEST_COUNT), 1);
    }

    #[test]
    fn arrival_fails_for_unknown_service() {
        let ctx = context();
        let handler = ArrivalHandler;

        let err = handler.handle(&ctx, &arrival_event("ghost", "/x")).unwrap_err();
        assert!(matches!(err, SimError::NoInstanceAvailable { .. }));

        let requests = ctx.requests.all();
        assert_eq!(requests[0].status, RequestStatus::Failed);
        assert_eq!(ctx.metrics.sample_count(metric::REQUEST_ERROR_COUNT), 1);
    }

    #[test]
    fn rate_limited_arrival_fails_without_counting() {
        let deny = PolicySet {
            rate_limit: Arc::new(crate::FixedWindowRateLimit::new(0.0)),
            ..PolicySet::permissive()
        };
        let ctx = context_with(SCENARIO, deny);

        let err = ArrivalHandler
            .handle(&ctx, &arrival_event("a", "/x"))
            .unwrap_err();
        assert!(matches!(err, SimError::PolicyDenied { .. }));
        assert_eq!(ctx.metrics.sample_count(metric::REQUEST_COUNT), 0);
        assert_eq!(ctx.metrics.sample_count(metric::REQUEST_ERROR_COUNT), 1);
    }

    #[test]
    fn full_lifecycle_completes_and_fans_out() {
        let ctx = context();
        ctx.queue.schedule(
            SimTime::ZERO,
            EventKind::RequestArrival {
                service_id: "a".to_string(),
                endpoint_path: "/x".to_string(),
            },
        );

        drive(&ctx);

        // Root on `a` plus one downstream child on `b`.
        let requests = ctx.requests.all();
        assert_eq!(requests.len(), 2);
        assert_eq!(ctx.requests.completed(), 2);

        let root = requests.iter().find(|r| r.parent_id.is_none()).unwrap();
        let child = requests.iter().find(|r| r.parent_id.is_some()).unwrap();

        assert_eq!(root.service_name, "a");
        assert_eq!(child.service_name, "b");
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_id, Some(root.id));

        // Root latency is cpu (10) + net (1) with zero sigma.
        assert!((root.duration_ms.unwrap() - 11.0).abs() < 1e-6);

        // Resources fully returned.
        let instance = ctx.resources.instances_for("a")[0].clone();
        assert!((ctx.resources.cpu_utilization(&instance) - 0.0).abs() < 1e-9);
        assert!((ctx.resources.memory_utilization(&instance) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn saturated_instance_queues_fifo() {
        // 2 cores × factor 2 = 4 concurrent; later arrivals queue.
        let ctx = context();
        let arrival = ArrivalHandler;
        let start = StartHandler;
        let complete = CompleteHandler;

        // Admit and start four requests so the instance is saturated.
        for _ in 0..4 {
            arrival
                .handle(&ctx, &arrival_event("a", "/x"))
                .expect("admitted");
            let event = ctx.queue.pop().expect("start scheduled");
            assert!(matches!(event.kind, EventKind::RequestStart { .. }));
            start.handle(&ctx, &event).expect("starts");
        }

        // Two more arrivals at distinct times land on the FIFO queue.
        ctx.clock.set(SimTime::from_millis(1.0)).unwrap();
        arrival
            .handle(&ctx, &arrival_event("a", "/x"))
            .expect("queued");
        ctx.clock.set(SimTime::from_millis(2.0)).unwrap();
        arrival
            .handle(&ctx, &arrival_event("a", "/x"))
            .expect("queued");

        let instance = ctx.resources.instances_for("a")[0].clone();
        assert_eq!(ctx.resources.queue_length(&instance), 2);
        // Only the four RequestComplete events are pending; no starts
        // were scheduled for the queued pair.
        assert_eq!(ctx.queue.len(), 4);

        // A completion wakes the oldest queued request.
        ctx.clock.set(SimTime::from_millis(11.0)).unwrap();
        let event = ctx.queue.pop().expect("completion pending");
        complete.handle(&ctx, &event).expect("completes");

        assert_eq!(ctx.resources.queue_length(&instance), 1);
        let woken = ctx
            .queue
            .pop()
            .into_iter()
            .chain(std::iter::from_fn(|| ctx.queue.pop()))
            .find(|e| matches!(e.kind, EventKind::RequestStart { .. }))
            .expect("queued request woken");
        let EventKind::RequestStart { request_id, .. } = woken.kind else {
            unreachable!();
        };
        let request = ctx.requests.get(request_id).expect("request exists");
        // FIFO: the 1ms arrival is woken before the 2ms arrival.
        assert_eq!(request.arrival_time, SimTime::from_millis(1.0));
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[test]
    fn downstream_to_unknown_service_errors() {
        let ctx = context();
        let parent = Request::arriving("a", "/x", SimTime::ZERO);
        let parent_id = parent.id;
        ctx.requests.insert(parent);

        let event = Event {
            id: maquette_types::EventId::from_raw(9),
            time: SimTime::ZERO,
            priority: 100,
            seq: 0,
            kind: EventKind::DownstreamCall {
                parent_id,
                target_service: "ghost".to_string(),
                target_path: "/".to_string(),
            },
        };
        let err = DownstreamHandler.handle(&ctx, &event).unwrap_err();
        assert!(matches!(err, SimError::UnknownService(_)));
    }

    #[test]
    fn scaling_events_adjust_replicas() {
        let ctx = context();
        let handler = ScalingHandler;

        let up = Event {
            id: maquette_types::EventId::from_raw(1),
            time: SimTime::ZERO,
            priority: 100,
            seq: 0,
            kind: EventKind::ScaleUp {
                service_id: "a".to_string(),
                replicas: 2,
            },
        };
        handler.handle(&ctx, &up).expect("scales up");
        assert_eq!(ctx.resources.instances_for("a").len(), 3);

        let down = Event {
            id: maquette_types::EventId::from_raw(2),
            time: SimTime::ZERO,
            priority: 100,
            seq: 1,
            kind: EventKind::ScaleDown {
                service_id: "a".to_string(),
                replicas: 2,
            },
        };
        handler.handle(&ctx, &down).expect("scales down");
        assert_eq!(ctx.resources.instances_for("a").len(), 1);
    }

    #[test]
    fn allocation_failure_retries_until_attempts_exhausted() {
        // 5 MB host budget cannot fit the 10 MB default charge, so every
        // start attempt fails at memory allocation.
        const TINY_HOST: &str = r#"
hosts:
  - id: h1
    cpu_cores: 2
    memory_gb: 0.005
services:
  - id: a
    replicas: 1
    endpoints:
      - path: /x
        mean_cpu_ms: 1
        cpu_sigma_ms: 0
"#;
        let mut policies = PolicySet::permissive();
        policies.retry = crate::RetryPolicy::from_spec(&maquette_scenario::RetrySpec {
            max_attempts: 3,
            backoff_ms: 5.0,
        });
        let ctx = context_with(TINY_HOST, policies);

        ArrivalHandler
            .handle(&ctx, &arrival_event("a", "/x"))
            .expect("admitted");

        let start = StartHandler;
        let mut starts_handled = 0;
        while let Some(event) = ctx.queue.pop() {
            ctx.clock.set(event.time).expect("monotonic pops");
            if matches!(event.kind, EventKind::RequestStart { .. }) {
                let _ = start.handle(&ctx, &event);
                starts_handled += 1;
            }
        }

        // First attempt plus two retries, then a terminal failure.
        assert_eq!(starts_handled, 3);
        let request = &ctx.requests.all()[0];
        assert_eq!(request.status, RequestStatus::Failed);
        assert_eq!(request.error.as_deref(), Some("memory allocation failed"));
        assert_eq!(
            request.metadata.get(meta::ATTEMPTS),
            Some(&json!(3))
        );
        assert_eq!(ctx.requests.failed(), 1);
    }

    #[test]
    fn memory_override_from_request_metadata() {
        let ctx = context();
        let mut request = Request::arriving("a", "/x", SimTime::ZERO);
        request.metadata.insert(
            meta::MEMORY_MB.to_string(),
            json!(64.0),
        );
        let id = request.id;
        ctx.requests.insert(request);

        let event = Event {
            id: maquette_types::EventId::from_raw(1),
            time: SimTime::ZERO,
            priority: 100,
            seq: 0,
            kind: EventKind::RequestStart {
                request_id: id,
                instance_id: None,
            },
        };
        StartHandler.handle(&ctx, &event).expect("starts");

        assert_eq!(
            ctx.requests.metadata(id, meta::MEMORY_MB),
            Some(json!(64.0))
        );
        let instance = ctx.resources.instances_for("a")[0].clone();
        // 64 MB of the 4096 MB host budget.
        assert!((ctx.resources.memory_utilization(&instance) - 64.0 / 4096.0).abs() < 1e-9);
    }
}

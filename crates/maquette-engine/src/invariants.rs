//! Post-run invariant auditing.
//!
//! A finished (or cancelled) run can be audited against the core's
//! correctness properties: trace linkage, terminal-state consistency,
//! non-negative samples, and resource quiescence. The auditor is used
//! by the test suite and available to callers that want a cheap sanity
//! sweep after every run.

use std::collections::HashMap;

use maquette_types::{Request, RequestId, RequestStatus};

use crate::{RequestStore, ResourceManager};

/// A detected violation of a core invariant.
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of the violation.
    pub message: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

/// Audits the request store and resource manager of one run.
#[derive(Debug, Default)]
pub struct RunAuditor;

impl RunAuditor {
    /// Runs every check and returns the violations found.
    pub fn audit(
        &self,
        requests: &RequestStore,
        resources: Option<&ResourceManager>,
    ) -> Vec<InvariantViolation> {
        let all = requests.all();
        let mut violations = Vec::new();

        violations.extend(check_trace_coherence(&all));
        violations.extend(check_terminal_consistency(&all));
        violations.extend(check_sample_bounds(&all));
        if let Some(resources) = resources {
            violations.extend(check_resource_quiescence(&all, resources));
        }

        violations
    }
}

/// Every non-root request names an existing parent and shares its trace
/// id; the chain terminates at a root.
fn check_trace_coherence(requests: &[Request]) -> Vec<InvariantViolation> {
    let by_id: HashMap<RequestId, &Request> = requests.iter().map(|r| (r.id, r)).collect();
    let mut violations = Vec::new();

    for request in requests {
        let Some(parent_id) = request.parent_id else {
            continue;
        };
        match by_id.get(&parent_id) {
            None => violations.push(InvariantViolation {
                invariant: "trace_parent_exists",
                message: format!("request {} names unknown parent {parent_id}", request.id),
            }),
            Some(parent) => {
                if parent.trace_id != request.trace_id {
                    violations.push(InvariantViolation {
                        invariant: "trace_id_inherited",
                        message: format!(
                            "request {} has trace {} but parent {} has trace {}",
                            request.id, request.trace_id, parent.id, parent.trace_id
                        ),
                    });
                }
                if parent.arrival_time > request.arrival_time {
                    violations.push(InvariantViolation {
                        invariant: "child_not_before_parent",
                        message: format!(
                            "request {} arrived at {} before its parent at {}",
                            request.id, request.arrival_time, parent.arrival_time
                        ),
                    });
                }
            }
        }
    }

    violations
}

/// Terminal requests carry a completion time; completed ones a duration
/// no smaller than their service samples would allow.
fn check_terminal_consistency(requests: &[Request]) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for request in requests {
        if !request.status.is_terminal() {
            continue;
        }
        if request.completion_time.is_none() {
            violations.push(InvariantViolation {
                invariant: "terminal_has_completion_time",
                message: format!(
                    "request {} is {} without a completion time",
                    request.id, request.status
                ),
            });
        }
        if request.status == RequestStatus::Completed {
            match request.duration_ms {
                None => violations.push(InvariantViolation {
                    invariant: "completed_has_duration",
                    message: format!("request {} completed without a duration", request.id),
                }),
                Some(duration) => {
                    let floor = request.cpu_time_ms + request.network_latency_ms;
                    // Small tolerance for float conversion through nanoseconds.
                    if duration + 1e-6 < floor {
                        violations.push(InvariantViolation {
                            invariant: "duration_covers_service_time",
                            message: format!(
                                "request {} took {duration}ms but sampled {floor}ms of service time",
                                request.id
                            ),
                        });
                    }
                }
            }
        }
        if request.status == RequestStatus::Failed && request.error.is_none() {
            violations.push(InvariantViolation {
                invariant: "failed_has_error",
                message: format!("request {} failed without an error", request.id),
            });
        }
    }

    violations
}

/// Sampled durations are never negative.
fn check_sample_bounds(requests: &[Request]) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for request in requests {
        for (name, value) in [
            ("cpu_time_ms", request.cpu_time_ms),
            ("network_latency_ms", request.network_latency_ms),
            ("queue_time_ms", request.queue_time_ms),
        ] {
            if value < 0.0 {
                violations.push(InvariantViolation {
                    invariant: "samples_non_negative",
                    message: format!("request {} has {name} = {value}", request.id),
                });
            }
        }
    }

    violations
}

/// When every request is terminal, all CPU and memory must be back at
/// zero (exactly one release per successful allocation).
fn check_resource_quiescence(
    requests: &[Request],
    resources: &ResourceManager,
) -> Vec<InvariantViolation> {
    if requests.iter().any(|r| !r.status.is_terminal()) {
        // In-flight requests legitimately hold resources.
        return Vec::new();
    }

    let mut violations = Vec::new();
    let services: std::collections::HashSet<&str> =
        requests.iter().map(|r| r.service_name.as_str()).collect();

    for service in services {
        for instance in resources.instances_for(service) {
            let cpu = resources.cpu_utilization(&instance);
            if cpu.abs() > 1e-9 {
                violations.push(InvariantViolation {
                    invariant: "cpu_conserved",
                    message: format!("instance {instance} still holds {cpu} CPU utilization"),
                });
            }
            let memory = resources.memory_utilization(&instance);
            if memory.abs() > 1e-9 {
                violations.push(InvariantViolation {
                    invariant: "memory_conserved",
                    message: format!("instance {instance} still holds {memory} memory utilization"),
                });
            }
        }
    }

    violations
}

// ============================================================================
// Tests
// ============================================================================

//! Per-run request store.
//!
//! Owns every request observed during a run. Events and instance queues
//! reference requests by id only; all mutation goes through the methods
//! here, which enforce the terminal-write invariant: once a request is
//! `Completed` or `Failed`, only its completion time, duration, and
//! error may still be written.

use std::{collections::HashMap, sync::RwLock};

use maquette_types::{Request, RequestId, RequestStatus, SimTime, TraceId};

use crate::SimError;

#[derive(Debug, Default)]
struct Inner {
    requests: HashMap<RequestId, Request>,
    completed: u64,
    failed: u64,
}

/// Thread-safe store of one run's requests.
#[derive(Debug, Default)]
pub struct RequestStore {
    inner: RwLock<Inner>,
}

impl RequestStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request.
    pub fn insert(&self, request: Request) {
        let mut inner = self.inner.write().expect("request store lock poisoned");
        inner.requests.insert(request.id, request);
    }

    /// Returns a clone of a request, if known.
    pub fn get(&self, id: RequestId) -> Option<Request> {
        let inner = self.inner.read().expect("request store lock poisoned");
        inner.requests.get(&id).cloned()
    }

    /// Transitions a pending request to `Processing` at `now`.
    pub fn mark_processing(&self, id: RequestId, now: SimTime) -> Result<(), SimError> {
        let mut inner = self.inner.write().expect("request store lock poisoned");
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or(SimError::UnknownRequest(id))?;

        if request.status.is_terminal() {
            return Err(SimError::Handler(format!(
                "request {id} is already {}",
                request.status
            )));
        }
        request.status = RequestStatus::Processing;
        request.start_time = Some(now);
        Ok(())
    }

    /// Records the sampled service times on a request.
    pub fn set_samples(
        &self,
        id: RequestId,
        cpu_time_ms: f64,
        network_latency_ms: f64,
        queue_time_ms: f64,
    ) -> Result<(), SimError> {
        let mut inner = self.inner.write().expect("request store lock poisoned");
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or(SimError::UnknownRequest(id))?;

        if request.status.is_terminal() {
            return Err(SimError::Handler(format!(
                "request {id} is already {}",
                request.status
            )));
        }
        request.cpu_time_ms = cpu_time_ms;
        request.network_latency_ms = network_latency_ms;
        request.queue_time_ms = queue_time_ms;
        Ok(())
    }

    /// Writes a metadata entry on a request.
    pub fn set_metadata(
        &self,
        id: RequestId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), SimError> {
        let mut inner = self.inner.write().expect("request store lock poisoned");
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or(SimError::UnknownRequest(id))?;

        if request.status.is_terminal() {
            return Err(SimError::Handler(format!(
                "request {id} is already {}",
                request.status
            )));
        }
        request.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Reads a metadata entry from a request.
    pub fn metadata(&self, id: RequestId, key: &str) -> Option<serde_json::Value> {
        let inner = self.inner.read().expect("request store lock poisoned");
        inner
            .requests
            .get(&id)
            .and_then(|request| request.metadata.get(key).cloned())
    }

    /// Transitions a request to `Completed` at `now`, setting its
    /// completion time and duration. Returns the final snapshot.
    pub fn mark_completed(&self, id: RequestId, now: SimTime) -> Result<Request, SimError> {
        let mut inner = self.inner.write().expect("request store lock poisoned");
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or(SimError::UnknownRequest(id))?;

        if request.status.is_terminal() {
            return Err(SimError::Handler(format!(
                "request {id} is already {}",
                request.status
            )));
        }
        request.status = RequestStatus::Completed;
        request.completion_time = Some(now);
        request.duration_ms = Some(maquette_types::ns_to_ms(
            now.saturating_since(request.arrival_time),
        ));
        let snapshot = request.clone();
        inner.completed += 1;
        Ok(snapshot)
    }

    /// Transitions a request to `Failed` at `now` with an error message.
    ///
    /// Failing an already-terminal request only updates the error field,
    /// per the terminal-write invariant.
    pub fn mark_failed(&self, id: RequestId, now: SimTime, error: &str) -> Result<(), SimError> {
        let mut inner = self.inner.write().expect("request store lock poisoned");
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or(SimError::UnknownRequest(id))?;

        if request.status.is_terminal() {
            request.error = Some(error.to_string());
            return Ok(());
        }
        request.status = RequestStatus::Failed;
        request.completion_time = Some(now);
        request.duration_ms = Some(maquette_types::ns_to_ms(
            now.saturating_since(request.arrival_time),
        ));
        request.error = Some(error.to_string());
        inner.failed += 1;
        Ok(())
    }

    /// Total requests observed.
    pub fn total(&self) -> u64 {
        let inner = self.inner.read().expect("request store lock poisoned");
        inner.requests.len() as u64
    }

    /// Requests that completed successfully.
    pub fn completed(&self) -> u64 {
        let inner = self.inner.read().expect("request store lock poisoned");
        inner.completed
    }

    /// Requests that failed.
    pub fn failed(&self) -> u64 {
        let inner = self.inner.read().expect("request store lock poisoned");
        inner.failed
    }

    /// Returns clones of all requests, for inspection and tests.
    pub fn all(&self) -> Vec<Request> {
        let inner = self.inner.read().expect("request store lock poisoned");
        inner.requests.values().cloned().collect()
    }

    /// Returns every request in a trace, ordered by arrival time.
    pub fn trace_requests(&self, trace_id: TraceId) -> Vec<Request> {
        let inner = self.inner.read().expect("request store lock poisoned");
        let mut requests: Vec<Request> = inner
            .requests
            .values()
            .filter(|request| request.trace_id == trace_id)
            .cloned()
            .collect();
        requests.sort_by_key(|request| (request.arrival_time, request.id));
        requests
    }

    /// Returns the direct children of a request, ordered by arrival time.
    pub fn children_of(&self, id: RequestId) -> Vec<Request> {
        let inner = self.inner.read().expect("request store lock poisoned");
        let mut children: Vec<Request> = inner
            .requests
            .values()
            .filter(|request| request.parent_id == Some(id))
            .cloned()
            .collect();
        children.sort_by_key(|request| (request.arrival_time, request.id));
        children
    }

    /// Summarizes the shape and outcome of one trace.
    ///
    /// Returns `None` when no request carries the trace id.
    pub fn trace_summary(&self, trace_id: TraceId) -> Option<TraceSummary> {
        let requests = self.trace_requests(trace_id);
        if requests.is_empty() {
            return None;
        }

        let root_id = requests
            .iter()
            .find(|request| request.parent_id.is_none())
            .map(|request| request.id);

        let mut parent_of = HashMap::new();
        for request in &requests {
            parent_of.insert(request.id, request.parent_id);
        }
        let mut depth = 1;
        for request in &requests {
            let mut hops = 1;
            let mut current = request.parent_id;
            while let Some(parent) = current {
                hops += 1;
                current = parent_of.get(&parent).copied().flatten();
            }
            depth = depth.max(hops);
        }

        Some(TraceSummary {
            trace_id,
            root_id,
            request_count: requests.len(),
            depth,
            completed: requests
                .iter()
                .filter(|r| r.status == RequestStatus::Completed)
                .count(),
            failed: requests
                .iter()
                .filter(|r| r.status == RequestStatus::Failed)
                .count(),
        })
    }
}

/// Shape and outcome of one trace.
#[derive(Debug, Clone)]
pub struct TraceSummary {
    /// The trace id.
    pub trace_id: TraceId,
    /// The root request, if it was observed.
    pub root_id: Option<RequestId>,
    /// Requests in the trace.
    pub request_count: usize,
    /// Longest root-to-leaf chain.
    pub depth: usize,
    /// Requests that completed.
    pub completed: usize,
    /// Requests that failed.
    pub failed: usize,
}

// ============================================================================
// Tests
// ============================================================================

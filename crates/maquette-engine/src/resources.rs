//! Hosts, service instances, and resource accounting.
//!
//! The resource manager owns the simulated fleet for one run: hosts from
//! the scenario, one instance per service replica placed round-robin
//! across hosts, CPU and memory accounting, and the per-instance FIFO
//! queues that provide backpressure when instances saturate.
//!
//! # CPU model
//!
//! CPU is accounted as outstanding work: `allocate_cpu` adds a request's
//! sampled CPU milliseconds to the instance's outstanding counter and
//! `release_cpu` subtracts the same charge on completion. Utilization is
//! `outstanding_ms / (cpu_cores × window_ms)` clamped to `[0, 1]`, with a
//! 1-second reference window.
//!
//! # Memory model
//!
//! Instances on a host share the host's budget (`memory_gb × 1024` MB).
//! An allocation that would exceed the budget fails; an instance's memory
//! utilization is its allocated share of the host budget.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use maquette_scenario::Scenario;
use maquette_types::{HostId, InstanceId, RequestId, SimTime};

use crate::SimError;

/// Tunables for capacity and utilization accounting.
#[derive(Debug, Clone)]
pub struct ResourceSettings {
    /// An instance has capacity while
    /// `active_requests < cpu_cores × saturation_factor`.
    pub saturation_factor: f64,

    /// Reference window for CPU utilization, in milliseconds.
    pub cpu_window_ms: f64,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            saturation_factor: 2.0,
            cpu_window_ms: 1_000.0,
        }
    }
}

#[derive(Debug)]
struct HostState {
    id: HostId,
    cpu_cores: u32,
    memory_budget_mb: f64,
    allocated_memory_mb: f64,
    instances: Vec<InstanceId>,
}

#[derive(Debug)]
struct InstanceState {
    id: InstanceId,
    service_name: String,
    host_id: HostId,
    cpu_cores: u32,
    outstanding_cpu_ms: f64,
    allocated_memory_mb: f64,
    active_requests: u32,
    /// Admissions whose `RequestStart` has not yet executed. Counted by
    /// the capacity check so a same-instant burst cannot over-admit.
    committed_requests: u32,
    queue: VecDeque<RequestId>,
    start_time: SimTime,
}

/// Aggregate load of one service across its instances.
#[derive(Debug, Clone)]
pub struct ServiceLoad {
    /// Service id.
    pub service: String,
    /// Number of live instances.
    pub instance_count: usize,
    /// Mean CPU utilization over the instances, in `[0, 1]`.
    pub mean_cpu_utilization: f64,
    /// Sum of FIFO queue depths across the instances.
    pub total_queue_length: usize,
    /// Sum of in-flight requests across the instances.
    pub total_active_requests: u32,
}

/// Read-only view of one instance, for metrics labels and inspection.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub service_name: String,
    pub host_id: HostId,
    pub cpu_cores: u32,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub active_requests: u32,
    pub queue_length: usize,
    pub start_time: SimTime,
}

#[derive(Debug, Default)]
struct Inner {
    hosts: HashMap<HostId, HostState>,
    host_order: Vec<HostId>,
    instances: HashMap<InstanceId, InstanceState>,
    by_service: HashMap<String, Vec<InstanceId>>,
    round_robin: HashMap<String, usize>,
    next_replica_index: HashMap<String, usize>,
    placement_cursor: usize,
}

/// Resource manager for one run.
pub struct ResourceManager {
    settings: ResourceSettings,
    inner: Mutex<Inner>,
}

impl ResourceManager {
    /// Builds hosts and instances from a scenario.
    ///
    /// Fails when the scenario declares no hosts; every replica of every
    /// service is placed round-robin across the host list.
    pub fn from_scenario(
        scenario: &Scenario,
        settings: ResourceSettings,
    ) -> Result<Self, SimError> {
        if scenario.hosts.is_empty() {
            return Err(SimError::ResourceInit(
                "scenario declares no hosts".to_string(),
            ));
        }

        let mut inner = Inner::default();
        for host in &scenario.hosts {
            let id = HostId::from(host.id.as_str());
            inner.host_order.push(id.clone());
            inner.hosts.insert(
                id.clone(),
                HostState {
                    id,
                    cpu_cores: host.cpu_cores,
                    memory_budget_mb: host.memory_gb * 1024.0,
                    allocated_memory_mb: 0.0,
                    instances: Vec::new(),
                },
            );
        }

        let manager = Self {
            settings,
            inner: Mutex::new(inner),
        };

        for service in &scenario.services {
            let placed = manager.add_instances(&service.id, service.replicas as usize)?;
            if placed.is_empty() && service.replicas > 0 {
                return Err(SimError::ResourceInit(format!(
                    "could not place instances for service {:?}",
                    service.id
                )));
            }
        }

        Ok(manager)
    }

    /// Adds `count` fresh instances for a service, placed round-robin
    /// across hosts. Returns the new instance ids.
    pub fn add_instances(&self, service: &str, count: usize) -> Result<Vec<InstanceId>, SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        if inner.host_order.is_empty() {
            return Err(SimError::ResourceInit("no hosts available".to_string()));
        }

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let replica_index = {
                let next = inner.next_replica_index.entry(service.to_string()).or_insert(0);
                let current = *next;
                *next += 1;
                current
            };

            let host_id = {
                let cursor = inner.placement_cursor % inner.host_order.len();
                inner.placement_cursor += 1;
                inner.host_order[cursor].clone()
            };
            let cpu_cores = inner
                .hosts
                .get(&host_id)
                .map(|h| h.cpu_cores)
                .unwrap_or(1);

            let id = InstanceId::for_replica(service, replica_index);
            inner
                .hosts
                .get_mut(&host_id)
                .expect("host exists")
                .instances
                .push(id.clone());
            inner
                .by_service
                .entry(service.to_string())
                .or_default()
                .push(id.clone());
            inner.instances.insert(
                id.clone(),
                InstanceState {
                    id: id.clone(),
                    service_name: service.to_string(),
                    host_id,
                    cpu_cores,
                    outstanding_cpu_ms: 0.0,
                    allocated_memory_mb: 0.0,
                    active_requests: 0,
                    committed_requests: 0,
                    queue: VecDeque::new(),
                    start_time: SimTime::ZERO,
                },
            );
            created.push(id);
        }

        Ok(created)
    }

    /// Removes up to `count` idle instances of a service (no active
    /// requests, empty queue). Returns how many were removed.
    pub fn remove_instances(&self, service: &str, count: usize) -> usize {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");

        let Some(ids) = inner.by_service.get(service).cloned() else {
            return 0;
        };

        let mut removed = 0;
        for id in ids.iter().rev() {
            if removed == count {
                break;
            }
            let idle = inner
                .instances
                .get(id)
                .is_some_and(|i| i.active_requests == 0 && i.queue.is_empty());
            if !idle {
                continue;
            }

            if let Some(state) = inner.instances.remove(id) {
                if let Some(host) = inner.hosts.get_mut(&state.host_id) {
                    host.instances.retain(|i| i != id);
                    host.allocated_memory_mb =
                        (host.allocated_memory_mb - state.allocated_memory_mb).max(0.0);
                }
                if let Some(list) = inner.by_service.get_mut(service) {
                    list.retain(|i| i != id);
                }
                removed += 1;
            }
        }

        removed
    }

    /// Selects an instance for a service, round-robin over its replicas.
    pub fn select_instance(&self, service: &str) -> Result<InstanceId, SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");

        let Some(ids) = inner.by_service.get(service) else {
            return Err(SimError::NoInstanceAvailable {
                service: service.to_string(),
            });
        };
        if ids.is_empty() {
            return Err(SimError::NoInstanceAvailable {
                service: service.to_string(),
            });
        }

        let len = ids.len();
        let cursor = inner.round_robin.entry(service.to_string()).or_insert(0);
        let index = *cursor % len;
        *cursor = (*cursor + 1) % len;

        Ok(inner.by_service[service][index].clone())
    }

    /// Returns true if the instance can admit another request without
    /// queueing: in-flight plus committed admissions stay below
    /// `cpu_cores × saturation_factor`.
    pub fn has_capacity(&self, instance: &InstanceId) -> bool {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner.instances.get(instance).is_some_and(|state| {
            f64::from(state.active_requests + state.committed_requests)
                < f64::from(state.cpu_cores) * self.settings.saturation_factor
        })
    }

    /// Reserves an admission slot for a request whose start is scheduled
    /// but not yet executed. The reservation is consumed by
    /// [`ResourceManager::allocate_cpu`].
    pub fn commit_admission(&self, instance: &InstanceId) -> Result<(), SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        let state = inner
            .instances
            .get_mut(instance)
            .ok_or_else(|| SimError::UnknownInstance(instance.to_string()))?;
        state.committed_requests += 1;
        Ok(())
    }

    /// Charges `cpu_ms` of work to an instance and marks one more request
    /// active, consuming its admission reservation if one exists.
    pub fn allocate_cpu(&self, instance: &InstanceId, cpu_ms: f64) -> Result<(), SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        let state = inner
            .instances
            .get_mut(instance)
            .ok_or_else(|| SimError::UnknownInstance(instance.to_string()))?;

        state.outstanding_cpu_ms += cpu_ms.max(0.0);
        state.active_requests += 1;
        state.committed_requests = state.committed_requests.saturating_sub(1);
        Ok(())
    }

    /// Returns a previously charged CPU allocation.
    pub fn release_cpu(&self, instance: &InstanceId, cpu_ms: f64) -> Result<(), SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        let state = inner
            .instances
            .get_mut(instance)
            .ok_or_else(|| SimError::UnknownInstance(instance.to_string()))?;

        state.outstanding_cpu_ms = (state.outstanding_cpu_ms - cpu_ms.max(0.0)).max(0.0);
        state.active_requests = state.active_requests.saturating_sub(1);
        Ok(())
    }

    /// Allocates memory on the instance's host.
    ///
    /// Fails with `CapacityExceeded` when the host budget would overflow.
    pub fn allocate_memory(&self, instance: &InstanceId, memory_mb: f64) -> Result<(), SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        let host_id = inner
            .instances
            .get(instance)
            .map(|state| state.host_id.clone())
            .ok_or_else(|| SimError::UnknownInstance(instance.to_string()))?;

        let host = inner.hosts.get_mut(&host_id).expect("host exists");
        if host.allocated_memory_mb + memory_mb > host.memory_budget_mb {
            return Err(SimError::CapacityExceeded {
                scope: format!("host {}", host.id),
                detail: format!(
                    "requested {memory_mb} MB with {:.1}/{:.1} MB allocated",
                    host.allocated_memory_mb, host.memory_budget_mb
                ),
            });
        }
        host.allocated_memory_mb += memory_mb;

        let state = inner.instances.get_mut(instance).expect("instance exists");
        state.allocated_memory_mb += memory_mb;
        Ok(())
    }

    /// Returns a previously allocated memory charge.
    pub fn release_memory(&self, instance: &InstanceId, memory_mb: f64) -> Result<(), SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        let host_id = inner
            .instances
            .get(instance)
            .map(|state| state.host_id.clone())
            .ok_or_else(|| SimError::UnknownInstance(instance.to_string()))?;

        if let Some(host) = inner.hosts.get_mut(&host_id) {
            host.allocated_memory_mb = (host.allocated_memory_mb - memory_mb).max(0.0);
        }
        let state = inner.instances.get_mut(instance).expect("instance exists");
        state.allocated_memory_mb = (state.allocated_memory_mb - memory_mb).max(0.0);
        Ok(())
    }

    /// Appends a request id to the instance's FIFO queue.
    pub fn enqueue_request(
        &self,
        instance: &InstanceId,
        request_id: RequestId,
    ) -> Result<(), SimError> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        let state = inner
            .instances
            .get_mut(instance)
            .ok_or_else(|| SimError::UnknownInstance(instance.to_string()))?;
        state.queue.push_back(request_id);
        Ok(())
    }

    /// Removes and returns the oldest queued request id, if any.
    ///
    /// Dequeuing from an empty queue (or an unknown instance) is a no-op
    /// returning `None`.
    pub fn dequeue_request(&self, instance: &InstanceId) -> Option<RequestId> {
        let mut inner = self.inner.lock().expect("resource mutex poisoned");
        inner
            .instances
            .get_mut(instance)
            .and_then(|state| state.queue.pop_front())
    }

    /// Returns the instance's queue depth (zero for unknown instances).
    pub fn queue_length(&self, instance: &InstanceId) -> usize {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner
            .instances
            .get(instance)
            .map_or(0, |state| state.queue.len())
    }

    /// Returns the instance's CPU utilization in `[0, 1]`.
    pub fn cpu_utilization(&self, instance: &InstanceId) -> f64 {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner.instances.get(instance).map_or(0.0, |state| {
            let capacity = f64::from(state.cpu_cores) * self.settings.cpu_window_ms;
            (state.outstanding_cpu_ms / capacity).clamp(0.0, 1.0)
        })
    }

    /// Returns the instance's memory utilization (its share of the host
    /// budget) in `[0, 1]`.
    pub fn memory_utilization(&self, instance: &InstanceId) -> f64 {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        let Some(state) = inner.instances.get(instance) else {
            return 0.0;
        };
        let Some(host) = inner.hosts.get(&state.host_id) else {
            return 0.0;
        };
        (state.allocated_memory_mb / host.memory_budget_mb).clamp(0.0, 1.0)
    }

    /// Returns the host's memory utilization in `[0, 1]`.
    pub fn host_memory_utilization(&self, host: &HostId) -> f64 {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner.hosts.get(host).map_or(0.0, |state| {
            (state.allocated_memory_mb / state.memory_budget_mb).clamp(0.0, 1.0)
        })
    }

    /// Returns a read-only snapshot of an instance.
    pub fn snapshot(&self, instance: &InstanceId) -> Option<InstanceSnapshot> {
        let cpu = self.cpu_utilization(instance);
        let memory = self.memory_utilization(instance);
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner.instances.get(instance).map(|state| InstanceSnapshot {
            id: state.id.clone(),
            service_name: state.service_name.clone(),
            host_id: state.host_id.clone(),
            cpu_cores: state.cpu_cores,
            cpu_usage: cpu,
            memory_usage: memory,
            active_requests: state.active_requests,
            queue_length: state.queue.len(),
            start_time: state.start_time,
        })
    }

    /// Returns the aggregate load of a service, or `None` when it has no
    /// instances.
    pub fn service_load(&self, service: &str) -> Option<ServiceLoad> {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        let ids = inner.by_service.get(service)?;
        if ids.is_empty() {
            return None;
        }

        let mut cpu_total = 0.0;
        let mut queue_total = 0;
        let mut active_total = 0;
        for id in ids {
            if let Some(state) = inner.instances.get(id) {
                let capacity = f64::from(state.cpu_cores) * self.settings.cpu_window_ms;
                cpu_total += (state.outstanding_cpu_ms / capacity).clamp(0.0, 1.0);
                queue_total += state.queue.len();
                active_total += state.active_requests;
            }
        }

        Some(ServiceLoad {
            service: service.to_string(),
            instance_count: ids.len(),
            mean_cpu_utilization: cpu_total / ids.len() as f64,
            total_queue_length: queue_total,
            total_active_requests: active_total,
        })
    }

    /// Returns the instance ids currently serving a service.
    pub fn instances_for(&self, service: &str) -> Vec<InstanceId> {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner.by_service.get(service).cloned().unwrap_or_default()
    }

    /// Returns the number of hosts.
    pub fn host_count(&self) -> usize {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner.hosts.len()
    }

    /// Returns the number of instances across all services.
    pub fn instance_count(&self) -> usize {
        let inner = self.inner.lock().expect("resource mutex poisoned");
        inner.instances.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
